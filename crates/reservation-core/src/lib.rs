//! Core domain library for the reservation manager.
//!
//! Wires together the state machines ([`status`]), the typed store gateway
//! ([`store`]), the plugin registry ([`plugin`]), the notification emitter
//! ([`notification`]), and the three components that drive a lease through
//! its lifecycle: the RPC-facing [`orchestrator`], the periodic
//! [`scheduler`], and the per-event [`executor`].

pub mod clock;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod model;
pub mod notification;
pub mod orchestrator;
pub mod plugin;
pub mod scheduler;
pub mod status;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::Dispatcher;
pub use executor::Executor;
pub use model::{Event, EventType, Lease, LeaseView, Reservation};
pub use notification::{Notification, NotificationEmitter, NotificationSink};
pub use orchestrator::{LeaseOrchestrator, ManagerConfig};
pub use plugin::{PluginFactory, PluginRegistry, ResourcePlugin};
pub use scheduler::Scheduler;
pub use status::{EventStatus, LeaseStatus, ReservationStatus};
pub use store::Store;
