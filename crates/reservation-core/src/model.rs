//! Domain record types: leases, reservations, and events.
//!
//! These mirror the row shapes persisted by the store gateway
//! ([`crate::store::Store`]).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::{EventStatus, LeaseStatus, ReservationStatus};

/// A time-bounded request for one or more resources.
///
/// The aggregate root of the domain model — a lease owns its reservations
/// and the events that drive them through their lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub id: Uuid,
    pub name: String,
    pub user_id: String,
    pub project_id: String,
    /// Keystone/identity trust used to act on the user's behalf during
    /// lifecycle events. Required at creation.
    pub trust_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: LeaseStatus,
    /// Free-form key-value metadata attached at creation time.
    pub extra: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lease {
    /// The instant the `before_end` notification event should fire,
    /// clamped so it never precedes `start_date`.
    #[must_use]
    pub fn before_end_date(&self, minutes_before_end: i64) -> DateTime<Utc> {
        let candidate = self.end_date - chrono::Duration::minutes(minutes_before_end);
        if candidate < self.start_date {
            self.start_date
        } else {
            candidate
        }
    }
}

/// A claim on a single resource type within a lease.
///
/// One lease may hold several reservations (e.g. two disjoint instance
/// pools), each dispatched to the plugin registered for its
/// `resource_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub lease_id: Uuid,
    pub resource_type: String,
    pub status: ReservationStatus,
    /// Plugin-specific reservation values (e.g. flavor id, instance count)
    /// stored opaquely and handed back to the plugin on every callback.
    pub resource_properties: serde_json::Value,
    /// The resource-level identifier a plugin allocates on
    /// `reserve_resource` (e.g. an aggregate id). Absent until the plugin
    /// has run at least once.
    pub resource_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The kind of lifecycle transition an event drives.
///
/// Closed set — the executor's dispatch table ([`crate::executor`]) is
/// exhaustive over this enum rather than using dynamic lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Fires at `start_date`; transitions the lease to `ACTIVE`.
    Start,
    /// Fires at `end_date`; transitions the lease to `TERMINATED`.
    End,
    /// Fires at `before_end_date`; gives plugins a chance to warn
    /// tenants ahead of expiry without ending the lease.
    BeforeEnd,
}

/// A scheduled point-in-time action against a lease.
///
/// The unit of work the scheduler claims and the executor runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub lease_id: Uuid,
    pub event_type: EventType,
    pub time: DateTime<Utc>,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A lease together with its reservations, as returned by read operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseView {
    #[serde(flatten)]
    pub lease: Lease,
    pub reservations: Vec<Reservation>,
}
