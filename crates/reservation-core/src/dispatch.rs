//! RPC dispatcher shim.
//!
//! Arbitrary method names route to either the manager service or, for
//! resource-scoped calls, a `<resource_type>:<method>` convention. Both
//! routes are explicit tables rather than dynamic lookup:
//! [`OrchestratorMethod`] covers the manager surface, [`PluginMethod`] is a
//! restricted enum of what a plugin may be asked to do directly.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::error::{DispatchError, OrchestratorError};
use crate::executor::Executor;
use crate::orchestrator::{CreateLeaseValues, LeaseOrchestrator, UpdateLeaseValues};
use crate::plugin::PluginRegistry;

/// A plugin-level method reachable through `<resource_type>:<method>`,
/// given a `reservation_id` in the payload identifying which reservation
/// to run it against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginMethod {
    ReserveResource,
    UpdateReservation,
    OnStart,
    OnEnd,
    BeforeEnd,
}

impl FromStr for PluginMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserve_resource" => Ok(Self::ReserveResource),
            "update_reservation" => Ok(Self::UpdateReservation),
            "on_start" => Ok(Self::OnStart),
            "on_end" => Ok(Self::OnEnd),
            "before_end" => Ok(Self::BeforeEnd),
            _ => Err(()),
        }
    }
}

/// A manager-level method reachable by its bare name.
///
/// `StartLease`/`EndLease`/`BeforeEndLease` are part of the wire contract
/// but are, in practice, only ever invoked by the scheduler
/// against a specific due event rather than by an external RPC caller —
/// exposing them here lets an operator replay a stuck event by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorMethod {
    GetLease,
    ListLeases,
    CreateLease,
    UpdateLease,
    DeleteLease,
    StartLease,
    EndLease,
    BeforeEndLease,
}

impl FromStr for OrchestratorMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get_lease" => Ok(Self::GetLease),
            "list_leases" => Ok(Self::ListLeases),
            "create_lease" => Ok(Self::CreateLease),
            "update_lease" => Ok(Self::UpdateLease),
            "delete_lease" => Ok(Self::DeleteLease),
            "start_lease" => Ok(Self::StartLease),
            "end_lease" => Ok(Self::EndLease),
            "before_end_lease" => Ok(Self::BeforeEndLease),
            _ => Err(()),
        }
    }
}

/// Routes a bare RPC method name (as received over the wire) to either the
/// orchestrator's method table or a `<resource_type>:<method>` plugin call.
pub struct Dispatcher {
    orchestrator: Arc<LeaseOrchestrator>,
    plugins: Arc<PluginRegistry>,
    executor: Arc<Executor>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(orchestrator: Arc<LeaseOrchestrator>, plugins: Arc<PluginRegistry>, executor: Arc<Executor>) -> Self {
        Self {
            orchestrator,
            plugins,
            executor,
        }
    }

    /// Dispatch a method name with a JSON payload and return its JSON
    /// result.
    ///
    /// `method` is either a bare orchestrator method (`"create_lease"`) or
    /// a `<resource_type>:<method>` plugin call (`"virtual:instance:
    /// on_start"`, with a `reservation_id` in `payload` — the resource type
    /// itself may contain `:`, so splitting happens from the right).
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownMethod`] if `method` matches
    /// neither table, [`DispatchError::UnsupportedResourceType`] /
    /// [`DispatchError::UnknownPluginMethod`] for a malformed plugin call,
    /// [`DispatchError::InvalidPayload`] if `payload` doesn't match what
    /// the target expects, or [`DispatchError::Orchestrator`] if the
    /// dispatched call itself fails.
    pub async fn dispatch(&self, method: &str, payload: Value) -> Result<Value, DispatchError> {
        if let Ok(orchestrator_method) = OrchestratorMethod::from_str(method) {
            return self.dispatch_orchestrator(orchestrator_method, payload).await;
        }

        if let Some((resource_type, plugin_method)) = method.rsplit_once(':') {
            return self.dispatch_plugin(resource_type, plugin_method, payload).await;
        }

        Err(DispatchError::UnknownMethod {
            method: method.to_owned(),
        })
    }

    async fn dispatch_plugin(&self, resource_type: &str, method: &str, payload: Value) -> Result<Value, DispatchError> {
        let invalid_payload = |reason: String| DispatchError::InvalidPayload { reason };

        let plugin_method =
            PluginMethod::from_str(method).map_err(|()| DispatchError::UnknownPluginMethod {
                method: method.to_owned(),
            })?;

        let plugin = self
            .plugins
            .get(resource_type)
            .map_err(|_| DispatchError::UnsupportedResourceType {
                resource_type: resource_type.to_owned(),
            })?;

        let reservation_id: Uuid = parse_field(&payload, "reservation_id", invalid_payload)?;
        let reservation = self
            .orchestrator
            .store()
            .get_reservation(reservation_id)
            .await
            .map_err(OrchestratorError::from)
            .map_err(map_orch)?;

        match plugin_method {
            PluginMethod::ReserveResource => {
                let resource_id = plugin
                    .reserve_resource(&reservation)
                    .await
                    .map_err(|e| map_orch(OrchestratorError::from(e)))?;
                Ok(serde_json::json!({ "resource_id": resource_id }))
            }
            PluginMethod::UpdateReservation => {
                plugin
                    .update_reservation(&reservation)
                    .await
                    .map_err(|e| map_orch(OrchestratorError::from(e)))?;
                Ok(Value::Null)
            }
            PluginMethod::OnStart => {
                plugin
                    .on_start(&reservation)
                    .await
                    .map_err(|e| map_orch(OrchestratorError::from(e)))?;
                Ok(Value::Null)
            }
            PluginMethod::OnEnd => {
                plugin
                    .on_end(&reservation)
                    .await
                    .map_err(|e| map_orch(OrchestratorError::from(e)))?;
                Ok(Value::Null)
            }
            PluginMethod::BeforeEnd => {
                plugin
                    .before_end(&reservation)
                    .await
                    .map_err(|e| map_orch(OrchestratorError::from(e)))?;
                Ok(Value::Null)
            }
        }
    }

    async fn dispatch_orchestrator(
        &self,
        method: OrchestratorMethod,
        payload: Value,
    ) -> Result<Value, DispatchError> {
        let invalid_payload = |reason: String| DispatchError::InvalidPayload { reason };

        match method {
            OrchestratorMethod::GetLease => {
                let lease_id: Uuid = parse_field(&payload, "lease_id", invalid_payload)?;
                let view = self.orchestrator.get_lease(lease_id).await.map_err(map_orch)?;
                serde_json::to_value(view).map_err(|e| invalid_payload(e.to_string()))
            }
            OrchestratorMethod::ListLeases => {
                let views = self.orchestrator.list_leases(None).await.map_err(map_orch)?;
                serde_json::to_value(views).map_err(|e| invalid_payload(e.to_string()))
            }
            OrchestratorMethod::CreateLease => {
                let values: CreateLeaseValues =
                    deserialize_create_lease(&payload).map_err(invalid_payload)?;
                let view = self.orchestrator.create_lease(values).await.map_err(map_orch)?;
                serde_json::to_value(view).map_err(|e| invalid_payload(e.to_string()))
            }
            OrchestratorMethod::UpdateLease => {
                let lease_id: Uuid = parse_field(&payload, "lease_id", invalid_payload)?;
                let values: UpdateLeaseValues =
                    deserialize_update_lease(&payload).map_err(invalid_payload)?;
                let view = self
                    .orchestrator
                    .update_lease(lease_id, values)
                    .await
                    .map_err(map_orch)?;
                serde_json::to_value(view).map_err(|e| invalid_payload(e.to_string()))
            }
            OrchestratorMethod::DeleteLease => {
                let lease_id: Uuid = parse_field(&payload, "lease_id", invalid_payload)?;
                self.orchestrator.delete_lease(lease_id).await.map_err(map_orch)?;
                Ok(Value::Null)
            }
            OrchestratorMethod::StartLease | OrchestratorMethod::EndLease | OrchestratorMethod::BeforeEndLease => {
                let lease_id: Uuid = parse_field(&payload, "lease_id", invalid_payload)?;
                let event_id: Uuid = parse_field(&payload, "event_id", invalid_payload)?;
                let event = self
                    .orchestrator
                    .store()
                    .get_event(event_id)
                    .await
                    .map_err(OrchestratorError::from)
                    .map_err(map_orch)?;
                if event.lease_id != lease_id {
                    return Err(invalid_payload(format!(
                        "event {event_id} does not belong to lease {lease_id}"
                    )));
                }
                self.executor.execute(&event).await.map_err(map_orch)?;
                Ok(Value::Null)
            }
        }
    }
}

fn map_orch(err: OrchestratorError) -> DispatchError {
    DispatchError::Orchestrator(err)
}

fn parse_field<T: serde::de::DeserializeOwned>(
    payload: &Value,
    field: &str,
    invalid_payload: impl Fn(String) -> DispatchError,
) -> Result<T, DispatchError> {
    let value = payload
        .get(field)
        .ok_or_else(|| invalid_payload(format!("missing field '{field}'")))?;
    serde_json::from_value(value.clone()).map_err(|e| invalid_payload(e.to_string()))
}

fn deserialize_create_lease(payload: &Value) -> Result<CreateLeaseValues, String> {
    serde_json::from_value(payload.clone()).map_err(|e| e.to_string())
}

fn deserialize_update_lease(payload: &Value) -> Result<UpdateLeaseValues, String> {
    serde_json::from_value(payload.clone()).map_err(|e| e.to_string())
}
