//! The bundled no-op resource plugin, configured by default as
//! `dummy.vm.plugin`.
//!
//! Mirrors `blazar`'s `dummy_vm_plugin`: it doesn't talk to any external
//! service, it just logs each lifecycle callback and succeeds. Useful as
//! the out-of-the-box default and as the plugin every orchestrator test
//! exercises against.

use std::sync::Arc;

use async_trait::async_trait;
use reservation_core::error::PluginError;
use reservation_core::{Reservation, ResourcePlugin};
use serde_json::Value;
use uuid::Uuid;

/// Resource type this plugin claims.
pub const RESOURCE_TYPE: &str = "dummy";

#[derive(Debug, Default)]
pub struct DummyPlugin;

#[async_trait]
impl ResourcePlugin for DummyPlugin {
    fn resource_type(&self) -> &str {
        RESOURCE_TYPE
    }

    async fn reserve_resource(&self, reservation: &Reservation) -> Result<String, PluginError> {
        let resource_id = format!("dummy-{}", Uuid::new_v4());
        tracing::info!(
            reservation_id = %reservation.id,
            lease_id = %reservation.lease_id,
            resource_id = %resource_id,
            "dummy plugin allocated resource"
        );
        Ok(resource_id)
    }

    async fn update_reservation(&self, reservation: &Reservation) -> Result<(), PluginError> {
        tracing::info!(reservation_id = %reservation.id, "dummy plugin applied reservation update");
        Ok(())
    }

    async fn on_start(&self, reservation: &Reservation) -> Result<(), PluginError> {
        tracing::info!(reservation_id = %reservation.id, "dummy plugin started resource");
        Ok(())
    }

    async fn on_end(&self, reservation: &Reservation) -> Result<(), PluginError> {
        tracing::info!(reservation_id = %reservation.id, "dummy plugin ended resource");
        Ok(())
    }

    async fn before_end(&self, reservation: &Reservation) -> Result<(), PluginError> {
        tracing::info!(reservation_id = %reservation.id, "dummy plugin before_end notification");
        Ok(())
    }

    async fn delete_reservation(&self, reservation: &Reservation) -> Result<(), PluginError> {
        tracing::info!(reservation_id = %reservation.id, "dummy plugin released resource");
        Ok(())
    }

    fn get_plugin_opts(&self) -> Value {
        serde_json::json!({ "resource_type": RESOURCE_TYPE })
    }
}

/// Factory function registered under the config name `dummy.vm.plugin`.
#[must_use]
pub fn create() -> Arc<dyn ResourcePlugin> {
    Arc::new(DummyPlugin)
}
