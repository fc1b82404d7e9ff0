//! Resource plugins and the registry that loads them.
//!
//! A [`ResourcePlugin`] owns everything specific to one `resource_type` —
//! allocating the underlying resource, reacting to lease lifecycle events,
//! and describing its own configuration. The registry resolves a
//! `resource_type` string to a plugin, including a duplicate-registration
//! check at load time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::PluginError;
use crate::model::Reservation;

/// A handler for one kind of reservable resource.
///
/// Implementations are expected to be cheap to clone (wrap their own state
/// in `Arc` internally if needed) since the registry hands out `Arc<dyn
/// ResourcePlugin>` freely.
#[async_trait]
pub trait ResourcePlugin: Send + Sync {
    /// The resource type this plugin handles, e.g. `"physical:host"` or
    /// `"virtual:instance"`. Must be unique across the registry.
    fn resource_type(&self) -> &str;

    /// Allocate the underlying resource for a newly created reservation.
    ///
    /// Called once, from `create_lease`, before the lease is persisted as
    /// `ACTIVE`-pending. Returns the plugin-assigned resource
    /// id to store on the reservation.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Operation`] if the underlying resource
    /// cannot be allocated.
    async fn reserve_resource(&self, reservation: &Reservation) -> Result<String, PluginError>;

    /// Apply a change to an existing reservation's properties.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Operation`] if the update cannot be applied.
    async fn update_reservation(&self, reservation: &Reservation) -> Result<(), PluginError>;

    /// React to the reservation's lease entering `ACTIVE` status.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Operation`] on failure.
    async fn on_start(&self, reservation: &Reservation) -> Result<(), PluginError>;

    /// React to the reservation's lease entering `TERMINATED` status.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Operation`] on failure.
    async fn on_end(&self, reservation: &Reservation) -> Result<(), PluginError>;

    /// React to the lease's `before_end` checkpoint, ahead of termination.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Operation`] on failure.
    async fn before_end(&self, reservation: &Reservation) -> Result<(), PluginError>;

    /// Release whatever `reserve_resource` allocated.
    ///
    /// Called from `delete_lease` and from rollback paths.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Operation`] on failure.
    async fn delete_reservation(&self, reservation: &Reservation) -> Result<(), PluginError>;

    /// Return this plugin's advertised configuration schema, read once at
    /// registration time rather than dispatched over RPC.
    fn get_plugin_opts(&self) -> Value {
        Value::Null
    }

    /// One-time setup hook run immediately after construction, before the
    /// plugin is registered. Plugins that need to validate their own
    /// configuration (e.g. check an external service is reachable) should
    /// do so here rather than in `reserve_resource`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ConstructorFailed`] if setup cannot
    /// complete; the plugin is then excluded from the registry.
    async fn setup(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// A factory function that constructs a plugin from its configured name.
pub type PluginFactory = fn() -> Arc<dyn ResourcePlugin>;

/// Loads and indexes resource plugins by name and by resource type.
///
/// Construction is a two-step process, mirroring `MountManager::mount`'s
/// duplicate-path rejection: the registry is built once at startup from a
/// fixed list of configured plugin names, resolved against a static
/// factory table. Two plugins claiming the same `resource_type` is a fatal
/// configuration error — it is caught at registry
/// construction, not deferred to first dispatch.
pub struct PluginRegistry {
    by_resource_type: HashMap<String, Arc<dyn ResourcePlugin>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("resource_types", &self.by_resource_type.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    /// Build a registry from a list of configured plugin names, resolved
    /// against `factories`.
    ///
    /// Plugins whose `setup()` fails are skipped with a logged warning
    /// rather than aborting the whole registry — unless that leaves the
    /// registry empty, which the caller (service startup) treats as fatal
    /// by way of an empty registry simply never matching any
    /// `resource_type`.
    ///
    /// Loading is two passes: every configured plugin is constructed and
    /// checked for a duplicate `resource_type` first, and only the
    /// survivors have `setup()` called. A plugin that loses the duplicate
    /// check never runs its setup side effects.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::UnknownName`] if a configured name has no
    /// matching factory, or [`PluginError::DuplicateResourceType`] if two
    /// loaded plugins claim the same resource type.
    pub async fn load(
        configured_names: &[String],
        factories: &HashMap<String, PluginFactory>,
    ) -> Result<Self, PluginError> {
        let mut candidates: HashMap<String, (String, Arc<dyn ResourcePlugin>)> = HashMap::new();

        for name in configured_names {
            let factory = factories
                .get(name)
                .ok_or_else(|| PluginError::UnknownName { name: name.clone() })?;
            let plugin = factory();

            let resource_type = plugin.resource_type().to_owned();
            if candidates.contains_key(&resource_type) {
                return Err(PluginError::DuplicateResourceType { resource_type });
            }
            candidates.insert(resource_type, (name.clone(), plugin));
        }

        let mut by_resource_type = HashMap::new();
        for (resource_type, (name, plugin)) in candidates {
            if let Err(err) = plugin.setup().await {
                tracing::warn!(plugin = %name, error = %err, "plugin setup failed, skipping");
                continue;
            }
            by_resource_type.insert(resource_type, plugin);
        }

        Ok(Self { by_resource_type })
    }

    /// Look up the plugin registered for a resource type.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::UnsupportedResourceType`] if no plugin
    /// claims this resource type.
    pub fn get(&self, resource_type: &str) -> Result<Arc<dyn ResourcePlugin>, PluginError> {
        self.by_resource_type
            .get(resource_type)
            .cloned()
            .ok_or_else(|| PluginError::UnsupportedResourceType {
                resource_type: resource_type.to_owned(),
            })
    }

    /// Every resource type currently served, for diagnostics (the
    /// `/v1/health` route reports this).
    pub fn resource_types(&self) -> impl Iterator<Item = &str> {
        self.by_resource_type.keys().map(String::as_str)
    }
}
