//! Resource plugins bundled with the reservation manager.
//!
//! Right now this is just [`dummy`], the no-op plugin configured by
//! default. A deployment
//! wiring its own plugins extends [`factories`]'s table rather than
//! replacing it.

pub mod dummy;

use std::collections::HashMap;

use reservation_core::PluginFactory;

/// The config name `dummy.vm.plugin` resolves to.
pub const DUMMY_VM_PLUGIN: &str = "dummy.vm.plugin";

/// The factory table for every plugin bundled in this crate, keyed by the
/// configured name a deployment lists under `manager.plugins`.
#[must_use]
pub fn factories() -> HashMap<String, PluginFactory> {
    let mut table: HashMap<String, PluginFactory> = HashMap::new();
    table.insert(DUMMY_VM_PLUGIN.to_owned(), dummy::create);
    table
}
