//! Extension surface for server plugins.
//!
//! A plugin is handed the server and may register commands, client types
//! and debug commands through its public API. [`Plugin::strip`] must undo
//! everything [`Plugin::integrate`] did.

pub mod nirs_trigger;

use anyhow::Result;

use crate::server::TriggerServer;

pub use nirs_trigger::NirsTrigger;

/// A bundle of commands installed into a running server.
pub trait Plugin: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Register the plugin's commands and tables.
    ///
    /// # Errors
    ///
    /// Returns an error if any registration is rejected. Anything already
    /// registered stays in place; call [`strip`](Self::strip) to clean up.
    fn integrate(&self, server: &TriggerServer) -> Result<()>;

    /// Remove everything [`integrate`](Self::integrate) registered.
    fn strip(&self, server: &TriggerServer);
}

/// Integrate every plugin, logging each one.
///
/// Stops at the first failure.
pub fn integrate_all(server: &TriggerServer, plugins: &[Box<dyn Plugin>]) -> Result<()> {
    for plugin in plugins {
        plugin.integrate(server)?;
        server
            .logger()
            .info(format!("Plugin {} integrated.", plugin.name()));
    }
    Ok(())
}
