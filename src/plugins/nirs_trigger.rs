//! Relay for fNIRS trigger boxes.
//!
//! Experiment clients send marker and control commands; each is relayed to
//! every `TRG` client:
//!
//! | Command       | Relayed as     |
//! |---------------|----------------|
//! | `MK <label>`  | `<label>`      |
//! | `EX <payload>`| `EX <payload>` |
//! | control token | the token      |

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

use super::Plugin;
use crate::client_types::ClientTypes;
use crate::commands::CommandContext;
use crate::server::TriggerServer;

/// Type code of trigger-box clients.
pub const TRIGGER_TYPE: &str = "TRG";

/// Marker command.
pub const CMD_MARK: &str = "MK";

/// Extended payload command.
pub const CMD_EXTENDED: &str = "EX";

/// Control tokens relayed verbatim.
pub const CONTROL_COMMANDS: [&str; 10] =
    ["ST", "EN", "CL", "ZR", "DR", "LK", "UL", "RC", "ER", "PING"];

/// Trigger relay plugin.
#[derive(Debug, Default)]
pub struct NirsTrigger {
    /// Whether `integrate` added `TRG` to the type table.
    added_type: AtomicBool,
}

impl NirsTrigger {
    /// Create the plugin.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every token this plugin binds.
    pub fn commands() -> impl Iterator<Item = &'static str> {
        [CMD_MARK, CMD_EXTENDED]
            .into_iter()
            .chain(CONTROL_COMMANDS)
    }
}

fn relay(ctx: &CommandContext, data: &str) {
    ctx.server
        .logger()
        .info(format!("Broadcasting {data} to all {TRIGGER_TYPE} client."));
    let reached = ctx.server.broadcast(data, TRIGGER_TYPE);
    log::debug!("[Trigger] {} relayed to {} clients", data, reached);
}

async fn handle_mark(ctx: CommandContext) -> Result<()> {
    relay(&ctx, &ctx.options);
    Ok(())
}

async fn handle_extended(ctx: CommandContext) -> Result<()> {
    relay(&ctx, &format!("{CMD_EXTENDED} {}", ctx.options));
    Ok(())
}

async fn handle_control(ctx: CommandContext) -> Result<()> {
    relay(&ctx, &ctx.command);
    Ok(())
}

impl Plugin for NirsTrigger {
    fn name(&self) -> &str {
        "nirs-trigger"
    }

    fn integrate(&self, server: &TriggerServer) -> Result<()> {
        server
            .register_command(CMD_MARK, handle_mark)
            .context("registering MK")?;
        server
            .register_command(CMD_EXTENDED, handle_extended)
            .context("registering EX")?;
        for token in CONTROL_COMMANDS {
            server
                .register_command(token, handle_control)
                .with_context(|| format!("registering {token}"))?;
        }

        let types = server.client_types();
        if !types.accepts_any() && !types.contains(TRIGGER_TYPE) {
            server.register_client_types(ClientTypes::from_pairs([(
                TRIGGER_TYPE,
                "ezNirsTrigger client",
            )]));
            self.added_type.store(true, Ordering::SeqCst);
        }
        server.register_debug_commands(CONTROL_COMMANDS);
        Ok(())
    }

    fn strip(&self, server: &TriggerServer) {
        for token in Self::commands() {
            server.deregister_command(token);
        }
        server.deregister_debug_commands(CONTROL_COMMANDS);
        if self.added_type.swap(false, Ordering::SeqCst) {
            server.deregister_client_types([TRIGGER_TYPE]);
        }
    }
}
