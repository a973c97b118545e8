//! Protocol commands every server understands.
//!
//! Registered as protected entries by [`TriggerServer::new`](super::TriggerServer::new).
//! None of these handlers await, so a declaration earlier in a batch is
//! visible to every later command in the same read.

use crate::commands::{CommandContext, CommandRegistry};
use crate::constants::{
    CMD_DISCONNECT, CMD_ID, CMD_TYPE, CMD_UUID, ERR_DUPLICATE_ID, ERR_REPEAT_DECLARE,
    ERR_WRONG_TYPE, REPLY_BYE, REPLY_REGISTERED, REPLY_UUID, REPLY_VERIFIED,
};

use super::{IdVerdict, TypeVerdict};

/// Register the built-in commands as protected entries.
pub(crate) fn install(registry: &mut CommandRegistry) {
    let builtins = [
        (CMD_TYPE, registry.register(CMD_TYPE, handle_type, true)),
        (CMD_ID, registry.register(CMD_ID, handle_id, true)),
        (CMD_DISCONNECT, registry.register(CMD_DISCONNECT, handle_disconnect, true)),
        (CMD_UUID, registry.register(CMD_UUID, handle_uuid, true)),
    ];
    for (token, result) in builtins {
        if let Err(e) = result {
            log::error!("[Server] Failed to install built-in {token}: {e}");
        }
    }
}

/// `TP <code>`: declare the session's type.
async fn handle_type(ctx: CommandContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    let logger = ctx.server.logger();
    let code = ctx.options.trim();

    match ctx.server.verify_type(session, code) {
        TypeVerdict::AnyAccepted | TypeVerdict::Gone => {}
        TypeVerdict::Repeat => {
            logger.warn(format!(
                "Refused repeated client type declaration. id: {}, ip: {}.",
                session.short_id(),
                session.ip()
            ));
            session.send(ERR_REPEAT_DECLARE);
        }
        TypeVerdict::Unknown => {
            logger.warn(format!(
                "{} was not verified, will kill it, ip: {}.",
                session.short_id(),
                session.ip()
            ));
            session.kill(ERR_WRONG_TYPE);
        }
        TypeVerdict::Verified(label) => {
            logger.info(format!(
                "{} was verified as {label}, ip: {}.",
                session.short_id(),
                session.ip()
            ));
            ctx.server.notify_clients();
            session.send(REPLY_VERIFIED);
        }
    }
    Ok(())
}

/// `ID <id>`: bind an application-level id to the session.
async fn handle_id(ctx: CommandContext) -> anyhow::Result<()> {
    let session = &ctx.session;
    let declared = ctx.options.trim();
    if declared.is_empty() {
        ctx.server.logger().warn(format!(
            "Ignored empty id declaration from {}, ip: {}.",
            session.short_id(),
            session.ip()
        ));
        return Ok(());
    }

    let released = match ctx.server.declare_id(session, declared) {
        IdVerdict::Gone => return Ok(()),
        IdVerdict::Registered { released } => {
            session.send(REPLY_REGISTERED);
            released
        }
        IdVerdict::Duplicate { released } => {
            ctx.server.logger().warn(format!(
                "Id {declared} is taken, will kill {}, ip: {}.",
                session.short_id(),
                session.ip()
            ));
            session.kill(ERR_DUPLICATE_ID);
            released
        }
    };

    if let Some(old) = released {
        ctx.server.logger().info(format!(
            "{} released id {old}, ip: {}.",
            session.short_id(),
            session.ip()
        ));
    }
    ctx.server.notify_clients();
    Ok(())
}

/// `DC`: say goodbye and close.
async fn handle_disconnect(ctx: CommandContext) -> anyhow::Result<()> {
    ctx.session.kill(REPLY_BYE);
    Ok(())
}

/// `UUID`: report the requesting session's own UUID.
async fn handle_uuid(ctx: CommandContext) -> anyhow::Result<()> {
    ctx.session
        .send(format!("{REPLY_UUID} {}", ctx.session.id()));
    Ok(())
}
