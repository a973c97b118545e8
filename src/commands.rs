//! Command registry: maps inbound command tokens to handlers.
//!
//! Built-in protocol commands (`TP`, `ID`, `DC`, `UUID`) are registered as
//! *protected* entries when the server is constructed. Extensions register
//! ordinary entries through the same table; replacing a protected entry is
//! allowed (last write wins) but always logged.
//!
//! Handlers are async and may outlive the read that triggered them, so the
//! registry hands out `Arc` clones and never holds its own lock while a
//! handler runs.
//!
//! # Example
//!
//! ```ignore
//! registry.register("PING", |ctx: CommandContext| async move {
//!     ctx.session.send("PONG");
//!     anyhow::Ok(())
//! }, false)?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::error::CommandError;
use crate::server::session::Session;
use crate::server::TriggerServer;

/// Everything a handler gets for one invocation.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Token that selected the handler.
    pub command: String,
    /// Raw remainder of the command line.
    pub options: String,
    /// Session that sent the command.
    pub session: Arc<Session>,
    /// Server owning the session, for routing.
    pub server: TriggerServer,
}

/// Handler bound to a command token.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Run the command.
    ///
    /// Errors are logged by the dispatcher; they never reach the client.
    async fn call(&self, ctx: CommandContext) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> CommandHandler for F
where
    F: Fn(CommandContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn call(&self, ctx: CommandContext) -> anyhow::Result<()> {
        (self)(ctx).await
    }
}

struct CommandEntry {
    handler: Arc<dyn CommandHandler>,
    protected: bool,
}

/// Token → handler table.
#[derive(Default)]
pub struct CommandRegistry {
    entries: HashMap<String, CommandEntry>,
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("tokens", &self.tokens())
            .finish()
    }
}

impl CommandRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `token` to `handler`, replacing any existing binding.
    ///
    /// # Errors
    ///
    /// [`CommandError::InvalidHandler`] if the token is empty or contains
    /// whitespace, since the line parser could never produce it.
    pub fn register<H>(
        &mut self,
        token: impl Into<String>,
        handler: H,
        protected: bool,
    ) -> Result<(), CommandError>
    where
        H: CommandHandler + 'static,
    {
        self.register_arc(token, Arc::new(handler), protected)
    }

    /// Same as [`register`](Self::register) for an already shared handler.
    pub fn register_arc(
        &mut self,
        token: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
        protected: bool,
    ) -> Result<(), CommandError> {
        let token = token.into();
        if token.is_empty() || token.contains(char::is_whitespace) {
            return Err(CommandError::InvalidHandler(token));
        }

        if let Some(previous) = self.entries.get(&token) {
            if previous.protected {
                log::warn!("[Commands] Replacing protected command '{}'", token);
            } else {
                log::debug!("[Commands] Replacing command '{}'", token);
            }
        }

        self.entries.insert(token, CommandEntry { handler, protected });
        Ok(())
    }

    /// Remove the binding for `token`. Returns whether one existed.
    pub fn deregister(&mut self, token: &str) -> bool {
        match self.entries.remove(token) {
            Some(entry) => {
                if entry.protected {
                    log::warn!("[Commands] Removed protected command '{}'", token);
                }
                true
            }
            None => false,
        }
    }

    /// Whether `token` is bound.
    pub fn contains(&self, token: &str) -> bool {
        self.entries.contains_key(token)
    }

    /// Whether `token` is bound to a protected entry.
    pub fn is_protected(&self, token: &str) -> bool {
        self.entries.get(token).is_some_and(|e| e.protected)
    }

    /// Look up the handler for `token`.
    pub fn resolve(&self, token: &str) -> Result<Arc<dyn CommandHandler>, CommandError> {
        self.entries
            .get(token)
            .map(|entry| Arc::clone(&entry.handler))
            .ok_or_else(|| CommandError::UnknownCommand(token.to_string()))
    }

    /// Resolve `token` and return the handler invocation as a future.
    ///
    /// The returned future does not borrow the registry, so the caller can
    /// release any lock around it before awaiting.
    pub fn dispatch(
        &self,
        token: &str,
        ctx: CommandContext,
    ) -> Result<BoxFuture<'static, anyhow::Result<()>>, CommandError> {
        let handler = self.resolve(token)?;
        Ok(Box::pin(async move { handler.call(ctx).await }))
    }

    /// Registered tokens, sorted.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.entries.keys().cloned().collect();
        tokens.sort();
        tokens
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{ServerOptions, TriggerServer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn noop(_ctx: CommandContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn context(server: &TriggerServer, command: &str, options: &str) -> CommandContext {
        let (session, _rx) = server.detached_session();
        CommandContext {
            command: command.to_string(),
            options: options.to_string(),
            session,
            server: server.clone(),
        }
    }

    #[test]
    fn test_register_rejects_undispatchable_tokens() {
        let mut registry = CommandRegistry::new();

        assert_eq!(
            registry.register("", noop, false),
            Err(CommandError::InvalidHandler(String::new()))
        );
        assert!(registry.register("TWO WORDS", noop, false).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_last_write_wins_and_keeps_new_protection() {
        let mut registry = CommandRegistry::new();
        registry.register("TP", noop, true).unwrap();
        assert!(registry.is_protected("TP"));

        registry.register("TP", noop, false).unwrap();
        assert!(registry.contains("TP"));
        assert!(!registry.is_protected("TP"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_deregister_unknown_is_noop() {
        let mut registry = CommandRegistry::new();
        assert!(!registry.deregister("MK"));
    }

    #[tokio::test]
    async fn test_dispatch_invokes_handler_with_options() {
        let server = TriggerServer::new(ServerOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);

        let mut registry = CommandRegistry::new();
        registry
            .register(
                "MK",
                move |ctx: CommandContext| {
                    let seen = Arc::clone(&seen);
                    async move {
                        assert_eq!(ctx.options, "onset 3");
                        seen.fetch_add(1, Ordering::SeqCst);
                        anyhow::Ok(())
                    }
                },
                false,
            )
            .unwrap();

        let fut = registry
            .dispatch("MK", context(&server, "MK", "onset 3"))
            .unwrap();
        fut.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_command_is_typed_error() {
        let server = TriggerServer::new(ServerOptions::default());
        let registry = CommandRegistry::new();

        let err = registry
            .dispatch("NOPE", context(&server, "NOPE", ""))
            .err()
            .unwrap();
        assert_eq!(err, CommandError::UnknownCommand("NOPE".into()));
    }
}
