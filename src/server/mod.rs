//! TCP trigger server.
//!
//! [`TriggerServer`] owns the listening socket, the command registry and the
//! three client indexes, and routes frames between sessions.
//!
//! # Architecture
//!
//! ```text
//! TriggerServer (Arc<ServerInner>)
//! ├── accept task ──► Session ──► read task ──► dispatch_batch ──► CommandRegistry
//! │                           ├── write task ◄── outbound queue ◄── broadcast / send
//! │                           └── greeting task (WHO)
//! ├── indexes: sessions (uuid) / by_type (code → set) / by_id (declared id)
//! └── EventBus: ClientsUpdated / TypesUpdated / DebugCommandsUpdated
//! ```
//!
//! # Listener states
//!
//! ```text
//! Idle ──start──► Listening ──stop──► Idle
//!   │                 ▲
//!   └─ addr in use ─► Retrying (1s backoff, unbounded; cancelled by stop/change_endpoint)
//! ```
//!
//! Index and registry locks are never held across `.await`. Sessions only
//! touch the indexes through server methods.

mod builtins;
pub mod session;

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use futures_util::future::join_all;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client_types::ClientTypes;
use crate::collection::{BroadcastTarget, MultiIndex, UniqueIndex};
use crate::commands::{CommandContext, CommandHandler, CommandRegistry};
use crate::constants::{
    BIND_RETRY_DELAY, CMD_DISCONNECT, CMD_TYPE, DEFAULT_IP, DEFAULT_PORT, ERR_NOT_VERIFIED,
    ERR_UNKNOWN_CMD,
};
use crate::error::{CommandError, ServerError};
use crate::events::{EventBus, ServerEvent};
use crate::logging::Logger;
use crate::protocol::ParsedCommand;
use session::{ClientSnapshot, Session};

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Construction-time options.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Listen address.
    pub ip: String,
    /// Listen port (0 picks a free port).
    pub port: u16,
    /// Declarable client types.
    pub client_types: ClientTypes,
    /// Verification override. `None` derives it from the type table:
    /// required unless the wildcard type is present.
    pub force_verify: Option<bool>,
    /// Operator-facing logger.
    pub logger: Logger,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            ip: DEFAULT_IP.to_string(),
            port: DEFAULT_PORT,
            client_types: ClientTypes::any(),
            force_verify: None,
            logger: Logger::default(),
        }
    }
}

impl ServerOptions {
    /// Set the listen endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, ip: impl Into<String>, port: u16) -> Self {
        self.ip = ip.into();
        self.port = port;
        self
    }

    /// Set the type table.
    #[must_use]
    pub fn with_client_types(mut self, client_types: ClientTypes) -> Self {
        self.client_types = client_types;
        self
    }

    /// Override the verification requirement.
    #[must_use]
    pub fn with_force_verify(mut self, force_verify: bool) -> Self {
        self.force_verify = Some(force_verify);
        self
    }

    /// Set the logger.
    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }
}

/// Observable listener state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not listening.
    Idle,
    /// Waiting out the backoff after "address in use".
    Retrying,
    /// Accepting connections.
    Listening,
}

enum Listener {
    Idle,
    Starting {
        attempt: u64,
        cancel: CancellationToken,
        retrying: bool,
    },
    Listening {
        addr: SocketAddr,
        cancel: CancellationToken,
        handle: JoinHandle<()>,
    },
}

#[derive(Default)]
struct Indexes {
    /// Every live session by UUID.
    sessions: UniqueIndex<Uuid, Arc<Session>>,
    /// Verified sessions by declared type code.
    by_type: MultiIndex<String, Arc<Session>>,
    /// Sessions by declared id.
    by_id: UniqueIndex<String, Arc<Session>>,
}

/// Outcome of a type declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TypeVerdict {
    /// The table holds the wildcard; nothing to check.
    AnyAccepted,
    /// The session already has a type.
    Repeat,
    /// Code not in the table.
    Unknown,
    /// Accepted; carries the type label.
    Verified(String),
    /// Session was removed concurrently.
    Gone,
}

/// Outcome of an id declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IdVerdict {
    /// Bound; carries the id released first, if any.
    Registered { released: Option<String> },
    /// Taken by another session; the previous id was still released.
    Duplicate { released: Option<String> },
    /// Session was removed concurrently.
    Gone,
}

pub(crate) struct ServerInner {
    endpoint: Mutex<(String, u16)>,
    listener: Mutex<Listener>,
    next_attempt: AtomicU64,
    commands: RwLock<CommandRegistry>,
    indexes: Mutex<Indexes>,
    client_types: RwLock<ClientTypes>,
    debug_commands: Mutex<Vec<String>>,
    force_verify: bool,
    events: EventBus,
    logger: Logger,
}

/// Cloneable handle to the trigger server.
#[derive(Clone)]
pub struct TriggerServer {
    inner: Arc<ServerInner>,
}

impl std::fmt::Debug for TriggerServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerServer")
            .field("endpoint", &self.endpoint())
            .field("state", &self.state())
            .field("force_verify", &self.inner.force_verify)
            .field("client_count", &self.client_count())
            .finish_non_exhaustive()
    }
}

impl TriggerServer {
    /// Create an idle server with the built-in commands registered.
    pub fn new(options: ServerOptions) -> Self {
        let force_verify = options
            .force_verify
            .unwrap_or_else(|| !options.client_types.accepts_any());

        let mut commands = CommandRegistry::new();
        builtins::install(&mut commands);

        Self {
            inner: Arc::new(ServerInner {
                endpoint: Mutex::new((options.ip, options.port)),
                listener: Mutex::new(Listener::Idle),
                next_attempt: AtomicU64::new(0),
                commands: RwLock::new(commands),
                indexes: Mutex::new(Indexes::default()),
                client_types: RwLock::new(options.client_types),
                debug_commands: Mutex::new(Vec::new()),
                force_verify,
                events: EventBus::new(),
                logger: options.logger,
            }),
        }
    }

    // ========================================================================
    // Listener lifecycle
    // ========================================================================

    /// Bind the listener and start accepting connections.
    ///
    /// While the endpoint is in use this keeps retrying every
    /// [`BIND_RETRY_DELAY`] until it frees up or the attempt is cancelled
    /// by [`stop`](Self::stop) or [`change_endpoint`](Self::change_endpoint).
    /// Returns the bound address. Calling it while already listening
    /// returns the current address.
    ///
    /// # Errors
    ///
    /// - [`ServerError::PermissionDenied`]: fatal, logged at error level.
    /// - [`ServerError::Cancelled`]: a pending retry was cancelled.
    /// - [`ServerError::InvalidAddress`] / [`ServerError::Bind`]: propagated.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let (attempt, cancel) = {
            let mut state = lock(&self.inner.listener);
            match &*state {
                Listener::Listening { addr, .. } => return Ok(*addr),
                Listener::Starting { cancel, .. } => cancel.cancel(),
                Listener::Idle => {}
            }
            let attempt = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
            let cancel = CancellationToken::new();
            *state = Listener::Starting {
                attempt,
                cancel: cancel.clone(),
                retrying: false,
            };
            (attempt, cancel)
        };

        loop {
            let addr = match self.endpoint_addr() {
                Ok(addr) => addr,
                Err(e) => {
                    self.end_attempt(attempt);
                    return Err(e);
                }
            };

            match TcpListener::bind(addr).await {
                Ok(listener) => return self.begin_listening(attempt, &cancel, listener, addr),
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    self.inner
                        .logger
                        .warn("End point in use, will retry in 1 second...");
                    self.mark_retrying(attempt);

                    tokio::select! {
                        () = cancel.cancelled() => return Err(ServerError::Cancelled),
                        () = tokio::time::sleep(BIND_RETRY_DELAY) => {}
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    self.inner
                        .logger
                        .error(format!("Invalid port/address {addr}, check your config."));
                    self.end_attempt(attempt);
                    return Err(ServerError::PermissionDenied(addr));
                }
                Err(e) => {
                    self.end_attempt(attempt);
                    return Err(ServerError::Bind(addr, e));
                }
            }

            if cancel.is_cancelled() {
                return Err(ServerError::Cancelled);
            }
        }
    }

    /// Close the listener, or cancel a pending retry.
    ///
    /// Connected sessions stay up. Returns whether the server was listening.
    /// Idempotent.
    pub async fn stop(&self) -> bool {
        let previous = std::mem::replace(&mut *lock(&self.inner.listener), Listener::Idle);

        match previous {
            Listener::Listening {
                addr,
                cancel,
                handle,
            } => {
                cancel.cancel();
                if let Err(e) = handle.await {
                    log::debug!("[Server] Accept task ended abnormally: {e}");
                }
                self.inner
                    .logger
                    .info(format!("Server at {addr} stopped listening."));
                true
            }
            Listener::Starting { cancel, .. } => {
                cancel.cancel();
                false
            }
            Listener::Idle => false,
        }
    }

    /// Move the listener to a new endpoint.
    ///
    /// Cancels any pending retry. If the server was listening (or retrying)
    /// it restarts against the new endpoint and returns the bound address.
    pub async fn change_endpoint(
        &self,
        ip: impl Into<String>,
        port: u16,
    ) -> Result<Option<SocketAddr>, ServerError> {
        let was_active = !matches!(*lock(&self.inner.listener), Listener::Idle);

        self.stop().await;
        *lock(&self.inner.endpoint) = (ip.into(), port);

        if was_active {
            self.start().await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Current listener state.
    pub fn state(&self) -> ServerState {
        match &*lock(&self.inner.listener) {
            Listener::Idle => ServerState::Idle,
            Listener::Starting { retrying: true, .. } => ServerState::Retrying,
            Listener::Starting { .. } => ServerState::Idle,
            Listener::Listening { .. } => ServerState::Listening,
        }
    }

    /// Bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*lock(&self.inner.listener) {
            Listener::Listening { addr, .. } => Some(*addr),
            _ => None,
        }
    }

    /// Configured `(ip, port)`.
    pub fn endpoint(&self) -> (String, u16) {
        lock(&self.inner.endpoint).clone()
    }

    /// Whether commands other than `TP`/`DC` require a declared type.
    pub fn force_verify(&self) -> bool {
        self.inner.force_verify
    }

    fn endpoint_addr(&self) -> Result<SocketAddr, ServerError> {
        let (ip, port) = self.endpoint();
        let ip: IpAddr = ip
            .parse()
            .map_err(|_parse_err| ServerError::InvalidAddress(ip.clone()))?;
        Ok(SocketAddr::new(ip, port))
    }

    fn mark_retrying(&self, attempt: u64) {
        if let Listener::Starting {
            attempt: current,
            retrying,
            ..
        } = &mut *lock(&self.inner.listener)
        {
            if *current == attempt {
                *retrying = true;
            }
        }
    }

    fn end_attempt(&self, attempt: u64) {
        let mut state = lock(&self.inner.listener);
        if matches!(&*state, Listener::Starting { attempt: current, .. } if *current == attempt) {
            *state = Listener::Idle;
        }
    }

    fn begin_listening(
        &self,
        attempt: u64,
        cancel: &CancellationToken,
        listener: TcpListener,
        requested: SocketAddr,
    ) -> Result<SocketAddr, ServerError> {
        let addr = listener.local_addr().unwrap_or(requested);
        {
            let mut state = lock(&self.inner.listener);
            let ours = matches!(&*state, Listener::Starting { attempt: current, .. } if *current == attempt);
            if !ours || cancel.is_cancelled() {
                return Err(ServerError::Cancelled);
            }

            let handle = tokio::spawn(accept_loop(
                Arc::downgrade(&self.inner),
                listener,
                cancel.clone(),
            ));
            *state = Listener::Listening {
                addr,
                cancel: cancel.clone(),
                handle,
            };
        }

        let mode = if self.inner.force_verify {
            " in force verify mode"
        } else {
            ""
        };
        self.inner
            .logger
            .info(format!("Server initialized at {addr}{mode}."));
        Ok(addr)
    }

    // ========================================================================
    // Client table
    // ========================================================================

    fn accept_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let (session, outbound_rx) = Session::new(
            peer.ip(),
            Arc::downgrade(&self.inner),
            self.inner.logger.clone(),
        );
        self.admit(&session);
        session.attach(stream, outbound_rx);
    }

    /// Register a fresh session in the primary index.
    pub(crate) fn admit(&self, session: &Arc<Session>) {
        lock(&self.inner.indexes)
            .sessions
            .register(session.id(), Arc::clone(session));

        self.inner.logger.info(format!(
            "{} connected, ip: {}.",
            session.short_id(),
            session.ip()
        ));
        self.notify_clients();
    }

    /// Remove a session from every index.
    ///
    /// Returns `false` if the id is unknown (including a second call for
    /// the same session).
    pub fn remove_client(&self, id: &Uuid) -> bool {
        let session = {
            let mut indexes = lock(&self.inner.indexes);
            let Some(session) = indexes.sessions.deregister(id) else {
                return false;
            };

            let props = session.props();
            if let Some(declared) = props.declared_id {
                let bound_here = indexes
                    .by_id
                    .get(declared.as_str())
                    .is_some_and(|owner| owner.id() == session.id());
                if bound_here {
                    indexes.by_id.deregister(declared.as_str());
                }
            }
            if let Some(code) = props.client_type {
                indexes.by_type.deregister(code.as_str(), &session);
            }
            session
        };

        session.close();
        log::debug!("[Server] Removed client {}", session.short_id());
        self.notify_clients();
        true
    }

    /// Snapshot of every live session, sorted by short id.
    pub fn clients(&self) -> Vec<ClientSnapshot> {
        let mut clients: Vec<ClientSnapshot> = lock(&self.inner.indexes)
            .sessions
            .values()
            .map(|s| s.snapshot())
            .collect();
        clients.sort_by(|a, b| a.short_id.cmp(&b.short_id));
        clients
    }

    /// Number of live sessions.
    pub fn client_count(&self) -> usize {
        lock(&self.inner.indexes).sessions.len()
    }

    /// Session by UUID.
    pub fn client(&self, id: &Uuid) -> Option<Arc<Session>> {
        lock(&self.inner.indexes).sessions.get(id).map(Arc::clone)
    }

    /// Session bound to a declared id.
    pub fn client_by_declared_id(&self, declared: &str) -> Option<Arc<Session>> {
        lock(&self.inner.indexes).by_id.get(declared).map(Arc::clone)
    }

    /// Sessions verified as `code`.
    pub fn clients_of_type(&self, code: &str) -> Vec<Arc<Session>> {
        lock(&self.inner.indexes).by_type.get(code).to_vec()
    }

    /// Apply a type declaration to the indexes.
    pub(crate) fn verify_type(&self, session: &Arc<Session>, code: &str) -> TypeVerdict {
        let label = {
            let types = read(&self.inner.client_types);
            if types.accepts_any() {
                return TypeVerdict::AnyAccepted;
            }
            if session.client_type().is_some() {
                return TypeVerdict::Repeat;
            }
            if !types.contains(code) {
                return TypeVerdict::Unknown;
            }
            types.label(code).unwrap_or(code).to_string()
        };

        let mut indexes = lock(&self.inner.indexes);
        if !indexes.sessions.has(&session.id()) {
            return TypeVerdict::Gone;
        }
        if !session.try_set_type(code) {
            return TypeVerdict::Repeat;
        }
        indexes
            .by_type
            .register(code.to_string(), Arc::clone(session));
        TypeVerdict::Verified(label)
    }

    /// Apply an id declaration to the indexes.
    ///
    /// The previous id is released before the new one is checked, so a
    /// session is bound under at most one id at any instant.
    pub(crate) fn declare_id(&self, session: &Arc<Session>, declared: &str) -> IdVerdict {
        let mut indexes = lock(&self.inner.indexes);
        if !indexes.sessions.has(&session.id()) {
            return IdVerdict::Gone;
        }

        let released = session.replace_declared_id(None);
        if let Some(old) = released.as_deref() {
            let bound_here = indexes
                .by_id
                .get(old)
                .is_some_and(|owner| owner.id() == session.id());
            if bound_here {
                indexes.by_id.deregister(old);
            }
        }

        let taken = indexes
            .by_id
            .get(declared)
            .is_some_and(|owner| owner.id() != session.id());
        if taken {
            return IdVerdict::Duplicate { released };
        }

        indexes
            .by_id
            .register(declared.to_string(), Arc::clone(session));
        session.replace_declared_id(Some(declared.to_string()));
        IdVerdict::Registered { released }
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Send `payload` to every session of a type, or to all sessions.
    ///
    /// `"*"` (or [`BroadcastTarget::All`]) reaches every registered session
    /// whether or not it declared a type. Returns the number reached.
    pub fn broadcast(&self, payload: &str, target: impl Into<BroadcastTarget>) -> usize {
        let target = target.into();
        let indexes = lock(&self.inner.indexes);
        match &target {
            BroadcastTarget::All => indexes.sessions.broadcast(payload),
            BroadcastTarget::Key(_) => indexes.by_type.broadcast(payload, &target),
        }
    }

    /// Send `payload` to one session.
    ///
    /// `id` is looked up in the declared-id index first, then matched
    /// against each session's full or short UUID.
    ///
    /// # Errors
    ///
    /// [`ServerError::UnknownRecipient`] if nothing matches; nothing is sent.
    pub fn send(&self, payload: &str, id: &str) -> Result<(), ServerError> {
        let target = {
            let indexes = lock(&self.inner.indexes);
            indexes.by_id.get(id).map(Arc::clone).or_else(|| {
                indexes
                    .sessions
                    .values()
                    .find(|s| s.short_id() == id || s.id().to_string() == id)
                    .map(Arc::clone)
            })
        };

        match target {
            Some(session) => {
                session.send(payload);
                Ok(())
            }
            None => Err(ServerError::UnknownRecipient(id.to_string())),
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Dispatch every command from one read concurrently.
    pub(crate) async fn dispatch_batch(&self, session: Arc<Session>, commands: Vec<ParsedCommand>) {
        join_all(
            commands
                .into_iter()
                .map(|command| self.dispatch(Arc::clone(&session), command)),
        )
        .await;
    }

    /// Gate, resolve and run one command.
    pub(crate) async fn dispatch(&self, session: Arc<Session>, parsed: ParsedCommand) {
        let ParsedCommand { command, options } = parsed;

        let exempt = command == CMD_TYPE || command == CMD_DISCONNECT;
        if self.inner.force_verify && !exempt && session.client_type().is_none() {
            session.send(ERR_NOT_VERIFIED);
            return;
        }

        let ctx = CommandContext {
            command: command.clone(),
            options: options.clone(),
            session: Arc::clone(&session),
            server: self.clone(),
        };
        let dispatched = read(&self.inner.commands).dispatch(&command, ctx);

        match dispatched {
            Ok(call) => {
                if let Err(e) = call.await {
                    self.inner.logger.error(format!(
                        "Command {command} from {} failed: {e:#}",
                        session.short_id()
                    ));
                }
            }
            Err(CommandError::UnknownCommand(_)) => {
                self.inner.logger.warn(format!(
                    "Unknown command '{} {}' from {}, ip: {}.",
                    command,
                    options,
                    session.short_id(),
                    session.ip()
                ));
                session.send(ERR_UNKNOWN_CMD);
            }
            Err(e) => {
                self.inner.logger.error(format!(
                    "Command {command} from {} not dispatched: {e}",
                    session.short_id()
                ));
            }
        }
    }

    // ========================================================================
    // Extension surface
    // ========================================================================

    /// Register an ordinary command. Last write wins.
    pub fn register_command<H>(&self, token: impl Into<String>, handler: H) -> Result<(), CommandError>
    where
        H: CommandHandler + 'static,
    {
        write(&self.inner.commands).register(token, handler, false)
    }

    /// Remove a command. Returns whether it was bound.
    pub fn deregister_command(&self, token: &str) -> bool {
        write(&self.inner.commands).deregister(token)
    }

    /// Whether `token` is bound.
    pub fn has_command(&self, token: &str) -> bool {
        read(&self.inner.commands).contains(token)
    }

    /// Whether `token` is a protected built-in.
    pub fn is_protected_command(&self, token: &str) -> bool {
        read(&self.inner.commands).is_protected(token)
    }

    /// Registered command tokens, sorted.
    pub fn command_tokens(&self) -> Vec<String> {
        read(&self.inner.commands).tokens()
    }

    /// Merge entries into the type table.
    pub fn register_client_types(&self, types: ClientTypes) {
        let snapshot = {
            let mut table = write(&self.inner.client_types);
            table.merge(types);
            table.clone()
        };
        self.inner.events.notify(&ServerEvent::TypesUpdated(snapshot));
    }

    /// Remove entries from the type table.
    ///
    /// Sessions already verified under a removed code keep their type.
    pub fn deregister_client_types<I, S>(&self, codes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let snapshot = {
            let mut table = write(&self.inner.client_types);
            for code in codes {
                table.remove(code.as_ref());
            }
            table.clone()
        };
        self.inner.events.notify(&ServerEvent::TypesUpdated(snapshot));
    }

    /// Copy of the type table.
    pub fn client_types(&self) -> ClientTypes {
        read(&self.inner.client_types).clone()
    }

    /// Add tokens to the debug-command list (duplicates are skipped).
    pub fn register_debug_commands<I, S>(&self, commands: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let snapshot = {
            let mut list = lock(&self.inner.debug_commands);
            for command in commands {
                let command = command.into();
                if !list.contains(&command) {
                    list.push(command);
                }
            }
            list.clone()
        };
        self.inner
            .events
            .notify(&ServerEvent::DebugCommandsUpdated(snapshot));
    }

    /// Remove tokens from the debug-command list.
    pub fn deregister_debug_commands<I, S>(&self, commands: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let snapshot = {
            let mut list = lock(&self.inner.debug_commands);
            for command in commands {
                list.retain(|c| c != command.as_ref());
            }
            list.clone()
        };
        self.inner
            .events
            .notify(&ServerEvent::DebugCommandsUpdated(snapshot));
    }

    /// Copy of the debug-command list.
    pub fn debug_commands(&self) -> Vec<String> {
        lock(&self.inner.debug_commands).clone()
    }

    /// Observer registry.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Operator-facing logger.
    pub fn logger(&self) -> &Logger {
        &self.inner.logger
    }

    /// Publish the current client table.
    pub(crate) fn notify_clients(&self) {
        self.inner
            .events
            .notify(&ServerEvent::ClientsUpdated(self.clients()));
    }

    /// Close every session and stop listening.
    pub async fn shutdown(&self) {
        self.stop().await;
        let sessions: Vec<Arc<Session>> = lock(&self.inner.indexes)
            .sessions
            .values()
            .map(Arc::clone)
            .collect();
        for session in sessions {
            session.close();
        }
    }

    #[cfg(test)]
    pub(crate) fn detached_session(
        &self,
    ) -> (Arc<Session>, tokio::sync::mpsc::UnboundedReceiver<session::Outbound>) {
        Session::new(
            IpAddr::from([127, 0, 0, 1]),
            Arc::downgrade(&self.inner),
            self.inner.logger.clone(),
        )
    }
}

/// Accept loop: one task per listener, ended by its cancellation token.
async fn accept_loop(server: Weak<ServerInner>, listener: TcpListener, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let Some(inner) = server.upgrade() else {
            log::info!("[Server] Server dropped, stopping accept loop");
            break;
        };
        let server = TriggerServer { inner };

        match accepted {
            Ok((stream, peer)) => server.accept_connection(stream, peer),
            Err(e) => {
                log::error!("[Server] Accept error: {e}");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}
