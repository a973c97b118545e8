//! Per-connection state for trigger clients.
//!
//! Each accepted TCP connection gets a [`Session`] that owns three tasks:
//!
//! - **Read task**: splits the byte stream into command lines and hands each
//!   read's batch to the server for dispatch.
//! - **Write task**: drains the outbound queue into the socket, appending
//!   `\r\n` to every frame.
//! - **Greeting task**: sends `WHO` once after [`GREETING_DELAY`] unless the
//!   session closed first.
//!
//! All termination paths (EOF, reset, I/O error, kill) converge on
//! [`TriggerServer::remove_client`].

use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{lock, ServerInner, TriggerServer};
use crate::collection::Recipient;
use crate::constants::{GREETING_DELAY, READ_BUFFER_SIZE, REPLY_WHO};
use crate::logging::Logger;
use crate::protocol::{encode_line, LineBuffer};

/// Frame queued for the write task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame, written with a trailing `\r\n`.
    Line(String),
    /// Flush, shut the socket down, and end the session.
    Close,
}

/// Properties a client declares about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProps {
    /// Declared type code. Set at most once.
    pub client_type: Option<String>,
    /// Declared application-level id. Re-declarable.
    pub declared_id: Option<String>,
}

/// Point-in-time view of a session for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSnapshot {
    /// Session UUID.
    pub uuid: Uuid,
    /// First segment of the UUID, used in logs and tables.
    pub short_id: String,
    /// Remote address captured at accept.
    pub ip: IpAddr,
    /// Declared type code.
    pub client_type: Option<String>,
    /// Declared id.
    pub declared_id: Option<String>,
}

/// Why a session's read task stopped.
#[derive(Debug)]
enum Termination {
    /// Remote half-closed the connection.
    Ended,
    /// Closed locally (kill, `DC`, removal, write failure).
    Closed,
    /// Connection reset by peer.
    Reset,
    /// Any other read error.
    Failed(io::Error),
}

/// Server-side state for one connected client.
pub struct Session {
    id: Uuid,
    short_id: String,
    ip: IpAddr,
    props: Mutex<SessionProps>,
    outbound: UnboundedSender<Outbound>,
    closed: CancellationToken,
    server: Weak<ServerInner>,
    logger: Logger,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("short_id", &self.short_id)
            .field("ip", &self.ip)
            .field("props", &self.props())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Session {}

impl Recipient for Session {
    fn deliver(&self, payload: &str) -> bool {
        self.send(payload)
    }
}

impl Session {
    /// Create a session that is not yet bound to a socket.
    ///
    /// The returned receiver is the outbound queue; [`attach`](Self::attach)
    /// hands it to the write task.
    pub(crate) fn new(
        ip: IpAddr,
        server: Weak<ServerInner>,
        logger: Logger,
    ) -> (Arc<Self>, UnboundedReceiver<Outbound>) {
        let id = Uuid::new_v4();
        let hyphenated = id.hyphenated().to_string();
        let short_id = hyphenated
            .split('-')
            .next()
            .unwrap_or(&hyphenated)
            .to_string();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let session = Arc::new(Self {
            id,
            short_id,
            ip,
            props: Mutex::new(SessionProps::default()),
            outbound,
            closed: CancellationToken::new(),
            server,
            logger,
        });
        (session, outbound_rx)
    }

    /// Bind the session to its socket and spawn the read, write and
    /// greeting tasks.
    pub(crate) fn attach(self: &Arc<Self>, stream: TcpStream, outbound_rx: UnboundedReceiver<Outbound>) {
        let (read_half, write_half) = stream.into_split();

        tokio::spawn(Self::read_loop(Arc::clone(self), read_half));
        tokio::spawn(Self::write_loop(
            self.short_id.clone(),
            self.closed.clone(),
            write_half,
            outbound_rx,
        ));

        let session = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = session.closed.cancelled() => {}
                () = tokio::time::sleep(GREETING_DELAY) => {
                    session.send(REPLY_WHO);
                }
            }
        });
    }

    /// Session UUID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// First hyphen-delimited segment of the UUID.
    pub fn short_id(&self) -> &str {
        &self.short_id
    }

    /// Remote address captured at accept.
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Copy of the declared properties.
    pub fn props(&self) -> SessionProps {
        lock(&self.props).clone()
    }

    /// Declared type code, if verified.
    pub fn client_type(&self) -> Option<String> {
        lock(&self.props).client_type.clone()
    }

    /// Declared id, if any.
    pub fn declared_id(&self) -> Option<String> {
        lock(&self.props).declared_id.clone()
    }

    /// Set the type unless one is already set. Returns whether it was set.
    pub(crate) fn try_set_type(&self, code: &str) -> bool {
        let mut props = lock(&self.props);
        if props.client_type.is_some() {
            return false;
        }
        props.client_type = Some(code.to_string());
        true
    }

    /// Replace the declared id, returning the previous one.
    pub(crate) fn replace_declared_id(&self, id: Option<String>) -> Option<String> {
        std::mem::replace(&mut lock(&self.props).declared_id, id)
    }

    /// Snapshot for observers.
    pub fn snapshot(&self) -> ClientSnapshot {
        let props = self.props();
        ClientSnapshot {
            uuid: self.id,
            short_id: self.short_id.clone(),
            ip: self.ip,
            client_type: props.client_type,
            declared_id: props.declared_id,
        }
    }

    /// Queue `payload` for writing.
    ///
    /// Writing to a closed session is logged and reported as `false`; it
    /// is never an error.
    pub fn send(&self, payload: impl AsRef<str>) -> bool {
        if self.closed.is_cancelled()
            || self
                .outbound
                .send(Outbound::Line(payload.as_ref().to_string()))
                .is_err()
        {
            log::debug!("[Session] Write after {} disconnected", self.short_id);
            return false;
        }
        true
    }

    /// Send `message`, then close the connection.
    pub fn kill(&self, message: impl AsRef<str>) {
        self.send(message);
        if self.outbound.send(Outbound::Close).is_err() {
            self.closed.cancel();
        }
    }

    /// Close the connection without a farewell. Pending writes are dropped.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Owning server, if it still exists.
    pub fn server(&self) -> Option<TriggerServer> {
        self.server.upgrade().map(|inner| TriggerServer { inner })
    }

    /// Read loop: decodes lines and dispatches each read's batch.
    ///
    /// Batches already read are dispatched to completion before a remote
    /// close deregisters the session, so a client may write its last
    /// commands and hang up without waiting for replies.
    async fn read_loop(session: Arc<Self>, mut reader: OwnedReadHalf) {
        let mut lines = LineBuffer::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut dispatches = JoinSet::new();

        let reason = loop {
            let result = tokio::select! {
                () = session.closed.cancelled() => break Termination::Closed,
                result = reader.read(&mut buf) => result,
            };

            match result {
                Ok(0) => break Termination::Ended,
                Ok(n) => match lines.feed(&buf[..n]) {
                    Ok(commands) if commands.is_empty() => {}
                    Ok(commands) => match session.server() {
                        Some(server) => {
                            while dispatches.try_join_next().is_some() {}
                            let batch_session = Arc::clone(&session);
                            dispatches.spawn(async move {
                                server.dispatch_batch(batch_session, commands).await;
                            });
                        }
                        None => break Termination::Closed,
                    },
                    Err(discarded) => {
                        session.logger.warn(format!(
                            "Discarded {discarded} bytes without a line break from {}, ip: {}.",
                            session.short_id, session.ip
                        ));
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => break Termination::Reset,
                Err(e) => break Termination::Failed(e),
            }
        };

        if matches!(reason, Termination::Closed) {
            dispatches.detach_all();
        } else {
            while let Some(joined) = dispatches.join_next().await {
                if let Err(e) = joined {
                    log::error!("[Session] Dispatch task for {} failed: {e}", session.short_id);
                }
            }
        }

        session.finish(reason);
    }

    /// Log why the session ended and deregister it.
    fn finish(&self, reason: Termination) {
        match reason {
            Termination::Ended => self.logger.info(format!(
                "{} is going to disconnect, ip: {}.",
                self.short_id, self.ip
            )),
            Termination::Closed => self.logger.info(format!(
                "{} closed the connection, ip: {}.",
                self.short_id, self.ip
            )),
            Termination::Reset => self.logger.warn(format!(
                "Connection reset, ip: {}, uuid: {}, you may need to check the experiment client.",
                self.ip, self.short_id
            )),
            Termination::Failed(e) => self.logger.warn(format!(
                "Connection error from {}, ip: {}: {e}",
                self.short_id, self.ip
            )),
        }

        self.closed.cancel();
        if let Some(server) = self.server() {
            server.remove_client(&self.id);
        }
    }

    /// Write loop: drains the outbound queue into the socket.
    ///
    /// Frames queued before the session closed are still written; the
    /// queue is polled ahead of the close signal.
    async fn write_loop(
        short_id: String,
        closed: CancellationToken,
        mut writer: OwnedWriteHalf,
        mut outbound_rx: UnboundedReceiver<Outbound>,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                next = outbound_rx.recv() => next,
                () = closed.cancelled() => None,
            };

            match next {
                Some(Outbound::Line(line)) => {
                    if let Err(e) = writer.write_all(encode_line(&line).as_bytes()).await {
                        match e.kind() {
                            io::ErrorKind::BrokenPipe
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::NotConnected => {
                                log::debug!("[Session] Write after {} disconnected", short_id);
                            }
                            _ => log::error!("[Session] Write error for {}: {e}", short_id),
                        }
                        closed.cancel();
                        break;
                    }
                }
                Some(Outbound::Close) => {
                    if let Err(e) = writer.shutdown().await {
                        log::debug!("[Session] Shutdown error for {}: {e}", short_id);
                    }
                    closed.cancel();
                    break;
                }
                None => break,
            }
        }
    }
}
