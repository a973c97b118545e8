//! Protocol tokens and timing constants for trigger-hub.
//!
//! Every literal that crosses the wire lives here so client-facing strings
//! stay stable across releases.
//!
//! # Categories
//!
//! - **Timing**: greeting delay and bind retry backoff
//! - **Built-in commands**: tokens the server always understands
//! - **Replies**: tokens the server writes back to clients

use std::time::Duration;

// ============================================================================
// Timing
// ============================================================================

/// Delay between accepting a connection and sending the `WHO` greeting.
///
/// Gives clients that identify themselves proactively a chance to do so
/// before being prompted.
pub const GREETING_DELAY: Duration = Duration::from_millis(100);

/// Backoff between bind attempts while the endpoint is in use.
pub const BIND_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Size of the per-connection read buffer.
pub const READ_BUFFER_SIZE: usize = 4 * 1024;

/// Longest partial line buffered while waiting for its delimiter.
pub const MAX_PENDING_LINE: usize = 64 * 1024;

// ============================================================================
// Configuration defaults
// ============================================================================

/// Default listen address.
pub const DEFAULT_IP: &str = "0.0.0.0";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 9527;

/// Type-table key that accepts any declared type and disables verification.
pub const WILDCARD_TYPE: &str = "__ANY__";

/// Broadcast target string meaning "every session".
pub const BROADCAST_ALL: &str = "*";

// ============================================================================
// Built-in commands
// ============================================================================

/// Type declaration: `TP <code>`.
pub const CMD_TYPE: &str = "TP";

/// Id declaration: `ID <id>`.
pub const CMD_ID: &str = "ID";

/// Graceful disconnect.
pub const CMD_DISCONNECT: &str = "DC";

/// Ask the server for this session's UUID.
pub const CMD_UUID: &str = "UUID";

// ============================================================================
// Replies
// ============================================================================

/// Line terminator appended to every outbound frame.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Greeting sent shortly after connect.
pub const REPLY_WHO: &str = "WHO";

/// Type declaration accepted.
pub const REPLY_VERIFIED: &str = "VERIFIED";

/// Id declaration accepted.
pub const REPLY_REGISTERED: &str = "REGISTERED";

/// Command sent before the session declared its type.
pub const ERR_NOT_VERIFIED: &str = "!ENOTVERIFIED";

/// Command token not found in the registry.
pub const ERR_UNKNOWN_CMD: &str = "!EUNKNOWNCMD";

/// Type already declared for this session.
pub const ERR_REPEAT_DECLARE: &str = "!EREPEATDECLARE";

/// Declared type is not in the type table (connection is killed).
pub const ERR_WRONG_TYPE: &str = "!EWRONGTYPE";

/// Declared id already bound to another session (connection is killed).
pub const ERR_DUPLICATE_ID: &str = "!EDUPLICATEID";

/// Farewell sent on `DC`.
pub const REPLY_BYE: &str = "!BYE";

/// Prefix of the reply to `UUID`.
pub const REPLY_UUID: &str = "UUID";
