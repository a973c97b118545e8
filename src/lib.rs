//! Trigger Hub - TCP relay for lab instrument clients.
//!
//! Instrument and experiment programs connect over plain TCP, declare a
//! type (`TP`) and optionally an id (`ID`), then exchange line-delimited
//! text commands. The hub routes each command to a registered handler,
//! which typically broadcasts to every client of a given type.
//!
//! # Architecture
//!
//! - **TriggerServer** - Owns the listener, the client indexes and the
//!   command registry
//! - **Session** - One connected client with its read, write and greeting
//!   tasks
//! - **CommandRegistry** - Token to async handler table
//! - **Plugins** - Bundles of commands installed at startup
//!
//! # Modules
//!
//! - [`server`] - Listener lifecycle, routing, dispatch
//! - [`protocol`] - Line framing and command parsing
//! - [`collection`] - Unique and multi-valued client indexes
//! - [`config`] - Configuration loading

pub mod client_types;
pub mod collection;
pub mod commands;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod plugins;
pub mod protocol;
pub mod server;

pub use client_types::ClientTypes;
pub use commands::{CommandContext, CommandHandler, CommandRegistry};
pub use config::Config;
pub use error::{CommandError, ServerError};
pub use events::{EventBus, ServerEvent, Topic};
pub use logging::{Logger, LogSink, MemorySink};
pub use plugins::{NirsTrigger, Plugin};
pub use server::session::{ClientSnapshot, Session};
pub use server::{ServerOptions, ServerState, TriggerServer};
