//! Relay server that pairs online users into exclusive private chats.
//!
//! Clients connect over TCP and speak newline-delimited JSON. Each client
//! joins once with a unique username, may ask to chat privately with any
//! other online user, and from then on its chat lines are relayed to that
//! one partner only.
//!
//! - [`cli`] parses the command line for server and client modes.
//! - [`server`] accepts connections and runs one task per client, driving
//!   the join handshake and the request loop.
//! - [`state`] owns the registry and the pairing relation behind a single
//!   lock and exposes each operation as one atomic step.
//! - [`registry`] maps usernames to live sessions.
//! - [`pairing`] is the symmetric partner relation.
//! - [`session`] holds session handles and the per-connection outbox.
//! - [`message`] is the JSON line protocol and its read/write helpers.
//! - [`error`] lists every rejection a client can receive.
//! - [`client`] is a small terminal client for manual use.

pub mod cli;
pub mod client;
pub mod error;
pub mod message;
pub mod pairing;
pub mod registry;
pub mod server;
pub mod session;
pub mod state;
