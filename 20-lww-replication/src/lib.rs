//! Eventually consistent, replicated key-value store.
//!
//! Every node keeps its own in-memory map and pushes writes to a fixed set of
//! peers. Concurrent writes are resolved last-write-wins on a nanosecond
//! timestamp, duplicate deliveries are dropped by message id, and periodic
//! snapshot exchange (anti-entropy) repairs anything a broadcast missed.
//!
//! - [`store`] holds records and the dedup ledger behind one lock.
//! - [`snapshot`] is the JSON snapshot format exchanged between nodes.
//! - [`clock`] stamps locally originated writes.
//! - [`protocol`] parses the line protocol and renders replicated mutations.
//! - [`broadcast`] forwards stamped mutations to peers, fire-and-forget.
//! - [`peer`] performs bounded snapshot pulls and health probes.
//! - [`anti_entropy`] runs the startup, periodic and recovery sync loops.
//! - [`node`] ties everything to a TCP listener.
//! - [`cli`], [`client`] and [`config`] cover the binary and its settings.

pub mod anti_entropy;
pub mod broadcast;
pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod node;
pub mod peer;
pub mod protocol;
pub mod snapshot;
pub mod store;
