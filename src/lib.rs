//! Aircensus — passive 802.11 census sensor.
//!
//! Puts a wireless NIC into monitor mode, hops the configured channel
//! plan, and folds captured beacons and probe requests into an
//! in-memory census of access points and client stations. Accumulated
//! state is batched out to a document store, and first sightings are
//! announced on a message bus.
//!
//! The library is organized in two code layers:
//! - **Engine**: `frame`, `station`, `store`, `oui`, `vendor`,
//!   `publisher` — pure pipeline logic, testable on any host with
//!   `cargo test` and in-memory sinks.
//! - **Edges**: `radio`, `capture`, `sink`, `bus` — the monitor-mode
//!   NIC, libpcap, MongoDB, and RabbitMQ integrations the binary wires
//!   together.

pub mod bus;
pub mod capture;
pub mod config;
pub mod error;
pub mod frame;
pub mod oui;
pub mod publisher;
pub mod radio;
pub mod sink;
pub mod station;
pub mod store;
pub mod vendor;
