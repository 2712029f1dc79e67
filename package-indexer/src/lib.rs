//! In-memory package dependency index served over TCP.
//!
//! Clients send `INDEX`, `QUERY` and `REMOVE` lines and get `OK`, `FAIL` or
//! `ERROR` back. A package can only be indexed once all of its dependencies
//! are, and can only be removed once nothing indexed depends on it.
//!
//! - [`store`] holds package records behind a single reader/writer lock.
//! - [`indexer`] enforces the dependency rules, one lock acquisition per
//!   operation.
//! - [`protocol`] parses request lines and renders responses.
//! - [`connection`] runs the request/response loop for one client.
//! - [`admission`] bounds how many connections are served at once.
//! - [`server`] accepts TCP connections and wires the pieces together.
//! - [`config`] and [`cli`] carry the tunables; [`client`] is a small
//!   interactive client for poking at a running server.

pub mod admission;
pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod indexer;
pub mod protocol;
pub mod server;
pub mod store;
