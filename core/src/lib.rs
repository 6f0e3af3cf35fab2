#![deny(missing_docs)]
//! renew_core: license key renewal (config, key store, logging, renewal loop).

/// Configuration helpers (AppId, dirs, load_or_init, etc.)
pub mod cfg;
/// Simple file-backed KV store and the license key store on top of it.
pub mod store;
/// Tracing/log initialization helpers.
pub mod logx;
/// Renewal job model, parameter resolution and host task state.
pub mod job;
/// Error kinds of a renewal run.
pub mod error;
/// Encrypted request payloads for the licensing service.
pub mod encoder;
/// Licensing service contract and HTTP client.
pub mod client;
/// Key block parsing and validation.
pub mod keyblock;
/// Next-run date computation.
pub mod schedule;
/// The renewal loop over a batch of key slots.
pub mod orchestrator;
/// One host invocation of the renewal task.
pub mod task;

pub use error::RenewError;
