// Tailgate - app/mod.rs
//
// Application layer: the tail service, the source catalog, the connection
// pool, and the local and remote tail producers.
// Dependencies: core, platform (fs, watch), tokio.

pub mod catalog;
pub mod pool;
pub mod remote;
pub mod service;
pub mod stream;
pub mod tail;
