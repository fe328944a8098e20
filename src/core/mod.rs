// Tailgate - core/mod.rs
//
// Core layer: data model, the security gate, text handling, and the remote
// session traits.
// Must NOT depend on: app, platform, or any async runtime.

pub mod model;
pub mod remote;
pub mod security;
pub mod text;
