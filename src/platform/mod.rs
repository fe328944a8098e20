// Tailgate - platform/mod.rs
//
// Platform abstraction layer: config files, local file I/O, filesystem
// change notification, and the SSH transport.
// Dependencies: core (data model, remote traits), util.
// Must NOT depend on: app.

pub mod config;
pub mod fs;
pub mod ssh;
pub mod watch;
