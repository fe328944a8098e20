// Tailgate - lib.rs
//
// Library entry point. The CLI in `main.rs` is a thin stdout transport over
// `app::service::TailService`; everything else lives here so integration
// tests and other transports can drive the engine directly.

pub mod app;
pub mod core;
pub mod platform;
pub mod util;
