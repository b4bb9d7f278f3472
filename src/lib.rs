// ABOUTME: Root library for the wagate gateway binary.
// ABOUTME: Exposes logging setup and the HTTP surface; session logic lives in wagate-core.

pub mod logging;
pub mod server;

pub use wagate_core::{config, Config, SessionManager};
