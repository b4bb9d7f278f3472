// ABOUTME: Transport implementations (multi-device sidecar, web client bridge, mock).
// ABOUTME: Each backend implements the TransportAdapter trait.

mod bridge;
pub mod mock;
pub mod multidevice;
pub mod webclient;
