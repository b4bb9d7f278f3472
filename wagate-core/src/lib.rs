// ABOUTME: Connection session manager for a chat-network gateway.
// ABOUTME: Keeps one authenticated session alive across two swappable transports.

pub mod address;
pub mod clock;
pub mod close_reason;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod health;
pub mod manager;
pub mod message;
pub mod metrics;
pub mod normalizer;
pub mod paths;
pub mod qr;
pub mod runtime;
pub mod supervisor;

pub use config::Config;
pub use error::{SessionError, SessionResult};
pub use events::{EventBus, EventKind, ReadyInfo, SessionEvent, StatusUpdate, Subscription};
pub use manager::SessionManager;
pub use message::{Direction, InboundMessage, OutboundResult};
pub use qr::QrPayload;
pub use runtime::{ConnectionState, RuntimeStatus};
pub use supervisor::{ConnectionSupervisor, ReinitOutcome, StartOutcome};

// Re-export the transport boundary for callers wiring registries
pub use wagate_transport::{TransportKind, TransportRegistry};
