// ABOUTME: Pluggable chat-network transport abstraction for wagate.
// ABOUTME: Provides the TransportAdapter trait, the event model, and sidecar/websocket/mock backends.

pub mod backends;
pub mod event;
pub mod kind;
pub mod payload;
pub mod registry;
pub mod traits;

pub use event::{CloseInfo, ConnectionUpdate, EventStream, TransportEvent};
pub use kind::TransportKind;
pub use payload::{InboundPayload, MultiDeviceUpsert, WebClientMessage};
pub use registry::{TransportFactory, TransportRegistry};
pub use traits::{MediaKind, MediaUpload, SendReceipt, SocketState, TransportAdapter, TransportProbe};
