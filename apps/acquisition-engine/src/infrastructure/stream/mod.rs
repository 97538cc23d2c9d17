//! Push Feed
//!
//! WebSocket transport that keeps streaming-eligible cache keys fresh while
//! the mode controller has streaming mode active.
//!
//! - `websocket`: connection lifecycle and frame decoding
//! - `heartbeat`: ping/pong liveness tracking
//! - `reconnect`: exponential backoff with jitter

mod heartbeat;
mod reconnect;
mod websocket;

pub use heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use websocket::{
    StreamSink, StreamStatus, StreamStatusSnapshot, StreamUpdate, WebSocketConfig,
    WebSocketTransport, decode_frame, forward_updates,
};
