//! Real-time transport gateway.
//!
//! Translates socket frames to [`InboundEvent`](crate::protocol::InboundEvent)s
//! and socket closes to namespace disconnects.

pub mod websocket;

pub use websocket::ws_handler;
