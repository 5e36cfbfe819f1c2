//! HTTP gateway for the place recommendation chat.
//!
//! `POST /api/v1/chat` opens a tool connection, runs the agent for one turn
//! and streams the assistant's text back as server-sent events.

pub mod chat;
pub mod encoder;
pub mod error;
pub mod server;
pub mod state;

pub use chat::{ChatStreamSession, ChatTurn, SessionPhase};
pub use encoder::{FrameOptions, SseFrame, StreamFrameEncoder};
pub use error::ChatError;
pub use server::{router, start_gateway};
pub use state::GatewayState;
