//! Result stream protocol over WebSocket.
//!
//! Per-connection state machine:
//! `Connected -> Authenticated -> Bound(campaign) -> Streaming -> Closed`.
//! The first frame must be `auth`; `select_campaign` binds the single bus
//! subscription and may be repeated to re-bind; results are forwarded as
//! `result` frames. Auth failures, malformed frames, and forwarding I/O
//! errors all terminate the connection.

mod handler;
mod types;

pub use handler::results_ws_handler;
pub use types::{ClientFrame, ServerFrame};
