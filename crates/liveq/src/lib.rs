//! Live distributed query orchestration.
//!
//! One ad-hoc query fans out to a resolved set of managed hosts; results
//! fan back in over a campaign-keyed pub/sub bus and stream to live
//! viewers over WebSocket.

pub mod api;
pub mod auth;
pub mod bus;
pub mod campaigns;
pub mod client;
pub mod config;
pub mod datastore;
pub mod targets;
pub mod ws;
