//! Real-time chat synchronization engine for the opsdesk console.
//!
//! One engine actor owns a single multiplexed WebSocket to the messaging
//! backend and keeps every client-visible view consistent through
//! reconnects, out-of-order delivery, and concurrent mutation by other
//! agents: the two conversation directories, the open message timeline,
//! presence and typing indicators, templates, and the transfer protocol.
//!
//! Collaborating console modules (finance, news, orders, dashboards) use
//! [`spawn`] to start a session, call operations on the returned
//! [`EngineHandle`], and re-render from its snapshots whenever an
//! [`EngineNotice`] arrives.

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
mod identity;
pub mod models;
pub mod protocol;
mod upload;

pub use config::{FileConfig, SyncConfig, load_config};
pub use connection::ConnectionState;
pub use engine::{
    DirectorySnapshot, EngineHandle, EngineNotice, TimelineRow, TimelineSnapshot, render_rows,
    spawn,
};
pub use error::EngineError;
