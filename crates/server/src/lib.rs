//! WebSocket server for the fileferry transfer service.
//!
//! Accepts client connections over WebSocket, dispatches JSON and binary
//! frames to the three transfer operations (upload, download, list), and
//! bounds per-operation concurrency with non-blocking admission pools.

mod admission;
mod connection;
mod server;
mod service;

pub use admission::{AdmissionError, AdmissionPermit, AdmissionPool};
pub use connection::Sender;
pub use server::{ServerConfig, TransferServer};
pub use service::{FileService, Limits};

/// Send queue capacity per connection.
///
/// Download chunks are 1 MiB each and awaited into the queue, so a slow
/// reader applies backpressure instead of ballooning memory; control
/// messages use the non-blocking path and only need modest headroom.
pub const SEND_BUFFER_SIZE: usize = 64;

/// Errors produced by the transfer server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
