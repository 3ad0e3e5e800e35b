use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often the server sends WebSocket pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Time to wait for a pong response (or any incoming frame).
///
/// This acts as a read deadline: if *nothing* arrives within this window
/// the connection is considered dead. Set high enough to tolerate clients
/// that pause between chunks of a large upload.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// Maximum WebSocket message size in bytes (50 MiB).
pub const WS_MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Size of download chunks (1 MiB).
///
/// Every chunk of a download stream is exactly this size except possibly
/// the last one.
pub const DOWNLOAD_CHUNK_SIZE: usize = 1024 * 1024;

/// WebSocket message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from client to server
    #[serde(rename = "upload_file")]
    UploadFile,
    #[serde(rename = "upload_chunk")]
    UploadChunk,
    #[serde(rename = "upload_end")]
    UploadEnd,
    #[serde(rename = "download_file")]
    DownloadFile,
    #[serde(rename = "list_files")]
    ListFiles,
    #[serde(rename = "ping")]
    Ping,

    // Responses from server to client
    #[serde(rename = "upload_response")]
    UploadResponse,
    #[serde(rename = "download_end")]
    DownloadEnd,
    #[serde(rename = "list_response")]
    ListResponse,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Protocol error codes surfaced in [`crate::envelope::WsError`].
pub const ERR_CODE_INVALID_ARGUMENT: i32 = 400;
pub const ERR_CODE_NOT_FOUND: i32 = 404;
pub const ERR_CODE_RESOURCE_EXHAUSTED: i32 = 429;
pub const ERR_CODE_INTERNAL: i32 = 500;
pub const ERR_CODE_NOT_IMPLEMENTED: i32 = 501;
