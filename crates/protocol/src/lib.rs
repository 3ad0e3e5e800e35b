pub mod constants;
pub mod envelope;
pub mod frame;
pub mod messages;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::{Message, WsError};
pub use frame::{ChunkFrame, ChunkHeader, ParseError};
pub use messages::{
    DownloadEnd, DownloadRequest, FileInfo, FileMetadata, ListRequest, ListResponse, UploadChunk,
    UploadResponse,
};
