//! The three transfer operations: upload, download, list.
//!
//! Each WebSocket connection carries at most one in-flight call; the read
//! pump owns a [`CallState`] and routes frames here. Every operation takes
//! an admission slot up front and the slot travels with the call state, so
//! it is released on every exit path, including disconnect.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use fileferry_protocol::constants::{
    DOWNLOAD_CHUNK_SIZE, ERR_CODE_INTERNAL, ERR_CODE_INVALID_ARGUMENT, ERR_CODE_NOT_FOUND,
    ERR_CODE_RESOURCE_EXHAUSTED, MessageType,
};
use fileferry_protocol::envelope::Message;
use fileferry_protocol::frame::{ChunkFrame, ChunkHeader, encode_chunk_frame};
use fileferry_protocol::messages::{
    DownloadEnd, DownloadRequest, FileInfo, ListRequest, ListResponse, UploadChunk, UploadResponse,
};
use fileferry_storage::FileStore;

use crate::admission::{AdmissionPermit, AdmissionPool};
use crate::connection::Sender;

/// Per-operation admission capacities.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_uploads: usize,
    pub max_downloads: usize,
    pub max_lists: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_uploads: 10,
            max_downloads: 10,
            max_lists: 100,
        }
    }
}

/// Call state owned by one connection's read pump.
pub(crate) enum CallState {
    Idle,
    Uploading(UploadState),
}

/// An upload call between its opening `upload_file` and `upload_end`.
pub(crate) struct UploadState {
    request_id: String,
    info: FileInfo,
    buf: Vec<u8>,
    permit: AdmissionPermit,
}

/// Terminates the transfer operations against the storage engine.
pub struct FileService {
    store: Arc<FileStore>,
    uploads: AdmissionPool,
    downloads: AdmissionPool,
    lists: AdmissionPool,
}

impl FileService {
    pub fn new(store: Arc<FileStore>, limits: Limits) -> Self {
        Self {
            store,
            uploads: AdmissionPool::new(limits.max_uploads),
            downloads: AdmissionPool::new(limits.max_downloads),
            lists: AdmissionPool::new(limits.max_lists),
        }
    }

    /// Opens an upload call: `upload_file` carrying the file info.
    pub(crate) fn handle_upload_open(&self, state: &mut CallState, sender: &Sender, msg: &Message) {
        if matches!(state, CallState::Uploading(_)) {
            // A second upload_file is a protocol violation; the active
            // call aborts and its buffer and slot go with it.
            *state = CallState::Idle;
            let _ = sender.send_error(msg, ERR_CODE_INVALID_ARGUMENT, "upload already in progress");
            return;
        }

        // Admission is checked before the payload, matching the operation
        // order of the reference service.
        let permit = match self.uploads.try_acquire() {
            Ok(p) => p,
            Err(_) => {
                let _ = sender.send_error(
                    msg,
                    ERR_CODE_RESOURCE_EXHAUSTED,
                    "max concurrent uploads reached",
                );
                return;
            }
        };

        let info: FileInfo = match msg.parse_payload() {
            Ok(Some(info)) => info,
            _ => {
                let _ = sender.send_error(
                    msg,
                    ERR_CODE_INVALID_ARGUMENT,
                    "upload_file requires file info",
                );
                return;
            }
        };

        tracing::debug!(id = %msg.id, filename = %info.filename, "upload call opened");
        *state = CallState::Uploading(UploadState {
            request_id: msg.id.clone(),
            info,
            buf: Vec::new(),
            permit,
        });
    }

    /// Appends a binary chunk frame to the active upload.
    pub(crate) fn handle_chunk_frame(
        &self,
        state: &mut CallState,
        sender: &Sender,
        chunk: ChunkFrame,
    ) {
        self.append_chunk(state, sender, &chunk.header.id, &chunk.header.checksum, chunk.data);
    }

    /// Appends a JSON-path chunk (`upload_chunk`) to the active upload.
    pub(crate) fn handle_upload_chunk(&self, state: &mut CallState, sender: &Sender, msg: &Message) {
        let chunk: UploadChunk = match msg.parse_payload() {
            Ok(Some(c)) => c,
            _ => {
                let _ = sender.send_error(msg, ERR_CODE_INVALID_ARGUMENT, "invalid chunk payload");
                return;
            }
        };
        self.append_chunk(state, sender, &msg.id, "", chunk.data);
    }

    fn append_chunk(
        &self,
        state: &mut CallState,
        sender: &Sender,
        chunk_id: &str,
        checksum: &str,
        data: Vec<u8>,
    ) {
        let mut upload = match std::mem::replace(state, CallState::Idle) {
            CallState::Uploading(u) => u,
            CallState::Idle => {
                // The stream opened with a chunk instead of file info.
                // Admission still comes first; the permit is dropped as
                // soon as the call is rejected.
                match self.uploads.try_acquire() {
                    Ok(_permit) => {
                        let _ = sender.send_msg(Message::error(
                            chunk_id,
                            ERR_CODE_INVALID_ARGUMENT,
                            "first message must contain file info",
                        ));
                    }
                    Err(_) => {
                        let _ = sender.send_msg(Message::error(
                            chunk_id,
                            ERR_CODE_RESOURCE_EXHAUSTED,
                            "max concurrent uploads reached",
                        ));
                    }
                }
                return;
            }
        };

        if upload.request_id != chunk_id {
            let _ = sender.send_msg(Message::error(
                chunk_id,
                ERR_CODE_INVALID_ARGUMENT,
                "chunk does not match the active upload",
            ));
            return;
        }

        if !checksum.is_empty() && checksum_bytes(&data) != checksum {
            let _ = sender.send_msg(Message::error(
                chunk_id,
                ERR_CODE_INVALID_ARGUMENT,
                "chunk checksum mismatch",
            ));
            return;
        }

        upload.buf.extend_from_slice(&data);
        *state = CallState::Uploading(upload);
    }

    /// Ends the chunk stream and commits the assembled buffer to storage.
    pub(crate) async fn handle_upload_end(
        &self,
        state: &mut CallState,
        sender: &Sender,
        msg: &Message,
    ) {
        let upload = match std::mem::replace(state, CallState::Idle) {
            CallState::Uploading(u) => u,
            CallState::Idle => {
                let _ = sender.send_error(msg, ERR_CODE_INVALID_ARGUMENT, "no active upload");
                return;
            }
        };

        if upload.request_id != msg.id {
            let _ = sender.send_error(
                msg,
                ERR_CODE_INVALID_ARGUMENT,
                "upload_end does not match the active upload",
            );
            return;
        }

        // Keep the slot until the save completes.
        let UploadState {
            info,
            buf,
            permit: _permit,
            ..
        } = upload;
        let store = Arc::clone(&self.store);
        let filename = info.filename.clone();
        let saved = tokio::task::spawn_blocking(move || store.save_file(&filename, &buf)).await;

        match saved {
            Ok(Ok(meta)) => {
                tracing::info!(id = %meta.id, filename = %meta.filename, size = meta.size, "upload complete");
                let resp = UploadResponse {
                    id: meta.id,
                    filename: meta.filename,
                    size: meta.size,
                    created_at: meta.created_at,
                };
                if let Ok(reply) = msg.reply(MessageType::UploadResponse, Some(&resp)) {
                    let _ = sender.send_msg(reply);
                }
            }
            Ok(Err(e)) => {
                tracing::error!(filename = %info.filename, "save failed: {e}");
                let _ = sender.send_error(msg, ERR_CODE_INTERNAL, "failed to save file");
            }
            Err(e) => {
                tracing::error!("save task failed: {e}");
                let _ = sender.send_error(msg, ERR_CODE_INTERNAL, "failed to save file");
            }
        }
    }

    /// Streams a stored blob back to the client in 1 MiB chunks.
    pub(crate) async fn handle_download(&self, sender: &Sender, msg: &Message) {
        let _permit = match self.downloads.try_acquire() {
            Ok(p) => p,
            Err(_) => {
                let _ = sender.send_error(
                    msg,
                    ERR_CODE_RESOURCE_EXHAUSTED,
                    "max concurrent downloads reached",
                );
                return;
            }
        };

        let req: DownloadRequest = match msg.parse_payload() {
            Ok(Some(r)) => r,
            _ => {
                let _ = sender.send_error(
                    msg,
                    ERR_CODE_INVALID_ARGUMENT,
                    "download_file requires a file id",
                );
                return;
            }
        };

        let store = Arc::clone(&self.store);
        let id = req.id.clone();
        let fetched = tokio::task::spawn_blocking(move || store.get_file(&id)).await;
        let data = match fetched {
            Ok(Ok(data)) => data,
            Ok(Err(e)) => {
                tracing::debug!(id = %req.id, "download miss: {e}");
                let _ = sender.send_error(msg, ERR_CODE_NOT_FOUND, "file not found");
                return;
            }
            Err(e) => {
                tracing::error!("read task failed: {e}");
                let _ = sender.send_error(msg, ERR_CODE_INTERNAL, "failed to read file");
                return;
            }
        };

        let size = data.len() as i64;
        let mut offset = 0i64;
        let mut chunk_count = 0i32;
        for chunk in data.chunks(DOWNLOAD_CHUNK_SIZE) {
            let header = ChunkHeader {
                id: msg.id.clone(),
                offset,
                checksum: checksum_bytes(chunk),
            };
            let frame = match encode_chunk_frame(&header, chunk) {
                Ok(f) => f,
                Err(e) => {
                    tracing::error!("failed to encode chunk frame: {e}");
                    let _ = sender.send_error(msg, ERR_CODE_INTERNAL, "failed to encode chunk");
                    return;
                }
            };

            // Await queue capacity; a failed send means the client went
            // away and the stream aborts with no further chunks.
            if sender.send_chunk(frame).await.is_err() {
                tracing::warn!(id = %req.id, "client went away mid-download");
                return;
            }

            offset += chunk.len() as i64;
            chunk_count += 1;
        }

        let end = DownloadEnd {
            id: req.id,
            size,
            chunk_count,
        };
        if let Ok(reply) = msg.reply(MessageType::DownloadEnd, Some(&end)) {
            let _ = sender.send_msg(reply);
        }
    }

    /// Returns one page of the catalog.
    pub(crate) fn handle_list(&self, sender: &Sender, msg: &Message) {
        let _permit = match self.lists.try_acquire() {
            Ok(p) => p,
            Err(_) => {
                let _ = sender.send_error(
                    msg,
                    ERR_CODE_RESOURCE_EXHAUSTED,
                    "max concurrent list requests reached",
                );
                return;
            }
        };

        let req: ListRequest = match msg.parse_payload() {
            Ok(Some(r)) => r,
            _ => {
                let _ = sender.send_error(
                    msg,
                    ERR_CODE_INVALID_ARGUMENT,
                    "list_files requires pagination parameters",
                );
                return;
            }
        };

        match self.store.list_files(req.page_size, req.page_number) {
            Ok((files, total_count)) => {
                let resp = ListResponse { files, total_count };
                if let Ok(reply) = msg.reply(MessageType::ListResponse, Some(&resp)) {
                    let _ = sender.send_msg(reply);
                }
            }
            Err(e) => {
                tracing::error!("list failed: {e}");
                let _ = sender.send_error(msg, ERR_CODE_INTERNAL, "failed to list files");
            }
        }
    }
}

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub(crate) fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
