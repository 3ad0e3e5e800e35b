//! Client connection management: read/write pumps, keepalive, call dispatch.
//!
//! One task per connection. The read pump owns the connection's call state
//! and routes frames into [`FileService`]; the write pump drains a bounded
//! send queue and emits keepalive pings.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use fileferry_protocol::constants::{
    ERR_CODE_NOT_IMPLEMENTED, MessageType, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT,
};
use fileferry_protocol::envelope::Message;
use fileferry_protocol::frame;

use crate::SEND_BUFFER_SIZE;
use crate::service::{CallState, FileService};

/// Handle for sending frames to a connected client.
///
/// Cloneable and cheap — wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    pub(crate) fn new(tx: mpsc::Sender<WsMessage>) -> Self {
        Self { tx }
    }

    /// Sends a protocol [`Message`] as JSON text without waiting.
    ///
    /// Returns `Err` if the queue is full or the client disconnected.
    pub fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = serde_json::to_string(&msg).map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            tracing::warn!("send buffer full or closed, dropping message");
            SendError
        })
    }

    /// Sends an error response for the given request message.
    pub fn send_error(&self, req: &Message, code: i32, message: &str) -> Result<(), SendError> {
        self.send_msg(req.reply_error(code, message))
    }

    /// Sends an encoded binary chunk frame, waiting for queue capacity.
    ///
    /// Download streams use this path so a slow reader suspends the call
    /// instead of losing chunks.
    pub async fn send_chunk(&self, frame: Vec<u8>) -> Result<(), SendError> {
        self.tx
            .send(WsMessage::Binary(frame.into()))
            .await
            .map_err(|_| SendError)
    }

    /// Returns `true` if the send queue is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send queue is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Runs the pumps for one client connection until it closes.
pub(crate) async fn run_connection<S>(
    ws_stream: S,
    service: Arc<FileService>,
    cancel: CancellationToken,
    peer_addr: String,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let sender = Sender::new(tx);

    let (ws_sink, ws_read) = ws_stream.split();

    let write_cancel = cancel.clone();
    let writer = tokio::spawn(write_pump(ws_sink, rx, write_cancel));

    read_pump(ws_read, sender, service, cancel.clone()).await;

    // When the read pump exits, any in-flight call state was dropped with
    // it (buffers and admission slots included); stop the write pump too.
    cancel.cancel();
    let _ = writer.await;
    tracing::info!(%peer_addr, "client disconnected");
}

/// Write pump: drains the send queue and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break, // Queue closed.
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: reads WS frames, tracks the call state, dispatches to the service.
async fn read_pump<S>(
    mut stream: S,
    sender: Sender,
    service: Arc<FileService>,
    cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
{
    let mut call = CallState::Idle;
    let mut read_deadline = tokio::time::interval(WS_PONG_WAIT);
    read_deadline.reset();
    let mut got_frame = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = read_deadline.tick() => {
                if !got_frame {
                    tracing::warn!("read deadline elapsed, closing connection");
                    break;
                }
                got_frame = false;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(ws_msg)) => {
                        got_frame = true;
                        match ws_msg {
                            WsMessage::Text(text) => {
                                if text.len() > WS_MAX_MESSAGE_SIZE {
                                    tracing::error!("message exceeds max size ({} > {})", text.len(), WS_MAX_MESSAGE_SIZE);
                                    continue;
                                }
                                dispatch_text(&service, &mut call, &sender, &text).await;
                            }
                            WsMessage::Binary(data) => {
                                if data.len() > WS_MAX_MESSAGE_SIZE {
                                    tracing::error!("binary frame exceeds max size ({} > {})", data.len(), WS_MAX_MESSAGE_SIZE);
                                    continue;
                                }
                                dispatch_binary(&service, &mut call, &sender, &data);
                            }
                            WsMessage::Ping(data) => {
                                // Auto-respond to pings from the client.
                                let _ = sender.tx.try_send(WsMessage::Pong(data));
                            }
                            WsMessage::Pong(_) => {}
                            WsMessage::Close(_) => {
                                tracing::debug!("received close frame");
                                break;
                            }
                            WsMessage::Frame(_) => {} // Raw frames ignored.
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!("read pump error: {e}");
                        break;
                    }
                    None => break, // Stream ended.
                }
            }
        }
    }
}

/// Dispatches a text (JSON) message to the appropriate operation.
async fn dispatch_text(
    service: &Arc<FileService>,
    call: &mut CallState,
    sender: &Sender,
    text: &str,
) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("invalid message JSON: {e}");
            return;
        }
    };

    match msg.msg_type {
        MessageType::UploadFile => service.handle_upload_open(call, sender, &msg),
        MessageType::UploadChunk => service.handle_upload_chunk(call, sender, &msg),
        MessageType::UploadEnd => service.handle_upload_end(call, sender, &msg).await,
        MessageType::DownloadFile => service.handle_download(sender, &msg).await,
        MessageType::ListFiles => service.handle_list(sender, &msg),
        MessageType::Ping => {
            if let Ok(reply) = msg.reply(MessageType::Pong, Option::<&()>::None) {
                let _ = sender.send_msg(reply);
            }
        }
        _ => {
            tracing::warn!(msg_type = ?msg.msg_type, "unhandled message type");
            let _ = sender.send_error(&msg, ERR_CODE_NOT_IMPLEMENTED, "unknown message type");
        }
    }
}

/// Dispatches a binary chunk frame to the active upload.
fn dispatch_binary(service: &Arc<FileService>, call: &mut CallState, sender: &Sender, data: &[u8]) {
    match frame::parse_chunk_frame(data) {
        Ok(chunk) => service.handle_chunk_frame(call, sender, chunk),
        Err(e) => {
            tracing::error!("failed to parse chunk frame: {e}");
        }
    }
}
