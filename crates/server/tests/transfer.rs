//! End-to-end tests: real WebSocket clients against a server on an
//! OS-assigned port.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use fileferry_protocol::constants::{
    DOWNLOAD_CHUNK_SIZE, ERR_CODE_INVALID_ARGUMENT, ERR_CODE_NOT_FOUND,
    ERR_CODE_RESOURCE_EXHAUSTED, MessageType,
};
use fileferry_protocol::envelope::{Message, WsError};
use fileferry_protocol::frame::{ChunkHeader, encode_chunk_frame, parse_chunk_frame};
use fileferry_protocol::messages::{
    DownloadEnd, DownloadRequest, FileInfo, ListRequest, ListResponse, UploadChunk, UploadResponse,
};
use fileferry_server::{FileService, Limits, ServerConfig, TransferServer};
use fileferry_storage::FileStore;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    server: Arc<TransferServer>,
    handle: tokio::task::JoinHandle<()>,
    url: String,
    _dir: TempDir,
}

impl TestServer {
    async fn start(limits: Limits) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(dir.path()).unwrap());
        let service = FileService::new(store, limits);
        let server = TransferServer::new(ServerConfig { port: 0 }, service);

        let runner = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            runner.run().await.unwrap();
        });

        let mut port = 0;
        for _ in 0..100 {
            port = server.port().await;
            if port != 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(port > 0, "server did not bind");

        Self {
            server,
            handle,
            url: format!("ws://127.0.0.1:{port}"),
            _dir: dir,
        }
    }

    async fn connect(&self) -> WsClient {
        let (ws, _) = connect_async(&self.url).await.unwrap();
        ws
    }

    async fn stop(self) {
        self.server.shutdown();
        self.handle.await.unwrap();
    }
}

async fn send_text(ws: &mut WsClient, msg: &Message) {
    ws.send(WsMessage::Text(serde_json::to_string(msg).unwrap().into()))
        .await
        .unwrap();
}

/// Receives the next JSON message, ignoring keepalive frames.
async fn recv_msg(ws: &mut WsClient) -> Message {
    loop {
        match ws.next().await.expect("stream ended").expect("ws error") {
            WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Runs a full upload call and returns the final response message.
async fn upload(ws: &mut WsClient, req_id: &str, filename: &str, chunks: &[&[u8]]) -> Message {
    let info = FileInfo {
        filename: filename.into(),
        content_type: "application/octet-stream".into(),
    };
    send_text(
        ws,
        &Message::new(req_id, MessageType::UploadFile, Some(&info)).unwrap(),
    )
    .await;

    let mut offset = 0i64;
    for chunk in chunks {
        let header = ChunkHeader {
            id: req_id.into(),
            offset,
            checksum: checksum(chunk),
        };
        let frame = encode_chunk_frame(&header, chunk).unwrap();
        ws.send(WsMessage::Binary(frame.into())).await.unwrap();
        offset += chunk.len() as i64;
    }

    send_text(
        ws,
        &Message::new::<()>(req_id, MessageType::UploadEnd, None).unwrap(),
    )
    .await;
    recv_msg(ws).await
}

/// Runs a download call, returning the received bytes and chunk sizes.
async fn download(
    ws: &mut WsClient,
    req_id: &str,
    file_id: &str,
) -> Result<(Vec<u8>, Vec<usize>, DownloadEnd), WsError> {
    let req = DownloadRequest { id: file_id.into() };
    send_text(
        ws,
        &Message::new(req_id, MessageType::DownloadFile, Some(&req)).unwrap(),
    )
    .await;

    let mut received = Vec::new();
    let mut sizes = Vec::new();
    loop {
        match ws.next().await.expect("stream ended").expect("ws error") {
            WsMessage::Binary(bytes) => {
                let chunk = parse_chunk_frame(&bytes).unwrap();
                assert_eq!(chunk.header.id, req_id);
                assert_eq!(chunk.header.checksum, checksum(&chunk.data));
                sizes.push(chunk.data.len());
                received.extend_from_slice(&chunk.data);
            }
            WsMessage::Text(text) => {
                let msg: Message = serde_json::from_str(&text).unwrap();
                match msg.msg_type {
                    MessageType::DownloadEnd => {
                        let end: DownloadEnd = msg.parse_payload().unwrap().unwrap();
                        return Ok((received, sizes, end));
                    }
                    MessageType::Error => return Err(msg.error.unwrap()),
                    other => panic!("unexpected message type {other:?}"),
                }
            }
            _ => continue,
        }
    }
}

/// Runs a list call.
async fn list(ws: &mut WsClient, req_id: &str, page_size: i32, page_number: i32) -> ListResponse {
    let req = ListRequest {
        page_size,
        page_number,
    };
    send_text(
        ws,
        &Message::new(req_id, MessageType::ListFiles, Some(&req)).unwrap(),
    )
    .await;
    let reply = recv_msg(ws).await;
    assert_eq!(reply.msg_type, MessageType::ListResponse);
    reply.parse_payload().unwrap().unwrap()
}

/// Waits for a pong, proving the server processed everything sent before
/// the ping (the read pump is serial per connection).
async fn sync_point(ws: &mut WsClient, id: &str) {
    send_text(ws, &Message::new::<()>(id, MessageType::Ping, None).unwrap()).await;
    let reply = recv_msg(ws).await;
    assert_eq!(reply.msg_type, MessageType::Pong);
}

#[tokio::test]
async fn upload_download_roundtrip_and_list() {
    let server = TestServer::start(Limits::default()).await;
    let mut ws = server.connect().await;

    let reply = upload(&mut ws, "u1", "a.txt", &[b"hel", b"lo"]).await;
    assert_eq!(reply.msg_type, MessageType::UploadResponse);
    let resp: UploadResponse = reply.parse_payload().unwrap().unwrap();
    assert!(!resp.id.is_empty());
    assert_eq!(resp.filename, "a.txt");
    assert_eq!(resp.size, 5);
    assert!(resp.created_at > 0);

    let (data, _, end) = download(&mut ws, "d1", &resp.id).await.unwrap();
    assert_eq!(data, b"hello");
    assert_eq!(end.size, 5);
    assert_eq!(end.chunk_count, 1);

    let listing = list(&mut ws, "l1", 10, 1).await;
    assert_eq!(listing.total_count, 1);
    assert_eq!(listing.files.len(), 1);
    assert_eq!(listing.files[0].filename, "a.txt");
    assert_eq!(listing.files[0].size, 5);
    assert_eq!(listing.files[0].created_at, listing.files[0].updated_at);

    drop(ws);
    server.stop().await;
}

#[tokio::test]
async fn download_chunks_are_exactly_one_mebibyte_except_last() {
    let server = TestServer::start(Limits::default()).await;
    let mut ws = server.connect().await;

    // 2.5 MiB, uploaded in uneven chunks.
    let data: Vec<u8> = (0..(2 * DOWNLOAD_CHUNK_SIZE + DOWNLOAD_CHUNK_SIZE / 2))
        .map(|i| (i % 251) as u8)
        .collect();
    let parts: Vec<&[u8]> = data.chunks(700_000).collect();

    let reply = upload(&mut ws, "u1", "big.bin", &parts).await;
    let resp: UploadResponse = reply.parse_payload().unwrap().unwrap();
    assert_eq!(resp.size, data.len() as i64);

    let (received, sizes, end) = download(&mut ws, "d1", &resp.id).await.unwrap();
    assert_eq!(received, data);
    assert_eq!(sizes, vec![
        DOWNLOAD_CHUNK_SIZE,
        DOWNLOAD_CHUNK_SIZE,
        DOWNLOAD_CHUNK_SIZE / 2
    ]);
    assert_eq!(end.chunk_count, 3);

    drop(ws);
    server.stop().await;
}

#[tokio::test]
async fn upload_via_json_chunks() {
    let server = TestServer::start(Limits::default()).await;
    let mut ws = server.connect().await;

    let info = FileInfo {
        filename: "json.bin".into(),
        content_type: String::new(),
    };
    send_text(
        &mut ws,
        &Message::new("u1", MessageType::UploadFile, Some(&info)).unwrap(),
    )
    .await;
    for part in [b"abc".as_slice(), b"def".as_slice()] {
        let chunk = UploadChunk { data: part.to_vec() };
        send_text(
            &mut ws,
            &Message::new("u1", MessageType::UploadChunk, Some(&chunk)).unwrap(),
        )
        .await;
    }
    send_text(
        &mut ws,
        &Message::new::<()>("u1", MessageType::UploadEnd, None).unwrap(),
    )
    .await;

    let resp: UploadResponse = recv_msg(&mut ws).await.parse_payload().unwrap().unwrap();
    assert_eq!(resp.size, 6);

    let (data, _, _) = download(&mut ws, "d1", &resp.id).await.unwrap();
    assert_eq!(data, b"abcdef");

    drop(ws);
    server.stop().await;
}

#[tokio::test]
async fn empty_upload_roundtrip() {
    let server = TestServer::start(Limits::default()).await;
    let mut ws = server.connect().await;

    let reply = upload(&mut ws, "u1", "empty", &[]).await;
    let resp: UploadResponse = reply.parse_payload().unwrap().unwrap();
    assert_eq!(resp.size, 0);

    let (data, sizes, end) = download(&mut ws, "d1", &resp.id).await.unwrap();
    assert!(data.is_empty());
    assert!(sizes.is_empty());
    assert_eq!(end.chunk_count, 0);

    drop(ws);
    server.stop().await;
}

#[tokio::test]
async fn upload_starting_with_chunk_is_rejected_and_stores_nothing() {
    let server = TestServer::start(Limits::default()).await;
    let mut ws = server.connect().await;

    let header = ChunkHeader {
        id: "bad1".into(),
        offset: 0,
        checksum: String::new(),
    };
    let frame = encode_chunk_frame(&header, b"sneaky").unwrap();
    ws.send(WsMessage::Binary(frame.into())).await.unwrap();

    let reply = recv_msg(&mut ws).await;
    assert_eq!(reply.id, "bad1");
    assert_eq!(reply.error.unwrap().code, ERR_CODE_INVALID_ARGUMENT);

    // Nothing was stored, and the connection is usable for a real call.
    let listing = list(&mut ws, "l1", 10, 1).await;
    assert_eq!(listing.total_count, 0);

    let reply = upload(&mut ws, "u1", "ok.txt", &[b"fine"]).await;
    assert_eq!(reply.msg_type, MessageType::UploadResponse);

    drop(ws);
    server.stop().await;
}

#[tokio::test]
async fn download_of_unknown_id_is_not_found() {
    let server = TestServer::start(Limits::default()).await;
    let mut ws = server.connect().await;

    let err = download(&mut ws, "d1", "never-saved").await.unwrap_err();
    assert_eq!(err.code, ERR_CODE_NOT_FOUND);

    drop(ws);
    server.stop().await;
}

#[tokio::test]
async fn upload_admission_bound_and_slot_release() {
    let server = TestServer::start(Limits {
        max_uploads: 2,
        ..Limits::default()
    })
    .await;

    // Two calls hold both slots (ping round-trips prove the server
    // processed the opens).
    let mut ws1 = server.connect().await;
    let mut ws2 = server.connect().await;
    let info = FileInfo {
        filename: "held.bin".into(),
        content_type: String::new(),
    };
    send_text(
        &mut ws1,
        &Message::new("u1", MessageType::UploadFile, Some(&info)).unwrap(),
    )
    .await;
    sync_point(&mut ws1, "p1").await;
    send_text(
        &mut ws2,
        &Message::new("u2", MessageType::UploadFile, Some(&info)).unwrap(),
    )
    .await;
    sync_point(&mut ws2, "p2").await;

    // The third concurrent upload is rejected immediately.
    let mut ws3 = server.connect().await;
    send_text(
        &mut ws3,
        &Message::new("u3", MessageType::UploadFile, Some(&info)).unwrap(),
    )
    .await;
    let reply = recv_msg(&mut ws3).await;
    assert_eq!(reply.error.unwrap().code, ERR_CODE_RESOURCE_EXHAUSTED);

    // Disconnecting mid-call releases the slots.
    drop(ws1);
    drop(ws2);

    let mut admitted = false;
    for attempt in 0..50 {
        // Fresh connection per attempt: a rejected call leaves queued
        // error replies behind on its connection.
        let mut ws = server.connect().await;
        let reply = upload(&mut ws, &format!("r{attempt}"), "after.txt", &[b"x"]).await;
        match reply.msg_type {
            MessageType::UploadResponse => {
                admitted = true;
                break;
            }
            MessageType::Error => {
                assert_eq!(reply.error.unwrap().code, ERR_CODE_RESOURCE_EXHAUSTED);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            other => panic!("unexpected message type {other:?}"),
        }
    }
    assert!(admitted, "slots were not released after disconnect");

    drop(ws3);
    server.stop().await;
}

#[tokio::test]
async fn pagination_covers_every_file_exactly_once() {
    let server = TestServer::start(Limits::default()).await;
    let mut ws = server.connect().await;

    let mut expected = std::collections::HashSet::new();
    for i in 0..5 {
        let reply = upload(&mut ws, &format!("u{i}"), &format!("f{i}.txt"), &[b"data"]).await;
        let resp: UploadResponse = reply.parse_payload().unwrap().unwrap();
        expected.insert(resp.id);
    }

    let mut seen = std::collections::HashSet::new();
    for page in 1..=3 {
        let listing = list(&mut ws, &format!("l{page}"), 2, page).await;
        assert_eq!(listing.total_count, 5);
        for f in listing.files {
            assert!(seen.insert(f.id), "duplicate id across pages");
        }
    }
    assert_eq!(seen, expected);

    drop(ws);
    server.stop().await;
}
