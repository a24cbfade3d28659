//! ABOUTME: End-to-end smoke test: real TCP WebSocket client against a bound server
//! ABOUTME: Drives one frame through the full C1-C9 pipeline and reads back frame_events

#[path = "../src/server.rs"]
mod server;
#[path = "../src/ws.rs"]
mod ws;

use actix_web::{App, HttpServer};
use ev_config::Config;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::TcpListener;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;

fn sample_jpeg() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(16, 16, image::Rgb([10, 20, 30]));
    let mut buffer = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Jpeg)
        .unwrap();
    buffer
}

fn binary_envelope(frame_id: &str, jpeg: &[u8]) -> Vec<u8> {
    let meta = serde_json::json!({
        "type": "frame_binary",
        "v": 1,
        "frame_id": frame_id,
        "ts_ms": 0,
        "mime": "image/jpeg",
        "width": 16,
        "height": 16,
        "image_bytes": jpeg.len(),
    });
    let meta_bytes = serde_json::to_vec(&meta).unwrap();
    let mut out = Vec::with_capacity(4 + meta_bytes.len() + jpeg.len());
    out.extend_from_slice(&(meta_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&meta_bytes);
    out.extend_from_slice(jpeg);
    out
}

#[actix_web::test]
async fn websocket_round_trip_emits_hello_then_detections() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut config = Config::default();
    config.tracking.enabled = false;

    let state = server::AppState::from_config(&config);

    let handle = tokio::spawn(async move {
        HttpServer::new(move || App::new().configure(server::configure(state.clone())))
            .listen(listener)
            .unwrap()
            .run()
            .await
            .unwrap();
    });

    // Give the listener a moment to start accepting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let url = format!("ws://127.0.0.1:{}/ws", port);
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let hello = timeout(Duration::from_secs(2), socket.next()).await.unwrap().unwrap().unwrap();
    let hello: Value = serde_json::from_str(hello.to_text().unwrap()).unwrap();
    assert_eq!(hello["type"], "hello");

    let jpeg = sample_jpeg();
    socket.send(WsMessage::Binary(binary_envelope("frame-1", &jpeg))).await.unwrap();

    let detections = timeout(Duration::from_secs(2), socket.next()).await.unwrap().unwrap().unwrap();
    let detections: Value = serde_json::from_str(detections.to_text().unwrap()).unwrap();
    assert_eq!(detections["type"], "detections");
    assert_eq!(detections["frame_id"], "frame-1");

    socket.close(None).await.ok();
    handle.abort();
}

#[actix_web::test]
async fn websocket_reports_invalid_frame_binary_without_closing() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let config = Config::default();
    let state = server::AppState::from_config(&config);

    let handle = tokio::spawn(async move {
        HttpServer::new(move || App::new().configure(server::configure(state.clone())))
            .listen(listener)
            .unwrap()
            .run()
            .await
            .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let url = format!("ws://127.0.0.1:{}/ws", port);
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let _hello = timeout(Duration::from_secs(2), socket.next()).await.unwrap().unwrap().unwrap();

    // Declared length far exceeds the actual payload.
    socket.send(WsMessage::Binary(vec![0, 0, 0, 50, 1, 2, 3])).await.unwrap();

    let error = timeout(Duration::from_secs(2), socket.next()).await.unwrap().unwrap().unwrap();
    let error: Value = serde_json::from_str(error.to_text().unwrap()).unwrap();
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "INVALID_FRAME_BINARY");

    socket.close(None).await.ok();
    handle.abort();
}
