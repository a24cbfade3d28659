//! ABOUTME: WebSocket transport (C9 <-> wire): bridges actix-ws to ev_session::ConnectionScheduler
//! ABOUTME: One ConnectionScheduler, FrameBuffer, and detector/engine set per socket, never shared

use std::sync::Arc;

use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use async_trait::async_trait;
use ev_detect::ScriptedDetector;
use ev_insights::InsightCoordinator;
use ev_session::{ConnectionScheduler, InboundMessage, OutboundSink};
use ev_stream::FrameBuffer;
use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex};

use crate::server::AppState;

struct ActixSink {
    session: Mutex<actix_ws::Session>,
}

#[async_trait]
impl OutboundSink for ActixSink {
    async fn send(&self, text: String) {
        let mut session = self.session.lock().await;
        if let Err(e) = session.text(text).await {
            tracing::debug!(error = %e, "dropping outbound message, socket already closed");
        }
    }
}

#[get("/ws")]
pub async fn ws_route(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (response, session, mut msg_stream) = actix_ws::handle(&req, body)?;

    let sink: Arc<dyn OutboundSink> = Arc::new(ActixSink { session: Mutex::new(session.clone()) });
    let insights = Arc::new(InsightCoordinator::new(
        (*state.insights_config).clone(),
        (*state.surprise_config).clone(),
        state.agent_client.clone(),
    ));
    let buffer = Arc::new(FrameBuffer::new());
    let detector = Arc::new(ScriptedDetector::new());

    let scheduler = ConnectionScheduler::new(
        (*state.session_config).clone(),
        detector,
        insights,
        buffer,
        sink,
    );

    let (inbound_tx, inbound_rx) = mpsc::channel(32);

    actix_web::rt::spawn(async move {
        scheduler.run(inbound_rx).await;
    });

    let mut ping_session = session;
    actix_web::rt::spawn(async move {
        while let Some(message) = msg_stream.next().await {
            let message = match message {
                Ok(message) => message,
                Err(_) => break,
            };
            match message {
                actix_ws::Message::Binary(bytes) => {
                    if inbound_tx.send(InboundMessage::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                actix_ws::Message::Text(text) => {
                    if inbound_tx.send(InboundMessage::Text(text.to_string())).await.is_err() {
                        break;
                    }
                }
                actix_ws::Message::Ping(bytes) => {
                    if ping_session.pong(&bytes).await.is_err() {
                        break;
                    }
                }
                actix_ws::Message::Close(_) => break,
                _ => {}
            }
        }
    });

    Ok(response)
}
