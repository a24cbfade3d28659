//! ABOUTME: Actix-web app factory and HTTP server bootstrap
//! ABOUTME: Builds the shared AppState once, then hands each connection off to ws::ws_route

use std::sync::Arc;

use actix_web::{get, web, App, HttpResponse, HttpServer};
use ev_agent::VisionAgentClient;
use ev_config::Config;
use ev_insights::SurpriseConfig;
use ev_session::SessionConfig;

use crate::ws::ws_route;

/// Shared, connection-independent state. Per-connection engines, frame
/// buffers, and insight coordinators are built fresh in `ws::ws_route` --
/// nothing here is mutated after startup.
#[derive(Clone)]
pub struct AppState {
    pub session_config: Arc<SessionConfig>,
    pub insights_config: Arc<ev_insights::InsightsConfig>,
    pub surprise_config: Arc<SurpriseConfig>,
    pub agent_client: Arc<dyn VisionAgentClient>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Self {
        Self {
            session_config: Arc::new(ev_session::build_session_config(config)),
            insights_config: Arc::new(ev_session::build_insights_config(config)),
            surprise_config: Arc::new(ev_session::build_surprise_config(&config.surprise)),
            agent_client: Arc::from(ev_agent::create_client(
                config.insights.agent_url.clone(),
                config.insights.agent_auth_token.clone(),
                true,
            )),
        }
    }
}

#[get("/healthz")]
async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

/// Route registration shared between the real server and tests, so a test
/// binding to an ephemeral port exercises the exact same service tree.
pub fn configure(state: AppState) -> impl Fn(&mut web::ServiceConfig) + Clone {
    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(web::Data::new(state.clone())).service(healthz).service(ws_route);
    }
}

pub async fn run(config: Config) -> ev_core::Result<()> {
    let bind_addr = config.server.bind_addr.clone();
    let state = AppState::from_config(&config);

    tracing::info!(bind_addr = %bind_addr, "starting server");

    HttpServer::new(move || {
        App::new().wrap(actix_web::middleware::Logger::default()).configure(configure(state.clone()))
    })
    .bind(&bind_addr)
    .map_err(|e| ev_core::Error::Config(format!("failed to bind {}: {}", bind_addr, e)))?
    .run()
    .await
    .map_err(|e| ev_core::Error::Config(format!("server error: {}", e)))?;

    Ok(())
}
