//! HTTP request handlers
//!
//! REST adapter over the in-process controller API.

use actix_web::{web, HttpRequest, HttpResponse, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::controller::Controller;
use crate::error::{AppError, ControllerError};
use crate::maintenance::MaintenanceRequest;
use crate::models::{DosingKind, HealthCheck, SensorReading};
use crate::sensor::ReplayFeed;
use crate::system::ConfigUpdate;
use crate::validation::validate_sensor_reading;
use crate::websocket::WsSession;

/// Default window for history and report queries
const DEFAULT_WINDOW_HOURS: i64 = 24;

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub controller: Controller,
    /// Present when readings are pushed in over HTTP instead of simulated
    pub feed: Option<ReplayFeed>,
}

/// Configure all application routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health_check))
            .route("/status", web::get().to(get_status))
            // Lifecycle
            .route("/controller/start", web::post().to(start_controller))
            .route("/controller/stop", web::post().to(stop_controller))
            .route("/controller/tick", web::post().to(run_tick))
            // Data
            .route("/sensor/ingest", web::post().to(ingest_reading))
            .route("/measurements", web::get().to(get_measurements))
            .route("/dosing", web::get().to(get_dosing_history))
            .route("/dosing/manual", web::post().to(manual_dose))
            .route("/config", web::patch().to(update_config))
            // Maintenance
            .route("/maintenance", web::post().to(schedule_maintenance))
            .route("/maintenance/overdue", web::get().to(get_overdue_maintenance))
            .route("/maintenance/upcoming", web::get().to(get_upcoming_maintenance))
            .route(
                "/maintenance/{id}/complete",
                web::post().to(complete_maintenance),
            )
            // Analysis
            .route("/root-zone", web::get().to(get_root_zone))
            .route("/report", web::get().to(get_report)),
    )
    .route("/ws", web::get().to(websocket_handler));
}

/// GET /api/health
pub async fn health_check(state: web::Data<ApiState>) -> Result<HttpResponse, AppError> {
    let latest = state.controller.latest_measurement().await;
    let health = HealthCheck {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        controller_running: state.controller.is_running(),
        last_measurement: latest.map(|m| m.timestamp),
    };

    Ok(HttpResponse::Ok().json(health))
}

/// GET /api/status
pub async fn get_status(state: web::Data<ApiState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(state.controller.status().await))
}

#[derive(Serialize)]
struct LifecycleResponse {
    running: bool,
    changed: bool,
}

/// POST /api/controller/start
pub async fn start_controller(state: web::Data<ApiState>) -> Result<HttpResponse, AppError> {
    let changed = state.controller.start();
    info!(changed, "Controller start requested");
    Ok(HttpResponse::Ok().json(LifecycleResponse {
        running: true,
        changed,
    }))
}

/// POST /api/controller/stop
pub async fn stop_controller(state: web::Data<ApiState>) -> Result<HttpResponse, AppError> {
    let changed = state.controller.stop().await;
    info!(changed, "Controller stop requested");
    Ok(HttpResponse::Ok().json(LifecycleResponse {
        running: false,
        changed,
    }))
}

/// POST /api/controller/tick
///
/// Runs one tick immediately, outside the schedule.
pub async fn run_tick(state: web::Data<ApiState>) -> Result<HttpResponse, AppError> {
    let measurement = state.controller.tick().await?;
    Ok(HttpResponse::Ok().json(measurement))
}

#[derive(Serialize)]
struct IngestResponse {
    success: bool,
    queued: usize,
    correlation_id: String,
}

/// POST /api/sensor/ingest
///
/// Queues a reading from an external sensor driver for the next tick.
pub async fn ingest_reading(
    state: web::Data<ApiState>,
    body: web::Json<SensorReading>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let correlation_id = extract_correlation_id(&req);
    let feed = state.feed.as_ref().ok_or_else(|| {
        AppError::BadRequest("controller is not configured for ingested readings".to_string())
    })?;

    let reading = body.into_inner();
    validate_sensor_reading(&reading).map_err(|e| AppError::ValidationError(e.0))?;
    feed.push(reading);

    info!(correlation_id = %correlation_id, queued = feed.len(), "Sensor reading queued");

    Ok(HttpResponse::Accepted().json(IngestResponse {
        success: true,
        queued: feed.len(),
        correlation_id,
    }))
}

/// Query parameters for windowed queries
#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub hours: Option<i64>,
}

/// GET /api/measurements?hours=24
pub async fn get_measurements(
    state: web::Data<ApiState>,
    query: web::Query<WindowQuery>,
) -> Result<HttpResponse, AppError> {
    let hours = query.hours.unwrap_or(DEFAULT_WINDOW_HOURS);
    Ok(HttpResponse::Ok().json(state.controller.recent_measurements(hours).await?))
}

/// GET /api/dosing?hours=24
pub async fn get_dosing_history(
    state: web::Data<ApiState>,
    query: web::Query<WindowQuery>,
) -> Result<HttpResponse, AppError> {
    let hours = query.hours.unwrap_or(DEFAULT_WINDOW_HOURS);
    Ok(HttpResponse::Ok().json(state.controller.dosing_history(hours).await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManualDoseRequest {
    pub kind: DosingKind,
    pub volume_ml: f64,
}

/// POST /api/dosing/manual
pub async fn manual_dose(
    state: web::Data<ApiState>,
    body: web::Json<ManualDoseRequest>,
    req: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let correlation_id = extract_correlation_id(&req);
    let request = body.into_inner();
    info!(
        correlation_id = %correlation_id,
        kind = %request.kind,
        volume_ml = request.volume_ml,
        "Manual dose requested"
    );

    let event = state
        .controller
        .dose_manually(request.kind, request.volume_ml)
        .await?;
    Ok(HttpResponse::Created().json(event))
}

/// PATCH /api/config
pub async fn update_config(
    state: web::Data<ApiState>,
    body: web::Json<ConfigUpdate>,
) -> Result<HttpResponse, AppError> {
    let config = state.controller.update_config(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(config))
}

/// POST /api/maintenance
pub async fn schedule_maintenance(
    state: web::Data<ApiState>,
    body: web::Json<MaintenanceRequest>,
) -> Result<HttpResponse, AppError> {
    let task = state
        .controller
        .schedule_maintenance(body.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(task))
}

#[derive(Debug, Default, Deserialize)]
pub struct CompletionRequest {
    pub completed_at: Option<DateTime<Utc>>,
}

/// POST /api/maintenance/{id}/complete
pub async fn complete_maintenance(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    body: Option<web::Json<CompletionRequest>>,
) -> Result<HttpResponse, AppError> {
    let raw = path.into_inner();
    let id = Uuid::parse_str(&raw)
        .map_err(|_| AppError::BadRequest(format!("Invalid task id: {raw}")))?;
    let completed_at = body.and_then(|b| b.into_inner().completed_at);

    let task = state
        .controller
        .record_maintenance_completion(id, completed_at)
        .await?;
    Ok(HttpResponse::Ok().json(task))
}

/// GET /api/maintenance/overdue
pub async fn get_overdue_maintenance(state: web::Data<ApiState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(state.controller.overdue_maintenance().await))
}

/// GET /api/maintenance/upcoming
pub async fn get_upcoming_maintenance(state: web::Data<ApiState>) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(state.controller.upcoming_maintenance().await))
}

/// GET /api/root-zone
pub async fn get_root_zone(state: web::Data<ApiState>) -> Result<HttpResponse, AppError> {
    let assessment = state
        .controller
        .analyze_root_zone()
        .await
        .map_err(|e| match e {
            ControllerError::NotFound(_) => {
                AppError::NotFound("No measurements available".to_string())
            }
            other => other.into(),
        })?;
    Ok(HttpResponse::Ok().json(assessment))
}

/// GET /api/report?hours=24
pub async fn get_report(
    state: web::Data<ApiState>,
    query: web::Query<WindowQuery>,
) -> Result<HttpResponse, AppError> {
    let hours = query.hours.unwrap_or(DEFAULT_WINDOW_HOURS);
    Ok(HttpResponse::Ok().json(state.controller.generate_report(hours).await?))
}

/// WebSocket upgrade handler
///
/// GET /ws
pub async fn websocket_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<ApiState>,
) -> Result<HttpResponse, actix_web::Error> {
    let client_id = Uuid::new_v4().to_string();

    info!(client_id = %client_id, "WebSocket connection request");

    let ws_session = WsSession::new(client_id, state.controller.clone());

    actix_web_actors::ws::start(ws_session, &req, stream)
}

/// Extract or generate correlation ID from request headers
fn extract_correlation_id(req: &HttpRequest) -> String {
    req.headers()
        .get("X-Correlation-ID")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerOptions;
    use crate::profile::ProvisionRequest;
    use crate::sensor::ReplaySource;
    use crate::system::{SystemConfig, SystemType};
    use actix_web::{test, App};
    use std::time::Duration;

    fn api_state() -> ApiState {
        let config = SystemConfig::provision(ProvisionRequest::new(SystemType::Nft, 100.0)).unwrap();
        let (source, feed) = ReplaySource::channel();
        let controller = Controller::builder(config, Box::new(source))
            .options(ControllerOptions {
                dosing_delay: Duration::from_millis(5),
                ..ControllerOptions::default()
            })
            .build()
            .unwrap();
        ApiState {
            controller,
            feed: Some(feed),
        }
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .configure(configure_routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_health_check() {
        let app = app!(api_state());

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let resp = test::call_service(&app, req).await;

        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn test_ingest_then_tick_records_measurement() {
        let state = api_state();
        let app = app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/api/sensor/ingest")
            .set_json(SensorReading::nominal())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 202);

        let req = test::TestRequest::post().uri("/api/controller/tick").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let req = test::TestRequest::get()
            .uri("/api/measurements?hours=1")
            .to_request();
        let body: Vec<serde_json::Value> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.len(), 1);
        assert_eq!(body[0]["phase"], "flowing");
    }

    #[actix_web::test]
    async fn test_ingest_invalid_reading() {
        let app = app!(api_state());

        let invalid = SensorReading {
            ph: 15.0,
            ..SensorReading::nominal()
        };
        let req = test::TestRequest::post()
            .uri("/api/sensor/ingest")
            .set_json(&invalid)
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn test_tick_without_reading_is_unavailable() {
        let app = app!(api_state());

        let req = test::TestRequest::post().uri("/api/controller/tick").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 503);
    }

    #[actix_web::test]
    async fn test_root_zone_no_data() {
        let app = app!(api_state());

        let req = test::TestRequest::get().uri("/api/root-zone").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
    }

    #[actix_web::test]
    async fn test_invalid_window_rejected() {
        let app = app!(api_state());

        let req = test::TestRequest::get()
            .uri("/api/report?hours=0")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn test_config_patch_validation() {
        let app = app!(api_state());

        let req = test::TestRequest::patch()
            .uri("/api/config")
            .set_json(serde_json::json!({ "tank_capacity_liters": -5.0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let req = test::TestRequest::patch()
            .uri("/api/config")
            .set_json(serde_json::json!({ "name": "Greenhouse NFT 2" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["name"], "Greenhouse NFT 2");
    }

    #[actix_web::test]
    async fn test_maintenance_lifecycle() {
        let app = app!(api_state());

        let req = test::TestRequest::post()
            .uri("/api/maintenance")
            .set_json(serde_json::json!({ "kind": "cleaning" }))
            .to_request();
        let task: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let id = task["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri("/api/maintenance/overdue")
            .to_request();
        let overdue: Vec<serde_json::Value> = test::call_and_read_body_json(&app, req).await;
        assert!(overdue.is_empty());

        let req = test::TestRequest::post()
            .uri(&format!("/api/maintenance/{id}/complete"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let req = test::TestRequest::post()
            .uri(&format!("/api/maintenance/{}/complete", Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
    }

    #[actix_web::test]
    async fn test_manual_dose_requires_measurement() {
        let app = app!(api_state());

        let req = test::TestRequest::post()
            .uri("/api/dosing/manual")
            .set_json(serde_json::json!({ "kind": "ph-down", "volume_ml": 3.0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
    }
}
