use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::Value;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::CorsLayer;

use crate::brain::events::ControllerHandle;
use crate::brain::schedule::HeatingSchedule;
use crate::brain::state::SystemMode;
use crate::config::ServerConfig;
use crate::io::device_store::attributes::{OCCUPIED_HEATING_SETPOINT, SYSTEM_MODE};
use crate::io::device_store::memory::{MAX_HEAT_SETPOINT_LIMIT_C, MIN_HEAT_SETPOINT_LIMIT_C};
use crate::io::device_store::{from_centi_celsius, to_centi_celsius, Cluster, DeviceStateStore, Endpoint, WriteSource};
use crate::io::notify::NotificationBus;
use crate::io::weather::OutdoorTemperatureTable;

#[derive(Clone)]
pub struct AppState {
    pub controller: ControllerHandle,
    pub store: Arc<dyn DeviceStateStore>,
    pub notifications: NotificationBus,
    pub outdoor_temperatures: Arc<OutdoorTemperatureTable>,
    pub schedule: Arc<HeatingSchedule>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetpointRequest {
    #[serde(alias = "setpoint")]
    target_temperature: f64,
}

/// Same shape as the thermostat's SetpointRaiseLower command.
#[derive(Deserialize)]
struct RaiseLowerRequest {
    /// Steps of 0.1C, negative to lower.
    amount: i32,
}

pub fn router(state: AppState, allowed_origin: &str) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/reset", post(reset_handler))
        .route("/on", post(on_handler))
        .route("/off", post(off_handler))
        .route("/mode/{mode}", post(mode_handler))
        .route("/setpoint", post(setpoint_handler))
        .route("/setpoint/raise-lower", post(raise_lower_handler))
        .route("/outdoortemperatures", get(outdoor_temperatures_handler))
        .route("/heatingschedule", get(heating_schedule_handler))
        .route("/hotwaterschedule", get(hot_water_schedule_handler))
        .route("/events", get(events_handler))
        .layer(cors_layer(allowed_origin))
        .with_state(state)
}

fn cors_layer(allowed_origin: &str) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::DELETE, Method::PUT];
    match HeaderValue::from_str(allowed_origin) {
        Ok(origin) => CorsLayer::new().allow_origin(origin).allow_methods(methods),
        Err(err) => {
            warn!("Invalid allowed origin {:?} ({}), allowing any origin", allowed_origin, err);
            CorsLayer::permissive()
        }
    }
}

pub async fn serve(config: &ServerConfig, state: AppState, shutdown: impl Future<Output = ()> + Send + 'static) -> std::io::Result<()> {
    let address = SocketAddr::new(*config.get_bind_address(), config.get_port());
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("Server listening on {}", address);

    axum::serve(listener, router(state, config.get_allowed_origin()))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn status_handler(State(state): State<AppState>) -> Response {
    match state.controller.status().await {
        Ok(status) => Json(status).into_response(),
        Err(_) => controller_unavailable(),
    }
}

async fn reset_handler(State(state): State<AppState>) -> Response {
    match state.controller.reset().await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(_) => controller_unavailable(),
    }
}

async fn on_handler(State(state): State<AppState>) -> Response {
    info!("Turning on");
    write_mode(&state, SystemMode::Heat).await
}

async fn off_handler(State(state): State<AppState>) -> Response {
    info!("Turning off");
    write_mode(&state, SystemMode::Off).await
}

async fn mode_handler(State(state): State<AppState>, Path(mode): Path<String>) -> Response {
    match SystemMode::from_str(&mode) {
        Ok(mode) => write_mode(&state, mode).await,
        Err(_) => (StatusCode::BAD_REQUEST, format!("Unsupported mode {:?}", mode)).into_response(),
    }
}

async fn setpoint_handler(State(state): State<AppState>, Json(request): Json<SetpointRequest>) -> Response {
    write_setpoint(&state, request.target_temperature).await
}

async fn raise_lower_handler(State(state): State<AppState>, Json(request): Json<RaiseLowerRequest>) -> Response {
    let current = state
        .store
        .read_attribute(Endpoint::Thermostat, Cluster::Thermostat, OCCUPIED_HEATING_SETPOINT)
        .await
        .as_ref()
        .and_then(from_centi_celsius);
    let Some(current) = current else {
        error!("Thermostat has no setpoint to adjust");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    debug!("Raise/lower by {} from {:.2}", request.amount, current);
    write_setpoint(&state, current + f64::from(request.amount) / 10.0).await
}

async fn outdoor_temperatures_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.outdoor_temperatures.get_samples().to_vec())
}

async fn heating_schedule_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.schedule.get_segments().to_vec())
}

async fn hot_water_schedule_handler() -> impl IntoResponse {
    Json(Value::Array(Vec::new()))
}

/// Every `systemUpdated` notification, as a server-sent event.
async fn events_handler(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("Event stream connected");
    let stream = BroadcastStream::new(state.notifications.subscribe()).filter_map(|notification| match notification {
        Ok(notification) => match Event::default().event(notification.get_event()).json_data(notification.get_payload()) {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                warn!("Failed to encode {}: {}", notification.get_event(), err);
                None
            }
        },
        Err(err) => {
            warn!("Event stream fell behind: {}", err);
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn write_mode(state: &AppState, mode: SystemMode) -> Response {
    let result = state
        .store
        .write_attributes(
            Endpoint::Thermostat,
            Cluster::Thermostat,
            vec![(SYSTEM_MODE, Value::from(mode.attribute_value()))],
            WriteSource::External,
        )
        .await;
    match result {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => {
            error!("Failed to set mode {}: {}", mode, err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Clamped to the thermostat's limits.
async fn write_setpoint(state: &AppState, celsius: f64) -> Response {
    if !celsius.is_finite() {
        return (StatusCode::BAD_REQUEST, "Setpoint must be a number").into_response();
    }
    let clamped = celsius.clamp(MIN_HEAT_SETPOINT_LIMIT_C, MAX_HEAT_SETPOINT_LIMIT_C);
    if clamped != celsius {
        info!("Setpoint {:.2} clamped to {:.2}", celsius, clamped);
    }

    let result = state
        .store
        .write_attributes(
            Endpoint::Thermostat,
            Cluster::Thermostat,
            vec![(OCCUPIED_HEATING_SETPOINT, to_centi_celsius(clamped))],
            WriteSource::External,
        )
        .await;
    match result {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => {
            error!("Failed to set setpoint {:.2}: {}", clamped, err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn controller_unavailable() -> Response {
    error!("Controller is not running");
    (StatusCode::SERVICE_UNAVAILABLE, "Controller is not running").into_response()
}
