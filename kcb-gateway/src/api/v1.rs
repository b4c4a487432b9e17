//! API version 1 endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::gateway::{Gateway, OpError, OperationKind, Request};

/// Shared application state for API endpoints.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
}

impl AppState {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

/// API error response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// One of `validation_failed`, `transport_failed`, `protocol_failed`
    pub kind: String,
}

impl IntoResponse for OpError {
    fn into_response(self) -> Response {
        let status = match self {
            OpError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            OpError::TransportFailed(_) => StatusCode::BAD_GATEWAY,
            OpError::ProtocolFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse {
            error: self.to_string(),
            kind: self.kind().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn run(state: &AppState, kind: OperationKind, payload: Option<String>) -> Response {
    match state.gateway.handle(Request::new(kind, payload)).await {
        Ok(reply) => match reply.to_json() {
            Some(body) => (StatusCode::OK, Json(body)).into_response(),
            None => StatusCode::NO_CONTENT.into_response(),
        },
        Err(e) => e.into_response(),
    }
}

/// Health check endpoint handler.
///
/// Answers without touching the controller.
async fn health() -> &'static str {
    "OK"
}

/// Digital pins as `{"values":[0|1, ...]}`, pin 0 first.
async fn read_digital(State(state): State<AppState>) -> Response {
    run(&state, OperationKind::ReadDigital, None).await
}

/// Set digital pins from `{"values":[...]}`, at most 16.
///
/// ```bash
/// curl -X POST http://localhost:8080/digital -d '{"values":[1,0,1,1]}'
/// ```
async fn write_digital(State(state): State<AppState>, body: String) -> Response {
    run(&state, OperationKind::WriteDigital, Some(body)).await
}

/// Servo positions as `{"positions":[...]}`.
async fn read_servo(State(state): State<AppState>) -> Response {
    run(&state, OperationKind::ReadServo, None).await
}

/// Move servos from `{"values":[...]}`, 1 to 8 positions.
async fn write_servo(State(state): State<AppState>, body: String) -> Response {
    run(&state, OperationKind::WriteServo, Some(body)).await
}

async fn read_analog(State(state): State<AppState>) -> Response {
    run(&state, OperationKind::ReadAnalog, None).await
}

/*  Raw bus write endpoint handler.

    Writes up to 32 bytes to the I2C or SPI bus. Nothing is read back.

    curl -X PUT http://localhost:8080/bus \
       -d '{"bus":"i2c","addr":80,"data":[0,16,255]}'
*/
async fn write_bus(State(state): State<AppState>, body: String) -> Response {
    run(&state, OperationKind::WriteRawBus, Some(body)).await
}

/// Pass `{"data":[...]}` bytes straight to the controller's UART.
async fn write_uart(State(state): State<AppState>, body: String) -> Response {
    run(&state, OperationKind::WriteUart, Some(body)).await
}

/// Analog and digital readings together as `{"ad":[...],"pio":[...]}`.
async fn status(State(state): State<AppState>) -> Response {
    run(&state, OperationKind::Status, None).await
}

/// Build the v1 API routes.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/digital", get(read_digital).post(write_digital))
        .route("/servo", get(read_servo).post(write_servo))
        .route("/analog", get(read_analog))
        .route("/bus", put(write_bus))
        .route("/uart", post(write_uart))
        .route("/status", get(status))
        .with_state(state)
}
