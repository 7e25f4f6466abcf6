//! JSON error bodies: `{"error": <message>}` plus the field for validation failures.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cardiosense_core::{ApiError, AuthError, FlowError, StoreError, ValidationError};

#[derive(Debug)]
pub(crate) struct GatewayError {
    status: StatusCode,
    message: String,
    field: Option<&'static str>,
}

impl GatewayError {
    pub(crate) fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            field: None,
        }
    }

    pub(crate) fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Recurso no encontrado")
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({ "error": self.message });
        if let Some(field) = self.field {
            body["field"] = serde_json::Value::from(field);
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<ApiError> for GatewayError {
    fn from(e: ApiError) -> Self {
        let status = match &e {
            ApiError::Status { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Network(_) | ApiError::Decode(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.user_message())
    }
}

impl From<StoreError> for GatewayError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => Self::not_found(),
            other => {
                tracing::error!(target: "cardiosense::gateway", error = %other, "record store failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    FlowError::Store(other).user_message(),
                )
            }
        }
    }
}

impl From<FlowError> for GatewayError {
    fn from(e: FlowError) -> Self {
        match e {
            FlowError::Api(api) => api.into(),
            FlowError::Store(store) => store.into(),
            FlowError::Unauthenticated => Self::new(StatusCode::UNAUTHORIZED, e.user_message()),
            FlowError::DayOutOfRange(_) => Self::new(StatusCode::BAD_REQUEST, e.user_message()),
        }
    }
}

impl From<ValidationError> for GatewayError {
    fn from(e: ValidationError) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            field: Some(e.field),
            message: e.message,
        }
    }
}

impl From<AuthError> for GatewayError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Validation(v) => v.into(),
            AuthError::InvalidCredentials => Self::new(StatusCode::UNAUTHORIZED, e.user_message()),
            AuthError::Network(_) => Self::new(StatusCode::BAD_GATEWAY, e.user_message()),
            _ => Self::new(StatusCode::BAD_REQUEST, e.user_message()),
        }
    }
}
