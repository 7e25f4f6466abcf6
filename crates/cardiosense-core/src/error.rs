//! Error kinds for the gateway layer. Every user-facing message is rendered in Spanish via
//! `user_message`; `Display` keeps the developer-facing text used in logs.

use thiserror::Error;

/// Shown whenever the prediction/LLM backend cannot be reached.
pub const NETWORK_USER_MESSAGE: &str =
    "No se pudo conectar con el servidor. Verifica que el backend esté ejecutándose.";
/// Shown when the backend answers with a body we cannot read.
pub const DECODE_USER_MESSAGE: &str = "Respuesta inválida del servidor. Inténtalo de nuevo.";

/// Errors from the health API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport failure: DNS, refused connection, TLS, timeout.
    #[error("Network error: Unable to connect to the server")]
    Network(#[source] reqwest::Error),
    /// Non-success status. `message` comes from the payload (`message`, then `detail`).
    #[error("{message}")]
    Status {
        status: u16,
        message: String,
        payload: serde_json::Value,
    },
    /// The operation needs the backend and mock mode is on.
    #[error("{0}")]
    Unavailable(String),
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    pub fn user_message(&self) -> String {
        match self {
            ApiError::Network(_) => NETWORK_USER_MESSAGE.to_string(),
            ApiError::Decode(_) => DECODE_USER_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

/// Errors from the third-party auth service.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Credenciales inválidas")]
    InvalidCredentials,
    #[error("auth provider {status}: {message}")]
    Provider { status: u16, message: String },
    #[error("auth request: {0}")]
    Network(#[from] reqwest::Error),
    #[error("auth response parse: {0}")]
    Decode(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl AuthError {
    pub fn user_message(&self) -> String {
        match self {
            AuthError::InvalidCredentials => self.to_string(),
            AuthError::Provider { message, .. } => message.clone(),
            AuthError::Network(_) => NETWORK_USER_MESSAGE.to_string(),
            AuthError::Decode(_) => "Error de autenticación".to_string(),
            AuthError::Validation(v) => v.message.clone(),
        }
    }

    /// Provider-supplied message when there is one.
    pub fn provider_message(&self) -> Option<&str> {
        match self {
            AuthError::Provider { message, .. } if !message.trim().is_empty() => Some(message),
            _ => None,
        }
    }
}

/// Errors from the persisted record and draft stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("table request: {0}")]
    Http(#[from] reqwest::Error),
    #[error("table api {status}: {body}")]
    Status { status: u16, body: String },
    #[error("{table} row not found: {id}")]
    NotFound { table: &'static str, id: String },
}

/// A single failed constraint, carrying the message the form shows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Errors surfaced by the view-controllers.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Usuario no autenticado")]
    Unauthenticated,
    #[error("day {0} is outside the goal window")]
    DayOutOfRange(u32),
}

impl FlowError {
    pub fn user_message(&self) -> String {
        match self {
            FlowError::Api(e) => e.user_message(),
            FlowError::Store(_) => "No se pudieron guardar tus datos. Inténtalo de nuevo.".to_string(),
            FlowError::Unauthenticated => self.to_string(),
            FlowError::DayOutOfRange(_) => "Día fuera del rango de la meta".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_displays_server_message() {
        let err = ApiError::Status {
            status: 422,
            message: "Edad fuera de rango".into(),
            payload: serde_json::json!({"detail": "Edad fuera de rango"}),
        };
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.user_message(), "Edad fuera de rango");
        assert!(!err.is_network());
    }

    #[test]
    fn decode_errors_read_in_spanish() {
        let err = ApiError::Decode("expected value at line 1 column 1".into());
        assert_eq!(err.user_message(), DECODE_USER_MESSAGE);
        assert_eq!(FlowError::Api(err).user_message(), DECODE_USER_MESSAGE);
    }

    #[test]
    fn flow_error_messages_are_spanish() {
        assert_eq!(FlowError::Unauthenticated.user_message(), "Usuario no autenticado");
        let store = FlowError::Store(StoreError::NotFound {
            table: "assessments",
            id: "a1".into(),
        });
        assert!(store.user_message().starts_with("No se pudieron guardar"));
    }
}
