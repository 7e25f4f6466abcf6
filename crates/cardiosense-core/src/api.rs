//! Health API client: prediction, coaching and conversational extraction over HTTP.
//! Bearer token attached when the caller has a session; mock payloads when the backend is off.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::risk::RiskLevel;
use crate::types::{
    AssessmentData, Citation, CoachResponse, Driver, HistoryTurn, MessageRequest, MessageResponse,
    PartialAssessment, RiskResult, TurnAction,
};

/// The only call with a deadline.
pub const STATUS_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

const PDF_UNAVAILABLE: &str = "La generación de PDF requiere conexión con el backend";

/// Risk context sent alongside a coaching question.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoachContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment_data: Option<PartialAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_history: Option<Vec<HistoryTurn>>,
}

#[derive(Serialize)]
struct CoachRequest<'a> {
    query: &'a str,
    #[serde(flatten)]
    context: Option<&'a CoachContext>,
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    assessment_data: &'a AssessmentData,
}

/// Thin client for `/api/health/*`. Cheap to clone; the connection pool is shared.
#[derive(Debug, Clone)]
pub struct HealthApi {
    client: reqwest::Client,
    base_url: String,
    available: bool,
    bearer: Option<String>,
}

impl HealthApi {
    pub fn new(base_url: impl Into<String>, available: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            available,
            bearer: None,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(cfg.api_base(), cfg.api_available)
    }

    /// Same client, authenticated as the given session (or anonymous with `None`).
    pub fn with_bearer(&self, token: Option<String>) -> Self {
        Self {
            bearer: token.filter(|t| !t.is_empty()),
            ..self.clone()
        }
    }

    pub fn is_mock(&self) -> bool {
        !self.available
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut req = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(token) = &self.bearer {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            let bytes = serde_json::to_vec(body).map_err(|e| ApiError::Decode(e.to_string()))?;
            req = req.body(bytes);
        }

        let res = req.send().await.map_err(|e| {
            tracing::warn!(target: "cardiosense::api", endpoint, error = %e, "backend unreachable");
            ApiError::Network(e)
        })?;

        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }

        let reason = status.canonical_reason().unwrap_or("").to_string();
        let payload = match res.json::<serde_json::Value>().await {
            Ok(v) => v,
            Err(_) => serde_json::json!({ "message": reason }),
        };
        let message = payload
            .get("message")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .or_else(|| payload.get("detail").and_then(|v| v.as_str()).filter(|s| !s.is_empty()))
            .unwrap_or("API request failed")
            .to_string();
        tracing::warn!(
            target: "cardiosense::api",
            endpoint,
            status = status.as_u16(),
            %message,
            "backend returned error status"
        );
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
            payload,
        })
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let res = self.post(endpoint, Some(body)).await?;
        res.json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// `POST /api/health/predict`
    pub async fn predict(&self, data: &AssessmentData) -> Result<RiskResult, ApiError> {
        if !self.available {
            return Ok(mock_prediction(data));
        }
        self.post_json("/api/health/predict", &PredictRequest { assessment_data: data })
            .await
    }

    /// `POST /api/health/coach`
    pub async fn coach(
        &self,
        query: &str,
        context: Option<&CoachContext>,
    ) -> Result<CoachResponse, ApiError> {
        if !self.available {
            return Ok(mock_coach(query, context, &self.base_url));
        }
        self.post_json("/api/health/coach", &CoachRequest { query, context })
            .await
    }

    /// `POST /api/health/message`
    pub async fn message(
        &self,
        message: &str,
        conversation_history: &[HistoryTurn],
        session_data: Option<&PartialAssessment>,
    ) -> Result<MessageResponse, ApiError> {
        if !self.available {
            return Ok(mock_message(message, &self.base_url));
        }
        let body = MessageRequest {
            message: message.to_string(),
            conversation_history: conversation_history.to_vec(),
            session_data: session_data.cloned(),
        };
        self.post_json("/api/health/message", &body).await
    }

    /// `POST /api/health/generate-pdf/{id}`; raw PDF bytes.
    pub async fn generate_pdf(&self, assessment_id: &str) -> Result<Vec<u8>, ApiError> {
        if !self.available {
            return Err(ApiError::Unavailable(PDF_UNAVAILABLE.to_string()));
        }
        let endpoint = format!("/api/health/generate-pdf/{}", assessment_id);
        let res = self.post::<()>(&endpoint, None).await?;
        let bytes = res.bytes().await.map_err(|e| ApiError::Decode(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    /// `GET /` with a 3 second deadline. False in mock mode or on any failure.
    pub async fn check_status(&self) -> bool {
        if !self.available {
            return false;
        }
        let url = format!("{}/", self.base_url);
        match self.client.get(&url).timeout(STATUS_CHECK_TIMEOUT).send().await {
            Ok(res) => res.status().is_success(),
            Err(e) => {
                tracing::info!(target: "cardiosense::api", error = %e, "backend status check failed");
                false
            }
        }
    }
}

fn mock_prediction(data: &AssessmentData) -> RiskResult {
    let driver = |feature: &str, value: f64, contribution: f64, description: &str| Driver {
        feature: feature.to_string(),
        value,
        contribution,
        description: description.to_string(),
    };
    let score = 0.45;
    RiskResult {
        score,
        risk_level: RiskLevel::from_score(score),
        drivers: vec![
            driver("waist_cm", data.waist_cm, 0.15, "Circunferencia de cintura"),
            driver("age", data.age, 0.12, "Edad"),
            driver("sleep_hours", data.sleep_hours, -0.08, "Horas de sueño"),
            driver("days_mvpa_week", data.days_mvpa_week, -0.06, "Días de actividad física"),
            driver(
                "fruit_veg_portions_day",
                data.fruit_veg_portions_day,
                -0.05,
                "Porciones de frutas y verduras",
            ),
        ],
        assessment_id: None,
        created_at: None,
    }
}

fn mock_coach(query: &str, context: Option<&CoachContext>, base_url: &str) -> CoachResponse {
    let score = context
        .and_then(|c| c.risk_score)
        .filter(|s| *s != 0.0)
        .map(|s| format!(" ({}/100)", (s * 100.0).round() as i64))
        .unwrap_or_default();
    CoachResponse {
        message: format!(
            "Hola, soy tu Coach de Salud CardioSense. Actualmente el backend no está conectado, pero estoy aquí para ayudarte.\n\n\
             Tu pregunta: \"{query}\"\n\n\
             En una versión completa, te proporcionaría recomendaciones personalizadas basadas en:\n\
             - Tu perfil de riesgo{score}\n\
             - Evidencia científica de nuestra base de conocimiento\n\
             - Guías de salud cardiovascular validadas\n\n\
             Para obtener recomendaciones reales, asegúrate de que el backend esté ejecutándose en {base_url}"
        ),
        citations: vec![Citation {
            source: "Sistema de demostración".to_string(),
            text: "Este es un mensaje de demostración. Conecta el backend para obtener recomendaciones reales."
                .to_string(),
            url: None,
        }],
        recommendations: None,
    }
}

fn mock_message(message: &str, base_url: &str) -> MessageResponse {
    MessageResponse {
        reply: format!(
            "Gracias por tu mensaje: \"{message}\"\n\n\
             En una versión completa con el backend conectado, el sistema extraería automáticamente tus datos de salud y los validaría.\n\n\
             Para obtener el sistema completo, asegúrate de que el backend esté ejecutándose en {base_url}"
        ),
        extracted_data: Some(PartialAssessment::default()),
        is_ready: false,
        action: TurnAction::Continue,
        prediction: None,
        assessment_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sex;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};

    fn sample() -> AssessmentData {
        AssessmentData {
            age: 52.0,
            sex: Sex::F,
            height_cm: 160.0,
            weight_kg: 72.0,
            waist_cm: 91.0,
            sleep_hours: 6.0,
            smokes_cig_day: 0.0,
            days_mvpa_week: 2.0,
            fruit_veg_portions_day: 3.0,
        }
    }

    /// Serve `app` on an ephemeral port and return its base URL.
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn mock_mode_returns_fixed_payloads() {
        // Unroutable base URL: any network attempt would fail the test.
        let api = HealthApi::new("http://127.0.0.1:9", false);
        assert!(api.is_mock());

        let pred = api.predict(&sample()).await.unwrap();
        assert_eq!(pred.score, 0.45);
        assert_eq!(pred.risk_level, RiskLevel::Moderate);
        assert_eq!(pred.drivers.len(), 5);
        assert_eq!(pred.drivers[0].feature, "waist_cm");
        assert_eq!(pred.drivers[0].value, 91.0);
        assert_eq!(pred.drivers[2].contribution, -0.08);

        let msg = api.message("tengo 40 años", &[], None).await.unwrap();
        assert!(msg.reply.contains("tengo 40 años"));
        assert_eq!(msg.action, TurnAction::Continue);
        assert!(!msg.is_ready);

        let ctx = CoachContext {
            risk_score: Some(0.456),
            ..Default::default()
        };
        let coach = api.coach("¿Cómo duermo mejor?", Some(&ctx)).await.unwrap();
        assert!(coach.message.contains("(46/100)"));
        assert_eq!(coach.citations.len(), 1);
        assert_eq!(coach.citations[0].source, "Sistema de demostración");

        let pdf = api.generate_pdf("a1").await.unwrap_err();
        assert_eq!(pdf.to_string(), PDF_UNAVAILABLE);
        assert!(!api.check_status().await);
    }

    #[tokio::test]
    async fn attaches_bearer_and_parses_prediction() {
        let app = Router::new().route(
            "/api/health/predict",
            post(|headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                assert_eq!(auth, "Bearer tok-123");
                assert_eq!(body["assessment_data"]["sex"], "F");
                Json(serde_json::json!({
                    "score": 0.71,
                    "risk_level": "high",
                    "drivers": []
                }))
            }),
        );
        let base = serve(app).await;
        let api = HealthApi::new(base, true).with_bearer(Some("tok-123".into()));
        let pred = api.predict(&sample()).await.unwrap();
        assert_eq!(pred.risk_level, RiskLevel::High);
        assert!(pred.drivers.is_empty());
    }

    #[tokio::test]
    async fn error_status_uses_message_then_detail_then_status_text() {
        let app = Router::new()
            .route(
                "/api/health/message",
                post(|| async {
                    (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        Json(serde_json::json!({"detail": "Mensaje vacío"})),
                    )
                }),
            )
            .route(
                "/api/health/coach",
                post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
            )
            .route("/", get(|| async { "ok" }));
        let base = serve(app).await;
        let api = HealthApi::new(base, true);

        let err = api.message("", &[], None).await.unwrap_err();
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.to_string(), "Mensaje vacío");

        let err = api.coach("hola", None).await.unwrap_err();
        match err {
            ApiError::Status { status, payload, message } => {
                assert_eq!(status, 502);
                assert_eq!(payload["message"], "Bad Gateway");
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(api.check_status().await);
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let api = HealthApi::new(format!("http://{}", addr), true);
        let err = api.message("hola", &[], None).await.unwrap_err();
        assert!(err.is_network());
        assert_eq!(err.user_message(), crate::error::NETWORK_USER_MESSAGE);
        assert!(!api.check_status().await);
    }
}
