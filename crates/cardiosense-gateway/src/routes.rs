//! Route handlers. Everything under `/app` and `/admin` runs behind `edge_auth`, which puts
//! the `AuthSession` into request extensions.

use std::sync::Arc;

use axum::extract::{Form, Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use cardiosense_core::assessment_flow::TurnOutcome;
use cardiosense_core::formatters::{format_date, format_date_time, format_number, format_percentage};
use cardiosense_core::risk::{bmi, bmi_category, should_recommend_doctor};
use cardiosense_core::session::{APP_PATH, LOGIN_PATH};
use cardiosense_core::share::SHARE_FAILED_MESSAGE;
use cardiosense_core::types::{AssessmentData, NewAssessment, SavedAssessment};
use cardiosense_core::validation::{
    validate_assessment, validate_step, AssessmentStep, LoginForm, RegisterForm,
};
use cardiosense_core::{
    AssessmentConversation, AuthSession, CoachChat, CoachOutcome, GoalTracker, HealthRecords,
    PlanOverview, RiskLevel, ShareLinks,
};
use dashmap::DashSet;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::{AppState, CoachChats};
use crate::error::GatewayError;
use crate::middleware::{append_cookies, cookie_jar};

type JsonResult = Result<Json<Value>, GatewayError>;

#[derive(Deserialize)]
pub(crate) struct MessageBody {
    message: String,
}

#[derive(Deserialize)]
pub(crate) struct CoachBody {
    message: String,
    #[serde(default)]
    assessment_id: Option<String>,
}

/// Marks a user as mid-turn until dropped.
struct InFlight<'a> {
    set: &'a DashSet<String>,
    key: String,
}

impl<'a> InFlight<'a> {
    fn begin(set: &'a DashSet<String>, key: &str) -> Option<Self> {
        set.insert(key.to_string()).then(|| Self {
            set,
            key: key.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

fn user_records(state: &AppState, session: &AuthSession) -> Arc<dyn HealthRecords> {
    state.records.with_access_token(&session.access_token)
}

/// 303 after a form post, with cookie changes.
fn see_other(location: &str, cookies: Option<&cardiosense_core::CookieUpdate>, secure: bool) -> Response {
    let mut response = axum::response::Redirect::to(location).into_response();
    if let Some(cookies) = cookies {
        append_cookies(response.headers_mut(), cookies, secure);
    }
    response
}

/// Assessment owned by the session user, else 404.
async fn owned_assessment(
    records: &dyn HealthRecords,
    session: &AuthSession,
    id: &str,
) -> Result<SavedAssessment, GatewayError> {
    match records.get_assessment(id).await? {
        Some(a) if a.user_id == session.user_id() => Ok(a),
        _ => Err(GatewayError::not_found()),
    }
}

fn result_view(a: &SavedAssessment) -> Value {
    let level = RiskLevel::from_score(a.risk_score);
    let body = match (a.assessment_data.weight_kg, a.assessment_data.height_cm) {
        (Some(w), Some(h)) if h > 0.0 => json!({
            "bmi": format_number(bmi(w, h), 1),
            "category": bmi_category(w, h),
        }),
        _ => Value::Null,
    };
    json!({
        "assessment": a,
        "risk_level": level,
        "risk_label": level.label(),
        "risk_description": level.description(),
        "score_percent": format_percentage(a.risk_score, 0),
        "recommend_doctor": should_recommend_doctor(a.risk_score),
        "bmi": body,
        "created_at_display": format_date_time(a.created_at),
    })
}

// -----------------------------------------------------------------------------
// Public
// -----------------------------------------------------------------------------

pub(crate) async fn health() -> &'static str {
    "OK"
}

/// Backend reachability for the status banner.
pub(crate) async fn api_status(State(state): State<AppState>) -> Json<Value> {
    let available = state.api.check_status().await;
    Json(json!({
        "available": available,
        "mock": state.api.is_mock(),
        "api_url": state.api.base_url(),
    }))
}

pub(crate) async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Result<Response, GatewayError> {
    let (session, cookies) = state.sessions.sign_in(&form).await?;
    tracing::info!(target: "cardiosense::auth", user_id = %session.user_id(), "signed in");
    Ok(see_other(APP_PATH, Some(&cookies), state.sessions.secure_cookies()))
}

pub(crate) async fn register(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> Result<Response, GatewayError> {
    let cookies = state.sessions.sign_up(&form).await?;
    tracing::info!(target: "cardiosense::auth", confirmed = cookies.is_some(), "account created");
    Ok(see_other(APP_PATH, cookies.as_ref(), state.sessions.secure_cookies()))
}

pub(crate) async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let jar = cookie_jar(&headers);
    if let (Some(session), _) = state.sessions.get_session(&jar).await {
        let dropped = state.coaches.remove_user(session.user_id());
        tracing::info!(target: "cardiosense::auth", user_id = %session.user_id(), dropped, "signed out");
    }
    let cookies = state.sessions.sign_out(&jar).await;
    see_other(LOGIN_PATH, Some(&cookies), state.sessions.secure_cookies())
}

/// Read-only view of a shared assessment. No owner details leave the gateway.
pub(crate) async fn shared_assessment(State(state): State<AppState>, Path(token): Path<String>) -> JsonResult {
    let assessment = state
        .records
        .find_by_share_token(&token)
        .await?
        .ok_or_else(GatewayError::not_found)?;
    let mut view = result_view(&assessment);
    if let Some(a) = view.get_mut("assessment").and_then(Value::as_object_mut) {
        a.remove("user_id");
        a.remove("share_token");
    }
    Ok(Json(view))
}

// -----------------------------------------------------------------------------
// Signed-in
// -----------------------------------------------------------------------------

pub(crate) async fn dashboard(State(state): State<AppState>, Extension(session): Extension<AuthSession>) -> Json<Value> {
    let meta = &session.user.user_metadata;
    Json(json!({
        "user_id": session.user_id(),
        "email": session.user.email,
        "first_name": meta.first_name,
        "role": session.user.role(),
        "is_admin": session.is_admin(),
        "api_mock": state.api.is_mock(),
        "today": format_date(chrono::Utc::now().date_naive()),
    }))
}

fn conversation_for(state: &AppState, session: &AuthSession) -> AssessmentConversation {
    AssessmentConversation::restore(
        state.api.with_bearer(Some(session.access_token.clone())),
        user_records(state, session),
        state.drafts.clone(),
        Some(session.user_id().to_string()),
        Some(&session.user.user_metadata),
    )
}

fn conversation_view(conv: &AssessmentConversation) -> Value {
    json!({
        "messages": conv.messages(),
        "extracted_data": conv.extracted(),
        "error": conv.error(),
    })
}

pub(crate) async fn assess_message(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Json(body): Json<MessageBody>,
) -> (StatusCode, Json<Value>) {
    let Some(_turn) = InFlight::begin(&state.assessing, session.user_id()) else {
        return (StatusCode::CONFLICT, Json(json!({ "outcome": "ignored" })));
    };

    let mut conv = conversation_for(&state, &session);
    let outcome = conv.send(&body.message).await;
    let mut view = conversation_view(&conv);
    let label = match outcome {
        TurnOutcome::Ignored => "ignored",
        TurnOutcome::Continue => "continue",
        TurnOutcome::Failed(_) => "failed",
        TurnOutcome::Redirect(redirect) => {
            view["redirect"] = json!(redirect);
            "redirect"
        }
    };
    view["outcome"] = json!(label);
    (StatusCode::OK, Json(view))
}

pub(crate) async fn assess_complete(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
) -> Json<Value> {
    let mut conv = conversation_for(&state, &session);
    Json(json!({ "cleared": conv.complete() }))
}

pub(crate) async fn assess_draft(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
) -> Json<Value> {
    Json(conversation_view(&conversation_for(&state, &session)))
}

/// Step check for the manual form; every violation is listed.
pub(crate) async fn validate_assessment_step(
    Path(step): Path<AssessmentStep>,
    Json(data): Json<cardiosense_core::types::PartialAssessment>,
) -> (StatusCode, Json<Value>) {
    match validate_step(step, &data) {
        Ok(()) => (StatusCode::OK, Json(json!({ "valid": true }))),
        Err(errors) => {
            let errors: Vec<Value> = errors
                .into_iter()
                .map(|e| json!({ "field": e.field, "message": e.message }))
                .collect();
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "valid": false, "errors": errors })),
            )
        }
    }
}

/// Manual form submission: validate, score, persist.
pub(crate) async fn create_assessment(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Json(data): Json<AssessmentData>,
) -> JsonResult {
    if let Err(mut errors) = validate_assessment(&data) {
        return Err(errors.remove(0).into());
    }
    let prediction = state
        .api
        .with_bearer(Some(session.access_token.clone()))
        .predict(&data)
        .await?;
    let saved = user_records(&state, &session)
        .insert_assessment(NewAssessment {
            user_id: session.user_id().to_string(),
            assessment_data: (&data).into(),
            risk_score: prediction.score,
            risk_level: RiskLevel::from_score(prediction.score),
            drivers: prediction.drivers,
        })
        .await?;
    tracing::info!(target: "cardiosense::assess", assessment_id = %saved.id, "manual assessment stored");
    Ok(Json(json!({
        "assessment_id": saved.id,
        "redirect": format!("/results/{}", saved.id),
        "result": result_view(&saved),
    })))
}

pub(crate) async fn assessment_result(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path(id): Path<String>,
) -> JsonResult {
    let records = user_records(&state, &session);
    let assessment = owned_assessment(records.as_ref(), &session, &id).await?;
    Ok(Json(result_view(&assessment)))
}

pub(crate) async fn share_assessment(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path(id): Path<String>,
) -> JsonResult {
    let records = user_records(&state, &session);
    owned_assessment(records.as_ref(), &session, &id).await?;
    let url = ShareLinks::new(records, state.config.app_url.clone())
        .share(&id)
        .await
        .map_err(|_| GatewayError::new(StatusCode::INTERNAL_SERVER_ERROR, SHARE_FAILED_MESSAGE))?;
    Ok(Json(json!({ "url": url })))
}

pub(crate) async fn assessment_pdf(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path(id): Path<String>,
) -> Result<Response, GatewayError> {
    let records = user_records(&state, &session);
    owned_assessment(records.as_ref(), &session, &id).await?;
    let bytes = state
        .api
        .with_bearer(Some(session.access_token.clone()))
        .generate_pdf(&id)
        .await?;
    Ok((
        [
            (CONTENT_TYPE, "application/pdf".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"cardiosense-{id}.pdf\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

pub(crate) async fn coach_message(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Json(body): Json<CoachBody>,
) -> (StatusCode, Json<Value>) {
    let assessment_id = body.assessment_id.filter(|id| !id.is_empty());
    let key = CoachChats::key(session.user_id(), assessment_id.as_deref());
    let api = state.api.with_bearer(Some(session.access_token.clone()));
    let records = user_records(&state, &session);

    let chat = match state.coaches.get(&key) {
        Some(chat) => chat,
        None => {
            let mut chat = CoachChat::new(
                api.clone(),
                records.clone(),
                Some(session.user_id().to_string()),
                assessment_id,
            );
            if let Err(e) = chat.load_context().await {
                tracing::warn!(target: "cardiosense::coach", error = %e, "assessment context unavailable");
            }
            state.coaches.insert(key, chat)
        }
    };

    let Ok(mut chat) = chat.try_lock() else {
        return (StatusCode::CONFLICT, Json(json!({ "outcome": "ignored" })));
    };
    chat.rebind(api, records);
    let outcome = chat.send(&body.message).await;
    let outcome = match outcome {
        CoachOutcome::Ignored => "ignored",
        CoachOutcome::Replied => "replied",
        CoachOutcome::Failed => "failed",
    };
    (
        StatusCode::OK,
        Json(json!({
            "outcome": outcome,
            "messages": chat.messages(),
            "session_id": chat.session_id(),
            "context": chat.context(),
        })),
    )
}

pub(crate) async fn plan_overview(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
) -> JsonResult {
    let records = user_records(&state, &session);
    let today = chrono::Utc::now().date_naive();
    let overview = PlanOverview::load_active(records.as_ref(), session.user_id(), today).await?;
    Ok(Json(json!({ "plan": overview })))
}

pub(crate) async fn toggle_goal_day(
    State(state): State<AppState>,
    Extension(session): Extension<AuthSession>,
    Path((goal_id, day)): Path<(String, u32)>,
) -> JsonResult {
    let records = user_records(&state, &session);
    let today = chrono::Utc::now().date_naive();
    let goal = records
        .active_plan(session.user_id(), today)
        .await?
        .and_then(|plan| plan.goals.into_iter().find(|g| g.id == goal_id))
        .ok_or_else(GatewayError::not_found)?;

    let mut tracker = GoalTracker::new(records, goal);
    tracker.toggle_day(day).await?;
    let progress = tracker.progress_percent();
    Ok(Json(json!({
        "goal": tracker.into_goal(),
        "progress_percent": progress,
    })))
}

pub(crate) async fn admin_home(Extension(session): Extension<AuthSession>) -> Json<Value> {
    Json(json!({
        "admin": session.user_id(),
        "email": session.user.email,
    }))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::build_app;
    use crate::testing::{serve, state_with, state_with_config, FakeAuth};
    use axum::body::Body;
    use axum::http::header::{COOKIE, LOCATION, SET_COOKIE};
    use axum::http::Request;
    use cardiosense_core::types::{ActionPlan, GoalCategory, PlanGoal};
    use tower::ServiceExt;

    const SIGNED_IN: &str = "sb-access-token=a; sb-refresh-token=r";

    fn json_req(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(COOKIE, SIGNED_IN)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str, cookie: Option<&str>) -> Request<Body> {
        let mut b = Request::builder().method("GET").uri(uri);
        if let Some(c) = cookie {
            b = b.header(COOKIE, c);
        }
        b.body(Body::empty()).unwrap()
    }

    fn form_req(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(res: Response) -> Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn signed_in() -> (tempfile::TempDir, AppState) {
        state_with(FakeAuth::default().with_user("a", "u1", None))
    }

    #[tokio::test]
    async fn login_sets_cookies_and_redirects() {
        let (_dir, state) = signed_in();
        let app = build_app(state);

        let res = app
            .clone()
            .oneshot(form_req("/login", "email=ana%40example.cl&password=secreto1"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(res.headers()[LOCATION], "/app");
        assert_eq!(res.headers().get_all(SET_COOKIE).iter().count(), 2);

        let res = app
            .oneshot(form_req("/login", "email=ana%40example.cl&password=otraclave"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await["error"], "Credenciales inválidas");
    }

    #[tokio::test]
    async fn register_rejects_mismatched_passwords() {
        let (_dir, state) = signed_in();
        let body = "email=ana%40example.cl&password=secreto1&confirmPassword=secreto2\
                    &firstName=Ana&lastName=Soto&age=40&sex=F";
        let res = build_app(state).oneshot(form_req("/register", body)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(res).await;
        assert_eq!(body["error"], "Las contraseñas no coinciden");
        assert_eq!(body["field"], "confirmPassword");
    }

    #[tokio::test]
    async fn logout_clears_cookies() {
        let (_dir, state) = signed_in();
        let res = build_app(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/logout")
                    .header(COOKIE, SIGNED_IN)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.headers()[LOCATION], "/login");
        assert!(res
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .all(|v| v.to_str().unwrap().contains("Max-Age=0")));
    }

    #[tokio::test]
    async fn assessment_conversation_round_trip() {
        let (_dir, state) = signed_in();
        let app = build_app(state);

        let res = app
            .clone()
            .oneshot(json_req("POST", "/app/assess/message", json!({"message": "Tengo 52 años"})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["outcome"], "continue");
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
        assert_eq!(body["extracted_data"]["age"], 52.0);

        let draft = body_json(app.clone().oneshot(get_req("/app/assess/draft", Some(SIGNED_IN))).await.unwrap()).await;
        assert_eq!(draft["messages"], body["messages"]);

        let done = body_json(
            app.clone()
                .oneshot(json_req("POST", "/app/assess/complete", json!({})))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(done["cleared"], true);

        let fresh = body_json(app.oneshot(get_req("/app/assess/draft", Some(SIGNED_IN))).await.unwrap()).await;
        assert_eq!(fresh["messages"].as_array().unwrap().len(), 1);
        assert_eq!(fresh["messages"][0]["id"], "welcome");
    }

    #[tokio::test]
    async fn manual_assessment_share_and_public_view() {
        let (_dir, state) = signed_in();
        let app = build_app(state);
        let data = json!({
            "age": 52, "sex": "F", "height_cm": 160, "weight_kg": 72, "waist_cm": 91,
            "sleep_hours": 6, "smokes_cig_day": 0, "days_mvpa_week": 2, "fruit_veg_portions_day": 3
        });

        let res = app.clone().oneshot(json_req("POST", "/app/assessments", data.clone())).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let created = body_json(res).await;
        let id = created["assessment_id"].as_str().unwrap().to_string();
        assert_eq!(created["result"]["score_percent"], "45%");
        assert_eq!(created["result"]["risk_label"], "Riesgo Moderado");
        assert_eq!(created["result"]["bmi"]["category"], "Sobrepeso");

        let share = |app: axum::Router| {
            let id = id.clone();
            async move {
                body_json(
                    app.oneshot(json_req("POST", &format!("/app/assessments/{id}/share"), json!({})))
                        .await
                        .unwrap(),
                )
                .await["url"]
                    .as_str()
                    .unwrap()
                    .to_string()
            }
        };
        let first = share(app.clone()).await;
        let second = share(app.clone()).await;
        assert_eq!(first, second);
        assert!(first.starts_with("https://cardiosense.test/shared/"));

        let token = first.rsplit('/').next().unwrap();
        let res = app.clone().oneshot(get_req(&format!("/shared/{token}"), None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let public = body_json(res).await;
        assert!(public["assessment"].get("user_id").is_none());

        let mut bad = data;
        bad["age"] = json!(12);
        let res = app.oneshot(json_req("POST", "/app/assessments", bad)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body_json(res).await["field"], "age");
    }

    #[tokio::test]
    async fn other_users_assessments_are_hidden() {
        let (_dir, state) = signed_in();
        let saved = state
            .records
            .insert_assessment(NewAssessment {
                user_id: "someone-else".into(),
                assessment_data: Default::default(),
                risk_score: 0.1,
                risk_level: RiskLevel::Low,
                drivers: vec![],
            })
            .await
            .unwrap();
        let res = build_app(state)
            .oneshot(get_req(&format!("/app/assessments/{}", saved.id), Some(SIGNED_IN)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    async fn stored_assessment(state: &AppState, user_id: &str) -> String {
        state
            .records
            .insert_assessment(NewAssessment {
                user_id: user_id.into(),
                assessment_data: Default::default(),
                risk_score: 0.5,
                risk_level: RiskLevel::Moderate,
                drivers: vec![],
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn pdf_needs_the_backend() {
        let (_dir, state) = signed_in();
        let id = stored_assessment(&state, "u1").await;
        let res = build_app(state)
            .oneshot(get_req(&format!("/app/assessments/{id}/pdf"), Some(SIGNED_IN)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(res).await["error"],
            "La generación de PDF requiere conexión con el backend"
        );
    }

    #[tokio::test]
    async fn pdf_is_limited_to_the_owner() {
        let backend = serve(axum::Router::new().route(
            "/api/health/generate-pdf/:id",
            axum::routing::post(|| async { ([(CONTENT_TYPE, "application/pdf")], "%PDF-1.4 informe") }),
        ))
        .await;
        let (_dir, state) = state_with_config(FakeAuth::default().with_user("a", "u1", None), |cfg| {
            cfg.api_url = backend;
            cfg.api_available = true;
        });
        let own = stored_assessment(&state, "u1").await;
        let foreign = stored_assessment(&state, "u2").await;
        let app = build_app(state);

        let res = app
            .clone()
            .oneshot(get_req(&format!("/app/assessments/{foreign}/pdf"), Some(SIGNED_IN)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = app
            .oneshot(get_req(&format!("/app/assessments/{own}/pdf"), Some(SIGNED_IN)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[CONTENT_TYPE], "application/pdf");
        assert!(res.headers()[CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains(&format!("cardiosense-{own}.pdf")));
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"%PDF-1.4 informe");
    }

    #[tokio::test]
    async fn second_assessment_turn_in_flight_is_ignored() {
        let (_dir, state) = signed_in();
        state.assessing.insert("u1".to_string());
        let res = build_app(state.clone())
            .oneshot(json_req("POST", "/app/assess/message", json!({"message": "hola"})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(res).await["outcome"], "ignored");

        state.assessing.remove("u1");
        let res = build_app(state)
            .oneshot(json_req("POST", "/app/assess/message", json!({"message": "hola"})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn busy_coach_chat_is_ignored() {
        let (_dir, state) = signed_in();
        let chat = state.coaches.insert(
            CoachChats::key("u1", None),
            CoachChat::new(state.api.clone(), state.records.clone(), Some("u1".into()), None),
        );
        let busy = chat.lock().await;
        let res = build_app(state)
            .oneshot(json_req("POST", "/app/coach/message", json!({"message": "¿Cuánto camino?"})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(res).await["outcome"], "ignored");
        assert!(busy.messages().is_empty());
    }

    #[tokio::test]
    async fn logout_drops_the_users_coach_chats() {
        let (_dir, state) = signed_in();
        state.coaches.insert(
            CoachChats::key("u2", Some("z")),
            CoachChat::new(state.api.clone(), state.records.clone(), Some("u2".into()), None),
        );
        let app = build_app(state.clone());
        for n in 0..3 {
            let res = app
                .clone()
                .oneshot(json_req(
                    "POST",
                    "/app/coach/message",
                    json!({"message": "hola", "assessment_id": format!("x{n}")}),
                ))
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }
        assert_eq!(state.coaches.len(), 4);

        let res = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/logout")
                    .header(COOKIE, SIGNED_IN)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(state.coaches.len(), 1);
        assert!(state.coaches.get(&CoachChats::key("u2", Some("z"))).is_some());
    }

    #[tokio::test]
    async fn step_validation_lists_missing_fields() {
        let (_dir, state) = signed_in();
        let res = build_app(state)
            .oneshot(json_req("POST", "/app/assess/validate/anthropometry", json!({"height_cm": 170})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(res).await;
        assert_eq!(body["errors"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn coach_replies_in_mock_mode() {
        let (_dir, state) = signed_in();
        let res = build_app(state)
            .oneshot(json_req("POST", "/app/coach/message", json!({"message": "¿Qué debo comer?"})))
            .await
            .unwrap();
        let body = body_json(res).await;
        assert_eq!(body["outcome"], "replied");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert!(body["session_id"].is_null());
    }

    #[tokio::test]
    async fn plan_goal_toggle() {
        let (_dir, state) = signed_in();
        let today = chrono::Utc::now().date_naive();
        state
            .records
            .insert_action_plan(&ActionPlan {
                id: "p1".into(),
                user_id: "u1".into(),
                assessment_id: None,
                title: "Plan de 2 semanas".into(),
                description: String::new(),
                start_date: today,
                end_date: today + chrono::Duration::days(14),
                goals: vec![PlanGoal {
                    id: "g1".into(),
                    category: GoalCategory::Exercise,
                    title: "Caminar".into(),
                    description: String::new(),
                    target: "30 min".into(),
                    frequency: "diario".into(),
                    completed_days: vec![],
                    total_days: 1,
                    is_completed: false,
                }],
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        let app = build_app(state);

        let res = app
            .clone()
            .oneshot(json_req("POST", "/app/plan/goals/g1/days/1", json!({})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert_eq!(body["goal"]["is_completed"], true);
        assert_eq!(body["progress_percent"], 100.0);

        let res = app
            .clone()
            .oneshot(json_req("POST", "/app/plan/goals/g1/days/5", json!({})))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let overview = body_json(app.oneshot(get_req("/app/plan", Some(SIGNED_IN))).await.unwrap()).await;
        assert_eq!(overview["plan"]["progress_percent"], 100.0);
        assert_eq!(overview["plan"]["days_remaining"], 13);
    }
}
