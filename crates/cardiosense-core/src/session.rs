//! Session store: auth cookies, token validation/refresh against the auth provider, and the
//! per-path access decision used by the edge middleware.
//!
//! Cookies:
//! - `sb-access-token`: access JWT; carries `Expires` from the provider session when known.
//! - `sb-refresh-token`: refresh token.
//!
//! Both are `HttpOnly; SameSite=Lax; Path=/; Max-Age=604800`, plus `Secure` in production.

use std::sync::Arc;

use async_trait::async_trait;
use cookie::time::{Duration, OffsetDateTime};
use cookie::{Cookie, CookieBuilder, SameSite};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::types::{PartialAssessment, Sex};
use crate::validation::{validate_login, validate_register, LoginForm, RegisterForm};

pub const ACCESS_COOKIE: &str = "sb-access-token";
pub const REFRESH_COOKIE: &str = "sb-refresh-token";
/// Seven days.
pub const COOKIE_MAX_AGE_SECS: i64 = 60 * 60 * 24 * 7;

pub const LOGIN_PATH: &str = "/login";
pub const APP_PATH: &str = "/app";
pub const ADMIN_PATH: &str = "/admin";

const SIGN_UP_FAILED: &str = "Error al crear la cuenta";

/// Profile fields stored by the provider at sign-up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Number or numeric string depending on who wrote it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl UserMetadata {
    pub fn age(&self) -> Option<f64> {
        match self.age.as_ref()? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn sex(&self) -> Option<Sex> {
        self.sex.as_deref().and_then(Sex::parse)
    }

    /// Age and sex as pre-filled assessment fields.
    pub fn assessment_fields(&self) -> PartialAssessment {
        PartialAssessment {
            age: self.age(),
            sex: self.sex(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
    #[serde(default)]
    pub app_metadata: AppMetadata,
}

impl AuthUser {
    /// Role claim; `app_metadata` wins over `user_metadata`.
    pub fn role(&self) -> Option<&str> {
        self.app_metadata
            .role
            .as_deref()
            .or(self.user_metadata.role.as_deref())
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Some("admin")
    }
}

/// Token pair as issued by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub user: Option<AuthUser>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<ProviderSession, AuthError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, AuthError>;

    /// `None` when the account still needs email confirmation.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: serde_json::Value,
    ) -> Result<Option<ProviderSession>, AuthError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;
}

// -----------------------------------------------------------------------------
// GoTrue client
// -----------------------------------------------------------------------------

#[derive(Clone)]
pub struct SupabaseAuth {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseAuth {
    pub fn new(supabase_url: &str, anon_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{}/auth/v1", supabase_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
    }

    async fn send(req: reqwest::RequestBuilder) -> Result<serde_json::Value, AuthError> {
        let res = req.send().await?;
        let status = res.status();
        let body: serde_json::Value = res.json().await.unwrap_or(serde_json::Value::Null);
        if status.is_success() {
            return Ok(body);
        }
        let message = ["error_description", "msg", "message", "error"]
            .iter()
            .find_map(|k| body.get(*k).and_then(|v| v.as_str()))
            .unwrap_or_default()
            .to_string();
        Err(AuthError::Provider {
            status: status.as_u16(),
            message,
        })
    }

    fn decode<T: serde::de::DeserializeOwned>(body: serde_json::Value) -> Result<T, AuthError> {
        serde_json::from_value(body).map_err(|e| AuthError::Decode(e.to_string()))
    }
}

#[async_trait]
impl AuthProvider for SupabaseAuth {
    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        let body = Self::send(self.request(reqwest::Method::GET, "/user").bearer_auth(access_token)).await?;
        Self::decode(body)
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<ProviderSession, AuthError> {
        let req = self
            .request(reqwest::Method::POST, "/token?grant_type=refresh_token")
            .json(&serde_json::json!({ "refresh_token": refresh_token }));
        Self::decode(Self::send(req).await?)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, AuthError> {
        let req = self
            .request(reqwest::Method::POST, "/token?grant_type=password")
            .json(&serde_json::json!({ "email": email, "password": password }));
        Self::decode(Self::send(req).await?)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: serde_json::Value,
    ) -> Result<Option<ProviderSession>, AuthError> {
        let req = self.request(reqwest::Method::POST, "/signup").json(&serde_json::json!({
            "email": email,
            "password": password,
            "data": metadata,
        }));
        let body = Self::send(req).await?;
        if body.get("access_token").is_some() {
            Ok(Some(Self::decode(body)?))
        } else {
            Ok(None)
        }
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        Self::send(self.request(reqwest::Method::POST, "/logout").bearer_auth(access_token)).await?;
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Cookies
// -----------------------------------------------------------------------------

/// The two auth cookies as read from a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthCookies {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl AuthCookies {
    pub fn from_cookie_header(header: &str) -> Self {
        Self::from_cookie_headers(std::iter::once(header))
    }

    /// Merge every `Cookie` header; empty values count as absent.
    pub fn from_cookie_headers<'a>(headers: impl IntoIterator<Item = &'a str>) -> Self {
        let mut jar = Self::default();
        for header in headers {
            for cookie in Cookie::split_parse(header).filter_map(Result::ok) {
                let value = cookie.value_trimmed();
                if value.is_empty() {
                    continue;
                }
                match cookie.name() {
                    ACCESS_COOKIE => jar.access_token = Some(value.to_string()),
                    REFRESH_COOKIE => jar.refresh_token = Some(value.to_string()),
                    _ => {}
                }
            }
        }
        jar
    }
}

/// Cookie mutation to attach to a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieUpdate {
    Rewrite {
        access_token: String,
        refresh_token: String,
        expires_at: Option<i64>,
    },
    Clear,
}

fn auth_cookie(name: &'static str, value: String, max_age: Duration, secure: bool) -> CookieBuilder<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(max_age)
        .secure(secure)
}

impl CookieUpdate {
    fn from_session(session: &AuthSession) -> Self {
        CookieUpdate::Rewrite {
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
            expires_at: session.expires_at,
        }
    }

    /// `Set-Cookie` header values, access cookie first.
    pub fn header_values(&self, secure: bool) -> Vec<String> {
        match self {
            CookieUpdate::Rewrite {
                access_token,
                refresh_token,
                expires_at,
            } => {
                let max_age = Duration::seconds(COOKIE_MAX_AGE_SECS);
                let mut access = auth_cookie(ACCESS_COOKIE, access_token.clone(), max_age, secure);
                if let Some(at) = expires_at.and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok()) {
                    access = access.expires(at);
                }
                let refresh = auth_cookie(REFRESH_COOKIE, refresh_token.clone(), max_age, secure);
                vec![access.build().to_string(), refresh.build().to_string()]
            }
            CookieUpdate::Clear => [ACCESS_COOKIE, REFRESH_COOKIE]
                .into_iter()
                .map(|name| auth_cookie(name, String::new(), Duration::ZERO, secure).build().to_string())
                .collect(),
        }
    }
}

// -----------------------------------------------------------------------------
// Sessions and access decisions
// -----------------------------------------------------------------------------

/// Authenticated session; lives for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

impl AuthSession {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn is_admin(&self) -> bool {
        self.user.is_admin()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub location: String,
    pub cookies: Option<CookieUpdate>,
}

impl Redirect {
    pub fn to(location: &str) -> Self {
        Self {
            location: location.to_string(),
            cookies: None,
        }
    }

    fn with_cookies(mut self, cookies: Option<CookieUpdate>) -> Self {
        self.cookies = cookies;
        self
    }
}

/// Outcome of the edge check for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    Allow {
        session: Option<AuthSession>,
        cookies: Option<CookieUpdate>,
    },
    Redirect(Redirect),
}

enum Resolved {
    Missing,
    Valid(AuthSession),
    Refreshed(AuthSession),
    Expired,
}

/// `/app` and everything under it.
pub fn is_protected_path(path: &str) -> bool {
    under(path, APP_PATH) || is_admin_path(path)
}

pub fn is_admin_path(path: &str) -> bool {
    under(path, ADMIN_PATH)
}

fn under(path: &str, root: &str) -> bool {
    path.strip_prefix(root)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[derive(Clone)]
pub struct SessionStore {
    provider: Arc<dyn AuthProvider>,
    secure_cookies: bool,
}

impl SessionStore {
    pub fn new(provider: Arc<dyn AuthProvider>, secure_cookies: bool) -> Self {
        Self {
            provider,
            secure_cookies,
        }
    }

    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }

    /// Validate the access token; on failure try the refresh token exactly once.
    async fn resolve(&self, jar: &AuthCookies) -> Resolved {
        let (Some(access), Some(refresh)) = (&jar.access_token, &jar.refresh_token) else {
            return Resolved::Missing;
        };

        match self.provider.get_user(access).await {
            Ok(user) => {
                return Resolved::Valid(AuthSession {
                    access_token: access.clone(),
                    refresh_token: refresh.clone(),
                    expires_at: None,
                    user,
                })
            }
            Err(e) => {
                tracing::debug!(target: "cardiosense::session", error = %e, "access token rejected, refreshing");
            }
        }

        let refreshed = match self.provider.refresh_session(refresh).await {
            Ok(s) => s,
            Err(e) => {
                tracing::info!(target: "cardiosense::session", error = %e, "refresh failed, clearing session");
                return Resolved::Expired;
            }
        };
        let user = match refreshed.user {
            Some(u) => u,
            None => match self.provider.get_user(&refreshed.access_token).await {
                Ok(u) => u,
                Err(e) => {
                    tracing::warn!(target: "cardiosense::session", error = %e, "refreshed token has no user");
                    return Resolved::Expired;
                }
            },
        };
        tracing::info!(target: "cardiosense::session", user_id = %user.id, "session refreshed");
        Resolved::Refreshed(AuthSession {
            access_token: refreshed.access_token,
            refresh_token: refreshed
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| refresh.clone()),
            expires_at: refreshed.expires_at,
            user,
        })
    }

    /// Current session plus the cookie change the response must carry.
    pub async fn get_session(&self, jar: &AuthCookies) -> (Option<AuthSession>, Option<CookieUpdate>) {
        match self.resolve(jar).await {
            Resolved::Missing => (None, None),
            Resolved::Valid(s) => (Some(s), None),
            Resolved::Refreshed(s) => {
                let cookies = CookieUpdate::from_session(&s);
                (Some(s), Some(cookies))
            }
            Resolved::Expired => (None, Some(CookieUpdate::Clear)),
        }
    }

    pub async fn require_user(
        &self,
        jar: &AuthCookies,
    ) -> Result<(AuthSession, Option<CookieUpdate>), Redirect> {
        match self.get_session(jar).await {
            (Some(s), cookies) => Ok((s, cookies)),
            (None, cookies) => Err(Redirect::to(LOGIN_PATH).with_cookies(cookies)),
        }
    }

    pub async fn require_admin(
        &self,
        jar: &AuthCookies,
    ) -> Result<(AuthSession, Option<CookieUpdate>), Redirect> {
        let (session, cookies) = self.require_user(jar).await?;
        if !session.is_admin() {
            return Err(Redirect::to(APP_PATH).with_cookies(cookies));
        }
        Ok((session, cookies))
    }

    /// Edge decision for `path`. Admin role is enforced whether or not the token was refreshed.
    pub async fn authorize_path(&self, path: &str, jar: &AuthCookies) -> GuardDecision {
        if !is_protected_path(path) {
            return GuardDecision::Allow {
                session: None,
                cookies: None,
            };
        }
        let admin_only = is_admin_path(path);
        let (session, cookies) = match self.resolve(jar).await {
            Resolved::Missing => return GuardDecision::Redirect(Redirect::to(LOGIN_PATH)),
            Resolved::Expired => {
                return GuardDecision::Redirect(
                    Redirect::to(LOGIN_PATH).with_cookies(Some(CookieUpdate::Clear)),
                )
            }
            Resolved::Valid(s) => (s, None),
            Resolved::Refreshed(s) => {
                let c = CookieUpdate::from_session(&s);
                (s, Some(c))
            }
        };
        if admin_only && !session.is_admin() {
            tracing::info!(target: "cardiosense::session", path, user_id = %session.user.id, "non-admin on admin path");
            return GuardDecision::Redirect(Redirect::to(APP_PATH).with_cookies(cookies));
        }
        GuardDecision::Allow {
            session: Some(session),
            cookies,
        }
    }

    /// Validated password sign-in. Provider failures collapse to "Credenciales inválidas".
    pub async fn sign_in(&self, form: &LoginForm) -> Result<(AuthSession, CookieUpdate), AuthError> {
        let input = validate_login(form)?;
        let issued = self
            .provider
            .sign_in_with_password(&input.email, &input.password)
            .await
            .map_err(|e| {
                tracing::info!(target: "cardiosense::session", error = %e, "sign-in rejected");
                AuthError::InvalidCredentials
            })?;
        let session = self
            .into_session(issued, String::new())
            .await
            .map_err(|_| AuthError::InvalidCredentials)?;
        let cookies = CookieUpdate::from_session(&session);
        Ok((session, cookies))
    }

    /// Validated registration. Cookies are only returned when the provider issued a session.
    pub async fn sign_up(&self, form: &RegisterForm) -> Result<Option<CookieUpdate>, AuthError> {
        let input = validate_register(form)?;
        let metadata = serde_json::json!({
            "first_name": input.first_name,
            "last_name": input.last_name,
            "age": input.age,
            "sex": match input.sex { Sex::F => "F", Sex::M => "M" },
        });
        let issued = self
            .provider
            .sign_up(&input.email, &input.password, metadata)
            .await
            .map_err(|e| {
                tracing::warn!(target: "cardiosense::session", error = %e, "sign-up failed");
                let message = e.provider_message().unwrap_or(SIGN_UP_FAILED).to_string();
                AuthError::Provider {
                    status: match &e {
                        AuthError::Provider { status, .. } => *status,
                        _ => 500,
                    },
                    message,
                }
            })?;
        let Some(issued) = issued else {
            return Ok(None);
        };
        let session = self.into_session(issued, String::new()).await?;
        Ok(Some(CookieUpdate::from_session(&session)))
    }

    /// Revoke the token when one is present; cookies are cleared regardless.
    pub async fn sign_out(&self, jar: &AuthCookies) -> CookieUpdate {
        if let Some(access) = &jar.access_token {
            if let Err(e) = self.provider.sign_out(access).await {
                tracing::warn!(target: "cardiosense::session", error = %e, "provider sign-out failed");
            }
        }
        CookieUpdate::Clear
    }

    async fn into_session(
        &self,
        issued: ProviderSession,
        fallback_refresh: String,
    ) -> Result<AuthSession, AuthError> {
        let user = match issued.user {
            Some(u) => u,
            None => self.provider.get_user(&issued.access_token).await?,
        };
        Ok(AuthSession {
            access_token: issued.access_token,
            refresh_token: issued.refresh_token.unwrap_or(fallback_refresh),
            expires_at: issued.expires_at,
            user,
        })
    }
}
