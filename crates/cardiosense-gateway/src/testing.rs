//! Test doubles: an in-memory auth provider and a state backed by temporary sled stores.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cardiosense_core::session::{AppMetadata, AuthProvider, AuthUser, ProviderSession, UserMetadata};
use cardiosense_core::{AppConfig, AuthError, DraftStore, HealthRecords, SessionStore, SledRecords};

use crate::app::AppState;

#[derive(Default)]
pub(crate) struct FakeAuth {
    users: Mutex<HashMap<String, AuthUser>>,
    refreshes: Mutex<HashMap<String, ProviderSession>>,
}

pub(crate) fn user(id: &str, role: Option<&str>) -> AuthUser {
    AuthUser {
        id: id.to_string(),
        email: Some(format!("{id}@example.cl")),
        user_metadata: UserMetadata {
            first_name: Some("Ana".into()),
            age: Some(serde_json::json!(52)),
            sex: Some("F".into()),
            ..Default::default()
        },
        app_metadata: AppMetadata {
            role: role.map(str::to_string),
        },
    }
}

impl FakeAuth {
    pub(crate) fn with_user(self, token: &str, id: &str, role: Option<&str>) -> Self {
        self.users.lock().unwrap().insert(token.to_string(), user(id, role));
        self
    }

    pub(crate) fn with_refresh(self, refresh: &str, access: &str, id: &str) -> Self {
        self.refreshes.lock().unwrap().insert(
            refresh.to_string(),
            ProviderSession {
                access_token: access.to_string(),
                refresh_token: Some(format!("{refresh}-next")),
                expires_at: Some(1_900_000_000),
                user: Some(user(id, None)),
            },
        );
        self
    }
}

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn get_user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        self.users
            .lock()
            .unwrap()
            .get(access_token)
            .cloned()
            .ok_or(AuthError::Provider {
                status: 401,
                message: "invalid JWT".into(),
            })
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<ProviderSession, AuthError> {
        self.refreshes
            .lock()
            .unwrap()
            .get(refresh_token)
            .cloned()
            .ok_or(AuthError::Provider {
                status: 400,
                message: "Invalid Refresh Token".into(),
            })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<ProviderSession, AuthError> {
        if password != "secreto1" {
            return Err(AuthError::Provider {
                status: 400,
                message: "Invalid login credentials".into(),
            });
        }
        Ok(ProviderSession {
            access_token: "issued".into(),
            refresh_token: Some("issued-refresh".into()),
            expires_at: None,
            user: Some(user(email, None)),
        })
    }

    async fn sign_up(
        &self,
        _email: &str,
        _password: &str,
        _metadata: serde_json::Value,
    ) -> Result<Option<ProviderSession>, AuthError> {
        Ok(None)
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Gateway state in mock mode with embedded stores under a temp dir.
pub(crate) fn state_with(auth: FakeAuth) -> (tempfile::TempDir, AppState) {
    state_with_config(auth, |_| {})
}

/// Same as `state_with`, with a chance to adjust the config first.
pub(crate) fn state_with_config(
    auth: FakeAuth,
    adjust: impl FnOnce(&mut AppConfig),
) -> (tempfile::TempDir, AppState) {
    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = AppConfig {
        api_url: "http://127.0.0.1:9".into(),
        api_available: false,
        app_url: "https://cardiosense.test".into(),
        storage_path: dir.path().display().to_string(),
        local_records: true,
        ..Default::default()
    };
    adjust(&mut config);
    let records: Arc<dyn HealthRecords> =
        Arc::new(SledRecords::open(config.records_path()).expect("records"));
    let drafts = DraftStore::open(config.drafts_path()).expect("drafts");
    let sessions = SessionStore::new(Arc::new(auth), false);
    let state = AppState::new(config, sessions, records, drafts);
    (dir, state)
}

/// Serve `app` on an ephemeral port and return its base URL.
pub(crate) async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("stub backend");
    });
    format!("http://{addr}")
}
