use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use cardiosense_core::{
    AppConfig, CoachChat, DraftStore, HealthApi, HealthRecords, RestRecords, SessionStore,
    SledRecords, StoreError, SupabaseAuth,
};
use dashmap::{DashMap, DashSet};
use tokio::sync::Mutex;

use crate::{middleware, routes};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<AppConfig>,
    pub(crate) sessions: SessionStore,
    pub(crate) api: HealthApi,
    /// Anonymous handle; per-request handles come from `with_access_token`.
    pub(crate) records: Arc<dyn HealthRecords>,
    pub(crate) drafts: DraftStore,
    /// Users with an assessment turn in flight.
    pub(crate) assessing: Arc<DashSet<String>>,
    pub(crate) coaches: CoachChats,
}

impl AppState {
    pub(crate) fn from_config(config: AppConfig) -> Result<Self, StoreError> {
        let provider = Arc::new(SupabaseAuth::new(&config.supabase_url, &config.supabase_anon_key));
        let records: Arc<dyn HealthRecords> = if config.local_records {
            tracing::info!(target: "cardiosense::gateway", path = %config.records_path().display(), "using embedded record store");
            Arc::new(SledRecords::open(config.records_path())?)
        } else {
            Arc::new(RestRecords::new(&config.supabase_url, &config.supabase_anon_key))
        };
        let drafts = DraftStore::open(config.drafts_path())?;
        Ok(Self::new(
            config.clone(),
            SessionStore::new(provider, config.production),
            records,
            drafts,
        ))
    }

    pub(crate) fn new(
        config: AppConfig,
        sessions: SessionStore,
        records: Arc<dyn HealthRecords>,
        drafts: DraftStore,
    ) -> Self {
        Self {
            api: HealthApi::from_config(&config),
            config: Arc::new(config),
            sessions,
            records,
            drafts,
            assessing: Arc::new(DashSet::new()),
            coaches: CoachChats::new(COACH_IDLE_TTL, COACH_CAPACITY),
        }
    }
}

/// Chats untouched for this long are dropped on the next insert.
const COACH_IDLE_TTL: Duration = Duration::from_secs(30 * 60);
const COACH_CAPACITY: usize = 1024;

struct CoachSlot {
    chat: Arc<Mutex<CoachChat>>,
    last_used: Instant,
}

/// Live coaching chats keyed by `{user_id}:{assessment_id}`, bounded by idle time and count.
#[derive(Clone)]
pub(crate) struct CoachChats {
    slots: Arc<DashMap<String, CoachSlot>>,
    idle_ttl: Duration,
    capacity: usize,
}

impl CoachChats {
    pub(crate) fn new(idle_ttl: Duration, capacity: usize) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            idle_ttl,
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn key(user_id: &str, assessment_id: Option<&str>) -> String {
        format!("{user_id}:{}", assessment_id.unwrap_or_default())
    }

    /// Existing chat, marked as used.
    pub(crate) fn get(&self, key: &str) -> Option<Arc<Mutex<CoachChat>>> {
        self.slots.get_mut(key).map(|mut slot| {
            slot.last_used = Instant::now();
            slot.chat.clone()
        })
    }

    /// Register `chat` unless another request got there first; returns the live one.
    pub(crate) fn insert(&self, key: String, chat: CoachChat) -> Arc<Mutex<CoachChat>> {
        self.sweep();
        self.slots
            .entry(key)
            .or_insert_with(|| CoachSlot {
                chat: Arc::new(Mutex::new(chat)),
                last_used: Instant::now(),
            })
            .chat
            .clone()
    }

    /// Drop every chat of `user_id`. Returns how many were removed.
    pub(crate) fn remove_user(&self, user_id: &str) -> usize {
        let prefix = format!("{user_id}:");
        let before = self.slots.len();
        self.slots.retain(|key, _| !key.starts_with(&prefix));
        before - self.slots.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Expire idle chats, then evict least recently used ones until there is room for one more.
    fn sweep(&self) {
        let ttl = self.idle_ttl;
        self.slots.retain(|_, slot| slot.last_used.elapsed() < ttl);
        while self.slots.len() >= self.capacity {
            let oldest = self
                .slots
                .iter()
                .min_by_key(|slot| slot.last_used)
                .map(|slot| slot.key().clone());
            match oldest {
                Some(key) => {
                    self.slots.remove(&key);
                }
                None => break,
            }
        }
        tracing::debug!(target: "cardiosense::coach", live = self.slots.len(), "coach chats swept");
    }
}

pub(crate) fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/status", get(routes::api_status))
        .route("/login", post(routes::login))
        .route("/register", post(routes::register))
        .route("/logout", post(routes::logout))
        .route("/shared/:token", get(routes::shared_assessment))
        .route("/app", get(routes::dashboard))
        .route("/app/assess/message", post(routes::assess_message))
        .route("/app/assess/complete", post(routes::assess_complete))
        .route("/app/assess/draft", get(routes::assess_draft))
        .route("/app/assess/validate/:step", post(routes::validate_assessment_step))
        .route("/app/assessments", post(routes::create_assessment))
        .route("/app/assessments/:id", get(routes::assessment_result))
        .route("/app/assessments/:id/share", post(routes::share_assessment))
        .route("/app/assessments/:id/pdf", get(routes::assessment_pdf))
        .route("/app/coach/message", post(routes::coach_message))
        .route("/app/plan", get(routes::plan_overview))
        .route("/app/plan/goals/:goal_id/days/:day", post(routes::toggle_goal_day))
        .route("/admin", get(routes::admin_home))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::edge_auth))
        .with_state(state)
}
