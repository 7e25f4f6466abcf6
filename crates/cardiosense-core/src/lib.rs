//! CardioSense core library.
//! Session store, health API client, conversational assessment, coaching chat and
//! action-plan tracking for the browser-facing gateway.

pub mod api;
pub mod assessment_flow;
pub mod coach;
pub mod config;
pub mod draft;
pub mod error;
pub mod formatters;
pub mod plan;
pub mod records;
pub mod risk;
pub mod session;
pub mod share;
pub mod types;
pub mod validation;

pub use api::{CoachContext, HealthApi};
pub use assessment_flow::{AssessmentConversation, PendingRedirect, TurnOutcome, REDIRECT_DELAY};
pub use coach::{CoachChat, CoachOutcome, RiskContext};
pub use config::AppConfig;
pub use draft::{Draft, DraftStore, DRAFT_STORAGE_KEY};
pub use error::{ApiError, AuthError, FlowError, StoreError, ValidationError};
pub use plan::{CategoryGoals, GoalTracker, PlanOverview};
pub use records::{HealthRecords, RestRecords, SledRecords};
pub use risk::{RiskLevel, RISK_HIGH_THRESHOLD, RISK_MODERATE_THRESHOLD};
pub use session::{
    AuthCookies, AuthProvider, AuthSession, AuthUser, CookieUpdate, GuardDecision, ProviderSession,
    Redirect, SessionStore, SupabaseAuth,
};
pub use share::{generate_share_token, shareable_url, ShareLinks};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
