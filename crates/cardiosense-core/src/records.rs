//! Typed reads/writes against the third-party tables: `assessments`, `chat_sessions`,
//! `chat_messages`, `action_plans`, `plan_goals`.
//!
//! `RestRecords` talks to the hosted table API (PostgREST shape) on behalf of a signed-in user.
//! `SledRecords` keeps the same rows in an embedded sled db for offline runs and tests.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;
use crate::types::{
    ActionPlan, ChatSession, NewAssessment, PlanGoal, SavedAssessment, StoredChatMessage,
};

#[async_trait]
pub trait HealthRecords: Send + Sync {
    async fn insert_assessment(&self, row: NewAssessment) -> Result<SavedAssessment, StoreError>;

    async fn get_assessment(&self, id: &str) -> Result<Option<SavedAssessment>, StoreError>;

    async fn find_by_share_token(&self, token: &str) -> Result<Option<SavedAssessment>, StoreError>;

    async fn set_share_token(&self, assessment_id: &str, token: &str) -> Result<(), StoreError>;

    async fn create_chat_session(
        &self,
        user_id: &str,
        assessment_id: Option<&str>,
        title: &str,
    ) -> Result<ChatSession, StoreError>;

    async fn append_chat_messages(&self, rows: &[StoredChatMessage]) -> Result<(), StoreError>;

    async fn chat_messages(&self, session_id: &str) -> Result<Vec<StoredChatMessage>, StoreError>;

    async fn insert_action_plan(&self, plan: &ActionPlan) -> Result<(), StoreError>;

    /// Most recently created plan of the user that has not ended before `today`.
    async fn active_plan(&self, user_id: &str, today: NaiveDate) -> Result<Option<ActionPlan>, StoreError>;

    async fn update_goal_progress(
        &self,
        goal_id: &str,
        completed_days: &[u32],
        is_completed: bool,
    ) -> Result<(), StoreError>;

    /// Handle acting on behalf of the given session.
    fn with_access_token(&self, access_token: &str) -> Arc<dyn HealthRecords>;
}

// -----------------------------------------------------------------------------
// Embedded store
// -----------------------------------------------------------------------------

const ASSESSMENT_PREFIX: &str = "assessments/";
const SESSION_PREFIX: &str = "chat_sessions/";
const MESSAGE_PREFIX: &str = "chat_messages/";
const PLAN_PREFIX: &str = "action_plans/";
const GOAL_INDEX_PREFIX: &str = "plan_goals/";

/// Sled-backed rows, one JSON value per key.
#[derive(Clone)]
pub struct SledRecords {
    db: sled::Db,
}

impl SledRecords {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.db.insert(key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.db.get(key.as_bytes())? {
            Some(v) => Ok(Some(serde_json::from_slice(&v)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, v) = entry?;
            out.push(serde_json::from_slice(&v)?);
        }
        Ok(out)
    }

    fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[async_trait]
impl HealthRecords for SledRecords {
    async fn insert_assessment(&self, row: NewAssessment) -> Result<SavedAssessment, StoreError> {
        let saved = SavedAssessment {
            id: Self::new_id(),
            user_id: row.user_id,
            assessment_data: row.assessment_data,
            risk_score: row.risk_score,
            risk_level: row.risk_level,
            drivers: row.drivers,
            created_at: Utc::now(),
            share_token: None,
        };
        self.put(&format!("{ASSESSMENT_PREFIX}{}", saved.id), &saved)?;
        tracing::info!(target: "cardiosense::records", id = %saved.id, "assessment stored");
        Ok(saved)
    }

    async fn get_assessment(&self, id: &str) -> Result<Option<SavedAssessment>, StoreError> {
        self.get(&format!("{ASSESSMENT_PREFIX}{id}"))
    }

    async fn find_by_share_token(&self, token: &str) -> Result<Option<SavedAssessment>, StoreError> {
        let rows: Vec<SavedAssessment> = self.scan(ASSESSMENT_PREFIX)?;
        Ok(rows
            .into_iter()
            .find(|a| a.share_token.as_deref() == Some(token)))
    }

    async fn set_share_token(&self, assessment_id: &str, token: &str) -> Result<(), StoreError> {
        let key = format!("{ASSESSMENT_PREFIX}{assessment_id}");
        let mut row: SavedAssessment = self.get(&key)?.ok_or_else(|| StoreError::NotFound {
            table: "assessments",
            id: assessment_id.to_string(),
        })?;
        row.share_token = Some(token.to_string());
        self.put(&key, &row)
    }

    async fn create_chat_session(
        &self,
        user_id: &str,
        assessment_id: Option<&str>,
        title: &str,
    ) -> Result<ChatSession, StoreError> {
        let session = ChatSession {
            id: Self::new_id(),
            user_id: user_id.to_string(),
            assessment_id: assessment_id.map(str::to_string),
            title: title.to_string(),
            created_at: Utc::now(),
        };
        self.put(&format!("{SESSION_PREFIX}{}", session.id), &session)?;
        Ok(session)
    }

    async fn append_chat_messages(&self, rows: &[StoredChatMessage]) -> Result<(), StoreError> {
        for row in rows {
            // Monotonic ids keep insertion order under prefix scans.
            let seq = self.db.generate_id()?;
            self.put(&format!("{MESSAGE_PREFIX}{}/{:020}", row.session_id, seq), row)?;
        }
        Ok(())
    }

    async fn chat_messages(&self, session_id: &str) -> Result<Vec<StoredChatMessage>, StoreError> {
        self.scan(&format!("{MESSAGE_PREFIX}{session_id}/"))
    }

    async fn insert_action_plan(&self, plan: &ActionPlan) -> Result<(), StoreError> {
        self.put(&format!("{PLAN_PREFIX}{}", plan.id), plan)?;
        for goal in &plan.goals {
            self.db
                .insert(format!("{GOAL_INDEX_PREFIX}{}", goal.id).as_bytes(), plan.id.as_bytes())?;
        }
        Ok(())
    }

    async fn active_plan(&self, user_id: &str, today: NaiveDate) -> Result<Option<ActionPlan>, StoreError> {
        let plans: Vec<ActionPlan> = self.scan(PLAN_PREFIX)?;
        Ok(plans
            .into_iter()
            .filter(|p| p.user_id == user_id && p.end_date >= today)
            .max_by_key(|p| p.created_at))
    }

    async fn update_goal_progress(
        &self,
        goal_id: &str,
        completed_days: &[u32],
        is_completed: bool,
    ) -> Result<(), StoreError> {
        let not_found = || StoreError::NotFound {
            table: "plan_goals",
            id: goal_id.to_string(),
        };
        let plan_id = self
            .db
            .get(format!("{GOAL_INDEX_PREFIX}{goal_id}").as_bytes())?
            .ok_or_else(not_found)?;
        let plan_key = format!("{PLAN_PREFIX}{}", String::from_utf8_lossy(&plan_id));
        let mut plan: ActionPlan = self.get(&plan_key)?.ok_or_else(not_found)?;
        let goal: &mut PlanGoal = plan
            .goals
            .iter_mut()
            .find(|g| g.id == goal_id)
            .ok_or_else(not_found)?;
        goal.completed_days = completed_days.to_vec();
        goal.is_completed = is_completed;
        self.put(&plan_key, &plan)
    }

    fn with_access_token(&self, _access_token: &str) -> Arc<dyn HealthRecords> {
        Arc::new(self.clone())
    }
}

// -----------------------------------------------------------------------------
// Hosted table API
// -----------------------------------------------------------------------------

/// PostgREST client scoped to one user's access token.
#[derive(Clone)]
pub struct RestRecords {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
}

impl RestRecords {
    pub fn new(supabase_url: &str, anon_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{}/rest/v1", supabase_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
            access_token: None,
        }
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        self.client
            .request(method, format!("{}/{}", self.base_url, table))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    async fn rows<T: DeserializeOwned>(req: reqwest::RequestBuilder) -> Result<Vec<T>, StoreError> {
        let res = req.send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            tracing::error!(target: "cardiosense::records", status = status.as_u16(), %body, "table api error");
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = res.bytes().await?;
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn execute(req: reqwest::RequestBuilder) -> Result<(), StoreError> {
        Self::rows::<serde_json::Value>(req).await.map(|_| ())
    }

    async fn insert_returning<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &'static str,
        body: &B,
    ) -> Result<T, StoreError> {
        let req = self
            .request(reqwest::Method::POST, table)
            .header("Prefer", "return=representation")
            .json(body);
        Self::rows::<T>(req)
            .await?
            .into_iter()
            .next()
            .ok_or(StoreError::NotFound {
                table,
                id: "<inserted>".to_string(),
            })
    }
}

#[async_trait]
impl HealthRecords for RestRecords {
    async fn insert_assessment(&self, row: NewAssessment) -> Result<SavedAssessment, StoreError> {
        self.insert_returning("assessments", &row).await
    }

    async fn get_assessment(&self, id: &str) -> Result<Option<SavedAssessment>, StoreError> {
        let req = self
            .request(reqwest::Method::GET, "assessments")
            .query(&[("select", "*".to_string()), ("id", format!("eq.{id}"))]);
        Ok(Self::rows(req).await?.into_iter().next())
    }

    async fn find_by_share_token(&self, token: &str) -> Result<Option<SavedAssessment>, StoreError> {
        let req = self
            .request(reqwest::Method::GET, "assessments")
            .query(&[("select", "*".to_string()), ("share_token", format!("eq.{token}"))]);
        Ok(Self::rows(req).await?.into_iter().next())
    }

    async fn set_share_token(&self, assessment_id: &str, token: &str) -> Result<(), StoreError> {
        let req = self
            .request(reqwest::Method::PATCH, "assessments")
            .query(&[("id", format!("eq.{assessment_id}"))])
            .json(&serde_json::json!({ "share_token": token }));
        Self::execute(req).await
    }

    async fn create_chat_session(
        &self,
        user_id: &str,
        assessment_id: Option<&str>,
        title: &str,
    ) -> Result<ChatSession, StoreError> {
        let body = serde_json::json!({
            "user_id": user_id,
            "assessment_id": assessment_id,
            "title": title,
        });
        self.insert_returning("chat_sessions", &body).await
    }

    async fn append_chat_messages(&self, rows: &[StoredChatMessage]) -> Result<(), StoreError> {
        let req = self
            .request(reqwest::Method::POST, "chat_messages")
            .json(rows);
        Self::execute(req).await
    }

    async fn chat_messages(&self, session_id: &str) -> Result<Vec<StoredChatMessage>, StoreError> {
        let req = self.request(reqwest::Method::GET, "chat_messages").query(&[
            ("select", "session_id,role,content,citations".to_string()),
            ("session_id", format!("eq.{session_id}")),
            ("order", "created_at.asc".to_string()),
        ]);
        Self::rows(req).await
    }

    async fn insert_action_plan(&self, plan: &ActionPlan) -> Result<(), StoreError> {
        let plan_row = serde_json::json!({
            "id": plan.id,
            "user_id": plan.user_id,
            "assessment_id": plan.assessment_id,
            "title": plan.title,
            "description": plan.description,
            "start_date": plan.start_date,
            "end_date": plan.end_date,
            "created_at": plan.created_at,
        });
        Self::execute(self.request(reqwest::Method::POST, "action_plans").json(&plan_row)).await?;

        let goal_rows: Vec<serde_json::Value> = plan
            .goals
            .iter()
            .map(|g| {
                let mut v = serde_json::to_value(g).unwrap_or_default();
                if let Some(obj) = v.as_object_mut() {
                    obj.insert("plan_id".into(), serde_json::Value::String(plan.id.clone()));
                }
                v
            })
            .collect();
        if goal_rows.is_empty() {
            return Ok(());
        }
        Self::execute(self.request(reqwest::Method::POST, "plan_goals").json(&goal_rows)).await
    }

    async fn active_plan(&self, user_id: &str, today: NaiveDate) -> Result<Option<ActionPlan>, StoreError> {
        let req = self.request(reqwest::Method::GET, "action_plans").query(&[
            ("select", "*,plan_goals(*)".to_string()),
            ("user_id", format!("eq.{user_id}")),
            ("end_date", format!("gte.{}", today.format("%Y-%m-%d"))),
            ("order", "created_at.desc".to_string()),
            ("limit", "1".to_string()),
        ]);
        Ok(Self::rows(req).await?.into_iter().next())
    }

    async fn update_goal_progress(
        &self,
        goal_id: &str,
        completed_days: &[u32],
        is_completed: bool,
    ) -> Result<(), StoreError> {
        let req = self
            .request(reqwest::Method::PATCH, "plan_goals")
            .query(&[("id", format!("eq.{goal_id}"))])
            .json(&serde_json::json!({
                "completed_days": completed_days,
                "is_completed": is_completed,
            }));
        Self::execute(req).await
    }

    fn with_access_token(&self, access_token: &str) -> Arc<dyn HealthRecords> {
        Arc::new(Self {
            access_token: Some(access_token.to_string()),
            ..self.clone()
        })
    }
}
