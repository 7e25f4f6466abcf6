//! Shared records exchanged with the health backend and the third-party store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::risk::RiskLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    F,
    M,
}

impl Sex {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "F" => Some(Sex::F),
            "M" => Some(Sex::M),
            _ => None,
        }
    }
}

/// One complete health snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentData {
    pub age: f64,
    pub sex: Sex,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub waist_cm: f64,
    pub sleep_hours: f64,
    pub smokes_cig_day: f64,
    pub days_mvpa_week: f64,
    pub fruit_veg_portions_day: f64,
}

/// Fields extracted so far by the conversational backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialAssessment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<Sex>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waist_cm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smokes_cig_day: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_mvpa_week: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fruit_veg_portions_day: Option<f64>,
}

impl PartialAssessment {
    /// Overwrite with every field present in `other`.
    pub fn merge(&mut self, other: &PartialAssessment) {
        macro_rules! take {
            ($($f:ident),*) => {
                $(if other.$f.is_some() { self.$f = other.$f; })*
            };
        }
        take!(
            age,
            sex,
            height_cm,
            weight_kg,
            waist_cm,
            sleep_hours,
            smokes_cig_day,
            days_mvpa_week,
            fruit_veg_portions_day
        );
    }

    pub fn is_empty(&self) -> bool {
        *self == PartialAssessment::default()
    }

    /// All nine fields present.
    pub fn complete(&self) -> Option<AssessmentData> {
        Some(AssessmentData {
            age: self.age?,
            sex: self.sex?,
            height_cm: self.height_cm?,
            weight_kg: self.weight_kg?,
            waist_cm: self.waist_cm?,
            sleep_hours: self.sleep_hours?,
            smokes_cig_day: self.smokes_cig_day?,
            days_mvpa_week: self.days_mvpa_week?,
            fruit_veg_portions_day: self.fruit_veg_portions_day?,
        })
    }
}

impl From<&AssessmentData> for PartialAssessment {
    fn from(d: &AssessmentData) -> Self {
        Self {
            age: Some(d.age),
            sex: Some(d.sex),
            height_cm: Some(d.height_cm),
            weight_kg: Some(d.weight_kg),
            waist_cm: Some(d.waist_cm),
            sleep_hours: Some(d.sleep_hours),
            smokes_cig_day: Some(d.smokes_cig_day),
            days_mvpa_week: Some(d.days_mvpa_week),
            fruit_veg_portions_day: Some(d.fruit_veg_portions_day),
        }
    }
}

/// Named factor and its signed contribution to a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub feature: String,
    pub value: f64,
    pub contribution: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskResult {
    pub score: f64,
    pub risk_level: RiskLevel,
    pub drivers: Vec<Driver>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Row in the `assessments` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedAssessment {
    pub id: String,
    pub user_id: String,
    pub assessment_data: PartialAssessment,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub drivers: Vec<Driver>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub share_token: Option<String>,
}

/// Insert payload for `assessments`; the store assigns id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAssessment {
    pub user_id: String,
    pub assessment_data: PartialAssessment,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub drivers: Vec<Driver>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A chat bubble, shared by the assessment conversation and the coach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            citations: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = Some(citations);
        self
    }
}

/// `{role, content}` pair sent as history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

impl From<&ChatMessage> for HistoryTurn {
    fn from(m: &ChatMessage) -> Self {
        Self {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        }
    }
}

/// Last `n` messages of `messages` as history turns.
pub fn recent_history(messages: &[ChatMessage], n: usize) -> Vec<HistoryTurn> {
    let start = messages.len().saturating_sub(n);
    messages[start..].iter().map(HistoryTurn::from).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalCategory {
    Nutrition,
    Exercise,
    Sleep,
    Lifestyle,
}

impl GoalCategory {
    pub const ALL: [GoalCategory; 4] = [
        GoalCategory::Nutrition,
        GoalCategory::Exercise,
        GoalCategory::Sleep,
        GoalCategory::Lifestyle,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub category: GoalCategory,
    pub title: String,
    pub description: String,
    pub goal: String,
    pub timeframe: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachResponse {
    pub message: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<Recommendation>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnAction {
    #[default]
    Continue,
    RedirectResults,
    RedirectCoach,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRequest {
    pub message: String,
    pub conversation_history: Vec<HistoryTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_data: Option<PartialAssessment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub reply: String,
    #[serde(default)]
    pub extracted_data: Option<PartialAssessment>,
    #[serde(default)]
    pub is_ready: bool,
    #[serde(default)]
    pub action: TurnAction,
    #[serde(default)]
    pub prediction: Option<RiskResult>,
    #[serde(default)]
    pub assessment_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanGoal {
    pub id: String,
    pub category: GoalCategory,
    pub title: String,
    pub description: String,
    pub target: String,
    pub frequency: String,
    #[serde(default)]
    pub completed_days: Vec<u32>,
    pub total_days: u32,
    #[serde(default)]
    pub is_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPlan {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub assessment_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default, alias = "plan_goals")]
    pub goals: Vec<PlanGoal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub assessment_id: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// Row in `chat_messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChatMessage {
    pub session_id: String,
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
}
