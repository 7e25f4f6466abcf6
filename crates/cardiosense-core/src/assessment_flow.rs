//! Conversational assessment: one user's chat with the extraction backend, its running draft,
//! and the terminal redirects to results or coaching.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::api::HealthApi;
use crate::draft::{Draft, DraftStore, DRAFT_STORAGE_KEY};
use crate::error::FlowError;
use crate::records::HealthRecords;
use crate::risk::RiskLevel;
use crate::session::UserMetadata;
use crate::types::{
    recent_history, ChatMessage, ChatRole, MessageResponse, NewAssessment, PartialAssessment,
    TurnAction,
};

/// Pause before navigating away so the last reply can be read.
pub const REDIRECT_DELAY: Duration = Duration::from_secs(2);

/// Prior turns sent with each message.
const HISTORY_WINDOW: usize = 5;

pub const WELCOME_ID: &str = "welcome";

const WELCOME_MESSAGE: &str = "¡Hola! Soy tu asistente de salud CardioSense 🩺\n\n\
Voy a ayudarte a evaluar tu riesgo cardiometabólico de manera conversacional. Solo cuéntame sobre ti de forma natural, como si conversáramos.\n\n\
Por ejemplo, puedes decirme: \"Tengo 35 años, mido 170cm, peso 75kg y mi cintura mide 85cm. Duermo unas 7 horas y hago ejercicio 3 veces por semana.\"\n\n\
¿Qué me puedes contar sobre ti?";

/// Navigation scheduled after a terminal turn; the client waits `delay_ms` before following it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRedirect {
    pub path: String,
    #[serde(rename = "delay_ms", serialize_with = "as_millis")]
    pub delay: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl PendingRedirect {
    fn after_delay(path: String) -> Self {
        Self {
            path,
            delay: REDIRECT_DELAY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Blank input, a turn already in flight, or the conversation already ended.
    Ignored,
    Continue,
    /// The error text shown to the user; an apology bubble was appended.
    Failed(String),
    Redirect(PendingRedirect),
}

pub struct AssessmentConversation {
    api: HealthApi,
    records: Arc<dyn HealthRecords>,
    drafts: DraftStore,
    draft_key: String,
    user_id: Option<String>,
    messages: Vec<ChatMessage>,
    extracted: PartialAssessment,
    loading: bool,
    error: Option<String>,
    finished: bool,
}

impl AssessmentConversation {
    /// Resume from the stored draft. Profile age/sex pre-fill the extracted fields; an empty
    /// conversation starts with the welcome message.
    pub fn restore(
        api: HealthApi,
        records: Arc<dyn HealthRecords>,
        drafts: DraftStore,
        user_id: Option<String>,
        profile: Option<&UserMetadata>,
    ) -> Self {
        let draft_key = user_id
            .as_deref()
            .map(DraftStore::user_key)
            .unwrap_or_else(|| DRAFT_STORAGE_KEY.to_string());

        let draft = match drafts.load(&draft_key) {
            Ok(d) => d.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(target: "cardiosense::assess", key = %draft_key, error = %e, "draft unavailable");
                Draft::default()
            }
        };

        let mut extracted = draft.extracted_data;
        if let Some(profile) = profile.filter(|p| p.age().is_some()) {
            extracted.merge(&profile.assessment_fields());
        }

        let mut messages = draft.messages;
        if messages.is_empty() {
            let mut welcome = ChatMessage::assistant(WELCOME_MESSAGE);
            welcome.id = WELCOME_ID.to_string();
            messages.push(welcome);
        }

        Self {
            api,
            records,
            drafts,
            draft_key,
            user_id,
            messages,
            extracted,
            loading: false,
            error: None,
            finished: false,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn extracted(&self) -> &PartialAssessment {
        &self.extracted
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn draft_key(&self) -> &str {
        &self.draft_key
    }

    /// One user turn.
    pub async fn send(&mut self, input: &str) -> TurnOutcome {
        if input.trim().is_empty() || self.loading || self.finished {
            return TurnOutcome::Ignored;
        }

        let history = recent_history(&self.messages, HISTORY_WINDOW);
        self.messages.push(ChatMessage::user(input));
        self.loading = true;
        self.error = None;

        let response = self
            .api
            .message(input, &history, Some(&self.extracted))
            .await;
        let result = match response {
            Ok(response) => self.apply(response).await,
            Err(e) => Err(FlowError::from(e)),
        };
        self.loading = false;

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.user_message();
                tracing::warn!(target: "cardiosense::assess", error = %e, "assessment turn failed");
                self.messages.push(ChatMessage::new(
                    ChatRole::Assistant,
                    format!("Lo siento, hubo un error: {message}"),
                ));
                self.error = Some(message.clone());
                self.persist_draft();
                TurnOutcome::Failed(message)
            }
        }
    }

    async fn apply(&mut self, response: MessageResponse) -> Result<TurnOutcome, FlowError> {
        self.messages.push(ChatMessage::assistant(response.reply));
        if let Some(fields) = &response.extracted_data {
            self.extracted.merge(fields);
        }

        match (response.action, response.prediction, response.assessment_id) {
            (TurnAction::RedirectResults, Some(prediction), _) => {
                let user_id = self.user_id.clone().ok_or(FlowError::Unauthenticated)?;
                let saved = self
                    .records
                    .insert_assessment(NewAssessment {
                        user_id,
                        assessment_data: self.extracted.clone(),
                        risk_score: prediction.score,
                        risk_level: RiskLevel::from_score(prediction.score),
                        drivers: prediction.drivers,
                    })
                    .await?;
                tracing::info!(target: "cardiosense::assess", assessment_id = %saved.id, "assessment completed");
                self.finish();
                Ok(TurnOutcome::Redirect(PendingRedirect::after_delay(format!(
                    "/results/{}",
                    saved.id
                ))))
            }
            (TurnAction::RedirectCoach, _, Some(assessment_id)) => {
                self.finish();
                Ok(TurnOutcome::Redirect(PendingRedirect::after_delay(format!(
                    "/coach?assessment={assessment_id}"
                ))))
            }
            _ => {
                self.persist_draft();
                Ok(TurnOutcome::Continue)
            }
        }
    }

    /// Explicit completion. Returns false when the conversation had already ended.
    pub fn complete(&mut self) -> bool {
        if self.finished {
            return false;
        }
        self.finish();
        true
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Err(e) = self.drafts.clear(&self.draft_key) {
            tracing::warn!(target: "cardiosense::assess", key = %self.draft_key, error = %e, "draft not cleared");
        }
    }

    fn persist_draft(&self) {
        let draft = Draft {
            messages: self.messages.clone(),
            extracted_data: self.extracted.clone(),
        };
        if let Err(e) = self.drafts.save(&self.draft_key, &draft) {
            tracing::warn!(target: "cardiosense::assess", key = %self.draft_key, error = %e, "draft not saved");
        }
    }
}
