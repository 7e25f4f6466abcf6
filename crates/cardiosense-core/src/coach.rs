//! Coaching chat grounded on a saved assessment. Turns are stored as a chat session once the
//! first answer arrives; nothing is kept offline.

use std::sync::Arc;

use serde::Serialize;

use crate::api::{CoachContext, HealthApi};
use crate::error::StoreError;
use crate::records::HealthRecords;
use crate::risk::RiskLevel;
use crate::types::{recent_history, ChatMessage, ChatRole, PartialAssessment, StoredChatMessage};

const HISTORY_WINDOW: usize = 5;
const SESSION_TITLE_CHARS: usize = 50;

pub const COACH_APOLOGY: &str =
    "Lo siento, hubo un error al procesar tu solicitud. Por favor, inténtalo de nuevo.";

/// Risk profile the coach answers against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskContext {
    pub assessment_data: PartialAssessment,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoachOutcome {
    Ignored,
    Replied,
    Failed,
}

pub struct CoachChat {
    api: HealthApi,
    records: Arc<dyn HealthRecords>,
    user_id: Option<String>,
    assessment_id: Option<String>,
    context: Option<RiskContext>,
    session_id: Option<String>,
    messages: Vec<ChatMessage>,
    loading: bool,
}

impl CoachChat {
    pub fn new(
        api: HealthApi,
        records: Arc<dyn HealthRecords>,
        user_id: Option<String>,
        assessment_id: Option<String>,
    ) -> Self {
        Self {
            api,
            records,
            user_id,
            assessment_id: assessment_id.filter(|id| !id.is_empty()),
            context: None,
            session_id: None,
            messages: Vec::new(),
            loading: false,
        }
    }

    /// Read the linked assessment. A missing row leaves the chat without context.
    pub async fn load_context(&mut self) -> Result<Option<&RiskContext>, StoreError> {
        let Some(id) = self.assessment_id.as_deref() else {
            return Ok(None);
        };
        self.context = self
            .records
            .get_assessment(id)
            .await?
            .map(|a| RiskContext {
                assessment_data: a.assessment_data,
                risk_score: a.risk_score,
                risk_level: a.risk_level,
            });
        Ok(self.context.as_ref())
    }

    /// Swap in clients carrying the current request's credentials.
    pub fn rebind(&mut self, api: HealthApi, records: Arc<dyn HealthRecords>) {
        self.api = api;
        self.records = records;
    }

    pub fn context(&self) -> Option<&RiskContext> {
        self.context.as_ref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub async fn send(&mut self, input: &str) -> CoachOutcome {
        if input.trim().is_empty() || self.loading {
            return CoachOutcome::Ignored;
        }

        // History only travels together with the risk context.
        let context = self.context.as_ref().map(|c| CoachContext {
            assessment_data: Some(c.assessment_data.clone()),
            risk_score: Some(c.risk_score),
            chat_history: Some(recent_history(&self.messages, HISTORY_WINDOW)),
        });
        let question = ChatMessage::user(input);
        self.messages.push(question.clone());
        self.loading = true;

        let result = self.api.coach(input, context.as_ref()).await;
        let outcome = match result {
            Ok(response) => {
                let answer = ChatMessage::assistant(response.message).with_citations(response.citations);
                self.messages.push(answer.clone());
                self.persist_turn(input, &question, &answer).await;
                CoachOutcome::Replied
            }
            Err(e) => {
                tracing::warn!(target: "cardiosense::coach", error = %e, "coach request failed");
                self.messages.push(ChatMessage::assistant(COACH_APOLOGY));
                CoachOutcome::Failed
            }
        };
        self.loading = false;
        outcome
    }

    async fn persist_turn(&mut self, input: &str, question: &ChatMessage, answer: &ChatMessage) {
        let session_id = match self.session_id.clone() {
            Some(id) => id,
            None => {
                let (Some(assessment_id), Some(user_id)) = (&self.assessment_id, &self.user_id) else {
                    return;
                };
                let title: String = input.chars().take(SESSION_TITLE_CHARS).collect();
                let created = self
                    .records
                    .create_chat_session(user_id, Some(assessment_id), &title)
                    .await;
                match created {
                    Ok(session) => {
                        tracing::info!(target: "cardiosense::coach", session_id = %session.id, "chat session opened");
                        self.session_id = Some(session.id.clone());
                        session.id
                    }
                    Err(e) => {
                        tracing::warn!(target: "cardiosense::coach", error = %e, "chat session not created");
                        return;
                    }
                }
            }
        };

        let rows = [
            StoredChatMessage {
                session_id: session_id.clone(),
                role: ChatRole::User,
                content: question.content.clone(),
                citations: None,
            },
            StoredChatMessage {
                session_id,
                role: ChatRole::Assistant,
                content: answer.content.clone(),
                citations: answer.citations.clone(),
            },
        ];
        if let Err(e) = self.records.append_chat_messages(&rows).await {
            tracing::warn!(target: "cardiosense::coach", error = %e, "chat messages not stored");
        }
    }
}
