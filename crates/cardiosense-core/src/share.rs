//! Public share links for saved assessments.

use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::StoreError;
use crate::records::HealthRecords;

pub const SHARE_TOKEN_LEN: usize = 16;

pub const SHARE_FAILED_MESSAGE: &str = "Error al generar el enlace compartible. Inténtalo de nuevo.";

/// 16 characters from `[A-Za-z0-9]`.
pub fn generate_share_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHARE_TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub fn shareable_url(app_url: &str, token: &str) -> String {
    format!("{}/shared/{}", app_url.trim_end_matches('/'), token)
}

pub struct ShareLinks {
    records: Arc<dyn HealthRecords>,
    app_url: String,
}

impl ShareLinks {
    pub fn new(records: Arc<dyn HealthRecords>, app_url: impl Into<String>) -> Self {
        Self {
            records,
            app_url: app_url.into(),
        }
    }

    /// Link for the assessment, minting and persisting a token only the first time.
    pub async fn share(&self, assessment_id: &str) -> Result<String, StoreError> {
        let assessment = self
            .records
            .get_assessment(assessment_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                table: "assessments",
                id: assessment_id.to_string(),
            })?;

        if let Some(token) = assessment.share_token.filter(|t| !t.is_empty()) {
            return Ok(shareable_url(&self.app_url, &token));
        }

        let token = generate_share_token();
        if let Err(e) = self.records.set_share_token(assessment_id, &token).await {
            tracing::error!(target: "cardiosense::share", assessment_id, error = %e, "could not persist share token");
            return Err(e);
        }
        tracing::info!(target: "cardiosense::share", assessment_id, "share link created");
        Ok(shareable_url(&self.app_url, &token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::SledRecords;
    use crate::risk::RiskLevel;
    use crate::types::{NewAssessment, PartialAssessment};

    #[test]
    fn token_shape() {
        for _ in 0..50 {
            let t = generate_share_token();
            assert_eq!(t.len(), 16);
            assert!(t.chars().all(|c| c.is_ascii_alphanumeric()));
        }
        assert_eq!(
            shareable_url("https://cardiosense.cl/", "abc"),
            "https://cardiosense.cl/shared/abc"
        );
    }

    #[tokio::test]
    async fn token_is_persisted_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let records: Arc<dyn HealthRecords> = Arc::new(SledRecords::open(dir.path()).unwrap());
        let saved = records
            .insert_assessment(NewAssessment {
                user_id: "u1".into(),
                assessment_data: PartialAssessment::default(),
                risk_score: 0.7,
                risk_level: RiskLevel::High,
                drivers: vec![],
            })
            .await
            .unwrap();

        let links = ShareLinks::new(records.clone(), "http://localhost:3000");
        let first = links.share(&saved.id).await.unwrap();
        let second = links.share(&saved.id).await.unwrap();
        assert_eq!(first, second);

        let token = first.rsplit('/').next().unwrap();
        let found = records.find_by_share_token(token).await.unwrap().unwrap();
        assert_eq!(found.id, saved.id);

        assert!(links.share("missing").await.is_err());
    }
}
