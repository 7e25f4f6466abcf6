//! Risk discretization and the Spanish copy shown next to a score.

use serde::{Deserialize, Serialize};

pub const RISK_MODERATE_THRESHOLD: f64 = 0.3;
pub const RISK_HIGH_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    /// Pure function of the score: `< 0.3` low, `< 0.6` moderate, otherwise high.
    pub fn from_score(score: f64) -> Self {
        if score < RISK_MODERATE_THRESHOLD {
            RiskLevel::Low
        } else if score < RISK_HIGH_THRESHOLD {
            RiskLevel::Moderate
        } else {
            RiskLevel::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Riesgo Bajo",
            RiskLevel::Moderate => "Riesgo Moderado",
            RiskLevel::High => "Riesgo Alto",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Tu perfil indica un riesgo bajo de eventos cardiometabólicos. Continúa con tus hábitos saludables.",
            RiskLevel::Moderate => "Tu perfil indica un riesgo moderado. Considera realizar cambios en tu estilo de vida para reducir el riesgo.",
            RiskLevel::High => "Tu perfil indica un riesgo alto. Te recomendamos consultar con un profesional de la salud y realizar cambios significativos en tu estilo de vida.",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn should_recommend_doctor(score: f64) -> bool {
    score >= RISK_HIGH_THRESHOLD
}

pub fn bmi(weight_kg: f64, height_cm: f64) -> f64 {
    let h = height_cm / 100.0;
    weight_kg / (h * h)
}

pub fn bmi_category(weight_kg: f64, height_cm: f64) -> &'static str {
    let value = bmi(weight_kg, height_cm);
    if value < 18.5 {
        "Bajo peso"
    } else if value < 25.0 {
        "Normal"
    } else if value < 30.0 {
        "Sobrepeso"
    } else {
        "Obesidad"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_are_half_open() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.2999), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.3), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_score(0.5999), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_score(0.6), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(1.0), RiskLevel::High);
    }

    #[test]
    fn level_matches_score_across_range() {
        for i in 0..=1000 {
            let s = i as f64 / 1000.0;
            let expected = if s < 0.3 {
                RiskLevel::Low
            } else if s < 0.6 {
                RiskLevel::Moderate
            } else {
                RiskLevel::High
            };
            assert_eq!(RiskLevel::from_score(s), expected, "score {s}");
        }
    }

    #[test]
    fn doctor_recommended_from_high() {
        assert!(!should_recommend_doctor(0.59));
        assert!(should_recommend_doctor(0.6));
    }

    #[test]
    fn bmi_categories() {
        assert_eq!(bmi_category(50.0, 175.0), "Bajo peso");
        assert_eq!(bmi_category(70.0, 175.0), "Normal");
        assert_eq!(bmi_category(85.0, 175.0), "Sobrepeso");
        assert_eq!(bmi_category(100.0, 175.0), "Obesidad");
        assert!((bmi(81.0, 180.0) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn serde_uses_lowercase() {
        assert_eq!(serde_json::to_string(&RiskLevel::Moderate).unwrap(), "\"moderate\"");
    }
}
