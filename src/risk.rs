//! Risk scoring with a trained-model path and a heuristic fallback
//!
//! Trained artifacts are two JSON files under the model directory: a
//! logistic classifier for financial stress and a linear regressor for the
//! predicted overspending dollar amount. When either artifact is missing or
//! corrupt the scorer pins itself to the heuristic path for the rest of the
//! process; callers cannot tell which path produced a score.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use rand::Rng;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{CoachError, Result};
use crate::fields::{
    gender_ml_label, major_ml_label, payment_ml_label, year_ml_label, SnapshotFields,
};
use crate::models::RiskScores;

pub const STRESS_MODEL_FILE: &str = "financial_stress_model.json";
pub const OVERSPENDING_MODEL_FILE: &str = "overspending_model.json";

/// Dollar-to-probability scale for the regressor output. $0 of predicted
/// overspending maps to ~50%, $400 to ~73%, $800 to ~88%.
const REGRESSOR_SCALE: f64 = 400.0;

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

//
// ================= Artifacts =================
//

/// One exported scikit-style linear model: an intercept, weights over the
/// numeric feature columns, and per-label weights for each categorical
/// column. Unknown labels contribute zero.
#[derive(Debug, Clone, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    pub numeric_weights: HashMap<String, f64>,
    pub categorical_weights: HashMap<String, HashMap<String, f64>>,
}

impl LinearModel {
    fn raw_score(&self, features: &FeatureRow) -> f64 {
        let mut score = self.intercept;

        for (name, weight) in &self.numeric_weights {
            if let Some(value) = features.numeric.get(name) {
                score += weight * value;
            }
        }

        for (column, weights) in &self.categorical_weights {
            if let Some(label) = features.categorical.get(column) {
                score += weights.get(label).copied().unwrap_or(0.0);
            }
        }

        score
    }

    /// Classifier view: probability of the positive class.
    pub fn predict_proba(&self, features: &FeatureRow) -> f64 {
        sigmoid(self.raw_score(features))
    }

    /// Regressor view: predicted scalar (dollars here).
    pub fn predict(&self, features: &FeatureRow) -> f64 {
        self.raw_score(features)
    }
}

#[derive(Debug, Clone)]
pub struct RiskArtifacts {
    pub stress_classifier: LinearModel,
    pub overspending_regressor: LinearModel,
}

impl RiskArtifacts {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let stress_path = model_dir.join(STRESS_MODEL_FILE);
        let overspending_path = model_dir.join(OVERSPENDING_MODEL_FILE);

        if !stress_path.exists() || !overspending_path.exists() {
            return Err(CoachError::ModelUnavailable(format!(
                "model artifacts not found under {}",
                model_dir.display()
            )));
        }

        let stress_classifier = Self::load_model(&stress_path)?;
        let overspending_regressor = Self::load_model(&overspending_path)?;

        Ok(Self {
            stress_classifier,
            overspending_regressor,
        })
    }

    fn load_model(path: &Path) -> Result<LinearModel> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoachError::ModelUnavailable(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| CoachError::ModelUnavailable(format!("{}: {}", path.display(), e)))
    }
}

/// Feature row fed to the artifacts: the numeric fields plus the
/// categorical codes mapped to the label strings the models were fitted on.
#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub numeric: HashMap<String, f64>,
    pub categorical: HashMap<String, String>,
}

impl FeatureRow {
    pub fn from_fields(fields: &SnapshotFields) -> Self {
        let mut numeric = HashMap::new();
        numeric.insert("age".to_string(), fields.age as f64);
        numeric.insert("monthly_income".to_string(), fields.monthly_income as f64);
        numeric.insert("financial_aid".to_string(), fields.financial_aid as f64);
        numeric.insert("tuition".to_string(), fields.tuition as f64);
        numeric.insert("housing".to_string(), fields.housing as f64);
        numeric.insert("food".to_string(), fields.food as f64);
        numeric.insert("transportation".to_string(), fields.transportation as f64);
        numeric.insert("books_supplies".to_string(), fields.books_supplies as f64);
        numeric.insert("entertainment".to_string(), fields.entertainment as f64);
        numeric.insert("personal_care".to_string(), fields.personal_care as f64);
        numeric.insert("technology".to_string(), fields.technology as f64);
        numeric.insert("health_wellness".to_string(), fields.health_wellness as f64);
        numeric.insert("miscellaneous".to_string(), fields.miscellaneous as f64);

        let mut categorical = HashMap::new();
        categorical.insert(
            "gender".to_string(),
            gender_ml_label(fields.gender).to_string(),
        );
        categorical.insert(
            "year_in_school".to_string(),
            year_ml_label(fields.year_in_school).to_string(),
        );
        categorical.insert("major".to_string(), major_ml_label(fields.major).to_string());
        categorical.insert(
            "preferred_payment_method".to_string(),
            payment_ml_label(fields.preferred_payment_method).to_string(),
        );

        Self {
            numeric,
            categorical,
        }
    }
}

//
// ================= Scorer =================
//

/// Capability object around the one-time artifact load. The first `predict`
/// call attempts the load; a failure pins the heuristic path for the rest
/// of the process so there are no retry storms.
pub struct RiskScorer {
    model_dir: PathBuf,
    artifacts: OnceLock<Option<RiskArtifacts>>,
}

impl RiskScorer {
    pub fn new(model_dir: PathBuf) -> Self {
        Self {
            model_dir,
            artifacts: OnceLock::new(),
        }
    }

    /// Build from the `MODEL_DIR` env var, defaulting to `./ml_models`.
    pub fn from_env() -> Self {
        let dir = std::env::var("MODEL_DIR").unwrap_or_else(|_| "ml_models".to_string());
        Self::new(PathBuf::from(dir))
    }

    pub fn predict(&self, fields: &SnapshotFields) -> RiskScores {
        match self.artifacts() {
            Some(artifacts) => Self::predict_with_artifacts(artifacts, fields),
            None => Self::heuristic_predict(fields),
        }
    }

    /// True when the trained artifacts are driving predictions.
    pub fn is_model_backed(&self) -> bool {
        matches!(self.artifacts.get(), Some(Some(_)))
    }

    fn artifacts(&self) -> Option<&RiskArtifacts> {
        self.artifacts
            .get_or_init(|| match RiskArtifacts::load(&self.model_dir) {
                Ok(artifacts) => {
                    info!(dir = %self.model_dir.display(), "Risk model artifacts loaded");
                    Some(artifacts)
                }
                Err(e) => {
                    warn!(error = %e, "Risk artifacts unavailable, using heuristic scoring");
                    None
                }
            })
            .as_ref()
    }

    fn predict_with_artifacts(artifacts: &RiskArtifacts, fields: &SnapshotFields) -> RiskScores {
        let features = FeatureRow::from_fields(fields);

        let stress = artifacts.stress_classifier.predict_proba(&features);
        let financial_stress_prob = stress.clamp(0.05, 0.95);

        // The regressor outputs a dollar amount; squash through a logistic
        // transform and cap at 85% to avoid overstating either direction.
        let overspending_raw = artifacts.overspending_regressor.predict(&features);
        let overspending_prob = sigmoid(overspending_raw / REGRESSOR_SCALE).clamp(0.05, 0.85);

        RiskScores {
            overspending_prob: round3(overspending_prob),
            financial_stress_prob: round3(financial_stress_prob),
        }
    }

    /// Rule-based scoring. Reproducible without any trained artifact, up to
    /// a small jitter term.
    fn heuristic_predict(fields: &SnapshotFields) -> RiskScores {
        let total_income = fields.total_resources() as f64;
        let total_spending = fields.total_spending() as f64;
        let discretionary = fields.discretionary_spending() as f64;

        let spending_ratio = if total_income == 0.0 {
            2.0
        } else {
            total_spending / total_income
        };

        let mut overspending_base: f64 = if spending_ratio >= 1.3 {
            0.7
        } else if spending_ratio >= 1.1 {
            0.5
        } else if spending_ratio >= 1.0 {
            0.35
        } else if spending_ratio >= 0.9 {
            0.2
        } else {
            0.1
        };

        if total_income > 0.0 {
            let discretionary_ratio = discretionary / total_income;
            if discretionary_ratio > 0.3 {
                overspending_base = (overspending_base + 0.1).min(0.85);
            } else if discretionary_ratio > 0.2 {
                overspending_base = (overspending_base + 0.05).min(0.85);
            }
        }

        let mut stress_base: f64 = if total_income < 800.0 {
            0.7
        } else if total_income < 1200.0 {
            0.5
        } else if total_income < 1800.0 {
            0.35
        } else {
            0.2
        };

        if spending_ratio > 1.0 {
            stress_base = (stress_base + 0.2).min(0.95);
        } else if spending_ratio > 0.95 {
            stress_base = (stress_base + 0.1).min(0.95);
        }

        // Seniors and grad students tend to report more stress
        if fields.year_in_school >= 3 {
            stress_base = (stress_base + 0.05).min(0.95);
        }

        let mut rng = rand::thread_rng();
        let overspending_prob =
            (overspending_base + rng.gen_range(-0.05..=0.05)).clamp(0.05, 0.95);
        let financial_stress_prob =
            (stress_base + rng.gen_range(-0.05..=0.05)).clamp(0.05, 0.95);

        RiskScores {
            overspending_prob: round3(overspending_prob),
            financial_stress_prob: round3(financial_stress_prob),
        }
    }
}
