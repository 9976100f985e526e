//! Core data models for the spending coach

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fields::SnapshotFields;

//
// ================= Risk =================
//

/// Cached output of the risk scorer. Both probabilities live in [0, 1]
/// and are rounded to 3 decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskScores {
    pub overspending_prob: f64,
    pub financial_stress_prob: f64,
}

//
// ================= Analytics =================
//

/// Derived view of a snapshot. Never stored independently; always
/// recomputed from the source fields so the totals cannot drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    pub total_resources: i64,
    pub total_spending: i64,
    pub net_balance: i64,
    pub is_overspending: bool,
    pub overspending_amount: i64,
    pub savings_potential: i64,
    pub food_share: f64,
    pub housing_share: f64,
    pub entertainment_share: f64,
    pub discretionary_share: f64,
    pub tuition_share: f64,
}

/// Changes between two analytics views (current minus previous).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsDeltas {
    pub total_spending_delta: i64,
    pub net_balance_delta: i64,
    pub food_share_delta: f64,
    pub entertainment_share_delta: f64,
    pub discretionary_share_delta: f64,
}

//
// ================= Narrative =================
//

/// Summarizer output: one headline sentence plus ordered key points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub summary_paragraph: String,
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonOutline {
    pub title: String,
    pub bullet_points: Vec<String>,
}

/// A field update the coach claims to have extracted from free text.
/// These are untrusted proposals; the pipeline checks each name against
/// the taxonomy before applying anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub field: String,
    pub value: i64,
}

/// Coach output for one chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachReply {
    pub response_type: String,
    pub priority_issues: Vec<String>,
    pub explanation: String,
    #[serde(default)]
    pub actions_for_week: Vec<String>,
    #[serde(default)]
    pub lesson_outline: Option<LessonOutline>,
    #[serde(default)]
    pub field_updates: Vec<FieldUpdate>,
}

//
// ================= Snapshot =================
//

/// One dated record of the 17 structured fields plus cached risk and
/// narrative outputs. Immutable once created, except for the pipeline's
/// same-day merge which replaces it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(flatten)]
    pub fields: SnapshotFields,
    pub overspending_prob: f64,
    pub financial_stress_prob: f64,
    pub summary: Summary,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn risk(&self) -> RiskScores {
        RiskScores {
            overspending_prob: self.overspending_prob,
            financial_stress_prob: self.financial_stress_prob,
        }
    }
}

//
// ================= Profile =================
//

/// Demographic fields considered static across check-ins. Once all five
/// are set, the profile is authoritative over parsed values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub age: Option<i64>,
    pub gender: Option<i64>,
    pub year_in_school: Option<i64>,
    pub major: Option<i64>,
    pub preferred_payment_method: Option<i64>,
}

impl Profile {
    pub fn is_complete(&self) -> bool {
        self.age.is_some()
            && self.gender.is_some()
            && self.year_in_school.is_some()
            && self.major.is_some()
            && self.preferred_payment_method.is_some()
    }

    pub fn from_fields(fields: &SnapshotFields) -> Self {
        Self {
            age: Some(fields.age),
            gender: Some(fields.gender),
            year_in_school: Some(fields.year_in_school),
            major: Some(fields.major),
            preferred_payment_method: Some(fields.preferred_payment_method),
        }
    }

    /// Overwrite the demographic slots of `fields` with the profile values.
    /// Only meaningful when the profile is complete.
    pub fn apply_to(&self, fields: &mut SnapshotFields) {
        if let Some(age) = self.age {
            fields.age = age;
        }
        if let Some(gender) = self.gender {
            fields.gender = gender;
        }
        if let Some(year) = self.year_in_school {
            fields.year_in_school = year;
        }
        if let Some(major) = self.major {
            fields.major = major;
        }
        if let Some(payment) = self.preferred_payment_method {
            fields.preferred_payment_method = payment;
        }
    }
}

//
// ================= User =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            profile: Profile::default(),
            created_at: Utc::now(),
        }
    }
}

//
// ================= Interaction =================
//

/// Append-only record pairing one user message with one coach reply,
/// linked to the snapshot active at response time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub snapshot_id: Uuid,
    pub user_message: String,
    pub coach_reply: CoachReply,
    pub created_at: DateTime<Utc>,
}

//
// ================= Intake =================
//

/// One question/answer pair from the survey flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAnswer {
    pub question_id: String,
    pub answer: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_completeness() {
        let mut profile = Profile::default();
        assert!(!profile.is_complete());

        profile.age = Some(21);
        profile.gender = Some(1);
        profile.year_in_school = Some(2);
        profile.major = Some(0);
        assert!(!profile.is_complete());

        profile.preferred_payment_method = Some(2);
        assert!(profile.is_complete());
    }

    #[test]
    fn test_profile_overrides_parsed_demographics() {
        let mut fields = SnapshotFields {
            age: 30,
            gender: 0,
            year_in_school: 0,
            major: 8,
            monthly_income: 1000,
            financial_aid: 0,
            tuition: 0,
            housing: 0,
            food: 0,
            transportation: 0,
            books_supplies: 0,
            entertainment: 0,
            personal_care: 0,
            technology: 0,
            health_wellness: 0,
            miscellaneous: 0,
            preferred_payment_method: 0,
        };

        let profile = Profile {
            age: Some(21),
            gender: Some(1),
            year_in_school: Some(2),
            major: Some(0),
            preferred_payment_method: Some(2),
        };

        profile.apply_to(&mut fields);
        assert_eq!(fields.age, 21);
        assert_eq!(fields.gender, 1);
        assert_eq!(fields.year_in_school, 2);
        assert_eq!(fields.major, 0);
        assert_eq!(fields.preferred_payment_method, 2);
        // Financial fields untouched
        assert_eq!(fields.monthly_income, 1000);
    }

    #[test]
    fn test_coach_reply_lenient_deserialization() {
        // Optional sections default when the generator omits them.
        let json = r#"{
            "response_type": "coaching",
            "priority_issues": ["tight_budget"],
            "explanation": "Money is tight this month."
        }"#;

        let reply: CoachReply = serde_json::from_str(json).unwrap();
        assert!(reply.actions_for_week.is_empty());
        assert!(reply.lesson_outline.is_none());
        assert!(reply.field_updates.is_empty());
    }
}
