//! Snapshot pipeline
//!
//! Orchestrates intake and chat end to end: parse, reconcile the profile,
//! validate, score, derive analytics, narrate, and commit. The commit step
//! applies the same-day merge rule under a per-user lock so concurrent
//! submissions for one user cannot produce two rows for the same day.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analytics::AnalyticsEngine;
use crate::error::{CoachError, Result};
use crate::fields::{
    SnapshotFields, FINANCIAL_FIELDS, GENDER_MAX_CODE, MAJOR_MAX_CODE, MAX_AGE, MIN_AGE,
    PAYMENT_MAX_CODE, YEAR_MAX_CODE,
};
use crate::generation::TextGenerator;
use crate::models::{
    Analytics, CoachReply, FieldUpdate, Interaction, Profile, RawAnswer, RiskScores, Snapshot,
    Summary, User,
};
use crate::narrative::NarrativeGenerator;
use crate::parser::AnswerParser;
use crate::risk::RiskScorer;
use crate::safety::SafetyGuard;
use crate::store::SnapshotStore;
use crate::survey::{ConversationTurn, FieldCollector, SurveyPrompt};

/// Default cap on returned chat history entries.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Snapshots included in the dashboard chart history.
pub const DASHBOARD_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct IntakeOutcome {
    pub snapshot: Snapshot,
    pub analytics: Analytics,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub reply: CoachReply,
    pub snapshot: Snapshot,
    pub analytics: Analytics,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpendingBreakdown {
    pub tuition: i64,
    pub housing: i64,
    pub food: i64,
    pub transportation: i64,
    pub books_supplies: i64,
    pub entertainment: i64,
    pub personal_care: i64,
    pub technology: i64,
    pub health_wellness: i64,
    pub miscellaneous: i64,
}

impl SpendingBreakdown {
    fn from_fields(fields: &SnapshotFields) -> Self {
        Self {
            tuition: fields.tuition,
            housing: fields.housing,
            food: fields.food,
            transportation: fields.transportation,
            books_supplies: fields.books_supplies,
            entertainment: fields.entertainment,
            personal_care: fields.personal_care,
            technology: fields.technology,
            health_wellness: fields.health_wellness,
            miscellaneous: fields.miscellaneous,
        }
    }
}

/// One point per snapshot for the dashboard charts.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPoint {
    pub snapshot_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub overspending_prob: f64,
    pub financial_stress_prob: f64,
    pub total_spending: i64,
    pub total_resources: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub user_id: Uuid,
    pub has_data: bool,
    pub latest_snapshot_id: Option<Uuid>,
    pub spending_breakdown: Option<SpendingBreakdown>,
    pub analytics: Option<Analytics>,
    pub risk_scores: Option<RiskScores>,
    pub summary: Option<Summary>,
    pub history: Vec<HistoryPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    #[serde(flatten)]
    pub profile: Profile,
    pub has_profile: bool,
}

pub struct SnapshotPipeline {
    parser: AnswerParser,
    narrative: NarrativeGenerator,
    collector: FieldCollector,
    risk: RiskScorer,
    store: Arc<dyn SnapshotStore>,
    // One lock per user, guarding the same-day merge decision.
    user_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SnapshotPipeline {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        risk: RiskScorer,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            parser: AnswerParser::new(generator.clone()),
            narrative: NarrativeGenerator::new(generator.clone()),
            collector: FieldCollector::new(generator),
            risk,
            store,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    //
    // ================= Intake =================
    //

    /// Process one intake submission: parse the answers, reconcile the
    /// profile, validate, score, summarize, and commit. Nothing persists
    /// unless every step before the commit succeeds.
    pub async fn intake(&self, user_id: Uuid, answers: &[RawAnswer]) -> Result<IntakeOutcome> {
        if answers.is_empty() {
            return Err(CoachError::UnprocessableInput(
                "No survey answers provided".to_string(),
            ));
        }

        let mut fields = self.parser.parse(answers).await?;

        // A complete stored profile is authoritative over parsed
        // demographics; otherwise this submission captures the profile.
        let mut user = self
            .store
            .load_user(user_id)
            .await?
            .unwrap_or_else(|| User::new(user_id));

        if user.profile.is_complete() {
            user.profile.apply_to(&mut fields);
        } else {
            user.profile = Profile::from_fields(&fields);
        }

        validate(&fields)?;

        let risk = self.risk.predict(&fields);
        let analytics = AnalyticsEngine::compute(&fields);
        let summary = self.narrative.summarize(&fields, &risk, &analytics).await;

        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            user_id,
            fields,
            overspending_prob: risk.overspending_prob,
            financial_stress_prob: risk.financial_stress_prob,
            summary,
            created_at: Utc::now(),
        };

        // Intake always appends a new row; the same-day merge applies to
        // chat-driven updates only.
        {
            let lock = self.user_lock(snapshot.user_id).await;
            let _guard = lock.lock().await;
            self.store.save_snapshot(&snapshot).await?;
        }

        // The profile lands only after the snapshot row is committed, so a
        // failed submission leaves no state behind.
        self.store.upsert_user(&user).await?;

        info!(
            user_id = %user_id,
            snapshot_id = %snapshot.id,
            overspending_prob = snapshot.overspending_prob,
            "Intake committed"
        );

        Ok(IntakeOutcome {
            analytics,
            snapshot,
        })
    }

    //
    // ================= Chat =================
    //

    /// One coaching turn against the user's latest snapshot (or a specific
    /// one). Field updates the coach extracts from the message are vetted,
    /// re-scored, and committed under the same-day merge rule.
    pub async fn chat(
        &self,
        user_id: Uuid,
        message: &str,
        snapshot_id: Option<Uuid>,
    ) -> Result<ChatOutcome> {
        let snapshot = match snapshot_id {
            Some(id) => self.store.load_snapshot(user_id, id).await?,
            None => self.store.load_latest_snapshot(user_id).await?,
        }
        .ok_or_else(|| {
            CoachError::UnprocessableInput(
                "No spending snapshot on file. Complete a check-in first.".to_string(),
            )
        })?;

        let previous = self
            .store
            .load_previous_snapshot(user_id, snapshot.created_at)
            .await?;
        let previous_analytics = previous
            .as_ref()
            .map(|p| (p.fields.clone(), AnalyticsEngine::compute(&p.fields)));

        let analytics = AnalyticsEngine::compute(&snapshot.fields);
        let reply = self
            .narrative
            .respond(
                &snapshot.fields,
                &snapshot.risk(),
                &analytics,
                message,
                previous_analytics.as_ref().map(|(f, a)| (f, a)),
            )
            .await;

        let updates = vet_field_updates(&snapshot.fields, &reply.field_updates);

        let (snapshot, analytics) = if updates.is_empty() {
            (snapshot, analytics)
        } else {
            self.apply_updates(&snapshot, &updates).await?
        };

        let interaction = Interaction {
            id: Uuid::new_v4(),
            user_id,
            snapshot_id: snapshot.id,
            user_message: SafetyGuard::sanitize(message),
            coach_reply: reply.clone(),
            created_at: Utc::now(),
        };
        self.store.save_interaction(&interaction).await?;

        Ok(ChatOutcome {
            reply,
            snapshot,
            analytics,
        })
    }

    pub async fn chat_history(&self, user_id: Uuid, limit: usize) -> Result<Vec<Interaction>> {
        self.store.list_interactions(user_id, limit).await
    }

    //
    // ================= Dashboard =================
    //

    /// Glanceable view for the UI: latest snapshot with breakdown, freshly
    /// recomputed analytics, cached risk and summary, and a chronological
    /// history for charts.
    pub async fn dashboard(&self, user_id: Uuid) -> Result<DashboardView> {
        let snapshots = self
            .store
            .list_snapshots(user_id, DASHBOARD_HISTORY_LIMIT)
            .await?;

        let Some(latest) = snapshots.first() else {
            return Ok(DashboardView {
                user_id,
                has_data: false,
                latest_snapshot_id: None,
                spending_breakdown: None,
                analytics: None,
                risk_scores: None,
                summary: None,
                history: Vec::new(),
            });
        };

        let history = snapshots
            .iter()
            .rev()
            .map(|s| HistoryPoint {
                snapshot_id: s.id,
                created_at: s.created_at,
                overspending_prob: s.overspending_prob,
                financial_stress_prob: s.financial_stress_prob,
                total_spending: s.fields.total_spending(),
                total_resources: s.fields.total_resources(),
            })
            .collect();

        Ok(DashboardView {
            user_id,
            has_data: true,
            latest_snapshot_id: Some(latest.id),
            spending_breakdown: Some(SpendingBreakdown::from_fields(&latest.fields)),
            analytics: Some(AnalyticsEngine::compute(&latest.fields)),
            risk_scores: Some(latest.risk()),
            summary: Some(latest.summary.clone()),
            history,
        })
    }

    //
    // ================= Profile =================
    //

    pub async fn profile(&self, user_id: Uuid) -> Result<ProfileView> {
        let profile = self
            .store
            .load_user(user_id)
            .await?
            .map(|user| user.profile)
            .unwrap_or_default();

        Ok(ProfileView {
            has_profile: profile.is_complete(),
            profile,
        })
    }

    /// Merge the provided fields into the stored profile. This is the only
    /// operation that changes a complete profile; chat and intake never do.
    pub async fn update_profile(&self, user_id: Uuid, changes: &Profile) -> Result<ProfileView> {
        validate_profile_changes(changes)?;

        let mut profile = self
            .store
            .load_user(user_id)
            .await?
            .map(|user| user.profile)
            .unwrap_or_default();

        if let Some(age) = changes.age {
            profile.age = Some(age);
        }
        if let Some(gender) = changes.gender {
            profile.gender = Some(gender);
        }
        if let Some(year) = changes.year_in_school {
            profile.year_in_school = Some(year);
        }
        if let Some(major) = changes.major {
            profile.major = Some(major);
        }
        if let Some(payment) = changes.preferred_payment_method {
            profile.preferred_payment_method = Some(payment);
        }

        self.store.update_profile(user_id, &profile).await?;

        Ok(ProfileView {
            has_profile: profile.is_complete(),
            profile,
        })
    }

    //
    // ================= Survey =================
    //

    /// Next survey question for the user. Returning users with a complete
    /// profile only answer the financial questions.
    pub async fn next_survey_prompt(
        &self,
        user_id: Uuid,
        history: &[ConversationTurn],
        collected: &HashSet<String>,
    ) -> Result<SurveyPrompt> {
        let has_profile = self
            .store
            .load_user(user_id)
            .await?
            .map(|user| user.profile.is_complete())
            .unwrap_or(false);

        Ok(self.collector.next_prompt(history, collected, has_profile).await)
    }

    //
    // ================= Commit =================
    //

    /// Rebuild a snapshot with vetted field updates applied, re-scored and
    /// re-summarized, then commit.
    async fn apply_updates(
        &self,
        snapshot: &Snapshot,
        updates: &[FieldUpdate],
    ) -> Result<(Snapshot, Analytics)> {
        let mut fields = snapshot.fields.clone();
        for update in updates {
            fields.set(&update.field, update.value);
        }

        // Updates that would make the snapshot invalid are dropped wholesale
        // rather than failing the chat turn.
        if validate(&fields).is_err() {
            warn!(snapshot_id = %snapshot.id, "Extracted updates failed validation, keeping snapshot as-is");
            return Ok((snapshot.clone(), AnalyticsEngine::compute(&snapshot.fields)));
        }

        let risk = self.risk.predict(&fields);
        let analytics = AnalyticsEngine::compute(&fields);
        let summary = self.narrative.summarize(&fields, &risk, &analytics).await;

        let candidate = Snapshot {
            id: Uuid::new_v4(),
            user_id: snapshot.user_id,
            fields,
            overspending_prob: risk.overspending_prob,
            financial_stress_prob: risk.financial_stress_prob,
            summary,
            created_at: Utc::now(),
        };

        let committed = self.commit_snapshot(candidate).await?;
        Ok((committed, analytics))
    }

    /// Same-day merge for chat-driven updates: if the user already has a
    /// snapshot dated today, the candidate replaces it in place (same row
    /// id, original timestamp); otherwise it lands as a new row. Serialized
    /// per user. Intake never routes through here.
    async fn commit_snapshot(&self, mut snapshot: Snapshot) -> Result<Snapshot> {
        let lock = self.user_lock(snapshot.user_id).await;
        let _guard = lock.lock().await;

        let today = snapshot.created_at.date_naive();
        match self
            .store
            .load_snapshot_on(snapshot.user_id, today)
            .await?
        {
            Some(existing) => {
                snapshot.id = existing.id;
                snapshot.created_at = existing.created_at;
                self.store.update_snapshot(&snapshot).await?;
            }
            None => {
                self.store.save_snapshot(&snapshot).await?;
            }
        }

        Ok(snapshot)
    }

    async fn user_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn validate_profile_changes(changes: &Profile) -> Result<()> {
    if let Some(age) = changes.age {
        if !(MIN_AGE..=MAX_AGE).contains(&age) {
            return Err(CoachError::UnprocessableInput(format!(
                "Age must be between {} and {}",
                MIN_AGE, MAX_AGE
            )));
        }
    }
    if let Some(gender) = changes.gender {
        if !(0..=GENDER_MAX_CODE).contains(&gender) {
            return Err(CoachError::UnprocessableInput(format!(
                "gender code {} out of range",
                gender
            )));
        }
    }
    if let Some(year) = changes.year_in_school {
        if !(0..=YEAR_MAX_CODE).contains(&year) {
            return Err(CoachError::UnprocessableInput(format!(
                "year_in_school code {} out of range",
                year
            )));
        }
    }
    if let Some(major) = changes.major {
        if !(0..=MAJOR_MAX_CODE).contains(&major) {
            return Err(CoachError::UnprocessableInput(format!(
                "major code {} out of range",
                major
            )));
        }
    }
    if let Some(payment) = changes.preferred_payment_method {
        if !(0..=PAYMENT_MAX_CODE).contains(&payment) {
            return Err(CoachError::UnprocessableInput(format!(
                "preferred_payment_method code {} out of range",
                payment
            )));
        }
    }
    Ok(())
}

fn validate(fields: &SnapshotFields) -> Result<()> {
    SafetyGuard::validate_fields(fields).map_err(CoachError::UnprocessableInput)?;
    fields.validate_codes().map_err(CoachError::UnprocessableInput)?;
    Ok(())
}

/// Keep only updates naming a financial field with a sane value. The coach
/// never edits demographics; the profile is the authority there.
fn vet_field_updates(current: &SnapshotFields, proposed: &[FieldUpdate]) -> Vec<FieldUpdate> {
    proposed
        .iter()
        .filter(|update| {
            if !FINANCIAL_FIELDS.contains(&update.field.as_str()) {
                warn!(field = %update.field, "Dropping update for non-financial field");
                return false;
            }
            if update.value < 0 {
                warn!(field = %update.field, value = update.value, "Dropping negative update");
                return false;
            }
            if Some(update.value) == current.get(&update.field) {
                return false;
            }
            true
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::StaticGenerator;
    use crate::store::InMemoryStore;
    use std::path::PathBuf;

    // One response that satisfies the parser, the summarizer, and the coach
    // at once; required-field validation only checks key presence.
    const OMNI_RESPONSE: &str = r#"{
        "age": 21, "gender": 1, "year_in_school": 2, "major": 0,
        "monthly_income": 2300, "financial_aid": 0, "tuition": 800,
        "housing": 800, "food": 420, "transportation": 100,
        "books_supplies": 50, "entertainment": 300, "personal_care": 150,
        "technology": 80, "health_wellness": 100, "miscellaneous": 215,
        "preferred_payment_method": 2,
        "summary_paragraph": "Spending runs ahead of income this month.",
        "key_points": ["Net balance is -$715"],
        "response_type": "coaching",
        "priority_issues": ["overspending"],
        "explanation": "Your food budget is the easiest place to trim.",
        "field_updates": []
    }"#;

    fn pipeline_with(response: &str) -> (SnapshotPipeline, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = SnapshotPipeline::new(
            Arc::new(StaticGenerator::replying(response)),
            RiskScorer::new(PathBuf::from("missing_models")),
            store.clone(),
        );
        (pipeline, store)
    }

    fn answers() -> Vec<RawAnswer> {
        vec![RawAnswer {
            question_id: "monthly_income".to_string(),
            answer: "about $2300".to_string(),
        }]
    }

    fn draft_snapshot(user_id: Uuid) -> Snapshot {
        Snapshot {
            id: Uuid::new_v4(),
            user_id,
            fields: SnapshotFields {
                age: 21,
                gender: 1,
                year_in_school: 2,
                major: 0,
                monthly_income: 2300,
                financial_aid: 0,
                tuition: 800,
                housing: 800,
                food: 420,
                transportation: 100,
                books_supplies: 50,
                entertainment: 300,
                personal_care: 150,
                technology: 80,
                health_wellness: 100,
                miscellaneous: 215,
                preferred_payment_method: 2,
            },
            overspending_prob: 0.75,
            financial_stress_prob: 0.4,
            summary: Summary {
                summary_paragraph: "test".to_string(),
                key_points: vec![],
            },
            created_at: Utc::now(),
        }
    }

    /// Store double whose snapshot insert always fails; everything else
    /// delegates to the in-memory store.
    struct FailingSaveStore {
        inner: InMemoryStore,
    }

    impl FailingSaveStore {
        fn new() -> Self {
            Self {
                inner: InMemoryStore::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl SnapshotStore for FailingSaveStore {
        async fn load_user(&self, user_id: Uuid) -> Result<Option<User>> {
            self.inner.load_user(user_id).await
        }

        async fn upsert_user(&self, user: &User) -> Result<()> {
            self.inner.upsert_user(user).await
        }

        async fn update_profile(&self, user_id: Uuid, profile: &Profile) -> Result<()> {
            self.inner.update_profile(user_id, profile).await
        }

        async fn load_latest_snapshot(&self, user_id: Uuid) -> Result<Option<Snapshot>> {
            self.inner.load_latest_snapshot(user_id).await
        }

        async fn load_snapshot(
            &self,
            user_id: Uuid,
            snapshot_id: Uuid,
        ) -> Result<Option<Snapshot>> {
            self.inner.load_snapshot(user_id, snapshot_id).await
        }

        async fn load_snapshot_on(
            &self,
            user_id: Uuid,
            date: chrono::NaiveDate,
        ) -> Result<Option<Snapshot>> {
            self.inner.load_snapshot_on(user_id, date).await
        }

        async fn load_previous_snapshot(
            &self,
            user_id: Uuid,
            before: DateTime<Utc>,
        ) -> Result<Option<Snapshot>> {
            self.inner.load_previous_snapshot(user_id, before).await
        }

        async fn list_snapshots(&self, user_id: Uuid, limit: usize) -> Result<Vec<Snapshot>> {
            self.inner.list_snapshots(user_id, limit).await
        }

        async fn save_snapshot(&self, _snapshot: &Snapshot) -> Result<()> {
            Err(CoachError::PersistenceFailure("disk full".to_string()))
        }

        async fn update_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
            self.inner.update_snapshot(snapshot).await
        }

        async fn save_interaction(&self, interaction: &Interaction) -> Result<()> {
            self.inner.save_interaction(interaction).await
        }

        async fn list_interactions(&self, user_id: Uuid, limit: usize) -> Result<Vec<Interaction>> {
            self.inner.list_interactions(user_id, limit).await
        }
    }

    #[tokio::test]
    async fn test_intake_end_to_end() {
        let (pipeline, store) = pipeline_with(OMNI_RESPONSE);
        let user_id = Uuid::new_v4();

        let outcome = pipeline.intake(user_id, &answers()).await.unwrap();

        assert_eq!(outcome.analytics.total_resources, 2300);
        assert_eq!(outcome.analytics.total_spending, 3015);
        assert!(outcome.analytics.is_overspending);
        assert!(outcome.snapshot.overspending_prob >= 0.05);
        assert!(outcome.snapshot.overspending_prob <= 0.95);
        assert_eq!(
            outcome.snapshot.summary.summary_paragraph,
            "Spending runs ahead of income this month."
        );

        // Profile captured on first intake.
        let user = store.load_user(user_id).await.unwrap().unwrap();
        assert!(user.profile.is_complete());
        assert_eq!(store.snapshot_count(user_id).await, 1);
    }

    #[tokio::test]
    async fn test_intake_empty_answers_rejected() {
        let (pipeline, _) = pipeline_with(OMNI_RESPONSE);
        let err = pipeline.intake(Uuid::new_v4(), &[]).await.unwrap_err();
        assert!(matches!(err, CoachError::UnprocessableInput(_)));
    }

    #[tokio::test]
    async fn test_second_intake_same_day_appends_new_row() {
        let (pipeline, store) = pipeline_with(OMNI_RESPONSE);
        let user_id = Uuid::new_v4();

        let first = pipeline.intake(user_id, &answers()).await.unwrap();
        let second = pipeline.intake(user_id, &answers()).await.unwrap();

        // Intake never merges; resubmitting on the same day adds a row.
        assert_ne!(first.snapshot.id, second.snapshot.id);
        assert_eq!(store.snapshot_count(user_id).await, 2);

        let latest = store.load_latest_snapshot(user_id).await.unwrap().unwrap();
        assert_eq!(latest.id, second.snapshot.id);
    }

    #[tokio::test]
    async fn test_failed_snapshot_commit_persists_nothing() {
        let store = Arc::new(FailingSaveStore::new());
        let pipeline = SnapshotPipeline::new(
            Arc::new(StaticGenerator::replying(OMNI_RESPONSE)),
            RiskScorer::new(PathBuf::from("missing_models")),
            store.clone(),
        );
        let user_id = Uuid::new_v4();

        let err = pipeline.intake(user_id, &answers()).await.unwrap_err();
        assert!(matches!(err, CoachError::PersistenceFailure(_)));

        // The captured profile must not outlive the failed submission, or
        // the user would skip profile collection forever.
        assert!(store.load_user(user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_same_day_commits_produce_one_row() {
        let (pipeline, store) = pipeline_with(OMNI_RESPONSE);
        let user_id = Uuid::new_v4();

        let first = pipeline.commit_snapshot(draft_snapshot(user_id));
        let second = pipeline.commit_snapshot(draft_snapshot(user_id));
        let (first, second) = tokio::join!(first, second);
        let first = first.unwrap();
        let second = second.unwrap();

        // The per-user lock serializes decide-then-write: whichever commit
        // lands second must merge into the first one's row.
        assert_eq!(first.id, second.id);
        assert_eq!(store.snapshot_count(user_id).await, 1);
    }

    #[tokio::test]
    async fn test_dashboard_reflects_latest_snapshot() {
        let (pipeline, _) = pipeline_with(OMNI_RESPONSE);
        let user_id = Uuid::new_v4();

        let empty = pipeline.dashboard(user_id).await.unwrap();
        assert!(!empty.has_data);
        assert!(empty.history.is_empty());

        let intake = pipeline.intake(user_id, &answers()).await.unwrap();
        let view = pipeline.dashboard(user_id).await.unwrap();

        assert!(view.has_data);
        assert_eq!(view.latest_snapshot_id, Some(intake.snapshot.id));
        let breakdown = view.spending_breakdown.unwrap();
        assert_eq!(breakdown.food, 420);
        assert_eq!(breakdown.housing, 800);
        assert_eq!(view.analytics.unwrap().total_spending, 3015);
        assert_eq!(view.history.len(), 1);
        assert_eq!(view.history[0].total_resources, 2300);
        assert_eq!(view.history[0].snapshot_id, intake.snapshot.id);
    }

    #[tokio::test]
    async fn test_profile_update_merges_and_validates() {
        let (pipeline, _store) = pipeline_with(OMNI_RESPONSE);
        let user_id = Uuid::new_v4();

        let view = pipeline.profile(user_id).await.unwrap();
        assert!(!view.has_profile);

        let changes = Profile {
            age: Some(22),
            ..Profile::default()
        };
        let view = pipeline.update_profile(user_id, &changes).await.unwrap();
        assert_eq!(view.profile.age, Some(22));
        assert!(!view.has_profile);

        let rest = Profile {
            age: None,
            gender: Some(1),
            year_in_school: Some(2),
            major: Some(0),
            preferred_payment_method: Some(2),
        };
        let view = pipeline.update_profile(user_id, &rest).await.unwrap();
        assert!(view.has_profile);
        // The earlier partial update survives the merge.
        assert_eq!(view.profile.age, Some(22));

        let bad = Profile {
            age: Some(12),
            ..Profile::default()
        };
        let err = pipeline.update_profile(user_id, &bad).await.unwrap_err();
        assert!(matches!(err, CoachError::UnprocessableInput(_)));
    }

    #[tokio::test]
    async fn test_stored_profile_overrides_parsed_demographics() {
        let (pipeline, store) = pipeline_with(OMNI_RESPONSE);
        let user_id = Uuid::new_v4();

        let profile = Profile {
            age: Some(25),
            gender: Some(0),
            year_in_school: Some(4),
            major: Some(1),
            preferred_payment_method: Some(3),
        };
        store.update_profile(user_id, &profile).await.unwrap();

        let outcome = pipeline.intake(user_id, &answers()).await.unwrap();
        assert_eq!(outcome.snapshot.fields.age, 25);
        assert_eq!(outcome.snapshot.fields.year_in_school, 4);
        // Financial fields still come from the parse.
        assert_eq!(outcome.snapshot.fields.monthly_income, 2300);
    }

    #[tokio::test]
    async fn test_chat_without_snapshot_rejected() {
        let (pipeline, _) = pipeline_with(OMNI_RESPONSE);
        let err = pipeline
            .chat(Uuid::new_v4(), "how am I doing?", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoachError::UnprocessableInput(_)));
        assert!(err.is_user_visible());
    }

    #[tokio::test]
    async fn test_chat_records_interaction() {
        let (pipeline, _) = pipeline_with(OMNI_RESPONSE);
        let user_id = Uuid::new_v4();

        pipeline.intake(user_id, &answers()).await.unwrap();
        let outcome = pipeline
            .chat(user_id, "how am I doing?", None)
            .await
            .unwrap();
        assert_eq!(outcome.reply.response_type, "coaching");

        let history = pipeline.chat_history(user_id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user_message, "how am I doing?");
        assert_eq!(history[0].snapshot_id, outcome.snapshot.id);
    }

    #[tokio::test]
    async fn test_chat_update_merges_same_day() {
        let with_update = OMNI_RESPONSE.replace(
            "\"field_updates\": []",
            "\"field_updates\": [{\"field\": \"food\", \"value\": 350}]",
        );
        let (pipeline, store) = pipeline_with(&with_update);
        let user_id = Uuid::new_v4();

        let intake = pipeline.intake(user_id, &answers()).await.unwrap();
        let outcome = pipeline
            .chat(user_id, "actually food was only 350", None)
            .await
            .unwrap();

        // Same-day update replaces the existing row in place.
        assert_eq!(store.snapshot_count(user_id).await, 1);
        assert_eq!(outcome.snapshot.id, intake.snapshot.id);
        assert_eq!(outcome.snapshot.fields.food, 350);
        assert_eq!(outcome.analytics.total_spending, 3015 - 70);
    }

    #[tokio::test]
    async fn test_chat_drops_profile_field_updates() {
        let with_update = OMNI_RESPONSE.replace(
            "\"field_updates\": []",
            "\"field_updates\": [{\"field\": \"age\", \"value\": 35}, {\"field\": \"balance\", \"value\": 1}]",
        );
        let (pipeline, store) = pipeline_with(&with_update);
        let user_id = Uuid::new_v4();

        pipeline.intake(user_id, &answers()).await.unwrap();
        let outcome = pipeline.chat(user_id, "I'm 35 now", None).await.unwrap();

        assert_eq!(outcome.snapshot.fields.age, 21);
        assert_eq!(store.snapshot_count(user_id).await, 1);
    }

    #[tokio::test]
    async fn test_survey_prompt_skips_profile_for_returning_user() {
        let (pipeline, _) = pipeline_with(OMNI_RESPONSE);
        let user_id = Uuid::new_v4();

        pipeline.intake(user_id, &answers()).await.unwrap();

        // Generator output lacks field/question keys valid for the survey,
        // so this exercises the canned fallback path.
        let prompt = pipeline
            .next_survey_prompt(user_id, &[], &HashSet::new())
            .await
            .unwrap();
        assert_eq!(prompt.field.as_deref(), Some("monthly_income"));
    }

    #[test]
    fn test_vet_field_updates() {
        let mut fields = SnapshotFields {
            age: 21,
            gender: 1,
            year_in_school: 2,
            major: 0,
            monthly_income: 2300,
            financial_aid: 0,
            tuition: 800,
            housing: 800,
            food: 420,
            transportation: 100,
            books_supplies: 50,
            entertainment: 300,
            personal_care: 150,
            technology: 80,
            health_wellness: 100,
            miscellaneous: 215,
            preferred_payment_method: 2,
        };

        let proposed = vec![
            FieldUpdate {
                field: "food".to_string(),
                value: 350,
            },
            FieldUpdate {
                field: "age".to_string(),
                value: 35,
            },
            FieldUpdate {
                field: "entertainment".to_string(),
                value: -10,
            },
            FieldUpdate {
                field: "housing".to_string(),
                value: 800,
            },
        ];

        let vetted = vet_field_updates(&fields, &proposed);
        assert_eq!(vetted.len(), 1);
        assert_eq!(vetted[0].field, "food");

        fields.set("food", 350);
        assert!(vet_field_updates(&fields, &proposed).is_empty());
    }
}
