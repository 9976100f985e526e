//! Persistence boundary
//!
//! The pipeline talks to a `SnapshotStore` and treats every call as atomic
//! and ordering-preserving. Two backends: an in-memory store for
//! development and tests, and a postgres store whose schema is
//! bootstrapped lazily on first use.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CoachError, Result};
use crate::fields::SnapshotFields;
use crate::models::{Interaction, Profile, Snapshot, User};

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load_user(&self, user_id: Uuid) -> Result<Option<User>>;
    async fn upsert_user(&self, user: &User) -> Result<()>;
    async fn update_profile(&self, user_id: Uuid, profile: &Profile) -> Result<()>;

    async fn load_latest_snapshot(&self, user_id: Uuid) -> Result<Option<Snapshot>>;
    async fn load_snapshot(&self, user_id: Uuid, snapshot_id: Uuid) -> Result<Option<Snapshot>>;
    async fn load_snapshot_on(&self, user_id: Uuid, date: NaiveDate) -> Result<Option<Snapshot>>;
    /// Most recent snapshot created strictly before the given instant.
    async fn load_previous_snapshot(
        &self,
        user_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Option<Snapshot>>;
    /// Snapshots for a user, newest first, capped at `limit`.
    async fn list_snapshots(&self, user_id: Uuid, limit: usize) -> Result<Vec<Snapshot>>;
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()>;
    /// Replace an existing snapshot in place (same-day merge only).
    async fn update_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    async fn save_interaction(&self, interaction: &Interaction) -> Result<()>;
    /// Interactions for a user, oldest first, capped at `limit`.
    async fn list_interactions(&self, user_id: Uuid, limit: usize) -> Result<Vec<Interaction>>;
}

//
// ================= In-Memory Store =================
//

pub struct InMemoryStore {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
    snapshots: Arc<RwLock<HashMap<Uuid, Vec<Snapshot>>>>,
    interactions: Arc<RwLock<HashMap<Uuid, Vec<Interaction>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            interactions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn snapshot_count(&self, user_id: Uuid) -> usize {
        let snapshots = self.snapshots.read().await;
        snapshots.get(&user_id).map(Vec::len).unwrap_or(0)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for InMemoryStore {
    async fn load_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.get(&user_id).cloned())
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        let mut users = self.users.write().await;
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_profile(&self, user_id: Uuid, profile: &Profile) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .entry(user_id)
            .or_insert_with(|| User::new(user_id));
        user.profile = profile.clone();
        Ok(())
    }

    async fn load_latest_snapshot(&self, user_id: Uuid) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(&user_id)
            .and_then(|list| list.iter().max_by_key(|s| s.created_at))
            .cloned())
    }

    async fn load_snapshot(&self, user_id: Uuid, snapshot_id: Uuid) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(&user_id)
            .and_then(|list| list.iter().find(|s| s.id == snapshot_id))
            .cloned())
    }

    async fn load_snapshot_on(&self, user_id: Uuid, date: NaiveDate) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(&user_id)
            .and_then(|list| {
                list.iter()
                    .filter(|s| s.created_at.date_naive() == date)
                    .max_by_key(|s| s.created_at)
            })
            .cloned())
    }

    async fn load_previous_snapshot(
        &self,
        user_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(&user_id)
            .and_then(|list| {
                list.iter()
                    .filter(|s| s.created_at < before)
                    .max_by_key(|s| s.created_at)
            })
            .cloned())
    }

    async fn list_snapshots(&self, user_id: Uuid, limit: usize) -> Result<Vec<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        let mut list = snapshots.get(&user_id).cloned().unwrap_or_default();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list.truncate(limit);
        Ok(list)
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots
            .entry(snapshot.user_id)
            .or_insert_with(Vec::new)
            .push(snapshot.clone());
        Ok(())
    }

    async fn update_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        let list = snapshots.entry(snapshot.user_id).or_insert_with(Vec::new);
        match list.iter_mut().find(|s| s.id == snapshot.id) {
            Some(existing) => {
                *existing = snapshot.clone();
                Ok(())
            }
            None => Err(CoachError::PersistenceFailure(format!(
                "snapshot {} not found for update",
                snapshot.id
            ))),
        }
    }

    async fn save_interaction(&self, interaction: &Interaction) -> Result<()> {
        let mut interactions = self.interactions.write().await;
        interactions
            .entry(interaction.user_id)
            .or_insert_with(Vec::new)
            .push(interaction.clone());
        Ok(())
    }

    async fn list_interactions(&self, user_id: Uuid, limit: usize) -> Result<Vec<Interaction>> {
        let interactions = self.interactions.read().await;
        let mut list = interactions.get(&user_id).cloned().unwrap_or_default();
        list.sort_by_key(|i| i.created_at);
        if list.len() > limit {
            list.drain(..list.len() - limit);
        }
        Ok(list)
    }
}

//
// ================= Postgres Store =================
//

pub struct PgStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgStore {
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| {
                CoachError::PersistenceFailure(format!("failed to build postgres pool: {}", e))
            })?;

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS users (
                      id UUID PRIMARY KEY,
                      age BIGINT,
                      gender BIGINT,
                      year_in_school BIGINT,
                      major BIGINT,
                      preferred_payment_method BIGINT,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS spending_snapshots (
                      id UUID PRIMARY KEY,
                      user_id UUID NOT NULL,
                      age BIGINT NOT NULL,
                      gender BIGINT NOT NULL,
                      year_in_school BIGINT NOT NULL,
                      major BIGINT NOT NULL,
                      monthly_income BIGINT NOT NULL,
                      financial_aid BIGINT NOT NULL,
                      tuition BIGINT NOT NULL,
                      housing BIGINT NOT NULL,
                      food BIGINT NOT NULL,
                      transportation BIGINT NOT NULL,
                      books_supplies BIGINT NOT NULL,
                      entertainment BIGINT NOT NULL,
                      personal_care BIGINT NOT NULL,
                      technology BIGINT NOT NULL,
                      health_wellness BIGINT NOT NULL,
                      miscellaneous BIGINT NOT NULL,
                      preferred_payment_method BIGINT NOT NULL,
                      overspending_prob DOUBLE PRECISION NOT NULL,
                      financial_stress_prob DOUBLE PRECISION NOT NULL,
                      summary TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_snapshots_user_time
                    ON spending_snapshots (user_id, created_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS coach_interactions (
                      id UUID PRIMARY KEY,
                      user_id UUID NOT NULL,
                      snapshot_id UUID NOT NULL,
                      user_message TEXT NOT NULL,
                      coach_reply TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                CoachError::PersistenceFailure(format!("failed to initialize schema: {}", e))
            })?;

        Ok(())
    }

    fn snapshot_from_row(row: &sqlx::postgres::PgRow) -> Result<Snapshot> {
        let summary_raw: String = row.try_get("summary").map_err(db_err)?;
        let summary = serde_json::from_str(&summary_raw)?;

        Ok(Snapshot {
            id: row.try_get("id").map_err(db_err)?,
            user_id: row.try_get("user_id").map_err(db_err)?,
            fields: SnapshotFields {
                age: row.try_get("age").map_err(db_err)?,
                gender: row.try_get("gender").map_err(db_err)?,
                year_in_school: row.try_get("year_in_school").map_err(db_err)?,
                major: row.try_get("major").map_err(db_err)?,
                monthly_income: row.try_get("monthly_income").map_err(db_err)?,
                financial_aid: row.try_get("financial_aid").map_err(db_err)?,
                tuition: row.try_get("tuition").map_err(db_err)?,
                housing: row.try_get("housing").map_err(db_err)?,
                food: row.try_get("food").map_err(db_err)?,
                transportation: row.try_get("transportation").map_err(db_err)?,
                books_supplies: row.try_get("books_supplies").map_err(db_err)?,
                entertainment: row.try_get("entertainment").map_err(db_err)?,
                personal_care: row.try_get("personal_care").map_err(db_err)?,
                technology: row.try_get("technology").map_err(db_err)?,
                health_wellness: row.try_get("health_wellness").map_err(db_err)?,
                miscellaneous: row.try_get("miscellaneous").map_err(db_err)?,
                preferred_payment_method: row
                    .try_get("preferred_payment_method")
                    .map_err(db_err)?,
            },
            overspending_prob: row.try_get("overspending_prob").map_err(db_err)?,
            financial_stress_prob: row.try_get("financial_stress_prob").map_err(db_err)?,
            summary,
            created_at: row.try_get("created_at").map_err(db_err)?,
        })
    }
}

fn db_err(e: sqlx::Error) -> CoachError {
    CoachError::PersistenceFailure(e.to_string())
}

const SNAPSHOT_COLUMNS: &str = "id, user_id, age, gender, year_in_school, major, monthly_income, \
     financial_aid, tuition, housing, food, transportation, books_supplies, entertainment, \
     personal_care, technology, health_wellness, miscellaneous, preferred_payment_method, \
     overspending_prob, financial_stress_prob, summary, created_at";

#[async_trait]
impl SnapshotStore for PgStore {
    async fn load_user(&self, user_id: Uuid) -> Result<Option<User>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT id, age, gender, year_in_school, major, preferred_payment_method, created_at \
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|row| User {
            id: row.try_get("id").unwrap_or(user_id),
            profile: Profile {
                age: row.try_get("age").ok(),
                gender: row.try_get("gender").ok(),
                year_in_school: row.try_get("year_in_school").ok(),
                major: row.try_get("major").ok(),
                preferred_payment_method: row.try_get("preferred_payment_method").ok(),
            },
            created_at: row.try_get("created_at").unwrap_or_else(|_| Utc::now()),
        }))
    }

    async fn upsert_user(&self, user: &User) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO users (id, age, gender, year_in_school, major, preferred_payment_method, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
              age = EXCLUDED.age,
              gender = EXCLUDED.gender,
              year_in_school = EXCLUDED.year_in_school,
              major = EXCLUDED.major,
              preferred_payment_method = EXCLUDED.preferred_payment_method
            "#,
        )
        .bind(user.id)
        .bind(user.profile.age)
        .bind(user.profile.gender)
        .bind(user.profile.year_in_school)
        .bind(user.profile.major)
        .bind(user.profile.preferred_payment_method)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn update_profile(&self, user_id: Uuid, profile: &Profile) -> Result<()> {
        let user = User {
            id: user_id,
            profile: profile.clone(),
            created_at: Utc::now(),
        };
        self.upsert_user(&user).await
    }

    async fn load_latest_snapshot(&self, user_id: Uuid) -> Result<Option<Snapshot>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM spending_snapshots WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT 1",
            SNAPSHOT_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| Self::snapshot_from_row(&row)).transpose()
    }

    async fn load_snapshot(&self, user_id: Uuid, snapshot_id: Uuid) -> Result<Option<Snapshot>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM spending_snapshots WHERE user_id = $1 AND id = $2",
            SNAPSHOT_COLUMNS
        ))
        .bind(user_id)
        .bind(snapshot_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| Self::snapshot_from_row(&row)).transpose()
    }

    async fn load_snapshot_on(&self, user_id: Uuid, date: NaiveDate) -> Result<Option<Snapshot>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM spending_snapshots \
             WHERE user_id = $1 AND (created_at AT TIME ZONE 'UTC')::date = $2 \
             ORDER BY created_at DESC LIMIT 1",
            SNAPSHOT_COLUMNS
        ))
        .bind(user_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| Self::snapshot_from_row(&row)).transpose()
    }

    async fn load_previous_snapshot(
        &self,
        user_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Option<Snapshot>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM spending_snapshots WHERE user_id = $1 AND created_at < $2 \
             ORDER BY created_at DESC LIMIT 1",
            SNAPSHOT_COLUMNS
        ))
        .bind(user_id)
        .bind(before)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| Self::snapshot_from_row(&row)).transpose()
    }

    async fn list_snapshots(&self, user_id: Uuid, limit: usize) -> Result<Vec<Snapshot>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM spending_snapshots WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2",
            SNAPSHOT_COLUMNS
        ))
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::snapshot_from_row).collect()
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.ensure_schema().await?;

        let summary = serde_json::to_string(&snapshot.summary)?;

        sqlx::query(
            r#"
            INSERT INTO spending_snapshots
              (id, user_id, age, gender, year_in_school, major, monthly_income,
               financial_aid, tuition, housing, food, transportation, books_supplies,
               entertainment, personal_care, technology, health_wellness, miscellaneous,
               preferred_payment_method, overspending_prob, financial_stress_prob,
               summary, created_at)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
               $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(snapshot.id)
        .bind(snapshot.user_id)
        .bind(snapshot.fields.age)
        .bind(snapshot.fields.gender)
        .bind(snapshot.fields.year_in_school)
        .bind(snapshot.fields.major)
        .bind(snapshot.fields.monthly_income)
        .bind(snapshot.fields.financial_aid)
        .bind(snapshot.fields.tuition)
        .bind(snapshot.fields.housing)
        .bind(snapshot.fields.food)
        .bind(snapshot.fields.transportation)
        .bind(snapshot.fields.books_supplies)
        .bind(snapshot.fields.entertainment)
        .bind(snapshot.fields.personal_care)
        .bind(snapshot.fields.technology)
        .bind(snapshot.fields.health_wellness)
        .bind(snapshot.fields.miscellaneous)
        .bind(snapshot.fields.preferred_payment_method)
        .bind(snapshot.overspending_prob)
        .bind(snapshot.financial_stress_prob)
        .bind(summary)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn update_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        self.ensure_schema().await?;

        let summary = serde_json::to_string(&snapshot.summary)?;

        let result = sqlx::query(
            r#"
            UPDATE spending_snapshots SET
              age = $3, gender = $4, year_in_school = $5, major = $6,
              monthly_income = $7, financial_aid = $8, tuition = $9, housing = $10,
              food = $11, transportation = $12, books_supplies = $13,
              entertainment = $14, personal_care = $15, technology = $16,
              health_wellness = $17, miscellaneous = $18,
              preferred_payment_method = $19, overspending_prob = $20,
              financial_stress_prob = $21, summary = $22
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(snapshot.id)
        .bind(snapshot.user_id)
        .bind(snapshot.fields.age)
        .bind(snapshot.fields.gender)
        .bind(snapshot.fields.year_in_school)
        .bind(snapshot.fields.major)
        .bind(snapshot.fields.monthly_income)
        .bind(snapshot.fields.financial_aid)
        .bind(snapshot.fields.tuition)
        .bind(snapshot.fields.housing)
        .bind(snapshot.fields.food)
        .bind(snapshot.fields.transportation)
        .bind(snapshot.fields.books_supplies)
        .bind(snapshot.fields.entertainment)
        .bind(snapshot.fields.personal_care)
        .bind(snapshot.fields.technology)
        .bind(snapshot.fields.health_wellness)
        .bind(snapshot.fields.miscellaneous)
        .bind(snapshot.fields.preferred_payment_method)
        .bind(snapshot.overspending_prob)
        .bind(snapshot.financial_stress_prob)
        .bind(summary)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(CoachError::PersistenceFailure(format!(
                "snapshot {} not found for update",
                snapshot.id
            )));
        }

        Ok(())
    }

    async fn save_interaction(&self, interaction: &Interaction) -> Result<()> {
        self.ensure_schema().await?;

        let reply = serde_json::to_string(&interaction.coach_reply)?;

        sqlx::query(
            r#"
            INSERT INTO coach_interactions
              (id, user_id, snapshot_id, user_message, coach_reply, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(interaction.id)
        .bind(interaction.user_id)
        .bind(interaction.snapshot_id)
        .bind(&interaction.user_message)
        .bind(reply)
        .bind(interaction.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn list_interactions(&self, user_id: Uuid, limit: usize) -> Result<Vec<Interaction>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            "SELECT id, user_id, snapshot_id, user_message, coach_reply, created_at \
             FROM coach_interactions WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut interactions = Vec::with_capacity(rows.len());
        for row in rows {
            let reply_raw: String = row.try_get("coach_reply").map_err(db_err)?;
            interactions.push(Interaction {
                id: row.try_get("id").map_err(db_err)?,
                user_id: row.try_get("user_id").map_err(db_err)?,
                snapshot_id: row.try_get("snapshot_id").map_err(db_err)?,
                user_message: row.try_get("user_message").map_err(db_err)?,
                coach_reply: serde_json::from_str(&reply_raw)?,
                created_at: row.try_get("created_at").map_err(db_err)?,
            });
        }

        // Query is newest-first for the LIMIT; callers want oldest-first.
        interactions.reverse();
        Ok(interactions)
    }
}

/// Pick the backend from the environment: postgres when `DATABASE_URL` is
/// set and the pool builds, in-memory otherwise.
pub fn store_from_env() -> Arc<dyn SnapshotStore> {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        match PgStore::connect_lazy(&url) {
            Ok(store) => {
                info!("Snapshot store backend: postgres");
                return Arc::new(store);
            }
            Err(e) => {
                warn!("Failed to initialize postgres store, falling back to in-memory: {}", e);
            }
        }
    }

    info!("Snapshot store backend: in-memory");
    Arc::new(InMemoryStore::new())
}
