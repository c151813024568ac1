//! Review persistence: the `ReviewStore` seam plus PostgreSQL and in-memory backends.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use noor_core::{
    Adjudication, DailyReviewCounts, FlagAdjudication, FlagStatus, FlaggedTranslation, NewReview,
    NewUser, ReviewMetrics, TranslationReview, UnknownVariant, User, UserProgress,
};
use thiserror::Error;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryReviewStore;
pub use postgres::{PgConfig, PgReviewStore};

pub const CRATE_NAME: &str = "noor-storage";

/// Tables owned by the review schema migrations.
pub const MANAGED_TABLES: &[&str] = &[
    "users",
    "user_progress",
    "translation_reviews",
    "flagged_translations",
    "flag_adjudications",
    "review_metrics",
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt value in {table}: {source}")]
    Decode {
        table: &'static str,
        #[source]
        source: UnknownVariant,
    },
}

/// Everything written by one review submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedReview {
    pub review: TranslationReview,
    pub progress: UserProgress,
    pub flag: Option<FlaggedTranslation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformCounts {
    pub active_users: i64,
    pub active_reviewers: i64,
    pub total_reviews: i64,
    pub pending_flags: i64,
}

#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Insert or refresh a user by firebase uid, creating a zeroed progress row.
    /// An existing user's role is never changed here.
    async fn upsert_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn find_user_by_firebase_uid(&self, firebase_uid: &str) -> Result<Option<User>, StoreError>;

    async fn user_progress(&self, user_id: Uuid) -> Result<Option<UserProgress>, StoreError>;

    /// Persist the review, roll up progress, and fold a flag into its aggregate as one unit.
    async fn record_review(&self, review: NewReview) -> Result<RecordedReview, StoreError>;

    /// Reviews by one user, newest first.
    async fn reviews_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TranslationReview>, StoreError>;

    async fn count_reviews_by_user(&self, user_id: Uuid) -> Result<i64, StoreError>;

    async fn find_flag(&self, id: Uuid) -> Result<Option<FlaggedTranslation>, StoreError>;

    /// Flags ordered by `flag_count` desc, then most recently updated.
    async fn list_flags(
        &self,
        status: Option<FlagStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FlaggedTranslation>, StoreError>;

    async fn count_flags(&self, status: Option<FlagStatus>) -> Result<i64, StoreError>;

    async fn count_flags_processed_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Apply a decision and append an audit row. Returns `None` when the flag does not exist.
    async fn adjudicate_flag(
        &self,
        adjudication: Adjudication,
    ) -> Result<Option<FlaggedTranslation>, StoreError>;

    async fn adjudication_history(&self, flag_id: Uuid) -> Result<Vec<FlagAdjudication>, StoreError>;

    async fn platform_counts(&self, active_since: DateTime<Utc>) -> Result<PlatformCounts, StoreError>;

    async fn metrics_for(&self, date: NaiveDate) -> Result<Option<ReviewMetrics>, StoreError>;

    async fn daily_review_counts(&self, date: NaiveDate) -> Result<DailyReviewCounts, StoreError>;

    async fn save_metrics(&self, metrics: &ReviewMetrics) -> Result<(), StoreError>;
}
