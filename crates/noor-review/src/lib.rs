//! Review submission, dashboard rollups, and flag adjudication procedures.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use noor_core::{
    utc_day_bounds, Adjudication, Decision, FlagAdjudication, FlagStatus, FlaggedTranslation,
    NewReview, NewUser, ReviewMetrics, ReviewStatus, Role, TranslationReview, User, UserProgress,
};
use noor_storage::{ReviewStore, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

pub const CRATE_NAME: &str = "noor-review";

/// Reviewers count as active when their last review falls inside this window.
pub const ACTIVE_REVIEWER_WINDOW_DAYS: i64 = 7;
pub const RECENT_REVIEWS_LIMIT: i64 = 10;
const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("flagged translation not found: {0}")]
    FlagNotFound(Uuid),
    #[error("{0}")]
    Forbidden(String),
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUser {
    #[validate(length(min = 1, max = 128))]
    pub firebase_uid: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(max = 120))]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReview {
    #[validate(length(min = 1, max = 128))]
    pub firebase_uid: String,
    #[validate(range(min = 1, max = 114))]
    pub surah_number: i32,
    #[validate(range(min = 1, max = 286))]
    pub ayah_number: i32,
    #[validate(length(min = 1, max = 100))]
    pub translation_source: String,
    #[validate(length(min = 1))]
    pub translation_text: String,
    pub status: ReviewStatus,
    #[validate(range(min = 1, max = 10))]
    pub confidence: i32,
    #[validate(length(max = 2000))]
    pub feedback: Option<String>,
    #[validate(length(max = 5000))]
    pub suggested_edit: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProcessFlag {
    #[validate(length(min = 1, max = 128))]
    pub admin_firebase_uid: String,
    pub decision: Decision,
    #[validate(length(max = 2000))]
    pub admin_notes: Option<String>,
    #[validate(length(max = 5000))]
    pub corrected_text: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageParams {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PageParams {
    fn per_page(&self) -> u32 {
        self.per_page.clamp(1, MAX_PER_PAGE)
    }

    fn offset(&self) -> i64 {
        i64::from(self.page.max(1) - 1) * i64::from(self.per_page())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    fn new(items: Vec<T>, total: i64, params: PageParams) -> Self {
        let per_page = params.per_page();
        let total_pages = (total.max(0) as u64).div_ceil(u64::from(per_page)).max(1) as u32;
        Self {
            items,
            total,
            page: params.page.max(1),
            per_page,
            total_pages,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOverview {
    pub active_users: i64,
    pub active_reviewers: i64,
    pub total_reviews: i64,
    pub pending_flags: i64,
    pub today: ReviewMetrics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeratorOverview {
    pub pending_flags: i64,
    pub total_flags: i64,
    pub processed_today: i64,
    pub progress: UserProgress,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewerOverview {
    pub progress: UserProgress,
    pub recent_reviews: Vec<TranslationReview>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DashboardOverview {
    Admin(AdminOverview),
    Moderator(ModeratorOverview),
    Reviewer(ReviewerOverview),
}

/// Entry point for every review-side procedure. Built once per process and shared.
pub struct ReviewService {
    store: Arc<dyn ReviewStore>,
    clock: Arc<dyn Clock>,
}

impl ReviewService {
    pub fn new(store: Arc<dyn ReviewStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn ReviewStore> {
        &self.store
    }

    /// Create or refresh the account behind a firebase uid. New accounts start as reviewers.
    pub async fn register_user(&self, req: RegisterUser) -> Result<User, ReviewError> {
        req.validate()?;
        let user = self
            .store
            .upsert_user(NewUser {
                firebase_uid: req.firebase_uid,
                email: req.email,
                display_name: req.display_name,
                role: Role::Reviewer,
                created_at: self.clock.now(),
            })
            .await?;
        info!(user_id = %user.id, role = %user.role, "user registered");
        Ok(user)
    }

    pub async fn submit_review(&self, req: SubmitReview) -> Result<TranslationReview, ReviewError> {
        req.validate()?;
        let reviewer = self.resolve(&req.firebase_uid).await?;

        let recorded = self
            .store
            .record_review(NewReview {
                user_id: reviewer.id,
                surah_number: req.surah_number,
                ayah_number: req.ayah_number,
                translation_source: req.translation_source,
                translation_text: req.translation_text,
                status: req.status,
                confidence: req.confidence,
                feedback: req.feedback,
                suggested_edit: req.suggested_edit,
                created_at: self.clock.now(),
            })
            .await?;

        info!(
            review_id = %recorded.review.id,
            user_id = %reviewer.id,
            status = %recorded.review.status,
            streak = recorded.progress.current_streak,
            "review submitted"
        );
        if let Some(flag) = &recorded.flag {
            info!(
                flag_id = %flag.id,
                surah = flag.surah_number,
                ayah = flag.ayah_number,
                source = %flag.translation_source,
                flag_count = flag.flag_count,
                "translation flagged"
            );
        }
        Ok(recorded.review)
    }

    pub async fn overview(&self, firebase_uid: &str) -> Result<DashboardOverview, ReviewError> {
        let caller = self.resolve(firebase_uid).await?;
        let now = self.clock.now();
        let today = now.date_naive();

        let overview = match caller.role {
            Role::Admin => {
                let counts = self
                    .store
                    .platform_counts(now - Duration::days(ACTIVE_REVIEWER_WINDOW_DAYS))
                    .await?;
                let today_metrics = self
                    .store
                    .metrics_for(today)
                    .await?
                    .unwrap_or_else(|| ReviewMetrics::zeroed(today));
                DashboardOverview::Admin(AdminOverview {
                    active_users: counts.active_users,
                    active_reviewers: counts.active_reviewers,
                    total_reviews: counts.total_reviews,
                    pending_flags: counts.pending_flags,
                    today: today_metrics,
                })
            }
            Role::Moderator => {
                let (start, end) = utc_day_bounds(today);
                DashboardOverview::Moderator(ModeratorOverview {
                    pending_flags: self.store.count_flags(Some(FlagStatus::Pending)).await?,
                    total_flags: self.store.count_flags(None).await?,
                    processed_today: self.store.count_flags_processed_between(start, end).await?,
                    progress: self.progress_of(&caller).await?,
                })
            }
            Role::Reviewer => DashboardOverview::Reviewer(ReviewerOverview {
                progress: self.progress_of(&caller).await?,
                recent_reviews: self
                    .store
                    .reviews_by_user(caller.id, RECENT_REVIEWS_LIMIT, 0)
                    .await?,
            }),
        };
        Ok(overview)
    }

    /// Record a decision on a flagged translation. Earlier decisions may be revised;
    /// every decision is kept in the adjudication history.
    pub async fn process_flag(
        &self,
        flag_id: Uuid,
        req: ProcessFlag,
    ) -> Result<FlaggedTranslation, ReviewError> {
        let caller = self.resolve(&req.admin_firebase_uid).await?;
        self.require_adjudicator(&caller)?;
        req.validate()?;

        let updated = self
            .store
            .adjudicate_flag(Adjudication {
                flagged_translation_id: flag_id,
                decision: req.decision,
                admin_notes: req.admin_notes,
                corrected_text: req.corrected_text,
                processed_by: caller.id,
                processed_at: self.clock.now(),
            })
            .await?
            .ok_or(ReviewError::FlagNotFound(flag_id))?;

        info!(flag_id = %flag_id, decision = %updated.status, by = %caller.id, "flag processed");
        Ok(updated)
    }

    pub async fn review_history(
        &self,
        firebase_uid: &str,
        params: PageParams,
    ) -> Result<Page<TranslationReview>, ReviewError> {
        let caller = self.resolve(firebase_uid).await?;
        let items = self
            .store
            .reviews_by_user(caller.id, i64::from(params.per_page()), params.offset())
            .await?;
        let total = self.store.count_reviews_by_user(caller.id).await?;
        Ok(Page::new(items, total, params))
    }

    pub async fn flag_queue(
        &self,
        firebase_uid: &str,
        status: Option<FlagStatus>,
        params: PageParams,
    ) -> Result<Page<FlaggedTranslation>, ReviewError> {
        let caller = self.resolve(firebase_uid).await?;
        self.require_adjudicator(&caller)?;
        let items = self
            .store
            .list_flags(status, i64::from(params.per_page()), params.offset())
            .await?;
        let total = self.store.count_flags(status).await?;
        Ok(Page::new(items, total, params))
    }

    pub async fn flag_history(
        &self,
        firebase_uid: &str,
        flag_id: Uuid,
    ) -> Result<Vec<FlagAdjudication>, ReviewError> {
        let caller = self.resolve(firebase_uid).await?;
        self.require_adjudicator(&caller)?;
        if self.store.find_flag(flag_id).await?.is_none() {
            return Err(ReviewError::FlagNotFound(flag_id));
        }
        Ok(self.store.adjudication_history(flag_id).await?)
    }

    /// Compute and persist the metrics snapshot for one UTC day.
    pub async fn snapshot_daily_metrics(&self, date: NaiveDate) -> Result<ReviewMetrics, ReviewError> {
        let metrics = self.store.daily_review_counts(date).await?.into_metrics(date);
        self.store.save_metrics(&metrics).await?;
        info!(
            %date,
            total = metrics.total_reviews,
            completion = metrics.completion_percentage,
            "review metrics snapshot saved"
        );
        Ok(metrics)
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    async fn resolve(&self, firebase_uid: &str) -> Result<User, ReviewError> {
        self.store
            .find_user_by_firebase_uid(firebase_uid)
            .await?
            .ok_or_else(|| ReviewError::UserNotFound(firebase_uid.to_string()))
    }

    fn require_adjudicator(&self, caller: &User) -> Result<(), ReviewError> {
        if caller.role.can_adjudicate() {
            return Ok(());
        }
        warn!(user_id = %caller.id, role = %caller.role, "flag access denied");
        Err(ReviewError::Forbidden(format!(
            "role {} may not adjudicate flagged translations",
            caller.role
        )))
    }

    async fn progress_of(&self, user: &User) -> Result<UserProgress, ReviewError> {
        Ok(self
            .store
            .user_progress(user.id)
            .await?
            .unwrap_or_else(|| UserProgress::empty(user.id)))
    }
}
