use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use noor_core::{
    utc_day_bounds, Adjudication, DailyReviewCounts, FlagAdjudication, FlagKey, FlagStatus,
    FlaggedTranslation, NewReview, NewUser, ReviewMetrics, ReviewStatus, Role, TranslationReview,
    User, UserProgress,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{PlatformCounts, RecordedReview, ReviewStore, StoreError};

/// Process-local store. A single mutex makes every operation atomic, mirroring the
/// single-statement upserts of the PostgreSQL backend.
#[derive(Debug, Default)]
pub struct MemoryReviewStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    users: Vec<User>,
    progress: HashMap<Uuid, UserProgress>,
    reviews: Vec<TranslationReview>,
    flags: Vec<FlaggedTranslation>,
    flag_index: HashMap<FlagKey, usize>,
    adjudications: Vec<FlagAdjudication>,
    metrics: HashMap<NaiveDate, ReviewMetrics>,
}

impl MemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook for toggling `is_active`, which has no public write path.
    pub async fn set_user_active(&self, user_id: Uuid, active: bool) {
        let mut state = self.state.lock().await;
        if let Some(user) = state.users.iter_mut().find(|u| u.id == user_id) {
            user.is_active = active;
        }
    }
}

fn page<T: Clone>(items: impl Iterator<Item = T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[async_trait]
impl ReviewStore for MemoryReviewStore {
    async fn upsert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let stored = if let Some(existing) = state
            .users
            .iter_mut()
            .find(|u| u.firebase_uid == user.firebase_uid)
        {
            existing.email = user.email;
            if user.display_name.is_some() {
                existing.display_name = user.display_name;
            }
            existing.clone()
        } else {
            let created = User {
                id: Uuid::new_v4(),
                firebase_uid: user.firebase_uid,
                email: user.email,
                display_name: user.display_name,
                role: user.role,
                is_active: true,
                created_at: user.created_at,
            };
            state.users.push(created.clone());
            created
        };
        state
            .progress
            .entry(stored.id)
            .or_insert_with(|| UserProgress::empty(stored.id));
        Ok(stored)
    }

    async fn find_user_by_firebase_uid(&self, firebase_uid: &str) -> Result<Option<User>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.users.iter().find(|u| u.firebase_uid == firebase_uid).cloned())
    }

    async fn user_progress(&self, user_id: Uuid) -> Result<Option<UserProgress>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.progress.get(&user_id).cloned())
    }

    async fn record_review(&self, review: NewReview) -> Result<RecordedReview, StoreError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let progress = state
            .progress
            .entry(review.user_id)
            .or_insert_with(|| UserProgress::empty(review.user_id));
        progress.record(review.status, review.created_at);
        let progress = progress.clone();

        let flag = if review.status == ReviewStatus::Flagged {
            let key = review.flag_key();
            let idx = match state.flag_index.get(&key).copied() {
                Some(idx) => {
                    state.flags[idx].absorb_flag(&review);
                    idx
                }
                None => {
                    state.flags.push(FlaggedTranslation::first_flag(Uuid::new_v4(), &review));
                    let idx = state.flags.len() - 1;
                    state.flag_index.insert(key, idx);
                    idx
                }
            };
            Some(state.flags[idx].clone())
        } else {
            None
        };

        let stored = TranslationReview::from_new(Uuid::new_v4(), review);
        state.reviews.push(stored.clone());

        Ok(RecordedReview {
            review: stored,
            progress,
            flag,
        })
    }

    async fn reviews_by_user(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TranslationReview>, StoreError> {
        let state = self.state.lock().await;
        let mut mine: Vec<&TranslationReview> =
            state.reviews.iter().filter(|r| r.user_id == user_id).collect();
        // Insertion order breaks timestamp ties so the latest submission comes first.
        mine.reverse();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(mine.into_iter().cloned(), limit, offset))
    }

    async fn count_reviews_by_user(&self, user_id: Uuid) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.reviews.iter().filter(|r| r.user_id == user_id).count() as i64)
    }

    async fn find_flag(&self, id: Uuid) -> Result<Option<FlaggedTranslation>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.flags.iter().find(|f| f.id == id).cloned())
    }

    async fn list_flags(
        &self,
        status: Option<FlagStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FlaggedTranslation>, StoreError> {
        let state = self.state.lock().await;
        let mut matching: Vec<&FlaggedTranslation> = state
            .flags
            .iter()
            .filter(|f| status.map_or(true, |s| f.status == s))
            .collect();
        matching.sort_by(|a, b| {
            b.flag_count
                .cmp(&a.flag_count)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        Ok(page(matching.into_iter().cloned(), limit, offset))
    }

    async fn count_flags(&self, status: Option<FlagStatus>) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .flags
            .iter()
            .filter(|f| status.map_or(true, |s| f.status == s))
            .count() as i64)
    }

    async fn count_flags_processed_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .flags
            .iter()
            .filter(|f| f.processed_at.is_some_and(|at| at >= start && at < end))
            .count() as i64)
    }

    async fn adjudicate_flag(
        &self,
        adjudication: Adjudication,
    ) -> Result<Option<FlaggedTranslation>, StoreError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(flag) = state
            .flags
            .iter_mut()
            .find(|f| f.id == adjudication.flagged_translation_id)
        else {
            return Ok(None);
        };
        let previous_status = flag.status;
        flag.apply(&adjudication);
        let updated = flag.clone();

        state.adjudications.push(FlagAdjudication {
            id: Uuid::new_v4(),
            flagged_translation_id: adjudication.flagged_translation_id,
            previous_status,
            decision: adjudication.decision.into(),
            admin_notes: adjudication.admin_notes,
            corrected_text: adjudication.corrected_text,
            processed_by: adjudication.processed_by,
            processed_at: adjudication.processed_at,
        });
        Ok(Some(updated))
    }

    async fn adjudication_history(&self, flag_id: Uuid) -> Result<Vec<FlagAdjudication>, StoreError> {
        let state = self.state.lock().await;
        let mut history: Vec<FlagAdjudication> = state
            .adjudications
            .iter()
            .filter(|a| a.flagged_translation_id == flag_id)
            .cloned()
            .collect();
        // Stable sort: equal timestamps keep insertion order.
        history.sort_by_key(|a| a.processed_at);
        Ok(history)
    }

    async fn platform_counts(&self, active_since: DateTime<Utc>) -> Result<PlatformCounts, StoreError> {
        let state = self.state.lock().await;
        let active_reviewers = state
            .users
            .iter()
            .filter(|u| u.role == Role::Reviewer)
            .filter(|u| {
                state
                    .progress
                    .get(&u.id)
                    .and_then(|p| p.last_review_date)
                    .is_some_and(|last| last >= active_since)
            })
            .count();
        Ok(PlatformCounts {
            active_users: state.users.iter().filter(|u| u.is_active).count() as i64,
            active_reviewers: active_reviewers as i64,
            total_reviews: state.reviews.len() as i64,
            pending_flags: state
                .flags
                .iter()
                .filter(|f| f.status == FlagStatus::Pending)
                .count() as i64,
        })
    }

    async fn metrics_for(&self, date: NaiveDate) -> Result<Option<ReviewMetrics>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.metrics.get(&date).cloned())
    }

    async fn daily_review_counts(&self, date: NaiveDate) -> Result<DailyReviewCounts, StoreError> {
        let (start, end) = utc_day_bounds(date);
        let state = self.state.lock().await;
        let mut counts = DailyReviewCounts::default();
        let mut reviewed = std::collections::HashSet::new();
        for review in &state.reviews {
            if review.created_at < end {
                reviewed.insert((review.surah_number, review.ayah_number));
            }
            if review.created_at >= start && review.created_at < end {
                counts.total_reviews += 1;
                match review.status {
                    ReviewStatus::Approved => counts.approved += 1,
                    ReviewStatus::Flagged => counts.flagged += 1,
                    ReviewStatus::NeedsReview => {}
                }
            }
        }
        counts.distinct_ayahs_to_date = reviewed.len() as i64;
        Ok(counts)
    }

    async fn save_metrics(&self, metrics: &ReviewMetrics) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.metrics.insert(metrics.date, metrics.clone());
        Ok(())
    }
}
