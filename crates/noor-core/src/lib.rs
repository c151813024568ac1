//! Core domain model and review/flag transition rules for Noor.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "noor-core";

/// Number of ayahs in the Quran; denominator for completion percentages.
pub const TOTAL_AYAHS: u32 = 6236;
pub const SURAH_COUNT: i32 = 114;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Moderator,
    Reviewer,
}

string_enum!(Role, "role", {
    Admin => "ADMIN",
    Moderator => "MODERATOR",
    Reviewer => "REVIEWER",
});

impl Role {
    /// Admins and moderators may adjudicate flags and see platform-wide rollups.
    pub fn can_adjudicate(&self) -> bool {
        matches!(self, Self::Admin | Self::Moderator)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Approved,
    Flagged,
    NeedsReview,
}

string_enum!(ReviewStatus, "review status", {
    Approved => "APPROVED",
    Flagged => "FLAGGED",
    NeedsReview => "NEEDS_REVIEW",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagStatus {
    Pending,
    Confirmed,
    Rejected,
    Corrected,
}

string_enum!(FlagStatus, "flag status", {
    Pending => "PENDING",
    Confirmed => "CONFIRMED",
    Rejected => "REJECTED",
    Corrected => "CORRECTED",
});

/// Outcome a moderator or admin can assign to a flagged translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Confirmed,
    Rejected,
    Corrected,
}

impl From<Decision> for FlagStatus {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Confirmed => FlagStatus::Confirmed,
            Decision::Rejected => FlagStatus::Rejected,
            Decision::Corrected => FlagStatus::Corrected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub firebase_uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub firebase_uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Per-user review rollup. `approved_reviews + flagged_reviews <= total_reviews` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub user_id: Uuid,
    pub total_reviews: i32,
    pub approved_reviews: i32,
    pub flagged_reviews: i32,
    pub current_streak: i32,
    pub longest_streak: i32,
    pub last_review_date: Option<DateTime<Utc>>,
}

impl UserProgress {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            total_reviews: 0,
            approved_reviews: 0,
            flagged_reviews: 0,
            current_streak: 0,
            longest_streak: 0,
            last_review_date: None,
        }
    }

    /// True when `at` falls on a different UTC calendar day than the last review.
    pub fn is_new_day(&self, at: DateTime<Utc>) -> bool {
        match self.last_review_date {
            Some(last) => last.date_naive() != at.date_naive(),
            None => true,
        }
    }

    /// Apply one review submission to the rollup.
    pub fn record(&mut self, status: ReviewStatus, at: DateTime<Utc>) {
        if self.is_new_day(at) {
            self.current_streak += 1;
        }
        self.longest_streak = self.longest_streak.max(self.current_streak);

        self.total_reviews += 1;
        match status {
            ReviewStatus::Approved => self.approved_reviews += 1,
            ReviewStatus::Flagged => self.flagged_reviews += 1,
            ReviewStatus::NeedsReview => {}
        }
        self.last_review_date = Some(at);
    }
}

/// Review fact ready to be persisted for an already-resolved reviewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReview {
    pub user_id: Uuid,
    pub surah_number: i32,
    pub ayah_number: i32,
    pub translation_source: String,
    pub translation_text: String,
    pub status: ReviewStatus,
    pub confidence: i32,
    pub feedback: Option<String>,
    pub suggested_edit: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewReview {
    pub fn flag_key(&self) -> FlagKey {
        FlagKey {
            surah_number: self.surah_number,
            ayah_number: self.ayah_number,
            translation_source: self.translation_source.clone(),
        }
    }

    /// Feedback worth recording on a flag aggregate; blank strings count as absent.
    pub fn issue(&self) -> Option<&str> {
        present(self.feedback.as_deref())
    }

    pub fn edit(&self) -> Option<&str> {
        present(self.suggested_edit.as_deref())
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationReview {
    pub id: Uuid,
    pub user_id: Uuid,
    pub surah_number: i32,
    pub ayah_number: i32,
    pub translation_source: String,
    pub translation_text: String,
    pub status: ReviewStatus,
    pub confidence: i32,
    pub feedback: Option<String>,
    pub suggested_edit: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TranslationReview {
    pub fn from_new(id: Uuid, review: NewReview) -> Self {
        Self {
            id,
            user_id: review.user_id,
            surah_number: review.surah_number,
            ayah_number: review.ayah_number,
            translation_source: review.translation_source,
            translation_text: review.translation_text,
            status: review.status,
            confidence: review.confidence,
            feedback: review.feedback,
            suggested_edit: review.suggested_edit,
            created_at: review.created_at,
        }
    }
}

/// Aggregate key identifying one flaggable translation instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagKey {
    pub surah_number: i32,
    pub ayah_number: i32,
    pub translation_source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedTranslation {
    pub id: Uuid,
    pub surah_number: i32,
    pub ayah_number: i32,
    pub translation_source: String,
    pub translation_text: String,
    pub flag_count: i32,
    pub total_reviews: i32,
    pub common_issues: Vec<String>,
    pub suggested_edits: Vec<String>,
    pub status: FlagStatus,
    pub admin_notes: Option<String>,
    pub corrected_text: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlaggedTranslation {
    /// Aggregate created by the first flag for its key.
    pub fn first_flag(id: Uuid, review: &NewReview) -> Self {
        Self {
            id,
            surah_number: review.surah_number,
            ayah_number: review.ayah_number,
            translation_source: review.translation_source.clone(),
            translation_text: review.translation_text.clone(),
            flag_count: 1,
            total_reviews: 1,
            common_issues: review.issue().map(str::to_string).into_iter().collect(),
            suggested_edits: review.edit().map(str::to_string).into_iter().collect(),
            status: FlagStatus::Pending,
            admin_notes: None,
            corrected_text: None,
            processed_at: None,
            processed_by: None,
            created_at: review.created_at,
            updated_at: review.created_at,
        }
    }

    /// Fold a subsequent flag for the same key into the aggregate. Status is left untouched.
    pub fn absorb_flag(&mut self, review: &NewReview) {
        self.flag_count += 1;
        self.total_reviews += 1;
        if let Some(issue) = review.issue() {
            self.common_issues.push(issue.to_string());
        }
        if let Some(edit) = review.edit() {
            self.suggested_edits.push(edit.to_string());
        }
        self.updated_at = review.created_at;
    }

    pub fn apply(&mut self, adjudication: &Adjudication) {
        self.status = adjudication.decision.into();
        self.admin_notes = adjudication.admin_notes.clone();
        self.corrected_text = adjudication.corrected_text.clone();
        self.processed_at = Some(adjudication.processed_at);
        self.processed_by = Some(adjudication.processed_by);
        self.updated_at = adjudication.processed_at;
    }
}

/// A moderator/admin decision on one flagged translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjudication {
    pub flagged_translation_id: Uuid,
    pub decision: Decision,
    pub admin_notes: Option<String>,
    pub corrected_text: Option<String>,
    pub processed_by: Uuid,
    pub processed_at: DateTime<Utc>,
}

/// Audit row kept for every adjudication, including revisions of earlier decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagAdjudication {
    pub id: Uuid,
    pub flagged_translation_id: Uuid,
    pub previous_status: FlagStatus,
    pub decision: FlagStatus,
    pub admin_notes: Option<String>,
    pub corrected_text: Option<String>,
    pub processed_by: Uuid,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewMetrics {
    pub date: NaiveDate,
    pub total_reviews: i32,
    pub approved_count: i32,
    pub flagged_count: i32,
    pub completion_percentage: f64,
}

impl ReviewMetrics {
    pub fn zeroed(date: NaiveDate) -> Self {
        Self {
            date,
            total_reviews: 0,
            approved_count: 0,
            flagged_count: 0,
            completion_percentage: 0.0,
        }
    }
}

/// Raw counts a store reports for one UTC day, before snapshotting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DailyReviewCounts {
    pub total_reviews: i64,
    pub approved: i64,
    pub flagged: i64,
    /// Distinct (surah, ayah) pairs reviewed up to the end of the day.
    pub distinct_ayahs_to_date: i64,
}

impl DailyReviewCounts {
    pub fn into_metrics(self, date: NaiveDate) -> ReviewMetrics {
        ReviewMetrics {
            date,
            total_reviews: saturating_i32(self.total_reviews),
            approved_count: saturating_i32(self.approved),
            flagged_count: saturating_i32(self.flagged),
            completion_percentage: completion_percentage(self.distinct_ayahs_to_date),
        }
    }
}

fn saturating_i32(value: i64) -> i32 {
    value.clamp(0, i32::MAX as i64) as i32
}

pub fn completion_percentage(distinct_ayahs: i64) -> f64 {
    let ratio = distinct_ayahs.max(0) as f64 / TOTAL_AYAHS as f64;
    (ratio * 100.0).min(100.0)
}

/// Half-open `[start, end)` bounds of a UTC calendar day.
pub fn utc_day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}
