//! PostgreSQL-backed store behaviour against a live database.
//!
//! Each test migrates a throwaway schema and drops it afterwards.
//! Run with: DATABASE_URL=postgres://... cargo test -p noor-storage --test pg_store -- --ignored

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use noor_core::{
    utc_day_bounds, Adjudication, Decision, FlagStatus, NewReview, NewUser, ReviewStatus, Role,
    User, UserProgress,
};
use noor_storage::{PgReviewStore, ReviewStore};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use uuid::Uuid;

struct TestDb {
    admin: PgPool,
    schema: String,
    store: PgReviewStore,
}

impl TestDb {
    async fn open() -> Option<Self> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL is not set; skipping");
            return None;
        };
        let admin = PgPool::connect(&url).await.expect("connect");
        let schema = format!("noor_store_{}", Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE SCHEMA {schema}"))
            .execute(&admin)
            .await
            .expect("create schema");

        let options = url
            .parse::<PgConnectOptions>()
            .expect("parse DATABASE_URL")
            .options([("search_path", schema.as_str())]);
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .expect("connect to test schema");
        let store = PgReviewStore::new(pool);
        store.migrate().await.expect("migrate");
        Some(Self { admin, schema, store })
    }

    async fn close(self) {
        self.store.pool().close().await;
        sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.schema))
            .execute(&self.admin)
            .await
            .expect("drop schema");
    }
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, day, hour, 0, 0).single().unwrap()
}

async fn register(store: &PgReviewStore, uid: &str, role: Role) -> User {
    store
        .upsert_user(NewUser {
            firebase_uid: uid.into(),
            email: format!("{uid}@example.org"),
            display_name: None,
            role,
            created_at: at(1, 0),
        })
        .await
        .expect("register")
}

fn review(user_id: Uuid, status: ReviewStatus, feedback: Option<&str>, when: DateTime<Utc>) -> NewReview {
    NewReview {
        user_id,
        surah_number: 36,
        ayah_number: 1,
        translation_source: "sahih-international".into(),
        translation_text: "Ya, Seen.".into(),
        status,
        confidence: 6,
        feedback: feedback.map(str::to_string),
        suggested_edit: feedback.map(|f| format!("e:{f}")),
        created_at: when,
    }
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn progress_upsert_matches_the_in_process_rollup() {
    let Some(db) = TestDb::open().await else { return };
    let reviewer = register(&db.store, "rev", Role::Reviewer).await;

    let script = [
        (ReviewStatus::Approved, at(1, 8)),
        (ReviewStatus::Flagged, at(1, 17)),
        (ReviewStatus::NeedsReview, at(3, 9)),
        (ReviewStatus::Approved, at(4, 0)),
        (ReviewStatus::Approved, at(4, 23)),
    ];
    let mut expected = UserProgress::empty(reviewer.id);
    let mut streaks = Vec::new();
    let mut longest = 0;
    for (status, when) in script {
        let recorded = db
            .store
            .record_review(review(reviewer.id, status, Some("note"), when))
            .await
            .unwrap();
        expected.record(status, when);
        assert_eq!(recorded.progress, expected);
        assert!(recorded.progress.longest_streak >= longest);
        longest = recorded.progress.longest_streak;
        streaks.push(recorded.progress.current_streak);
    }

    assert_eq!(streaks, vec![1, 1, 2, 3, 3]);
    let stored = db.store.user_progress(reviewer.id).await.unwrap().unwrap();
    assert_eq!(stored.total_reviews, 5);
    assert_eq!(stored.approved_reviews, 3);
    assert_eq!(stored.flagged_reviews, 1);
    assert_eq!(db.store.count_reviews_by_user(reviewer.id).await.unwrap(), 5);

    db.close().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn flags_from_two_reviewers_collapse_into_one_row() {
    let Some(db) = TestDb::open().await else { return };
    let a = register(&db.store, "a", Role::Reviewer).await;
    let b = register(&db.store, "b", Role::Reviewer).await;

    let first = db
        .store
        .record_review(review(a.id, ReviewStatus::Flagged, Some("one"), at(2, 8)))
        .await
        .unwrap()
        .flag
        .unwrap();
    let second = db
        .store
        .record_review(review(b.id, ReviewStatus::Flagged, Some("two"), at(2, 9)))
        .await
        .unwrap()
        .flag
        .unwrap();
    let approved = db
        .store
        .record_review(review(b.id, ReviewStatus::Approved, None, at(2, 10)))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.flag_count, 2);
    assert_eq!(second.total_reviews, 2);
    assert_eq!(second.common_issues, vec!["one", "two"]);
    assert_eq!(second.suggested_edits, vec!["e:one", "e:two"]);
    assert_eq!(second.status, FlagStatus::Pending);
    assert!(approved.flag.is_none());

    assert_eq!(db.store.count_flags(None).await.unwrap(), 1);
    assert_eq!(db.store.count_flags(Some(FlagStatus::Pending)).await.unwrap(), 1);
    let queue = db.store.list_flags(None, 10, 0).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0], second);

    db.close().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn re_adjudication_is_audited_in_order() {
    let Some(db) = TestDb::open().await else { return };
    let reviewer = register(&db.store, "rev", Role::Reviewer).await;
    let moderator = register(&db.store, "mod", Role::Moderator).await;
    let flag_id = db
        .store
        .record_review(review(reviewer.id, ReviewStatus::Flagged, Some("typo"), at(2, 8)))
        .await
        .unwrap()
        .flag
        .unwrap()
        .id;

    let steps = [
        (Decision::Rejected, at(2, 10), None),
        (Decision::Confirmed, at(2, 10), None),
        (Decision::Corrected, at(2, 11), Some("Ya Seen.")),
    ];
    for (decision, when, corrected) in steps {
        db.store
            .adjudicate_flag(Adjudication {
                flagged_translation_id: flag_id,
                decision,
                admin_notes: Some("checked".into()),
                corrected_text: corrected.map(str::to_string),
                processed_by: moderator.id,
                processed_at: when,
            })
            .await
            .unwrap()
            .expect("flag exists");
    }

    let history: Vec<_> = db
        .store
        .adjudication_history(flag_id)
        .await
        .unwrap()
        .into_iter()
        .map(|a| (a.previous_status, a.decision))
        .collect();
    assert_eq!(
        history,
        vec![
            (FlagStatus::Pending, FlagStatus::Rejected),
            (FlagStatus::Rejected, FlagStatus::Confirmed),
            (FlagStatus::Confirmed, FlagStatus::Corrected),
        ]
    );

    let flag = db.store.find_flag(flag_id).await.unwrap().unwrap();
    assert_eq!(flag.status, FlagStatus::Corrected);
    assert_eq!(flag.corrected_text.as_deref(), Some("Ya Seen."));
    assert_eq!(flag.processed_by, Some(moderator.id));
    assert_eq!(flag.processed_at, Some(at(2, 11)));

    let (start, end) = utc_day_bounds(NaiveDate::from_ymd_opt(2026, 5, 2).unwrap());
    assert_eq!(db.store.count_flags_processed_between(start, end).await.unwrap(), 1);

    let missing = db
        .store
        .adjudicate_flag(Adjudication {
            flagged_translation_id: Uuid::new_v4(),
            decision: Decision::Rejected,
            admin_notes: None,
            corrected_text: None,
            processed_by: moderator.id,
            processed_at: at(2, 12),
        })
        .await
        .unwrap();
    assert!(missing.is_none());

    db.close().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn re_registration_keeps_role_and_progress() {
    let Some(db) = TestDb::open().await else { return };
    let first = register(&db.store, "uid-1", Role::Moderator).await;
    db.store
        .record_review(review(first.id, ReviewStatus::Approved, None, at(1, 9)))
        .await
        .unwrap();

    let again = db
        .store
        .upsert_user(NewUser {
            firebase_uid: "uid-1".into(),
            email: "new@example.org".into(),
            display_name: Some("Amina".into()),
            role: Role::Reviewer,
            created_at: at(2, 0),
        })
        .await
        .unwrap();

    assert_eq!(again.id, first.id);
    assert_eq!(again.role, Role::Moderator);
    assert_eq!(again.email, "new@example.org");
    assert_eq!(again.display_name.as_deref(), Some("Amina"));
    let progress = db.store.user_progress(first.id).await.unwrap().unwrap();
    assert_eq!(progress.total_reviews, 1);

    let lookup = db.store.find_user_by_firebase_uid("uid-1").await.unwrap();
    assert_eq!(lookup, Some(again));

    db.close().await;
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL
async fn daily_metrics_round_trip_and_overwrite() {
    let Some(db) = TestDb::open().await else { return };
    let reviewer = register(&db.store, "rev", Role::Reviewer).await;
    db.store
        .record_review(review(reviewer.id, ReviewStatus::Flagged, Some("x"), at(1, 23)))
        .await
        .unwrap();
    let mut later = review(reviewer.id, ReviewStatus::Approved, None, at(2, 1));
    later.ayah_number = 2;
    db.store.record_review(later).await.unwrap();

    let day = NaiveDate::from_ymd_opt(2026, 5, 2).unwrap();
    let counts = db.store.daily_review_counts(day).await.unwrap();
    assert_eq!(counts.total_reviews, 1);
    assert_eq!(counts.approved, 1);
    assert_eq!(counts.flagged, 0);
    assert_eq!(counts.distinct_ayahs_to_date, 2);

    let metrics = counts.into_metrics(day);
    db.store.save_metrics(&metrics).await.unwrap();
    assert_eq!(db.store.metrics_for(day).await.unwrap(), Some(metrics.clone()));

    let mut revised = metrics.clone();
    revised.total_reviews = 7;
    db.store.save_metrics(&revised).await.unwrap();
    assert_eq!(db.store.metrics_for(day).await.unwrap(), Some(revised));

    db.close().await;
}
