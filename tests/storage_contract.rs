// Contract tests for the storage layer.
//
// Every property is written once against `&dyn Storage` and exercised
// against the in-memory store unconditionally. The same suite runs against
// Postgres when TEST_DATABASE_URL is set (ignored by default since it needs
// a live database):
//
//   TEST_DATABASE_URL=postgres://... cargo test -- --ignored

use std::time::Duration;

use chrono::Utc;
use saini_connect::error::AppError;
use saini_connect::models::{
    NewComment, NewConnection, NewEvent, NewGroup, NewGroupMember, NewLike, NewPost, NewUser, Post,
    User, UserPatch,
};
use saini_connect::storage::{MemoryStorage, PostgresStorage, Storage, UPCOMING_EVENTS_LIMIT};

fn new_user(tag: &str) -> NewUser {
    NewUser {
        username: format!("user_{}", tag),
        password: "hashed-password".to_string(),
        full_name: format!("User {}", tag),
        email: format!("{}@example.com", tag),
        profile_image: None,
        cover_image: None,
        bio: None,
        location: None,
        occupation: None,
    }
}

async fn seed_user(storage: &dyn Storage, tag: &str) -> User {
    storage.create_user(new_user(tag)).await.unwrap()
}

async fn seed_post(storage: &dyn Storage, user_id: i64, content: &str) -> Post {
    storage
        .create_post(NewPost {
            user_id,
            content: content.to_string(),
            images: vec![],
            visibility: None,
        })
        .await
        .unwrap()
}

fn new_event(created_by: i64, title: &str, date: chrono::DateTime<Utc>) -> NewEvent {
    NewEvent {
        title: title.to_string(),
        description: "desc".to_string(),
        location: "somewhere".to_string(),
        date,
        end_date: None,
        image: None,
        created_by,
    }
}

// Let server-assigned timestamps advance between inserts so ordering
// assertions are deterministic.
async fn tick() {
    tokio::time::sleep(Duration::from_millis(3)).await;
}

// =========== Suite: properties shared by both implementations ===========

async fn like_dedup_is_idempotent(storage: &dyn Storage) {
    let author = seed_user(storage, "like_author").await;
    let liker = seed_user(storage, "like_liker").await;
    let post = seed_post(storage, author.id, "a post").await;

    let first = storage
        .create_like(NewLike {
            post_id: post.id,
            user_id: liker.id,
            kind: None,
        })
        .await
        .unwrap();
    assert_eq!(first.kind, "like");

    for _ in 0..3 {
        let again = storage
            .create_like(NewLike {
                post_id: post.id,
                user_id: liker.id,
                kind: Some("love".to_string()),
            })
            .await
            .unwrap();
        // The pre-existing record comes back unchanged.
        assert_eq!(again, first);
    }

    let likes = storage.get_likes_by_post_id(post.id).await.unwrap();
    assert_eq!(likes.len(), 1);
    assert_eq!(storage.get_like_count_by_post_id(post.id).await.unwrap(), 1);
    assert!(storage.user_liked_post(post.id, liker.id).await.unwrap());
    assert_eq!(
        storage.get_like(first.id).await.unwrap().as_ref(),
        Some(&first)
    );
}

async fn unlike_then_relike(storage: &dyn Storage) {
    let author = seed_user(storage, "relike_author").await;
    let post = seed_post(storage, author.id, "a post").await;

    let original = storage
        .create_like(NewLike {
            post_id: post.id,
            user_id: author.id,
            kind: None,
        })
        .await
        .unwrap();

    storage.delete_like(post.id, author.id).await.unwrap();
    assert!(!storage.user_liked_post(post.id, author.id).await.unwrap());
    assert_eq!(storage.get_like_count_by_post_id(post.id).await.unwrap(), 0);

    // Deleting an absent like is a no-op, not an error.
    storage.delete_like(post.id, author.id).await.unwrap();

    let fresh = storage
        .create_like(NewLike {
            post_id: post.id,
            user_id: author.id,
            kind: None,
        })
        .await
        .unwrap();
    assert_ne!(fresh.id, original.id, "ids are never reused");
    assert!(storage.user_liked_post(post.id, author.id).await.unwrap());
    assert_eq!(storage.get_like_count_by_post_id(post.id).await.unwrap(), 1);
}

// Interleave like and unlike on the same (post, user) pair. Whatever the
// interleaving, no call errors and the store ends up with zero or one row
// that agrees with user_liked_post.
async fn concurrent_like_and_unlike_stay_consistent(storage: &dyn Storage) {
    let user = seed_user(storage, "churn").await;
    let post = seed_post(storage, user.id, "churned post").await;

    for _ in 0..10 {
        let (liked, unliked) = tokio::join!(
            storage.create_like(NewLike {
                post_id: post.id,
                user_id: user.id,
                kind: None,
            }),
            storage.delete_like(post.id, user.id),
        );
        liked.unwrap();
        unliked.unwrap();
    }

    let count = storage.get_like_count_by_post_id(post.id).await.unwrap();
    assert!(count <= 1, "dedup must hold through the churn, got {}", count);
    assert_eq!(
        storage.user_liked_post(post.id, user.id).await.unwrap(),
        count == 1
    );
}

async fn connection_dedup_over_unordered_pair(storage: &dyn Storage) {
    let a = seed_user(storage, "conn_a").await;
    let b = seed_user(storage, "conn_b").await;

    let first = storage
        .create_connection(NewConnection {
            requester_id: a.id,
            addressee_id: b.id,
        })
        .await
        .unwrap();
    assert_eq!(first.status, "pending");
    assert_eq!(first.requester_id, a.id);

    // Same pair, reversed direction: the original row comes back unchanged.
    let reversed = storage
        .create_connection(NewConnection {
            requester_id: b.id,
            addressee_id: a.id,
        })
        .await
        .unwrap();
    assert_eq!(reversed, first);

    let of_a = storage.get_user_connections(a.id).await.unwrap();
    let of_b = storage.get_user_connections(b.id).await.unwrap();
    assert_eq!(of_a, vec![first.clone()]);
    assert_eq!(of_b, vec![first.clone()]);

    let accepted = storage
        .update_connection_status(first.id, "accepted")
        .await
        .unwrap();
    assert_eq!(accepted.status, "accepted");
    assert_eq!(
        storage
            .get_connection(first.id)
            .await
            .unwrap()
            .unwrap()
            .status,
        "accepted"
    );
}

async fn member_count_matches_memberships(storage: &dyn Storage) {
    let creator = seed_user(storage, "group_creator").await;
    let group = storage
        .create_group(NewGroup {
            name: "Test Group".to_string(),
            description: None,
            image: None,
            created_by: creator.id,
        })
        .await
        .unwrap();
    assert_eq!(group.member_count, 1);

    let members = storage.get_group_members(group.id).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].user_id, creator.id);
    assert_eq!(members[0].role, "admin");

    let extra = 3;
    for i in 0..extra {
        let user = seed_user(storage, &format!("group_member_{}", i)).await;
        let member = storage
            .add_group_member(NewGroupMember {
                group_id: group.id,
                user_id: user.id,
                role: None,
            })
            .await
            .unwrap();
        assert_eq!(member.role, "member");
    }

    let reloaded = storage.get_group(group.id).await.unwrap().unwrap();
    assert_eq!(reloaded.member_count, 1 + extra);
    let members = storage.get_group_members(group.id).await.unwrap();
    assert_eq!(members.len() as i32, 1 + extra);
}

async fn posts_are_newest_first(storage: &dyn Storage) {
    let user = seed_user(storage, "post_order").await;
    let first = seed_post(storage, user.id, "first").await;
    tick().await;
    let second = seed_post(storage, user.id, "second").await;
    tick().await;
    let third = seed_post(storage, user.id, "third").await;

    let all = storage.get_all_posts().await.unwrap();
    assert!(all
        .windows(2)
        .all(|pair| pair[0].created_at >= pair[1].created_at));

    let mine = storage.get_posts_by_user_id(user.id).await.unwrap();
    assert_eq!(
        mine.iter().map(|p| p.id).collect::<Vec<_>>(),
        vec![third.id, second.id, first.id]
    );
}

async fn comments_are_oldest_first_with_author(storage: &dyn Storage) {
    let author = seed_user(storage, "comment_author").await;
    let post = seed_post(storage, author.id, "a post").await;

    let first = storage
        .create_comment(NewComment {
            post_id: post.id,
            user_id: author.id,
            content: "first".to_string(),
            parent_id: None,
        })
        .await
        .unwrap();
    tick().await;
    let reply = storage
        .create_comment(NewComment {
            post_id: post.id,
            user_id: author.id,
            content: "reply".to_string(),
            parent_id: Some(first.id),
        })
        .await
        .unwrap();

    assert_eq!(
        storage.get_comment(reply.id).await.unwrap().unwrap().parent_id,
        Some(first.id)
    );

    let comments = storage.get_comments_by_post_id(post.id).await.unwrap();
    assert_eq!(
        comments.iter().map(|c| c.comment.id).collect::<Vec<_>>(),
        vec![first.id, reply.id]
    );
    for comment in &comments {
        let user = comment.user.as_ref().expect("author projection attached");
        assert_eq!(user.id, author.id);
        assert_eq!(user.username, author.username);
        assert_eq!(user.full_name, author.full_name);
    }
}

async fn events_ordered_and_upcoming_capped(storage: &dyn Storage) {
    let user = seed_user(storage, "event_creator").await;
    let now = Utc::now();

    // One past event plus four future ones, created out of order.
    let past = storage
        .create_event(new_event(user.id, "past", now - chrono::Duration::hours(1)))
        .await
        .unwrap();
    let in_3d = storage
        .create_event(new_event(user.id, "in 3 days", now + chrono::Duration::days(3)))
        .await
        .unwrap();
    let in_1d = storage
        .create_event(new_event(user.id, "in 1 day", now + chrono::Duration::days(1)))
        .await
        .unwrap();
    let in_7d = storage
        .create_event(new_event(user.id, "in 7 days", now + chrono::Duration::days(7)))
        .await
        .unwrap();
    let in_2d = storage
        .create_event(new_event(user.id, "in 2 days", now + chrono::Duration::days(2)))
        .await
        .unwrap();

    let all = storage.get_all_events().await.unwrap();
    assert!(all.windows(2).all(|pair| pair[0].date <= pair[1].date));
    assert!(all.iter().any(|e| e.id == past.id));

    // Strictly-future filter, nearest first, capped to the limit.
    let upcoming = storage.get_upcoming_events().await.unwrap();
    assert_eq!(upcoming.len(), UPCOMING_EVENTS_LIMIT);
    assert_eq!(
        upcoming.iter().map(|e| e.id).collect::<Vec<_>>(),
        vec![in_1d.id, in_2d.id, in_3d.id]
    );
    assert!(upcoming.iter().all(|e| e.id != past.id && e.id != in_7d.id));

    assert_eq!(
        storage.get_event(in_1d.id).await.unwrap().unwrap().title,
        "in 1 day"
    );
}

async fn upcoming_excludes_events_dated_now(storage: &dyn Storage) {
    let user = seed_user(storage, "boundary_creator").await;
    let now = Utc::now();

    // The filter is strict: an event dated at or before the store's clock
    // never shows up. The clock has advanced past the captured instant by
    // the time the query runs, so the at-now event sits on the excluded
    // side of the boundary.
    let at_now = storage
        .create_event(new_event(user.id, "right now", now))
        .await
        .unwrap();
    let just_ahead = storage
        .create_event(new_event(
            user.id,
            "moments away",
            now + chrono::Duration::minutes(5),
        ))
        .await
        .unwrap();

    let upcoming = storage.get_upcoming_events().await.unwrap();
    assert!(
        upcoming.len() < UPCOMING_EVENTS_LIMIT,
        "cap must not be what hides the at-now event"
    );
    assert!(upcoming.iter().all(|e| e.id != at_now.id));
    assert!(upcoming.iter().any(|e| e.id == just_ahead.id));

    // Still listed, just not upcoming.
    let all = storage.get_all_events().await.unwrap();
    assert!(all.iter().any(|e| e.id == at_now.id));
}

async fn updates_on_missing_ids_are_not_found(storage: &dyn Storage) {
    let patch = UserPatch {
        bio: Some("new bio".to_string()),
        ..UserPatch::default()
    };
    match storage.update_user(999_999, patch).await {
        Err(AppError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {:?}", other.map(|u| u.id)),
    }

    // Missing id wins even when the patch collides with a live user.
    let taken = seed_user(storage, "missing_patch").await;
    let patch = UserPatch {
        username: Some(taken.username.clone()),
        email: Some(taken.email.clone()),
        ..UserPatch::default()
    };
    match storage.update_user(999_999, patch).await {
        Err(AppError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {:?}", other.map(|u| u.id)),
    }

    match storage.update_connection_status(999_999, "accepted").await {
        Err(AppError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {:?}", other.map(|c| c.id)),
    }
}

async fn user_lookup_and_uniqueness(storage: &dyn Storage) {
    let user = seed_user(storage, "unique_one").await;

    // Case-insensitive exact match.
    let found = storage
        .get_user_by_username("USER_UNIQUE_ONE")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, user.id);
    assert!(storage
        .get_user_by_username("user_unique_on")
        .await
        .unwrap()
        .is_none());

    // Duplicate username (any case) is rejected, not silently stored.
    let mut dup = new_user("unique_two");
    dup.username = "User_Unique_One".to_string();
    match storage.create_user(dup).await {
        Err(AppError::Conflict(_)) => {}
        other => panic!("expected Conflict, got {:?}", other.map(|u| u.id)),
    }

    // Duplicate email too.
    let mut dup = new_user("unique_three");
    dup.email = "unique_one@example.com".to_string();
    match storage.create_user(dup).await {
        Err(AppError::Conflict(_)) => {}
        other => panic!("expected Conflict, got {:?}", other.map(|u| u.id)),
    }

    let users = storage.get_all_users().await.unwrap();
    assert_eq!(
        users.iter().filter(|u| u.id == user.id).count(),
        1,
        "exactly one user with this id"
    );
}

async fn update_user_is_partial(storage: &dyn Storage) {
    let user = seed_user(storage, "patch_target").await;

    let updated = storage
        .update_user(
            user.id,
            UserPatch {
                bio: Some("Updated bio".to_string()),
                location: Some("Jaipur".to_string()),
                ..UserPatch::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.bio.as_deref(), Some("Updated bio"));
    assert_eq!(updated.location.as_deref(), Some("Jaipur"));
    // Untouched fields survive.
    assert_eq!(updated.username, user.username);
    assert_eq!(updated.email, user.email);
    assert_eq!(updated.full_name, user.full_name);
    assert_eq!(updated.join_date, user.join_date);

    let reloaded = storage.get_user(user.id).await.unwrap().unwrap();
    assert_eq!(reloaded, updated);
}

// =========== Memory store ===========

#[tokio::test]
async fn memory_like_dedup_is_idempotent() {
    like_dedup_is_idempotent(&MemoryStorage::new()).await;
}

#[tokio::test]
async fn memory_unlike_then_relike() {
    unlike_then_relike(&MemoryStorage::new()).await;
}

#[tokio::test]
async fn memory_connection_dedup_over_unordered_pair() {
    connection_dedup_over_unordered_pair(&MemoryStorage::new()).await;
}

#[tokio::test]
async fn memory_member_count_matches_memberships() {
    member_count_matches_memberships(&MemoryStorage::new()).await;
}

#[tokio::test]
async fn memory_posts_are_newest_first() {
    posts_are_newest_first(&MemoryStorage::new()).await;
}

#[tokio::test]
async fn memory_comments_are_oldest_first_with_author() {
    comments_are_oldest_first_with_author(&MemoryStorage::new()).await;
}

#[tokio::test]
async fn memory_events_ordered_and_upcoming_capped() {
    events_ordered_and_upcoming_capped(&MemoryStorage::new()).await;
}

#[tokio::test]
async fn memory_upcoming_excludes_events_dated_now() {
    upcoming_excludes_events_dated_now(&MemoryStorage::new()).await;
}

#[tokio::test]
async fn memory_concurrent_like_and_unlike_stay_consistent() {
    concurrent_like_and_unlike_stay_consistent(&MemoryStorage::new()).await;
}

#[tokio::test]
async fn memory_updates_on_missing_ids_are_not_found() {
    updates_on_missing_ids_are_not_found(&MemoryStorage::new()).await;
}

#[tokio::test]
async fn memory_user_lookup_and_uniqueness() {
    user_lookup_and_uniqueness(&MemoryStorage::new()).await;
}

#[tokio::test]
async fn memory_update_user_is_partial() {
    update_user_is_partial(&MemoryStorage::new()).await;
}

#[tokio::test]
async fn memory_ids_start_at_one_and_increment() {
    let storage = MemoryStorage::new();
    let first = seed_user(&storage, "seq_a").await;
    let second = seed_user(&storage, "seq_b").await;
    assert_eq!(first.id, 1);
    assert_eq!(second.id, 2);

    let post = seed_post(&storage, first.id, "first post").await;
    assert_eq!(post.id, 1, "each entity kind has its own counter");
}

#[tokio::test]
async fn memory_stores_are_isolated() {
    let a = MemoryStorage::new();
    let b = MemoryStorage::new();
    seed_user(&a, "only_in_a").await;
    assert!(b.get_all_users().await.unwrap().is_empty());
}

// =========== Postgres store ===========
//
// The identical suite against the relational implementation. Needs a live
// database and wipes it, hence ignored by default.

#[tokio::test]
#[ignore]
async fn postgres_contract_suite() {
    let url = std::env::var("TEST_DATABASE_URL")
        .expect("set TEST_DATABASE_URL to run the Postgres contract suite");
    let mut config = saini_connect::config::Config::from_env();
    config.database_url = Some(url);

    let storage = PostgresStorage::connect(&config).await.unwrap();
    storage.reset().await.unwrap();

    like_dedup_is_idempotent(&storage).await;
    unlike_then_relike(&storage).await;
    concurrent_like_and_unlike_stay_consistent(&storage).await;
    connection_dedup_over_unordered_pair(&storage).await;
    member_count_matches_memberships(&storage).await;
    posts_are_newest_first(&storage).await;
    comments_are_oldest_first_with_author(&storage).await;
    events_ordered_and_upcoming_capped(&storage).await;
    updates_on_missing_ids_are_not_found(&storage).await;
    user_lookup_and_uniqueness(&storage).await;
    update_user_is_partial(&storage).await;

    // The boundary check asserts on counts below the upcoming cap, so it
    // needs a table without the events seeded above.
    storage.reset().await.unwrap();
    upcoming_excludes_events_dated_now(&storage).await;
}
