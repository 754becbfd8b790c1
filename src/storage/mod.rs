// Storage layer - the one contract both backing stores must satisfy.
//
// Route handlers only ever see `Arc<dyn Storage>`; whether the records live
// in process-local maps or in Postgres must be unobservable to them.

mod memory;
mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::{
    Comment, CommentWithAuthor, Connection, Event, Group, GroupMember, Like, NewComment,
    NewConnection, NewEvent, NewGroup, NewGroupMember, NewLike, NewPost, NewUser, Post, User,
    UserPatch,
};

/// Both stores return at most this many events from `get_upcoming_events`.
/// The front end only renders the nearest three; applying the cap in the
/// store keeps the two implementations observationally identical.
pub const UPCOMING_EVENTS_LIMIT: usize = 3;

/// Reaction recorded when a like carries no explicit type.
pub const DEFAULT_LIKE_TYPE: &str = "like";

/// Role given to a group's creator on auto-enrollment.
pub const GROUP_ADMIN_ROLE: &str = "admin";

/// Role given to members added without an explicit role.
pub const GROUP_MEMBER_ROLE: &str = "member";

/// Initial status of a freshly created connection.
pub const CONNECTION_PENDING: &str = "pending";

/// Uniform contract over the two backing stores.
///
/// Error conventions:
/// - read-by-id returns `Ok(None)` for a missing record, never an error;
/// - update-by-id on a missing record fails with `AppError::NotFound`;
/// - duplicate likes and duplicate connections are soft conflicts: the
///   existing record is returned unchanged and nothing is written;
/// - duplicate username/email on user creation fails with
///   `AppError::Conflict`.
#[async_trait]
pub trait Storage: Send + Sync {
    // User operations
    async fn get_user(&self, id: i64) -> AppResult<Option<User>>;
    /// Case-insensitive exact match on username.
    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>>;
    async fn create_user(&self, user: NewUser) -> AppResult<User>;
    async fn update_user(&self, id: i64, patch: UserPatch) -> AppResult<User>;
    async fn get_all_users(&self) -> AppResult<Vec<User>>;

    // Post operations
    async fn create_post(&self, post: NewPost) -> AppResult<Post>;
    async fn get_post(&self, id: i64) -> AppResult<Option<Post>>;
    /// Newest first (`created_at` descending, id descending on ties).
    async fn get_all_posts(&self) -> AppResult<Vec<Post>>;
    /// Newest first, restricted to one author.
    async fn get_posts_by_user_id(&self, user_id: i64) -> AppResult<Vec<Post>>;

    // Comment operations
    async fn create_comment(&self, comment: NewComment) -> AppResult<Comment>;
    async fn get_comment(&self, id: i64) -> AppResult<Option<Comment>>;
    /// Oldest first, each comment carrying its author projection.
    async fn get_comments_by_post_id(&self, post_id: i64) -> AppResult<Vec<CommentWithAuthor>>;

    // Like operations
    /// Idempotent: a second like for the same (post, user) pair returns the
    /// existing record and writes nothing.
    async fn create_like(&self, like: NewLike) -> AppResult<Like>;
    async fn get_like(&self, id: i64) -> AppResult<Option<Like>>;
    async fn get_likes_by_post_id(&self, post_id: i64) -> AppResult<Vec<Like>>;
    async fn get_like_count_by_post_id(&self, post_id: i64) -> AppResult<i64>;
    async fn user_liked_post(&self, post_id: i64, user_id: i64) -> AppResult<bool>;
    /// No-op if the like does not exist.
    async fn delete_like(&self, post_id: i64, user_id: i64) -> AppResult<()>;

    // Event operations
    async fn create_event(&self, event: NewEvent) -> AppResult<Event>;
    async fn get_event(&self, id: i64) -> AppResult<Option<Event>>;
    /// Soonest first (`date` ascending).
    async fn get_all_events(&self) -> AppResult<Vec<Event>>;
    /// Events strictly after now, soonest first, capped to
    /// [`UPCOMING_EVENTS_LIMIT`].
    async fn get_upcoming_events(&self) -> AppResult<Vec<Event>>;

    // Group operations
    /// Creates the group with `member_count` 1 and the creator enrolled as
    /// an admin member, atomically.
    async fn create_group(&self, group: NewGroup) -> AppResult<Group>;
    async fn get_group(&self, id: i64) -> AppResult<Option<Group>>;
    async fn get_all_groups(&self) -> AppResult<Vec<Group>>;

    // Group member operations
    /// Inserts the membership and increments the group's `member_count` in
    /// the same atomic unit. Fails NotFound if the group does not exist.
    async fn add_group_member(&self, member: NewGroupMember) -> AppResult<GroupMember>;
    async fn get_group_members(&self, group_id: i64) -> AppResult<Vec<GroupMember>>;

    // Connection operations
    /// Idempotent over the unordered pair: if a connection already exists in
    /// either direction it is returned unchanged, otherwise a new one is
    /// created with status "pending".
    async fn create_connection(&self, connection: NewConnection) -> AppResult<Connection>;
    async fn get_connection(&self, id: i64) -> AppResult<Option<Connection>>;
    /// Connections where the user is requester or addressee.
    async fn get_user_connections(&self, user_id: i64) -> AppResult<Vec<Connection>>;
    async fn update_connection_status(&self, id: i64, status: &str) -> AppResult<Connection>;
}
