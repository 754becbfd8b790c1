// Postgres implementation of the storage contract.
//
// Dedup invariants are enforced by the database itself: a unique index on
// likes(post_id, user_id) and a unique expression index over the unordered
// connection pair. Writes go through insert-on-conflict-do-nothing followed
// by a re-read, so concurrent duplicate writes collapse to a single row.
// member_count maintenance runs inside a transaction with the membership
// insert.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{
    Comment, CommentWithAuthor, Connection, Event, Group, GroupMember, Like, NewComment,
    NewConnection, NewEvent, NewGroup, NewGroupMember, NewLike, NewPost, NewUser, Post, User,
    UserPatch, UserSummary,
};
use crate::storage::{
    Storage, CONNECTION_PENDING, DEFAULT_LIKE_TYPE, GROUP_ADMIN_ROLE, GROUP_MEMBER_ROLE,
    UPCOMING_EVENTS_LIMIT,
};

pub struct PostgresStorage {
    pool: PgPool,
}

// Postgres SQLSTATE codes.
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

fn has_sqlstate(err: &sqlx::Error, code: &str) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .map(|c| c == code)
        .unwrap_or(false)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    has_sqlstate(err, UNIQUE_VIOLATION)
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    has_sqlstate(err, FOREIGN_KEY_VIOLATION)
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        password: row.get("password"),
        full_name: row.get("full_name"),
        email: row.get("email"),
        profile_image: row.get("profile_image"),
        cover_image: row.get("cover_image"),
        bio: row.get("bio"),
        location: row.get("location"),
        occupation: row.get("occupation"),
        join_date: row.get("join_date"),
    }
}

fn post_from_row(row: &PgRow) -> Post {
    Post {
        id: row.get("id"),
        user_id: row.get("user_id"),
        content: row.get("content"),
        images: row.get("images"),
        visibility: row.get("visibility"),
        created_at: row.get("created_at"),
    }
}

fn comment_from_row(row: &PgRow) -> Comment {
    Comment {
        id: row.get("id"),
        post_id: row.get("post_id"),
        user_id: row.get("user_id"),
        content: row.get("content"),
        parent_id: row.get("parent_id"),
        created_at: row.get("created_at"),
    }
}

fn like_from_row(row: &PgRow) -> Like {
    Like {
        id: row.get("id"),
        post_id: row.get("post_id"),
        user_id: row.get("user_id"),
        kind: row.get("kind"),
        created_at: row.get("created_at"),
    }
}

fn event_from_row(row: &PgRow) -> Event {
    Event {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        location: row.get("location"),
        date: row.get("date"),
        end_date: row.get("end_date"),
        image: row.get("image"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
    }
}

fn group_from_row(row: &PgRow) -> Group {
    Group {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        image: row.get("image"),
        created_by: row.get("created_by"),
        member_count: row.get("member_count"),
        created_at: row.get("created_at"),
    }
}

fn group_member_from_row(row: &PgRow) -> GroupMember {
    GroupMember {
        id: row.get("id"),
        group_id: row.get("group_id"),
        user_id: row.get("user_id"),
        role: row.get("role"),
        joined_at: row.get("joined_at"),
    }
}

fn connection_from_row(row: &PgRow) -> Connection {
    Connection {
        id: row.get("id"),
        requester_id: row.get("requester_id"),
        addressee_id: row.get("addressee_id"),
        status: row.get("status"),
        created_at: row.get("created_at"),
    }
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with the pool tuning from [`Config`].
    pub async fn connect(config: &Config) -> AppResult<Self> {
        let url = config.database_url.as_deref().ok_or_else(|| {
            AppError::ConfigurationError("DATABASE_URL is not configured".to_string())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .min_connections(config.db_min_connections)
            .acquire_timeout(std::time::Duration::from_secs(
                config.db_acquire_timeout_secs,
            ))
            .test_before_acquire(true)
            .connect(url)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to connect to database: {}", e))
            })?;

        Ok(Self::new(pool))
    }

    /// Health check to verify database connectivity.
    pub async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Database health check failed: {}", e)))?;
        Ok(())
    }

    /// Create the schema if it does not exist yet.
    pub async fn initialize(&self) -> AppResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGSERIAL PRIMARY KEY,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                full_name TEXT NOT NULL,
                email TEXT NOT NULL,
                profile_image TEXT,
                cover_image TEXT,
                bio TEXT,
                location TEXT,
                occupation TEXT,
                join_date TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_username_lower ON users (LOWER(username))",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users (email)",
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL REFERENCES users(id),
                content TEXT NOT NULL,
                images TEXT[] NOT NULL DEFAULT '{}',
                visibility TEXT NOT NULL DEFAULT 'public',
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_posts_user_created ON posts (user_id, created_at DESC)",
            r#"
            CREATE TABLE IF NOT EXISTS comments (
                id BIGSERIAL PRIMARY KEY,
                post_id BIGINT NOT NULL REFERENCES posts(id),
                user_id BIGINT NOT NULL REFERENCES users(id),
                content TEXT NOT NULL,
                parent_id BIGINT REFERENCES comments(id),
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_comments_post_created ON comments (post_id, created_at)",
            r#"
            CREATE TABLE IF NOT EXISTS likes (
                id BIGSERIAL PRIMARY KEY,
                post_id BIGINT NOT NULL REFERENCES posts(id),
                user_id BIGINT NOT NULL REFERENCES users(id),
                kind TEXT NOT NULL DEFAULT 'like',
                created_at TIMESTAMPTZ NOT NULL,
                UNIQUE (post_id, user_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id BIGSERIAL PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                location TEXT NOT NULL,
                date TIMESTAMPTZ NOT NULL,
                end_date TIMESTAMPTZ,
                image TEXT,
                created_by BIGINT NOT NULL REFERENCES users(id),
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_events_date ON events (date)",
            r#"
            CREATE TABLE IF NOT EXISTS groups (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                image TEXT,
                created_by BIGINT NOT NULL REFERENCES users(id),
                member_count INTEGER NOT NULL DEFAULT 1,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS group_members (
                id BIGSERIAL PRIMARY KEY,
                group_id BIGINT NOT NULL REFERENCES groups(id),
                user_id BIGINT NOT NULL REFERENCES users(id),
                role TEXT NOT NULL DEFAULT 'member',
                joined_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_group_members_group ON group_members (group_id)",
            r#"
            CREATE TABLE IF NOT EXISTS connections (
                id BIGSERIAL PRIMARY KEY,
                requester_id BIGINT NOT NULL REFERENCES users(id),
                addressee_id BIGINT NOT NULL REFERENCES users(id),
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_connections_pair
                ON connections (LEAST(requester_id, addressee_id), GREATEST(requester_id, addressee_id))
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(format!("Failed to initialize schema: {}", e))
                })?;
        }

        tracing::info!("Postgres schema initialized");
        Ok(())
    }

    /// Drop all tables and recreate the schema. Test support only.
    pub async fn reset(&self) -> AppResult<()> {
        for table in [
            "connections",
            "group_members",
            "groups",
            "events",
            "likes",
            "comments",
            "posts",
            "users",
        ] {
            sqlx::query(&format!("DROP TABLE IF EXISTS {} CASCADE", table))
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(format!("Failed to drop table {}: {}", table, e))
                })?;
        }
        self.initialize().await
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    // =========== User operations ===========

    async fn get_user(&self, id: i64) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to get user {}: {}", id, e)))?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE LOWER(username) = LOWER($1)")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to get user by username: {}", e))
            })?;
        Ok(row.as_ref().map(user_from_row))
    }

    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (username, password, full_name, email, profile_image,
                               cover_image, bio, location, occupation, join_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(&user.username)
        .bind(&user.password)
        .bind(&user.full_name)
        .bind(&user.email)
        .bind(&user.profile_image)
        .bind(&user.cover_image)
        .bind(&user.bio)
        .bind(&user.location)
        .bind(&user.occupation)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!(
                    "Username {} or email {} is already taken",
                    user.username, user.email
                ))
            } else {
                AppError::DatabaseError(format!("Failed to create user: {}", e))
            }
        })?;
        Ok(user_from_row(&row))
    }

    async fn update_user(&self, id: i64, patch: UserPatch) -> AppResult<User> {
        let row = sqlx::query(
            r#"
            UPDATE users SET
                username      = COALESCE($2, username),
                password      = COALESCE($3, password),
                full_name     = COALESCE($4, full_name),
                email         = COALESCE($5, email),
                profile_image = COALESCE($6, profile_image),
                cover_image   = COALESCE($7, cover_image),
                bio           = COALESCE($8, bio),
                location      = COALESCE($9, location),
                occupation    = COALESCE($10, occupation)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&patch.username)
        .bind(&patch.password)
        .bind(&patch.full_name)
        .bind(&patch.email)
        .bind(&patch.profile_image)
        .bind(&patch.cover_image)
        .bind(&patch.bio)
        .bind(&patch.location)
        .bind(&patch.occupation)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("Username or email is already taken".to_string())
            } else {
                AppError::DatabaseError(format!("Failed to update user {}: {}", id, e))
            }
        })?;

        match row {
            Some(row) => Ok(user_from_row(&row)),
            None => Err(AppError::NotFound(format!("User {} not found", id))),
        }
    }

    async fn get_all_users(&self) -> AppResult<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list users: {}", e)))?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    // =========== Post operations ===========

    async fn create_post(&self, post: NewPost) -> AppResult<Post> {
        let visibility = post.visibility.unwrap_or_else(|| "public".to_string());
        let row = sqlx::query(
            r#"
            INSERT INTO posts (user_id, content, images, visibility, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(post.user_id)
        .bind(&post.content)
        .bind(&post.images)
        .bind(&visibility)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::Validation(format!("Unknown user {}", post.user_id))
            } else {
                AppError::DatabaseError(format!("Failed to create post: {}", e))
            }
        })?;
        Ok(post_from_row(&row))
    }

    async fn get_post(&self, id: i64) -> AppResult<Option<Post>> {
        let row = sqlx::query("SELECT * FROM posts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to get post {}: {}", id, e)))?;
        Ok(row.as_ref().map(post_from_row))
    }

    async fn get_all_posts(&self) -> AppResult<Vec<Post>> {
        let rows = sqlx::query("SELECT * FROM posts ORDER BY created_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list posts: {}", e)))?;
        Ok(rows.iter().map(post_from_row).collect())
    }

    async fn get_posts_by_user_id(&self, user_id: i64) -> AppResult<Vec<Post>> {
        let rows =
            sqlx::query("SELECT * FROM posts WHERE user_id = $1 ORDER BY created_at DESC, id DESC")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(format!(
                        "Failed to list posts for user {}: {}",
                        user_id, e
                    ))
                })?;
        Ok(rows.iter().map(post_from_row).collect())
    }

    // =========== Comment operations ===========

    async fn create_comment(&self, comment: NewComment) -> AppResult<Comment> {
        let row = sqlx::query(
            r#"
            INSERT INTO comments (post_id, user_id, content, parent_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(comment.post_id)
        .bind(comment.user_id)
        .bind(&comment.content)
        .bind(comment.parent_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::Validation("Unknown post, user, or parent comment".to_string())
            } else {
                AppError::DatabaseError(format!("Failed to create comment: {}", e))
            }
        })?;
        Ok(comment_from_row(&row))
    }

    async fn get_comment(&self, id: i64) -> AppResult<Option<Comment>> {
        let row = sqlx::query("SELECT * FROM comments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to get comment {}: {}", id, e)))?;
        Ok(row.as_ref().map(comment_from_row))
    }

    async fn get_comments_by_post_id(&self, post_id: i64) -> AppResult<Vec<CommentWithAuthor>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.post_id, c.user_id, c.content, c.parent_id, c.created_at,
                   u.id AS author_id, u.username AS author_username,
                   u.full_name AS author_full_name, u.profile_image AS author_profile_image
            FROM comments c
            LEFT JOIN users u ON u.id = c.user_id
            WHERE c.post_id = $1
            ORDER BY c.created_at, c.id
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(format!(
                "Failed to list comments for post {}: {}",
                post_id, e
            ))
        })?;

        Ok(rows
            .iter()
            .map(|row| {
                let user = row
                    .get::<Option<i64>, _>("author_id")
                    .map(|author_id| UserSummary {
                        id: author_id,
                        username: row.get("author_username"),
                        full_name: row.get("author_full_name"),
                        profile_image: row.get("author_profile_image"),
                    });
                CommentWithAuthor {
                    comment: comment_from_row(row),
                    user,
                }
            })
            .collect())
    }

    // =========== Like operations ===========

    async fn create_like(&self, like: NewLike) -> AppResult<Like> {
        let kind = like.kind.unwrap_or_else(|| DEFAULT_LIKE_TYPE.to_string());

        // The unique index makes the insert race-safe; on conflict the
        // existing row wins and is re-read. A concurrent unlike can remove
        // that row between the two statements, so a missed re-read loops
        // back to the insert.
        loop {
            let inserted = sqlx::query(
                r#"
                INSERT INTO likes (post_id, user_id, kind, created_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (post_id, user_id) DO NOTHING
                RETURNING *
                "#,
            )
            .bind(like.post_id)
            .bind(like.user_id)
            .bind(&kind)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    AppError::Validation("Unknown post or user".to_string())
                } else {
                    AppError::DatabaseError(format!("Failed to create like: {}", e))
                }
            })?;

            if let Some(row) = inserted {
                return Ok(like_from_row(&row));
            }

            let row = sqlx::query("SELECT * FROM likes WHERE post_id = $1 AND user_id = $2")
                .bind(like.post_id)
                .bind(like.user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(format!("Failed to get existing like: {}", e))
                })?;
            if let Some(row) = row {
                return Ok(like_from_row(&row));
            }
        }
    }

    async fn get_like(&self, id: i64) -> AppResult<Option<Like>> {
        let row = sqlx::query("SELECT * FROM likes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to get like {}: {}", id, e)))?;
        Ok(row.as_ref().map(like_from_row))
    }

    async fn get_likes_by_post_id(&self, post_id: i64) -> AppResult<Vec<Like>> {
        let rows = sqlx::query("SELECT * FROM likes WHERE post_id = $1 ORDER BY id")
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to list likes for post {}: {}", post_id, e))
            })?;
        Ok(rows.iter().map(like_from_row).collect())
    }

    async fn get_like_count_by_post_id(&self, post_id: i64) -> AppResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM likes WHERE post_id = $1")
            .bind(post_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!(
                    "Failed to count likes for post {}: {}",
                    post_id, e
                ))
            })?;
        Ok(row.get("count"))
    }

    async fn user_liked_post(&self, post_id: i64, user_id: i64) -> AppResult<bool> {
        let row = sqlx::query("SELECT 1 FROM likes WHERE post_id = $1 AND user_id = $2")
            .bind(post_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to check like: {}", e)))?;
        Ok(row.is_some())
    }

    async fn delete_like(&self, post_id: i64, user_id: i64) -> AppResult<()> {
        sqlx::query("DELETE FROM likes WHERE post_id = $1 AND user_id = $2")
            .bind(post_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete like: {}", e)))?;
        Ok(())
    }

    // =========== Event operations ===========

    async fn create_event(&self, event: NewEvent) -> AppResult<Event> {
        let row = sqlx::query(
            r#"
            INSERT INTO events (title, description, location, date, end_date, image,
                                created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&event.title)
        .bind(&event.description)
        .bind(&event.location)
        .bind(event.date)
        .bind(event.end_date)
        .bind(&event.image)
        .bind(event.created_by)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::Validation(format!("Unknown user {}", event.created_by))
            } else {
                AppError::DatabaseError(format!("Failed to create event: {}", e))
            }
        })?;
        Ok(event_from_row(&row))
    }

    async fn get_event(&self, id: i64) -> AppResult<Option<Event>> {
        let row = sqlx::query("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to get event {}: {}", id, e)))?;
        Ok(row.as_ref().map(event_from_row))
    }

    async fn get_all_events(&self) -> AppResult<Vec<Event>> {
        let rows = sqlx::query("SELECT * FROM events ORDER BY date, id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list events: {}", e)))?;
        Ok(rows.iter().map(event_from_row).collect())
    }

    async fn get_upcoming_events(&self) -> AppResult<Vec<Event>> {
        let rows = sqlx::query("SELECT * FROM events WHERE date > $1 ORDER BY date, id LIMIT $2")
            .bind(Utc::now())
            .bind(UPCOMING_EVENTS_LIMIT as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to list upcoming events: {}", e))
            })?;
        Ok(rows.iter().map(event_from_row).collect())
    }

    // =========== Group operations ===========

    async fn create_group(&self, group: NewGroup) -> AppResult<Group> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to begin transaction: {}", e))
        })?;

        let row = sqlx::query(
            r#"
            INSERT INTO groups (name, description, image, created_by, member_count, created_at)
            VALUES ($1, $2, $3, $4, 1, $5)
            RETURNING *
            "#,
        )
        .bind(&group.name)
        .bind(&group.description)
        .bind(&group.image)
        .bind(group.created_by)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::Validation(format!("Unknown user {}", group.created_by))
            } else {
                AppError::DatabaseError(format!("Failed to create group: {}", e))
            }
        })?;
        let created = group_from_row(&row);

        // Creator joins as admin in the same transaction, so member_count
        // and the membership rows can never diverge.
        sqlx::query(
            r#"
            INSERT INTO group_members (group_id, user_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(created.id)
        .bind(created.created_by)
        .bind(GROUP_ADMIN_ROLE)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to enroll group creator: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit transaction: {}", e)))?;

        Ok(created)
    }

    async fn get_group(&self, id: i64) -> AppResult<Option<Group>> {
        let row = sqlx::query("SELECT * FROM groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to get group {}: {}", id, e)))?;
        Ok(row.as_ref().map(group_from_row))
    }

    async fn get_all_groups(&self) -> AppResult<Vec<Group>> {
        let rows = sqlx::query("SELECT * FROM groups ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list groups: {}", e)))?;
        Ok(rows.iter().map(group_from_row).collect())
    }

    // =========== Group member operations ===========

    async fn add_group_member(&self, member: NewGroupMember) -> AppResult<GroupMember> {
        let role = member.role.unwrap_or_else(|| GROUP_MEMBER_ROLE.to_string());
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(format!("Failed to begin transaction: {}", e))
        })?;

        let updated = sqlx::query("UPDATE groups SET member_count = member_count + 1 WHERE id = $1")
            .bind(member.group_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to update group member count: {}", e))
            })?;
        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Group {} not found",
                member.group_id
            )));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO group_members (group_id, user_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(member.group_id)
        .bind(member.user_id)
        .bind(&role)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::Validation(format!("Unknown user {}", member.user_id))
            } else {
                AppError::DatabaseError(format!("Failed to add group member: {}", e))
            }
        })?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit transaction: {}", e)))?;

        Ok(group_member_from_row(&row))
    }

    async fn get_group_members(&self, group_id: i64) -> AppResult<Vec<GroupMember>> {
        let rows = sqlx::query("SELECT * FROM group_members WHERE group_id = $1 ORDER BY id")
            .bind(group_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!(
                    "Failed to list members of group {}: {}",
                    group_id, e
                ))
            })?;
        Ok(rows.iter().map(group_member_from_row).collect())
    }

    // =========== Connection operations ===========

    async fn create_connection(&self, connection: NewConnection) -> AppResult<Connection> {
        // The unique index over (LEAST, GREATEST) covers both directions;
        // on conflict the pre-existing row is returned unchanged.
        let inserted = sqlx::query(
            r#"
            INSERT INTO connections (requester_id, addressee_id, status, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (LEAST(requester_id, addressee_id), GREATEST(requester_id, addressee_id))
                DO NOTHING
            RETURNING *
            "#,
        )
        .bind(connection.requester_id)
        .bind(connection.addressee_id)
        .bind(CONNECTION_PENDING)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::Validation("Unknown requester or addressee".to_string())
            } else {
                AppError::DatabaseError(format!("Failed to create connection: {}", e))
            }
        })?;

        if let Some(row) = inserted {
            return Ok(connection_from_row(&row));
        }

        let row = sqlx::query(
            r#"
            SELECT * FROM connections
            WHERE (requester_id = $1 AND addressee_id = $2)
               OR (requester_id = $2 AND addressee_id = $1)
            "#,
        )
        .bind(connection.requester_id)
        .bind(connection.addressee_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(format!("Failed to get existing connection: {}", e))
        })?;
        Ok(connection_from_row(&row))
    }

    async fn get_connection(&self, id: i64) -> AppResult<Option<Connection>> {
        let row = sqlx::query("SELECT * FROM connections WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to get connection {}: {}", id, e))
            })?;
        Ok(row.as_ref().map(connection_from_row))
    }

    async fn get_user_connections(&self, user_id: i64) -> AppResult<Vec<Connection>> {
        let rows = sqlx::query(
            "SELECT * FROM connections WHERE requester_id = $1 OR addressee_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(format!(
                "Failed to list connections for user {}: {}",
                user_id, e
            ))
        })?;
        Ok(rows.iter().map(connection_from_row).collect())
    }

    async fn update_connection_status(&self, id: i64, status: &str) -> AppResult<Connection> {
        let row = sqlx::query("UPDATE connections SET status = $2 WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(status)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to update connection {}: {}", id, e))
            })?;

        match row {
            Some(row) => Ok(connection_from_row(&row)),
            None => Err(AppError::NotFound(format!("Connection {} not found", id))),
        }
    }
}
