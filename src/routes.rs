// REST API over the storage contract.
//
// Handlers never depend on which backing store is active: everything goes
// through `Arc<dyn Storage>`. The password field never leaves this layer;
// every user-bearing response goes out as `PublicUser`.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::Json,
    routing::{get, patch, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::auth::{self, SessionStore};
use crate::error::{AppError, AppResult};
use crate::models::{
    Comment, CommentWithAuthor, Connection, Event, Group, GroupMember, Like, NewComment,
    NewConnection, NewEvent, NewGroup, NewGroupMember, NewLike, NewPost, NewUser, Post, PublicUser,
    User, UserPatch,
};
use crate::storage::Storage;

/// At most this many people are proposed on the "suggested" endpoint.
const SUGGESTED_USERS_LIMIT: usize = 5;

const CONNECTION_STATUSES: [&str; 3] = ["pending", "accepted", "declined"];

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub sessions: SessionStore,
}

// API request/response types

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    username: String,
    password: String,
    email: String,
    full_name: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct AuthResponse {
    token: String,
    user: PublicUser,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePostRequest {
    content: String,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    visibility: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCommentRequest {
    content: String,
    #[serde(default)]
    parent_id: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEventRequest {
    title: String,
    description: String,
    location: String,
    date: DateTime<Utc>,
    #[serde(default)]
    end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateConnectionRequest {
    addressee_id: i64,
}

#[derive(Deserialize)]
struct UpdateConnectionRequest {
    status: String,
}

// Authentication plumbing

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Extractor for the logged-in user; rejects with 401 when the bearer token
/// is missing or no longer maps to a live session.
pub struct AuthUser(pub User);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
        let user_id = state
            .sessions
            .user_id(token)
            .await
            .ok_or_else(|| AppError::Unauthorized("Invalid or expired session".to_string()))?;
        let user = state
            .storage
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::Unauthorized("Session user no longer exists".to_string()))?;
        Ok(AuthUser(user))
    }
}

// Auth handlers

async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    if request.username.trim().is_empty()
        || request.password.is_empty()
        || request.email.trim().is_empty()
        || request.full_name.trim().is_empty()
    {
        return Err(AppError::Validation(
            "username, password, email and fullName are required".to_string(),
        ));
    }

    if state
        .storage
        .get_user_by_username(&request.username)
        .await?
        .is_some()
    {
        return Err(AppError::BadRequest("Username is already taken".to_string()));
    }

    let password = auth::hash_password(&request.password)?;
    let user = state
        .storage
        .create_user(NewUser {
            username: request.username,
            password,
            full_name: request.full_name,
            email: request.email,
            profile_image: None,
            cover_image: None,
            bio: None,
            location: None,
            occupation: None,
        })
        .await?;

    info!("Registered user {} ({})", user.username, user.id);
    let token = state.sessions.create(user.id).await;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: user.into(),
        }),
    ))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let user = state
        .storage
        .get_user_by_username(&request.username)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Incorrect username or password".to_string()))?;

    if !auth::verify_password(&request.password, &user.password) {
        return Err(AppError::Unauthorized(
            "Incorrect username or password".to_string(),
        ));
    }

    let token = state.sessions.create(user.id).await;
    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> AppResult<StatusCode> {
    let token = bearer_token(&headers)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
    state.sessions.revoke(token).await;
    Ok(StatusCode::NO_CONTENT)
}

// User handlers

async fn get_me(AuthUser(user): AuthUser) -> Json<PublicUser> {
    Json(user.into())
}

async fn update_me(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
    Json(mut patch): Json<UserPatch>,
) -> AppResult<Json<PublicUser>> {
    if let Some(password) = patch.password.take() {
        patch.password = Some(auth::hash_password(&password)?);
    }
    let updated = state.storage.update_user(user.id, patch).await?;
    Ok(Json(updated.into()))
}

async fn list_users(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<PublicUser>>> {
    let users = state.storage.get_all_users().await?;
    Ok(Json(users.into_iter().map(PublicUser::from).collect()))
}

async fn suggested_users(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Vec<PublicUser>>> {
    let connections = state.storage.get_user_connections(user.id).await?;
    let connected: Vec<i64> = connections
        .iter()
        .map(|c| {
            if c.requester_id == user.id {
                c.addressee_id
            } else {
                c.requester_id
            }
        })
        .collect();

    let users = state.storage.get_all_users().await?;
    Ok(Json(
        users
            .into_iter()
            .filter(|u| u.id != user.id && !connected.contains(&u.id))
            .take(SUGGESTED_USERS_LIMIT)
            .map(PublicUser::from)
            .collect(),
    ))
}

async fn get_user_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<PublicUser>> {
    let user = state
        .storage
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;
    Ok(Json(user.into()))
}

async fn my_posts(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Vec<Post>>> {
    Ok(Json(state.storage.get_posts_by_user_id(user.id).await?))
}

async fn user_posts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<Post>>> {
    if state.storage.get_user(id).await?.is_none() {
        return Err(AppError::NotFound(format!("User {} not found", id)));
    }
    Ok(Json(state.storage.get_posts_by_user_id(id).await?))
}

// Post handlers

async fn list_posts(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Post>>> {
    Ok(Json(state.storage.get_all_posts().await?))
}

async fn create_post(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreatePostRequest>,
) -> AppResult<(StatusCode, Json<Post>)> {
    if request.content.trim().is_empty() {
        return Err(AppError::Validation("content is required".to_string()));
    }
    let post = state
        .storage
        .create_post(NewPost {
            user_id: user.id,
            content: request.content,
            images: request.images,
            visibility: request.visibility,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(post)))
}

// Comment handlers

async fn list_comments(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<i64>,
) -> AppResult<Json<Vec<CommentWithAuthor>>> {
    if state.storage.get_post(post_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Post {} not found", post_id)));
    }
    Ok(Json(state.storage.get_comments_by_post_id(post_id).await?))
}

async fn create_comment(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<i64>,
    Json(request): Json<CreateCommentRequest>,
) -> AppResult<(StatusCode, Json<Comment>)> {
    if request.content.trim().is_empty() {
        return Err(AppError::Validation("content is required".to_string()));
    }
    if state.storage.get_post(post_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Post {} not found", post_id)));
    }
    let comment = state
        .storage
        .create_comment(NewComment {
            post_id,
            user_id: user.id,
            content: request.content,
            parent_id: request.parent_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

// Like handlers

async fn like_count(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    let count = state.storage.get_like_count_by_post_id(post_id).await?;
    Ok(Json(json!({ "count": count })))
}

async fn my_like(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    let liked = state.storage.user_liked_post(post_id, user.id).await?;
    Ok(Json(json!({ "liked": liked })))
}

async fn like_post(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<i64>,
) -> AppResult<(StatusCode, Json<Like>)> {
    if state.storage.get_post(post_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Post {} not found", post_id)));
    }
    let like = state
        .storage
        .create_like(NewLike {
            post_id,
            user_id: user.id,
            kind: None,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(like)))
}

async fn unlike_post(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<i64>,
) -> AppResult<StatusCode> {
    state.storage.delete_like(post_id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Event handlers

async fn list_events(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Event>>> {
    Ok(Json(state.storage.get_all_events().await?))
}

async fn upcoming_events(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Event>>> {
    Ok(Json(state.storage.get_upcoming_events().await?))
}

async fn create_event(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateEventRequest>,
) -> AppResult<(StatusCode, Json<Event>)> {
    if request.title.trim().is_empty() || request.location.trim().is_empty() {
        return Err(AppError::Validation(
            "title and location are required".to_string(),
        ));
    }
    let event = state
        .storage
        .create_event(NewEvent {
            title: request.title,
            description: request.description,
            location: request.location,
            date: request.date,
            end_date: request.end_date,
            image: request.image,
            created_by: user.id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

// Group handlers

async fn list_groups(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Group>>> {
    Ok(Json(state.storage.get_all_groups().await?))
}

async fn create_group(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateGroupRequest>,
) -> AppResult<(StatusCode, Json<Group>)> {
    if request.name.trim().is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    let group = state
        .storage
        .create_group(NewGroup {
            name: request.name,
            description: request.description,
            image: request.image,
            created_by: user.id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn list_group_members(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<i64>,
) -> AppResult<Json<Vec<GroupMember>>> {
    if state.storage.get_group(group_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Group {} not found", group_id)));
    }
    Ok(Json(state.storage.get_group_members(group_id).await?))
}

async fn join_group(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<i64>,
) -> AppResult<(StatusCode, Json<GroupMember>)> {
    let members = state.storage.get_group_members(group_id).await?;
    if members.iter().any(|m| m.user_id == user.id) {
        return Err(AppError::BadRequest(
            "Already a member of this group".to_string(),
        ));
    }
    let member = state
        .storage
        .add_group_member(NewGroupMember {
            group_id,
            user_id: user.id,
            role: None,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(member)))
}

// Connection handlers

async fn list_my_connections(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<Vec<Connection>>> {
    Ok(Json(state.storage.get_user_connections(user.id).await?))
}

async fn create_connection(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateConnectionRequest>,
) -> AppResult<(StatusCode, Json<Connection>)> {
    if request.addressee_id == user.id {
        return Err(AppError::BadRequest(
            "Cannot connect with yourself".to_string(),
        ));
    }
    if state.storage.get_user(request.addressee_id).await?.is_none() {
        return Err(AppError::NotFound(format!(
            "User {} not found",
            request.addressee_id
        )));
    }
    let connection = state
        .storage
        .create_connection(NewConnection {
            requester_id: user.id,
            addressee_id: request.addressee_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(connection)))
}

async fn update_connection(
    AuthUser(_user): AuthUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateConnectionRequest>,
) -> AppResult<Json<Connection>> {
    if !CONNECTION_STATUSES.contains(&request.status.as_str()) {
        return Err(AppError::Validation(format!(
            "Unknown connection status {:?}",
            request.status
        )));
    }
    let connection = state
        .storage
        .update_connection_status(id, &request.status)
        .await?;
    Ok(Json(connection))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/users", get(list_users))
        .route("/api/users/me", get(get_me).patch(update_me))
        .route("/api/users/me/posts", get(my_posts))
        .route("/api/users/suggested", get(suggested_users))
        .route("/api/users/{id}", get(get_user_by_id))
        .route("/api/users/{id}/posts", get(user_posts))
        .route("/api/posts", get(list_posts).post(create_post))
        .route(
            "/api/posts/{id}/comments",
            get(list_comments).post(create_comment),
        )
        .route("/api/posts/{id}/likes/count", get(like_count))
        .route("/api/posts/{id}/likes/me", get(my_like))
        .route(
            "/api/posts/{id}/likes",
            post(like_post).delete(unlike_post),
        )
        .route("/api/events", get(list_events).post(create_event))
        .route("/api/events/upcoming", get(upcoming_events))
        .route("/api/groups", get(list_groups).post(create_group))
        .route(
            "/api/groups/{id}/members",
            get(list_group_members).post(join_group),
        )
        .route(
            "/api/connections",
            get(list_my_connections).post(create_connection),
        )
        .route("/api/connections/{id}", patch(update_connection))
        .layer(
            ServiceBuilder::new().layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}
