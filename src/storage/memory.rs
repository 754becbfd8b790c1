// In-process map store. Ephemeral: everything is lost on process exit.
//
// State lives behind a single async RwLock, so every mutation (including the
// check-then-write paths for likes and connections) runs under one write
// guard and is atomic with respect to other tasks on the same store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

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

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    posts: BTreeMap<i64, Post>,
    comments: BTreeMap<i64, Comment>,
    likes: BTreeMap<i64, Like>,
    events: BTreeMap<i64, Event>,
    groups: BTreeMap<i64, Group>,
    group_members: BTreeMap<i64, GroupMember>,
    connections: BTreeMap<i64, Connection>,

    user_seq: i64,
    post_seq: i64,
    comment_seq: i64,
    like_seq: i64,
    event_seq: i64,
    group_seq: i64,
    group_member_seq: i64,
    connection_seq: i64,
}

fn next_id(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    // =========== User operations ===========

    async fn get_user(&self, id: i64) -> AppResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|user| user.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let mut tables = self.tables.write().await;

        if tables
            .users
            .values()
            .any(|u| u.username.eq_ignore_ascii_case(&user.username))
        {
            return Err(AppError::Conflict(format!(
                "Username {} is already taken",
                user.username
            )));
        }
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(AppError::Conflict(format!(
                "Email {} is already registered",
                user.email
            )));
        }

        let id = next_id(&mut tables.user_seq);
        let record = User {
            id,
            username: user.username,
            password: user.password,
            full_name: user.full_name,
            email: user.email,
            profile_image: user.profile_image,
            cover_image: user.cover_image,
            bio: user.bio,
            location: user.location,
            occupation: user.occupation,
            join_date: Utc::now(),
        };
        tables.users.insert(id, record.clone());
        Ok(record)
    }

    async fn update_user(&self, id: i64, patch: UserPatch) -> AppResult<User> {
        let mut tables = self.tables.write().await;

        // A missing id is NotFound even when the patch would also conflict.
        if !tables.users.contains_key(&id) {
            return Err(AppError::NotFound(format!("User {} not found", id)));
        }

        if let Some(ref username) = patch.username {
            if tables
                .users
                .values()
                .any(|u| u.id != id && u.username.eq_ignore_ascii_case(username))
            {
                return Err(AppError::Conflict(format!(
                    "Username {} is already taken",
                    username
                )));
            }
        }
        if let Some(ref email) = patch.email {
            if tables
                .users
                .values()
                .any(|u| u.id != id && u.email == *email)
            {
                return Err(AppError::Conflict(format!(
                    "Email {} is already registered",
                    email
                )));
            }
        }

        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", id)))?;

        if let Some(username) = patch.username {
            user.username = username;
        }
        if let Some(password) = patch.password {
            user.password = password;
        }
        if let Some(full_name) = patch.full_name {
            user.full_name = full_name;
        }
        if let Some(email) = patch.email {
            user.email = email;
        }
        if let Some(profile_image) = patch.profile_image {
            user.profile_image = Some(profile_image);
        }
        if let Some(cover_image) = patch.cover_image {
            user.cover_image = Some(cover_image);
        }
        if let Some(bio) = patch.bio {
            user.bio = Some(bio);
        }
        if let Some(location) = patch.location {
            user.location = Some(location);
        }
        if let Some(occupation) = patch.occupation {
            user.occupation = Some(occupation);
        }

        Ok(user.clone())
    }

    async fn get_all_users(&self) -> AppResult<Vec<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().cloned().collect())
    }

    // =========== Post operations ===========

    async fn create_post(&self, post: NewPost) -> AppResult<Post> {
        let mut tables = self.tables.write().await;
        let id = next_id(&mut tables.post_seq);
        let record = Post {
            id,
            user_id: post.user_id,
            content: post.content,
            images: post.images,
            visibility: post.visibility.unwrap_or_else(|| "public".to_string()),
            created_at: Utc::now(),
        };
        tables.posts.insert(id, record.clone());
        Ok(record)
    }

    async fn get_post(&self, id: i64) -> AppResult<Option<Post>> {
        let tables = self.tables.read().await;
        Ok(tables.posts.get(&id).cloned())
    }

    async fn get_all_posts(&self) -> AppResult<Vec<Post>> {
        let tables = self.tables.read().await;
        let mut posts: Vec<Post> = tables.posts.values().cloned().collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(posts)
    }

    async fn get_posts_by_user_id(&self, user_id: i64) -> AppResult<Vec<Post>> {
        let tables = self.tables.read().await;
        let mut posts: Vec<Post> = tables
            .posts
            .values()
            .filter(|post| post.user_id == user_id)
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(posts)
    }

    // =========== Comment operations ===========

    async fn create_comment(&self, comment: NewComment) -> AppResult<Comment> {
        let mut tables = self.tables.write().await;
        let id = next_id(&mut tables.comment_seq);
        let record = Comment {
            id,
            post_id: comment.post_id,
            user_id: comment.user_id,
            content: comment.content,
            parent_id: comment.parent_id,
            created_at: Utc::now(),
        };
        tables.comments.insert(id, record.clone());
        Ok(record)
    }

    async fn get_comment(&self, id: i64) -> AppResult<Option<Comment>> {
        let tables = self.tables.read().await;
        Ok(tables.comments.get(&id).cloned())
    }

    async fn get_comments_by_post_id(&self, post_id: i64) -> AppResult<Vec<CommentWithAuthor>> {
        let tables = self.tables.read().await;
        let mut comments: Vec<Comment> = tables
            .comments
            .values()
            .filter(|comment| comment.post_id == post_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        Ok(comments
            .into_iter()
            .map(|comment| {
                let user = tables.users.get(&comment.user_id).map(UserSummary::from);
                CommentWithAuthor { comment, user }
            })
            .collect())
    }

    // =========== Like operations ===========

    async fn create_like(&self, like: NewLike) -> AppResult<Like> {
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables
            .likes
            .values()
            .find(|l| l.post_id == like.post_id && l.user_id == like.user_id)
        {
            return Ok(existing.clone());
        }

        let id = next_id(&mut tables.like_seq);
        let record = Like {
            id,
            post_id: like.post_id,
            user_id: like.user_id,
            kind: like.kind.unwrap_or_else(|| DEFAULT_LIKE_TYPE.to_string()),
            created_at: Utc::now(),
        };
        tables.likes.insert(id, record.clone());
        Ok(record)
    }

    async fn get_like(&self, id: i64) -> AppResult<Option<Like>> {
        let tables = self.tables.read().await;
        Ok(tables.likes.get(&id).cloned())
    }

    async fn get_likes_by_post_id(&self, post_id: i64) -> AppResult<Vec<Like>> {
        let tables = self.tables.read().await;
        Ok(tables
            .likes
            .values()
            .filter(|like| like.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn get_like_count_by_post_id(&self, post_id: i64) -> AppResult<i64> {
        let tables = self.tables.read().await;
        Ok(tables
            .likes
            .values()
            .filter(|like| like.post_id == post_id)
            .count() as i64)
    }

    async fn user_liked_post(&self, post_id: i64, user_id: i64) -> AppResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .likes
            .values()
            .any(|like| like.post_id == post_id && like.user_id == user_id))
    }

    async fn delete_like(&self, post_id: i64, user_id: i64) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        let existing = tables
            .likes
            .values()
            .find(|like| like.post_id == post_id && like.user_id == user_id)
            .map(|like| like.id);
        if let Some(id) = existing {
            tables.likes.remove(&id);
        }
        Ok(())
    }

    // =========== Event operations ===========

    async fn create_event(&self, event: NewEvent) -> AppResult<Event> {
        let mut tables = self.tables.write().await;
        let id = next_id(&mut tables.event_seq);
        let record = Event {
            id,
            title: event.title,
            description: event.description,
            location: event.location,
            date: event.date,
            end_date: event.end_date,
            image: event.image,
            created_by: event.created_by,
            created_at: Utc::now(),
        };
        tables.events.insert(id, record.clone());
        Ok(record)
    }

    async fn get_event(&self, id: i64) -> AppResult<Option<Event>> {
        let tables = self.tables.read().await;
        Ok(tables.events.get(&id).cloned())
    }

    async fn get_all_events(&self) -> AppResult<Vec<Event>> {
        let tables = self.tables.read().await;
        let mut events: Vec<Event> = tables.events.values().cloned().collect();
        events.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn get_upcoming_events(&self) -> AppResult<Vec<Event>> {
        let now = Utc::now();
        let tables = self.tables.read().await;
        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|event| event.date > now)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        events.truncate(UPCOMING_EVENTS_LIMIT);
        Ok(events)
    }

    // =========== Group operations ===========

    async fn create_group(&self, group: NewGroup) -> AppResult<Group> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();

        let id = next_id(&mut tables.group_seq);
        let record = Group {
            id,
            name: group.name,
            description: group.description,
            image: group.image,
            created_by: group.created_by,
            member_count: 1,
            created_at: now,
        };
        tables.groups.insert(id, record.clone());

        // Creator joins as admin under the same write guard, so the count
        // and the membership row can never diverge.
        let member_id = next_id(&mut tables.group_member_seq);
        tables.group_members.insert(
            member_id,
            GroupMember {
                id: member_id,
                group_id: id,
                user_id: record.created_by,
                role: GROUP_ADMIN_ROLE.to_string(),
                joined_at: now,
            },
        );

        Ok(record)
    }

    async fn get_group(&self, id: i64) -> AppResult<Option<Group>> {
        let tables = self.tables.read().await;
        Ok(tables.groups.get(&id).cloned())
    }

    async fn get_all_groups(&self) -> AppResult<Vec<Group>> {
        let tables = self.tables.read().await;
        Ok(tables.groups.values().cloned().collect())
    }

    // =========== Group member operations ===========

    async fn add_group_member(&self, member: NewGroupMember) -> AppResult<GroupMember> {
        let mut tables = self.tables.write().await;

        if !tables.groups.contains_key(&member.group_id) {
            return Err(AppError::NotFound(format!(
                "Group {} not found",
                member.group_id
            )));
        }

        let id = next_id(&mut tables.group_member_seq);
        let record = GroupMember {
            id,
            group_id: member.group_id,
            user_id: member.user_id,
            role: member.role.unwrap_or_else(|| GROUP_MEMBER_ROLE.to_string()),
            joined_at: Utc::now(),
        };
        tables.group_members.insert(id, record.clone());

        if let Some(group) = tables.groups.get_mut(&member.group_id) {
            group.member_count += 1;
        }

        Ok(record)
    }

    async fn get_group_members(&self, group_id: i64) -> AppResult<Vec<GroupMember>> {
        let tables = self.tables.read().await;
        Ok(tables
            .group_members
            .values()
            .filter(|member| member.group_id == group_id)
            .cloned()
            .collect())
    }

    // =========== Connection operations ===========

    async fn create_connection(&self, connection: NewConnection) -> AppResult<Connection> {
        let mut tables = self.tables.write().await;

        // Dedup over the unordered pair, regardless of direction.
        if let Some(existing) = tables.connections.values().find(|c| {
            (c.requester_id == connection.requester_id
                && c.addressee_id == connection.addressee_id)
                || (c.requester_id == connection.addressee_id
                    && c.addressee_id == connection.requester_id)
        }) {
            return Ok(existing.clone());
        }

        let id = next_id(&mut tables.connection_seq);
        let record = Connection {
            id,
            requester_id: connection.requester_id,
            addressee_id: connection.addressee_id,
            status: CONNECTION_PENDING.to_string(),
            created_at: Utc::now(),
        };
        tables.connections.insert(id, record.clone());
        Ok(record)
    }

    async fn get_connection(&self, id: i64) -> AppResult<Option<Connection>> {
        let tables = self.tables.read().await;
        Ok(tables.connections.get(&id).cloned())
    }

    async fn get_user_connections(&self, user_id: i64) -> AppResult<Vec<Connection>> {
        let tables = self.tables.read().await;
        Ok(tables
            .connections
            .values()
            .filter(|c| c.requester_id == user_id || c.addressee_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_connection_status(&self, id: i64, status: &str) -> AppResult<Connection> {
        let mut tables = self.tables.write().await;
        let connection = tables
            .connections
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Connection {} not found", id)))?;
        connection.status = status.to_string();
        Ok(connection.clone())
    }
}
