// Password hashing and session management.
//
// Passwords are hashed here, in the route layer; the storage contract only
// ever sees the finished hash. Sessions are opaque bearer tokens held in an
// in-process map, created at login/register and dropped at logout. They
// share the lifetime of the process, same as the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// A malformed stored hash counts as a failed verification, not an error.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// In-process session registry: opaque token -> user id.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, i64>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, user_id: i64) -> String {
        let token = Uuid::new_v4().to_string();
        self.sessions
            .write()
            .await
            .insert(token.clone(), user_id);
        token
    }

    pub async fn user_id(&self, token: &str) -> Option<i64> {
        self.sessions.read().await.get(token).copied()
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_roundtrip() {
        let hash = hash_password("password123").unwrap();
        assert_ne!(hash, "password123");
        assert!(verify_password("password123", &hash));
        assert!(!verify_password("wrong-password", &hash));
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        assert!(!verify_password("password123", "not-a-phc-string"));
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let sessions = SessionStore::new();
        let token = sessions.create(7).await;
        assert_eq!(sessions.user_id(&token).await, Some(7));
        assert!(sessions.revoke(&token).await);
        assert_eq!(sessions.user_id(&token).await, None);
        assert!(!sessions.revoke(&token).await);
    }
}
