//! User and token storage.
//!
//! Backed by SQLite through sqlx; every query uses bound parameters.
//! Passwords are stored as base64(SHA-512(password ‖ salt)) with a random
//! per-user salt, tokens as base64(SHA-256(token)). All hash comparisons
//! run in constant time.

use std::path::Path;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256, Sha512};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use tracing::{debug, warn};

use otto_types::TokenId;

/// Symbols a password must draw its special character from.
const PASSWORD_SYMBOLS: &str = "$@!%*#?&";

/// Auth and user store errors. Variant names cross the RPC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
pub enum UserError {
    #[error("username is not a valid user id")]
    InvalidUserId,

    #[error("username already in use")]
    DuplicateUserId,

    #[error("password does not meet the requirements")]
    BadPassword,

    #[error("token not found")]
    TokenNotFound,

    #[error("user database failure")]
    BackendError,

    #[error("permission denied")]
    PermissionDenied,
}

impl UserError {
    pub fn name(&self) -> &'static str {
        match self {
            UserError::InvalidUserId => "InvalidUserId",
            UserError::DuplicateUserId => "DuplicateUserId",
            UserError::BadPassword => "BadPassword",
            UserError::TokenNotFound => "TokenNotFound",
            UserError::BackendError => "BackendError",
            UserError::PermissionDenied => "PermissionDenied",
        }
    }
}

/// Metadata of one issued token; the secret itself is never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub id: TokenId,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub device_name: String,
}

/// The user and token store.
pub struct UserManager {
    pool: SqlitePool,
}

impl UserManager {
    /// Open (or create) the user database at the given path.
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(db_path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let manager = Self { pool };
        manager.init_db().await?;
        Ok(manager)
    }

    /// An in-memory store, used by tests.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new().in_memory(true);
        // a second connection would see a different empty database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let manager = Self { pool };
        manager.init_db().await?;
        Ok(manager)
    }

    async fn init_db(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                salt TEXT NOT NULL,
                password_hash TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tokens (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                token_hash TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL,
                device_name TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All usernames, in their original case.
    pub async fn users(&self) -> Result<Vec<String>, UserError> {
        let rows = sqlx::query("SELECT username FROM users")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>("username").ok())
            .collect())
    }

    /// Create a user. The username must be email shaped, the password must
    /// pass the strength rule.
    pub async fn create_user(&self, username: &str, password: &str) -> Result<(), UserError> {
        if !validate_username(username) {
            warn!("Rejecting user creation, invalid username");
            return Err(UserError::InvalidUserId);
        }
        if !validate_password(password) {
            warn!("Rejecting user creation, password too weak");
            return Err(UserError::BadPassword);
        }

        let existing = sqlx::query("SELECT username FROM users WHERE lower(username) = lower(?1)")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        if existing.is_some() {
            warn!(username, "Username already in use");
            return Err(UserError::DuplicateUserId);
        }

        let salt = generate_salt();
        let password_hash = hash_password(password, &salt);
        sqlx::query("INSERT INTO users (username, salt, password_hash) VALUES (?1, ?2, ?3)")
            .bind(username)
            .bind(&salt)
            .bind(&password_hash)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        debug!(username, "User created");
        Ok(())
    }

    /// Remove a user and revoke all their tokens.
    pub async fn remove_user(&self, username: &str) -> Result<(), UserError> {
        let result = sqlx::query("DELETE FROM users WHERE lower(username) = lower(?1)")
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(UserError::InvalidUserId);
        }
        sqlx::query("DELETE FROM tokens WHERE lower(username) = lower(?1)")
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    /// Check the password and, on success, issue a fresh token for the
    /// given client device. Returns `None` on bad credentials.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        device_name: &str,
    ) -> Result<Option<String>, UserError> {
        if !validate_username(username) {
            warn!("Authentication failed, invalid username");
            return Ok(None);
        }

        let row = sqlx::query(
            "SELECT username, salt, password_hash FROM users WHERE lower(username) = lower(?1)",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        let Some(row) = row else {
            warn!("Authentication failed, no such user");
            return Ok(None);
        };

        let salt: String = row.try_get("salt").map_err(backend)?;
        let stored_hash: String = row.try_get("password_hash").map_err(backend)?;
        if !constant_time_eq(
            hash_password(password, &salt).as_bytes(),
            stored_hash.as_bytes(),
        ) {
            warn!(username, "Authentication failed, wrong password");
            return Ok(None);
        }

        let stored_username: String = row.try_get("username").map_err(backend)?;
        let token = self.issue_token(&stored_username, device_name).await?;
        Ok(Some(token))
    }

    /// Issue a token without credentials, the final step of a successful
    /// push-button transaction.
    pub async fn create_push_button_token(
        &self,
        device_name: &str,
    ) -> Result<String, UserError> {
        self.issue_token("", device_name).await
    }

    async fn issue_token(&self, username: &str, device_name: &str) -> Result<String, UserError> {
        let token = generate_token();
        let token_hash = hash_token(&token);
        sqlx::query(
            "INSERT INTO tokens (id, username, token_hash, created_at, device_name)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(TokenId::new().to_string())
        .bind(username)
        .bind(&token_hash)
        .bind(Utc::now().timestamp())
        .bind(device_name)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        debug!(username, device_name, "Token issued");
        Ok(token)
    }

    /// True if the presented token verifies against a stored token hash.
    pub async fn verify_token(&self, token: &str) -> bool {
        self.find_token_owner(token).await.is_some()
    }

    /// The username a token belongs to. Push-button tokens map to the
    /// empty username.
    pub async fn user_for_token(&self, token: &str) -> Option<String> {
        self.find_token_owner(token).await
    }

    async fn find_token_owner(&self, token: &str) -> Option<String> {
        if !validate_token(token) {
            warn!("Token failed character validation");
            return None;
        }
        let presented = hash_token(token);
        let rows = sqlx::query("SELECT username, token_hash FROM tokens")
            .fetch_all(&self.pool)
            .await
            .ok()?;
        for row in &rows {
            let stored: String = row.try_get("token_hash").ok()?;
            if constant_time_eq(presented.as_bytes(), stored.as_bytes()) {
                return row.try_get("username").ok();
            }
        }
        None
    }

    /// All token metadata for one user (case-insensitive lookup).
    pub async fn tokens(&self, username: &str) -> Result<Vec<TokenInfo>, UserError> {
        let rows = sqlx::query(
            "SELECT id, username, created_at, device_name FROM tokens
             WHERE lower(username) = lower(?1)",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut infos = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id").map_err(backend)?;
            let id = TokenId::parse(&id).map_err(|_| UserError::BackendError)?;
            let created_at: i64 = row.try_get("created_at").map_err(backend)?;
            infos.push(TokenInfo {
                id,
                username: row.try_get("username").map_err(backend)?,
                created_at: Utc
                    .timestamp_opt(created_at, 0)
                    .single()
                    .unwrap_or_else(Utc::now),
                device_name: row.try_get("device_name").map_err(backend)?,
            });
        }
        Ok(infos)
    }

    /// Revoke one token by its id.
    pub async fn remove_token(&self, token_id: TokenId) -> Result<(), UserError> {
        let result = sqlx::query("DELETE FROM tokens WHERE id = ?1")
            .bind(token_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() != 1 {
            warn!(%token_id, "Token not found");
            return Err(UserError::TokenNotFound);
        }
        debug!(%token_id, "Token removed");
        Ok(())
    }
}

fn backend(e: sqlx::Error) -> UserError {
    warn!(error = %e, "User database error");
    UserError::BackendError
}

/// Email-shaped: `local@domain.tld`, no control characters, no regex.
pub fn validate_username(username: &str) -> bool {
    if username.chars().any(|c| c.is_control()) {
        return false;
    }
    let mut parts = username.splitn(2, '@');
    let (Some(local), Some(domain)) = (parts.next(), parts.next()) else {
        return false;
    };
    let local_ok = !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_.+-".contains(c));
    let labels: Vec<&str> = domain.split('.').collect();
    let domain_ok = labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        });
    local_ok && domain_ok
}

/// Length ≥ 8 with at least one letter, one digit and one symbol from the
/// fixed set. Control characters are rejected.
pub fn validate_password(password: &str) -> bool {
    password.len() >= 8
        && !password.chars().any(|c| c.is_control())
        && password.chars().any(|c| c.is_ascii_alphabetic())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| PASSWORD_SYMBOLS.contains(c))
}

/// Tokens are printable base64url-safe material.
pub fn validate_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= 256
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_.+-/=".contains(c))
}

fn generate_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    STANDARD.encode(hasher.finalize())
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    STANDARD.encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: &str = "alice@example.com";
    const PASSWORD: &str = "hunter2!A";

    #[test]
    fn username_validation() {
        assert!(validate_username("alice@example.com"));
        assert!(validate_username("a.b+c_d@sub.example.io"));
        assert!(!validate_username("alice"));
        assert!(!validate_username("@example.com"));
        assert!(!validate_username("alice@localhost"));
        assert!(!validate_username("alice@exa mple.com"));
        assert!(!validate_username("ali\nce@example.com"));
    }

    #[test]
    fn password_validation() {
        assert!(validate_password("hunter2!A"));
        assert!(!validate_password("short1!"));
        assert!(!validate_password("nodigits!!"));
        assert!(!validate_password("nosymbol12"));
        assert!(!validate_password("12345678!"));
    }

    #[test]
    fn token_validation() {
        assert!(validate_token("abcDEF123_-"));
        assert!(!validate_token(""));
        assert!(!validate_token("with space"));
        assert!(!validate_token(&"a".repeat(257)));
    }

    #[tokio::test]
    async fn create_and_authenticate() {
        let manager = UserManager::in_memory().await.unwrap();
        manager.create_user(USER, PASSWORD).await.unwrap();
        assert_eq!(manager.users().await.unwrap(), vec![USER.to_string()]);

        let token = manager
            .authenticate(USER, PASSWORD, "phone")
            .await
            .unwrap()
            .expect("token");
        assert!(manager.verify_token(&token).await);
        assert_eq!(manager.user_for_token(&token).await.as_deref(), Some(USER));

        assert!(manager
            .authenticate(USER, "wrong-pass1!", "phone")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn usernames_are_case_insensitive_on_lookup() {
        let manager = UserManager::in_memory().await.unwrap();
        manager.create_user(USER, PASSWORD).await.unwrap();

        assert_eq!(
            manager.create_user("ALICE@example.com", PASSWORD).await,
            Err(UserError::DuplicateUserId)
        );
        assert!(manager
            .authenticate("ALICE@EXAMPLE.COM", PASSWORD, "phone")
            .await
            .unwrap()
            .is_some());
        // storage keeps the original case
        assert_eq!(manager.users().await.unwrap(), vec![USER.to_string()]);
    }

    #[tokio::test]
    async fn tokens_are_stored_hashed() {
        let manager = UserManager::in_memory().await.unwrap();
        manager.create_user(USER, PASSWORD).await.unwrap();
        let token = manager
            .authenticate(USER, PASSWORD, "phone")
            .await
            .unwrap()
            .unwrap();

        let rows = sqlx::query("SELECT token_hash FROM tokens")
            .fetch_all(&manager.pool)
            .await
            .unwrap();
        let stored: String = rows[0].try_get("token_hash").unwrap();
        assert_ne!(stored, token);
        assert_eq!(stored, hash_token(&token));
    }

    #[tokio::test]
    async fn remove_token_revokes_access() {
        let manager = UserManager::in_memory().await.unwrap();
        manager.create_user(USER, PASSWORD).await.unwrap();
        let token = manager
            .authenticate(USER, PASSWORD, "phone")
            .await
            .unwrap()
            .unwrap();

        let infos = manager.tokens(USER).await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].device_name, "phone");

        manager.remove_token(infos[0].id).await.unwrap();
        assert!(!manager.verify_token(&token).await);
        assert_eq!(
            manager.remove_token(infos[0].id).await,
            Err(UserError::TokenNotFound)
        );
    }

    #[tokio::test]
    async fn removing_a_user_revokes_their_tokens() {
        let manager = UserManager::in_memory().await.unwrap();
        manager.create_user(USER, PASSWORD).await.unwrap();
        let token = manager
            .authenticate(USER, PASSWORD, "phone")
            .await
            .unwrap()
            .unwrap();

        manager.remove_user(USER).await.unwrap();
        assert!(!manager.verify_token(&token).await);
        assert_eq!(
            manager.remove_user(USER).await,
            Err(UserError::InvalidUserId)
        );
    }

    #[tokio::test]
    async fn push_button_tokens_have_no_user() {
        let manager = UserManager::in_memory().await.unwrap();
        let token = manager.create_push_button_token("phoneB").await.unwrap();
        assert!(manager.verify_token(&token).await);
        assert_eq!(manager.user_for_token(&token).await.as_deref(), Some(""));
    }
}
