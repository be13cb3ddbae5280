use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,                     // auth subject, also the profile key
    pub full_name: String,
    pub email: String,                // trimmed, lower-cased
    #[serde(skip_serializing)]
    pub password_hash: String,        // Argon2 hash, not exposed in JSON
    pub created_at: OffsetDateTime,
    #[serde(skip_serializing)]
    pub password_changed_at: OffsetDateTime,
}

impl User {
    /// Tokens signed before the last password change no longer count.
    /// Compared at whole seconds, the resolution of `iat`.
    pub fn token_is_stale(&self, iat: usize) -> bool {
        (iat as i64) < self.password_changed_at.unix_timestamp()
    }
}
