use sqlx::PgPool;
use uuid::Uuid;

use scrawl_core::room::GameMember;

/// A registered user. Passwords are stored as argon2 hashes.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password: String,
}

impl From<&User> for GameMember {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.to_string(),
            username: user.username.clone(),
        }
    }
}

/// Ensure the users table exists.
pub async fn init(pool: &PgPool) -> sqlx::Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_user(pool: &PgPool, username: &str, password_hash: &str) -> sqlx::Result<User> {
    let user = User {
        id: Uuid::new_v4(),
        username: username.to_string(),
        password: password_hash.to_string(),
    };
    sqlx::query("INSERT INTO users (id, username, password) VALUES ($1, $2, $3)")
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.password)
        .execute(pool)
        .await?;
    Ok(user)
}

pub async fn find_by_username(pool: &PgPool, username: &str) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT id, username, password FROM users WHERE username = $1")
        .bind(username)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT id, username, password FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// True when the error is a unique-constraint violation (duplicate username).
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db) if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_converts_to_game_member() {
        let user = User {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            password: "hash".to_string(),
        };
        let member = GameMember::from(&user);
        assert_eq!(member.user_id, user.id.to_string());
        assert_eq!(member.username, "alice");
    }

    #[test]
    fn non_database_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
