use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use scrawl_core::room::Room;

use crate::auth::{self, CurrentSession, CurrentUser};
use crate::db;
use crate::error::AppError;
use crate::game_loop;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SignupBody {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub username: String,
    pub access_token: String,
    pub token_type: &'static str,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// POST /user/signup: create an account and open a session.
pub async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupBody>,
) -> Result<(StatusCode, Json<TokenResponse>), AppError> {
    if body.username.is_empty() || body.password.is_empty() {
        return Err(AppError::BadRequest(
            "username and password must be non-empty".to_string(),
        ));
    }
    let hashed = auth::hash_password(&body.password)?;
    let user = match db::create_user(&state.db, &body.username, &hashed).await {
        Ok(user) => user,
        Err(e) if db::is_unique_violation(&e) => {
            return Err(AppError::Conflict("Username is already in use".to_string()));
        },
        Err(e) => return Err(e.into()),
    };
    tracing::info!(username = %user.username, "Created new user");
    let session = state.sessions.create(user.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(TokenResponse {
            username: user.username,
            access_token: session.id,
            token_type: "bearer",
        }),
    ))
}

/// POST /user/token: form-encoded login.
pub async fn token(
    State(state): State<AppState>,
    axum::Form(form): axum::Form<LoginForm>,
) -> Result<Json<TokenResponse>, AppError> {
    let user = db::find_by_username(&state.db, &form.username)
        .await?
        .filter(|user| auth::verify_password(&form.password, &user.password));
    let Some(user) = user else {
        return Err(AppError::unauthorized());
    };
    let session = state.sessions.create(user.id).await?;
    Ok(Json(TokenResponse {
        username: user.username,
        access_token: session.id,
        token_type: "bearer",
    }))
}

/// POST /user/logout: invalidate the bearer session.
pub async fn logout(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<MessageResponse>, AppError> {
    state.sessions.delete(&session.id).await?;
    Ok(Json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}

/// POST /room: create a room, persist it, and spawn its game loop.
pub async fn create_room(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Room>, AppError> {
    let room = Room::new((&user).into());
    state.rooms.save(&room).await?;
    game_loop::spawn(&state, room.room_id.clone());
    tracing::info!(room = %room.room_id, owner = %user.username, "Room created");
    Ok(Json(room))
}

/// GET /ping
pub async fn ping() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Pong!".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_shape() {
        let resp = TokenResponse {
            username: "alice".to_string(),
            access_token: "tok".to_string(),
            token_type: "bearer",
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["username"], "alice");
        assert_eq!(json["access_token"], "tok");
        assert_eq!(json["token_type"], "bearer");
    }

    #[test]
    fn login_form_decodes_urlencoded() {
        let form: LoginForm =
            serde_urlencoded::from_str("username=alice&password=hunter2").unwrap();
        assert_eq!(form.username, "alice");
        assert_eq!(form.password, "hunter2");
    }
}
