use axum::Json;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use tokio::sync::mpsc;
use uuid::Uuid;

use scrawl_core::events::{ErrorData, Event};
use scrawl_core::room::{GameMember, GameStatus, Room};

use crate::broadcast::{Broadcaster, spawn_writer};
use crate::db;
use crate::error::{AppError, ProcessError, StoreError};
use crate::processor::process_message;
use crate::state::AppState;

/// WebSocket close code for policy violations (bad auth, rejected join).
const POLICY_VIOLATION: u16 = 1008;

/// GET /room/{room_id}: the room snapshot as JSON, or the realtime session
/// when the client asks for a socket upgrade.
pub async fn room_handler(
    ws: Result<WebSocketUpgrade, axum::extract::ws::rejection::WebSocketUpgradeRejection>,
    Path(room_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Response {
    let room_id = room_id.to_string();
    match ws {
        Ok(upgrade) => {
            upgrade.on_upgrade(move |socket| handle_socket(socket, state, room_id))
        },
        Err(_) => match fetch_room(&state, &room_id).await {
            Ok(room) => Json(room).into_response(),
            Err(e) => e.into_response(),
        },
    }
}

async fn fetch_room(state: &AppState, room_id: &str) -> Result<Room, AppError> {
    let room = state.rooms.load(room_id).await?;
    room.ok_or_else(|| AppError::NotFound("Room not found".to_string()))
}

async fn close_with(socket: &mut WebSocket, reason: &str) {
    let frame = CloseFrame {
        code: POLICY_VIOLATION,
        reason: reason.to_string().into(),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Failed to send close frame");
    }
}

/// Read the first frame (`{"Authorization": "Bearer <token>"}`) and resolve
/// it to a user.
async fn authenticate(socket: &mut WebSocket, state: &AppState) -> Option<db::User> {
    let msg = socket.recv().await?.ok()?;
    let Message::Text(text) = msg else {
        return None;
    };
    let frame: serde_json::Value = serde_json::from_str(text.as_str()).ok()?;
    let token = frame
        .get("Authorization")
        .and_then(serde_json::Value::as_str)
        .and_then(crate::auth::bearer_token)?;
    let session = state.sessions.get(token).await.ok().flatten()?;
    db::find_by_id(&state.db, session.user_id).await.ok().flatten()
}

async fn handle_socket(mut socket: WebSocket, state: AppState, room_id: String) {
    // Resolve the room first; a vanished room is a policy rejection.
    let mut room = match state.rooms.load(&room_id).await {
        Ok(Some(room)) => room,
        Ok(None) => {
            close_with(&mut socket, "Room not found").await;
            return;
        },
        Err(e) => {
            tracing::error!(room = %room_id, error = %e, "Room lookup failed");
            close_with(&mut socket, "Room not found").await;
            return;
        },
    };

    let Some(user) = authenticate(&mut socket, &state).await else {
        close_with(&mut socket, "Authorization not sent").await;
        return;
    };
    let member = GameMember::from(&user);

    if let Err(e) = state.rooms.join(&mut room, member.clone()).await {
        let reason = match e {
            StoreError::Room(room_err) => room_err.to_string(),
            StoreError::Cache(cache_err) => {
                tracing::error!(room = %room_id, error = %cache_err, "Join failed on cache error");
                "Internal error".to_string()
            },
        };
        close_with(&mut socket, &reason).await;
        return;
    }

    let (sink, mut receiver) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let writer = spawn_writer(sink, outbound_rx);

    let broadcaster = Broadcaster::new(
        outbound_tx,
        state.rooms.clone(),
        member.clone(),
        room_id.clone(),
    );
    let relay = match broadcaster
        .spawn_relay(
            &state.redis_client,
            &state.tasks,
            state.config.pubsub.retry_budget,
        )
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(room = %room_id, error = %e, "Relay subscribe failed");
            // Roll the join back so the member list doesn't hold a ghost.
            if let Err(e) = state.rooms.leave(&room_id, &member).await {
                tracing::error!(room = %room_id, error = %e, "Join rollback failed");
            }
            return;
        },
    };
    if let Err(e) = broadcaster.join(&room).await {
        tracing::error!(room = %room_id, error = %e, "Join announcement failed");
    }

    // Reader loop: each inbound frame runs through the processor, strictly
    // serially. ERROR results go back personally; everything else is
    // published to the room.
    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let raw: serde_json::Value = match serde_json::from_str(text.as_str()) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(
                    room = %room_id,
                    username = %member.username,
                    error = %e,
                    "Client sent invalid JSON"
                );
                broadcaster.send_personal(&Event::Error(ErrorData {
                    message: "Malformed message".to_string(),
                }));
                continue;
            },
        };
        match process_message(&raw, &mut room, &member, &state.rooms).await {
            Ok(event) => {
                if matches!(event, Event::Error(_)) {
                    broadcaster.send_personal(&event);
                } else if let Err(e) = broadcaster.emit(&event).await {
                    tracing::error!(room = %room_id, error = %e, "Publish failed");
                    break;
                }
            },
            Err(ProcessError::Malformed(reason)) => {
                tracing::debug!(
                    room = %room_id,
                    username = %member.username,
                    %reason,
                    "Malformed client message"
                );
                broadcaster.send_personal(&Event::Error(ErrorData {
                    message: format!("Malformed message: {reason}"),
                }));
            },
            Err(ProcessError::Cache(e)) => {
                tracing::error!(room = %room_id, error = %e, "Cache unavailable while processing message");
                break;
            },
        }
    }

    // Client went away: update membership, hand off ownership if needed,
    // announce the leave, and let the relay wind down on its own terminal
    // event.
    if let Err(e) = state.rooms.leave(&room_id, &member).await {
        tracing::error!(room = %room_id, error = %e, "Leave failed");
    }
    if let Err(e) = transfer_ownership(&state, &room_id, &room, &member).await {
        tracing::error!(room = %room_id, error = %e, "Ownership transfer failed");
    }
    if let Err(e) = broadcaster.leave().await {
        tracing::error!(room = %room_id, error = %e, "Leave announcement failed");
    }
    let _ = relay.await;
    drop(broadcaster);
    let _ = writer.await;
    tracing::info!(room = %room_id, username = %member.username, "Member disconnected");
}

/// When the owner leaves a lobby, hand the room to the eldest remaining
/// member and announce the change.
async fn transfer_ownership(
    state: &AppState,
    room_id: &str,
    room: &Room,
    departed: &GameMember,
) -> redis::RedisResult<()> {
    if room.owner.user_id != departed.user_id {
        return Ok(());
    }
    if state.rooms.status(room_id).await? != Some(GameStatus::Lobby) {
        return Ok(());
    }
    let members = state.rooms.members(room_id).await?;
    let Some(new_owner) = members.first() else {
        return Ok(());
    };
    state.rooms.set_owner(room_id, new_owner).await?;
    tracing::info!(room = %room_id, username = %new_owner.username, "Ownership transferred");
    state
        .rooms
        .publish(room_id, &Event::OwnerChange(new_owner.clone()))
        .await
}
