use axum::extract::ws::{Message, WebSocket};
use futures::SinkExt;
use futures::stream::SplitSink;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use scrawl_core::events::Event;
use scrawl_core::room::{GameMember, GameStatus, Room};

use crate::rooms::{self, RoomStore};

/// What the relay does with one event received from the room channel.
#[derive(Debug, PartialEq)]
enum RelayAction {
    /// Forward the payload unchanged.
    Forward,
    /// Forward a rewritten payload instead of the original.
    Rewrite(String),
    /// Forward the payload, then stop relaying.
    ForwardThenStop,
    /// Close the socket without forwarding, then stop relaying.
    CloseThenStop,
}

fn relay_action(event: &Event, user_id: &str) -> RelayAction {
    match event {
        // The terminal state change is the last thing a client ever sees.
        Event::GameStateChange(room) if room.status == GameStatus::Ended => {
            RelayAction::ForwardThenStop
        },
        // This connection's own departure: close instead of echoing it back.
        Event::MemberLeave(member) if member.user_id == user_id => RelayAction::CloseThenStop,
        // Only the drawer may see the answer.
        Event::TurnStart(data) if data.user.user_id != user_id && data.answer.is_some() => {
            let mut redacted = data.clone();
            redacted.answer = None;
            RelayAction::Rewrite(Event::TurnStart(redacted).to_json())
        },
        _ => RelayAction::Forward,
    }
}

/// Spawn the writer task that owns the socket's send half. All outbound
/// traffic (personal sends, relay forwards, close frames) funnels through
/// one channel so socket writes stay serialized.
pub fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || is_close {
                break;
            }
        }
    })
}

/// Per-connection bridge between the client socket and the room channel.
pub struct Broadcaster {
    outbound: mpsc::UnboundedSender<Message>,
    store: RoomStore,
    user: GameMember,
    room_id: String,
}

impl Broadcaster {
    pub fn new(
        outbound: mpsc::UnboundedSender<Message>,
        store: RoomStore,
        user: GameMember,
        room_id: String,
    ) -> Self {
        Self {
            outbound,
            store,
            user,
            room_id,
        }
    }

    /// Write an event to this client only.
    pub fn send_personal(&self, event: &Event) {
        let _ = self.outbound.send(Message::Text(event.to_json().into()));
    }

    /// Publish an event to the room channel, reaching every subscriber.
    pub async fn emit(&self, event: &Event) -> redis::RedisResult<()> {
        self.store.publish(&self.room_id, event).await
    }

    /// Send the CONNECT snapshot to this client, then announce the join to
    /// the room.
    pub async fn join(&self, room: &Room) -> redis::RedisResult<()> {
        self.send_personal(&Event::Connect(Box::new(room.clone())));
        self.emit(&Event::MemberJoin(self.user.clone())).await
    }

    /// Announce that this connection's user left the room.
    pub async fn leave(&self) -> redis::RedisResult<()> {
        self.emit(&Event::MemberLeave(self.user.clone())).await
    }

    /// Subscribe to the room channel and spawn the relay task. The
    /// subscription is established before returning so events emitted right
    /// after (this connection's own MEMBER_JOIN included) are observed.
    /// Transient subscribe failures are retried, without backoff, up to the
    /// budget.
    pub async fn spawn_relay(
        &self,
        client: &redis::Client,
        tracker: &TaskTracker,
        retry_budget: u32,
    ) -> redis::RedisResult<JoinHandle<()>> {
        let mut connect_tries: u32 = 0;
        let pubsub = loop {
            match rooms::subscribe(client, &self.room_id).await {
                Ok(pubsub) => break pubsub,
                Err(e) => {
                    connect_tries += 1;
                    if connect_tries >= retry_budget {
                        return Err(e);
                    }
                    tracing::debug!(room = %self.room_id, error = %e, "Relay subscribe failed");
                },
            }
        };
        let outbound = self.outbound.clone();
        let user = self.user.clone();
        let room_id = self.room_id.clone();
        let client = client.clone();
        Ok(tracker.spawn(relay_loop(
            pubsub,
            client,
            room_id,
            user,
            outbound,
            retry_budget,
        )))
    }
}

async fn relay_loop(
    mut pubsub: redis::aio::PubSub,
    client: redis::Client,
    room_id: String,
    user: GameMember,
    outbound: mpsc::UnboundedSender<Message>,
    retry_budget: u32,
) {
    use futures::StreamExt;

    let mut connect_tries: u32 = 0;
    loop {
        {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let Ok(payload) = msg.get_payload::<String>() else {
                    continue;
                };
                let event = match serde_json::from_str::<Event>(&payload) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(
                            room = %room_id,
                            error = %e,
                            "Dropping unparseable channel payload"
                        );
                        continue;
                    },
                };
                match relay_action(&event, &user.user_id) {
                    RelayAction::Forward => {
                        if outbound.send(Message::Text(payload.into())).is_err() {
                            return;
                        }
                    },
                    RelayAction::Rewrite(json) => {
                        if outbound.send(Message::Text(json.into())).is_err() {
                            return;
                        }
                    },
                    RelayAction::ForwardThenStop => {
                        let _ = outbound.send(Message::Text(payload.into()));
                        return;
                    },
                    RelayAction::CloseThenStop => {
                        let _ = outbound.send(Message::Close(None));
                        return;
                    },
                }
            }
        }
        // The message stream ended: the pub/sub connection dropped.
        // Re-subscribe within the retry budget; events published while
        // disconnected are lost, which pub/sub semantics already allow.
        loop {
            connect_tries += 1;
            if connect_tries >= retry_budget {
                tracing::warn!(
                    room = %room_id,
                    tries = connect_tries,
                    "Relay could not reach the cache; giving up. Is redis running?"
                );
                return;
            }
            match rooms::subscribe(&client, &room_id).await {
                Ok(fresh) => {
                    pubsub = fresh;
                    break;
                },
                Err(e) => {
                    tracing::debug!(room = %room_id, error = %e, "Relay re-subscribe failed");
                },
            }
        }
    }
}
