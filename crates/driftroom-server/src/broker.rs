//! Real-time WebSocket broker (§4.F): handshake, inbound frame dispatch,
//! outbound fan-out, and disconnect handling.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use base64::Engine as _;
use driftroom_core::{ApiError, MessageType, WsOutcome};
use driftroom_db::Store;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth;
use crate::frame::{InboundFrame, OutboundEvent, ParticipantStatus};
use crate::lifecycle;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    token: String,
}

/// Axum handler: upgrades the connection after the handshake checks, or
/// refuses the upgrade outright on malformed input.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.token))
}

struct Handshake {
    room_id: String,
    participant_id: i64,
    role: driftroom_core::Role,
    device_id: Uuid,
}

async fn authenticate(state: &AppState, token: &str) -> Result<Handshake, ApiError> {
    let claims = auth::verify_token(state.jwt_secret.as_slice(), token)?;
    let participant_id = claims
        .participant_id
        .ok_or_else(|| ApiError::AuthFailure("token has no participant".to_owned()))?;

    let valid = state
        .store
        .validate_device_access(&claims.room_id, participant_id, claims.device_id)
        .await?;
    if !valid {
        return Err(ApiError::AuthFailure("device does not match participant".to_owned()));
    }

    let room = state
        .store
        .get_room(&claims.room_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("room {} not found", claims.room_id)))?;
    if !room.status.is_joinable() {
        return Err(ApiError::StateConflict("room is not active".to_owned()));
    }

    Ok(Handshake {
        room_id: claims.room_id,
        participant_id,
        role: claims.role,
        device_id: claims.device_id,
    })
}

async fn connection_status_event(state: &AppState, room_id: &str) -> OutboundEvent {
    let participants = state
        .store
        .get_room_participants(room_id)
        .await
        .unwrap_or_default();
    let statuses: Vec<ParticipantStatus> = participants
        .iter()
        .map(|p| ParticipantStatus {
            participant_id: p.id,
            role: p.role,
            display_name: p.display_name.clone(),
            is_connected: state.registry.is_connected(room_id, p.id),
        })
        .collect();
    let connected = statuses.iter().filter(|s| s.is_connected).count();
    OutboundEvent::ConnectionStatusUpdate {
        connected_participants: connected,
        total_participants: statuses.len(),
        is_secure: connected >= 2,
        participants: statuses,
    }
}

fn encode(event: &OutboundEvent) -> String {
    serde_json::to_string(event).unwrap_or_default()
}

async fn handle_socket(socket: WebSocket, state: AppState, token: String) {
    let handshake = match authenticate(&state, &token).await {
        Ok(h) => h,
        Err(_) => return,
    };
    let Handshake {
        room_id,
        participant_id,
        role,
        device_id,
    } = handshake;

    let session_id = Uuid::new_v4().to_string();
    state.registry.add(&room_id, participant_id, role, &session_id);
    let mut events = state.broadcaster.subscribe(&room_id);

    let (mut sink, mut stream) = socket.split();

    let display_name = state
        .store
        .get_participant(participant_id)
        .await
        .ok()
        .flatten()
        .and_then(|p| p.display_name);

    state.broadcaster.publish(
        &room_id,
        &encode(&OutboundEvent::ParticipantConnected {
            participant_id,
            role,
            display_name,
        }),
    );
    state
        .broadcaster
        .publish(&room_id, &encode(&connection_status_event(&state, &room_id).await));

    if let Ok(Some(room)) = state.store.get_room(&room_id).await {
        if room.status == driftroom_core::RoomStatus::Locked
            && sink
                .send(WsMessage::Text(encode(&OutboundEvent::RoomLocked).into()))
                .await
                .is_err()
        {
            return;
        }
        if let Some(expires_at) = room.expires_at {
            let seconds_left = (expires_at - chrono::Utc::now()).num_seconds().max(0);
            let _ = sink
                .send(WsMessage::Text(
                    encode(&OutboundEvent::TimerUpdate {
                        time_left_seconds: seconds_left,
                    })
                    .into(),
                ))
                .await;
        }
    }

    loop {
        tokio::select! {
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Ok(frame) = serde_json::from_str::<InboundFrame>(&text) {
                            handle_inbound_frame(&state, &room_id, participant_id, role, device_id, &session_id, frame, &mut sink).await;
                        }
                        // malformed frames are dropped silently, per §9.
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            broadcasted = events.recv() => {
                match broadcasted {
                    Ok(envelope) => {
                        if envelope.origin_session_id.as_deref() == Some(session_id.as_str()) {
                            continue;
                        }
                        if sink.send(WsMessage::Text(envelope.payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    on_disconnect(&state, &room_id, participant_id, &session_id).await;
}

#[allow(clippy::too_many_arguments)]
async fn handle_inbound_frame(
    state: &AppState,
    room_id: &str,
    participant_id: i64,
    role: driftroom_core::Role,
    device_id: Uuid,
    session_id: &str,
    frame: InboundFrame,
    sink: &mut (impl SinkExt<WsMessage> + Unpin),
) {
    let result = dispatch_frame(state, room_id, participant_id, role, device_id, session_id, frame, sink).await;
    if let Err(err) = result {
        // §7: socket handlers swallow errors per-frame; only a handshake
        // failure closes the connection, and the handshake already
        // happened. Disconnect-worthy errors can't occur past this point
        // under the current frame set, but the classification is checked
        // for completeness.
        debug_assert!(matches!(err.to_ws_outcome(), WsOutcome::SwallowSilently));
        tracing::debug!(room_id, participant_id, error = %err, "dropped frame after error");
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_frame(
    state: &AppState,
    room_id: &str,
    participant_id: i64,
    role: driftroom_core::Role,
    device_id: Uuid,
    session_id: &str,
    frame: InboundFrame,
    sink: &mut (impl SinkExt<WsMessage> + Unpin),
) -> Result<(), ApiError> {
    match frame {
        InboundFrame::MessageSend {
            ciphertext,
            nonce,
            tag,
            msg_type,
            attachment_id,
        } => {
            handle_message_send(
                state,
                room_id,
                participant_id,
                role,
                device_id,
                ciphertext,
                nonce,
                tag,
                msg_type,
                attachment_id,
            )
            .await
        }
        InboundFrame::DestroyRoom => {
            lifecycle::close_room(state.store.as_ref(), room_id).await?;
            state.broadcaster.publish(
                room_id,
                &encode(&OutboundEvent::RoomClosed {
                    reason: "destroyed".to_owned(),
                }),
            );
            Ok(())
        }
        InboundFrame::AnnounceParticipantName { display_name, role } => {
            state.broadcaster.publish_excluding(
                room_id,
                &encode(&OutboundEvent::ParticipantNameAnnounced {
                    participant_id: Some(participant_id),
                    display_name,
                    role,
                }),
                Some(session_id),
            );
            Ok(())
        }
        InboundFrame::VerifyParticipant {
            target_participant_id,
            accepted,
            verifier_name,
        } => {
            if accepted {
                state.broadcaster.publish(
                    room_id,
                    &encode(&OutboundEvent::ParticipantVerified {
                        target_participant_id,
                        verifier_name,
                    }),
                );
            } else {
                state.broadcaster.publish(
                    room_id,
                    &encode(&OutboundEvent::ParticipantRejected {
                        target_participant_id,
                    }),
                );
                lifecycle::close_room(state.store.as_ref(), room_id).await?;
                state.broadcaster.publish(
                    room_id,
                    &encode(&OutboundEvent::RoomClosed {
                        reason: "participant_rejected".to_owned(),
                    }),
                );
            }
            Ok(())
        }
        InboundFrame::Ping => {
            let _ = sink
                .send(WsMessage::Text(
                    encode(&OutboundEvent::Pong {
                        timestamp_ms: chrono::Utc::now().timestamp_millis(),
                    })
                    .into(),
                ))
                .await;
            Ok(())
        }
        InboundFrame::JoinRoom => {
            let _ = sink
                .send(WsMessage::Text(
                    encode(&OutboundEvent::JoinedRoom {
                        room_id: room_id.to_owned(),
                    })
                    .into(),
                ))
                .await;
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_message_send(
    state: &AppState,
    room_id: &str,
    participant_id: i64,
    role: driftroom_core::Role,
    device_id: Uuid,
    ciphertext_b64: String,
    nonce_b64: String,
    tag_b64: String,
    msg_type: MessageType,
    attachment_id: Option<i64>,
) -> Result<(), ApiError> {
    let valid = state
        .store
        .validate_device_access(room_id, participant_id, device_id)
        .await?;
    if !valid {
        return Ok(());
    }

    let room = state
        .store
        .get_room(room_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("room {room_id} not found")))?;
    if !room.status.is_joinable() {
        state.broadcaster.publish(
            room_id,
            &encode(&OutboundEvent::RoomClosed {
                reason: "room_unavailable".to_owned(),
            }),
        );
        return Ok(());
    }

    let engine = base64::engine::general_purpose::STANDARD;
    let body_ct = engine
        .decode(&ciphertext_b64)
        .map_err(|_| ApiError::validation("ciphertext is not valid base64"))?;
    let nonce = engine
        .decode(&nonce_b64)
        .map_err(|_| ApiError::validation("nonce is not valid base64"))?;
    let tag = engine
        .decode(&tag_b64)
        .map_err(|_| ApiError::validation("tag is not valid base64"))?;

    let participant = state
        .store
        .get_participant(participant_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("participant not found".to_owned()))?;

    let message = state
        .store
        .create_message(room_id, participant_id, body_ct, nonce, tag, msg_type, None)
        .await?;

    if let Some(attachment_id) = attachment_id {
        if let Some(attachment) = state.store.get_attachment(attachment_id, room_id).await? {
            if attachment.available {
                state
                    .store
                    .link_attachment_to_message(attachment_id, room_id, message.id)
                    .await?;
            }
        }
    }

    state.broadcaster.publish(
        room_id,
        &encode(&OutboundEvent::Message {
            message_id: message.id,
            participant_id,
            display_name: participant.display_name,
            role,
            created_at: message.created_at,
            ciphertext: ciphertext_b64,
            nonce: nonce_b64,
            tag: tag_b64,
            msg_type,
            attachment_id,
        }),
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use driftroom_blob::OpendalBlobStore;
    use driftroom_core::Role;
    use driftroom_db::MemStore;
    use opendal::Operator;
    use opendal::services::Memory;
    use std::sync::Arc;

    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::lifecycle::{self, JoinOutcome};
    use crate::registry::Registry;
    use crate::state::AppState;

    fn memory_blob() -> OpendalBlobStore {
        let op = Operator::new(Memory::default()).unwrap().finish();
        OpendalBlobStore::new(op.clone(), op)
    }

    async fn seated_room(state: &AppState) -> (String, i64, Uuid, i64, Uuid) {
        let master_key = driftroom_crypto::MasterKey::from_bytes([9u8; 32]);
        let host_device_id = Uuid::new_v4();
        let guest_device_id = Uuid::new_v4();
        let room = lifecycle::create_room(state.store.as_ref(), None).await.unwrap();
        let (room, host, _key) =
            lifecycle::accept_room(state.store.as_ref(), &master_key, &room.room_id, host_device_id, None)
                .await
                .unwrap()
                .unwrap();
        let JoinOutcome::Fresh { participant: guest, .. } = lifecycle::join_room(
            state.store.as_ref(),
            &state.registry,
            &master_key,
            &room.room_id,
            guest_device_id,
            None,
        )
        .await
        .unwrap() else {
            panic!("expected a fresh join");
        };
        (room.room_id, host.id, host_device_id, guest.id, guest_device_id)
    }

    fn test_state() -> AppState {
        AppState {
            store: Arc::new(MemStore::new()),
            blob: Arc::new(memory_blob()),
            master_key: Arc::new(driftroom_crypto::MasterKey::from_bytes([9u8; 32])),
            registry: Arc::new(Registry::new()),
            broadcaster: Arc::new(Broadcaster::new()),
            jwt_secret: Arc::new(b"test-secret".to_vec()),
            cookie_key: axum_extra::extract::cookie::Key::derive_from(&[7u8; 64]),
            session_cookie_days: 30,
        }
    }

    #[tokio::test]
    async fn destroy_room_closes_it_and_broadcasts_the_reason() {
        let state = test_state();
        let (room_id, host_id, host_device_id, _guest_id, _guest_device_id) = seated_room(&state).await;
        let mut events = state.broadcaster.subscribe(&room_id);

        let mut sink = futures_util::sink::drain();
        dispatch_frame(
            &state,
            &room_id,
            host_id,
            Role::Host,
            host_device_id,
            "sess",
            InboundFrame::DestroyRoom,
            &mut sink,
        )
        .await
        .unwrap();

        let room = state.store.get_room(&room_id).await.unwrap().unwrap();
        assert_eq!(room.status, driftroom_core::RoomStatus::Closed);

        let envelope = events.recv().await.unwrap();
        assert!(envelope.payload.contains("room_closed"));
        assert!(envelope.payload.contains("destroyed"));
    }

    #[tokio::test]
    async fn rejecting_a_participant_closes_the_room_scenario_5() {
        let state = test_state();
        let (room_id, host_id, host_device_id, guest_id, _guest_device_id) = seated_room(&state).await;
        let mut events = state.broadcaster.subscribe(&room_id);

        let mut sink = futures_util::sink::drain();
        let frame = InboundFrame::VerifyParticipant {
            target_participant_id: guest_id,
            accepted: false,
            verifier_name: "host".to_owned(),
        };
        dispatch_frame(&state, &room_id, host_id, Role::Host, host_device_id, "sess", frame, &mut sink)
            .await
            .unwrap();

        let rejected = events.recv().await.unwrap();
        assert!(rejected.payload.contains("participant_rejected"));
        let closed = events.recv().await.unwrap();
        assert!(closed.payload.contains("participant_rejected"));
        assert!(closed.payload.contains("room_closed"));

        let room = state.store.get_room(&room_id).await.unwrap().unwrap();
        assert_eq!(room.status, driftroom_core::RoomStatus::Closed);
    }

    #[tokio::test]
    async fn message_send_with_a_mismatched_device_id_is_dropped() {
        let state = test_state();
        let (room_id, host_id, _host_device_id, _guest_id, _guest_device_id) = seated_room(&state).await;

        let mut sink = futures_util::sink::drain();
        let frame = InboundFrame::MessageSend {
            ciphertext: "Y2lwaGVy".to_owned(),
            nonce: "bm9uY2U=".to_owned(),
            tag: "dGFn".to_owned(),
            msg_type: MessageType::Text,
            attachment_id: None,
        };
        dispatch_frame(&state, &room_id, host_id, Role::Host, Uuid::new_v4(), "sess", frame, &mut sink)
            .await
            .unwrap();

        let messages = state.store.get_room_messages(&room_id, 10).await.unwrap();
        assert!(messages.is_empty());
    }
}

async fn on_disconnect(state: &AppState, room_id: &str, participant_id: i64, session_id: &str) {
    state.registry.remove(session_id);

    if lifecycle::handle_disconnect(state.store.as_ref(), &state.registry, room_id, participant_id)
        .await
        .is_err()
    {
        tracing::warn!(room_id, participant_id, "disconnect cleanup failed");
    }

    state.broadcaster.publish(
        room_id,
        &encode(&OutboundEvent::ParticipantDisconnected { participant_id }),
    );
    state
        .broadcaster
        .publish(room_id, &encode(&connection_status_event(state, room_id).await));

    if state.registry.count(room_id) == 0 {
        state.broadcaster.retire(room_id);
    }
}
