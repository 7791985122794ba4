//! Scenario 1 (happy path) and Scenario 2 (capacity) from the room
//! lifecycle, driven directly against `MemStore` and the registry.

use driftroom_core::{Role, RoomStatus};
use driftroom_db::Store;
use driftroom_harness::{test_master_key, test_registry, test_store};
use driftroom_server::lifecycle::{self, JoinOutcome};
use uuid::Uuid;

#[tokio::test]
async fn happy_path_create_accept_join_locks_the_room() {
    let store = test_store();
    let registry = test_registry();
    let master_key = test_master_key();

    let room = lifecycle::create_room(&store, None).await.unwrap();
    assert_eq!(room.status, RoomStatus::Pending);

    let host_device = Uuid::new_v4();
    let (room, host, room_key) = lifecycle::accept_room(&store, &master_key, &room.room_id, host_device, None)
        .await
        .unwrap()
        .expect("first accept succeeds");
    assert_eq!(room.status, RoomStatus::Active);
    assert_eq!(host.role, Role::Host);

    let guest_device = Uuid::new_v4();
    let outcome = lifecycle::join_room(&store, &registry, &master_key, &room.room_id, guest_device, None)
        .await
        .unwrap();
    let JoinOutcome::Fresh {
        participant: guest,
        room_key: guest_key,
        locked,
    } = outcome
    else {
        panic!("expected a fresh join for a brand new device");
    };
    assert_eq!(guest.role, Role::Guest);
    assert!(locked, "second participant locks the room");
    assert_eq!(guest_key.as_bytes(), room_key.as_bytes());

    let room = store.get_room(&room.room_id).await.unwrap().unwrap();
    assert_eq!(room.status, RoomStatus::Locked);

    let (ct, nonce, tag) = driftroom_crypto::encrypt_message(&room_key, "hello").unwrap();
    let message = store
        .create_message(&room.room_id, host.id, ct, nonce.to_vec(), tag.to_vec(), driftroom_core::MessageType::Text, None)
        .await
        .unwrap();
    let decrypted = driftroom_crypto::decrypt_message(&room_key, &message.body_ct, &message.nonce, &message.tag).unwrap();
    assert_eq!(decrypted, "hello");

    let closed = lifecycle::close_room(&store, &room.room_id).await.unwrap();
    assert!(closed);
    let room = store.get_room(&room.room_id).await.unwrap().unwrap();
    assert_eq!(room.status, RoomStatus::Closed);
}

#[tokio::test]
async fn second_join_to_an_active_room_is_accepted_and_locks() {
    let store = test_store();
    let registry = test_registry();
    let master_key = test_master_key();

    let room = lifecycle::create_room(&store, None).await.unwrap();
    let (room, _host, _key) = lifecycle::accept_room(&store, &master_key, &room.room_id, Uuid::new_v4(), None)
        .await
        .unwrap()
        .unwrap();

    let outcome = lifecycle::join_room(&store, &registry, &master_key, &room.room_id, Uuid::new_v4(), None)
        .await
        .unwrap();
    assert!(matches!(outcome, JoinOutcome::Fresh { locked: true, .. }));
    assert_eq!(store.count_participants(&room.room_id).await.unwrap(), 2);
}

#[tokio::test]
async fn third_join_to_a_full_room_is_rejected() {
    let store = test_store();
    let registry = test_registry();
    let master_key = test_master_key();

    let room = lifecycle::create_room(&store, None).await.unwrap();
    let (room, _host, _key) = lifecycle::accept_room(&store, &master_key, &room.room_id, Uuid::new_v4(), None)
        .await
        .unwrap()
        .unwrap();
    lifecycle::join_room(&store, &registry, &master_key, &room.room_id, Uuid::new_v4(), None)
        .await
        .unwrap();

    let err = lifecycle::join_room(&store, &registry, &master_key, &room.room_id, Uuid::new_v4(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, lifecycle::JoinError::Full));
    // P1: persisted count never exceeds 2, even after a rejected third join.
    assert_eq!(store.count_participants(&room.room_id).await.unwrap(), 2);
}

#[tokio::test]
async fn second_accept_on_an_already_active_room_is_a_no_op() {
    let store = test_store();
    let master_key = test_master_key();

    let room = lifecycle::create_room(&store, None).await.unwrap();
    let first = lifecycle::accept_room(&store, &master_key, &room.room_id, Uuid::new_v4(), None)
        .await
        .unwrap();
    assert!(first.is_some());

    let wrapped_before = store.get_wrapped_room_key(&room.room_id).await.unwrap();

    // P7: a second accept mints no second key and reports no change.
    let second = lifecycle::accept_room(&store, &master_key, &room.room_id, Uuid::new_v4(), None)
        .await
        .unwrap();
    assert!(second.is_none());
    let wrapped_after = store.get_wrapped_room_key(&room.room_id).await.unwrap();
    assert_eq!(wrapped_before, wrapped_after);
    assert_eq!(store.count_participants(&room.room_id).await.unwrap(), 1);
}
