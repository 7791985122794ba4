//! Scenario 3 (reconnect). This crate pins the "cleanup removes the row"
//! branch of the open question in `DESIGN.md`: `handle_disconnect` deletes
//! the participant row up front, so a later `/join` from the same device
//! is a fresh join, not a reconnect, and gets a freshly assigned role.

use driftroom_core::Role;
use driftroom_db::Store;
use driftroom_harness::{test_master_key, test_registry, test_store};
use driftroom_server::lifecycle::{self, JoinOutcome};
use uuid::Uuid;

#[tokio::test]
async fn rejoin_before_disconnect_reconnects_to_the_same_participant() {
    let store = test_store();
    let registry = test_registry();
    let master_key = test_master_key();

    let room = lifecycle::create_room(&store, None).await.unwrap();
    let (room, _host, _key) = lifecycle::accept_room(&store, &master_key, &room.room_id, Uuid::new_v4(), None)
        .await
        .unwrap()
        .unwrap();

    let guest_device = Uuid::new_v4();
    let first = lifecycle::join_room(&store, &registry, &master_key, &room.room_id, guest_device, None)
        .await
        .unwrap();
    let JoinOutcome::Fresh { participant: first_guest, .. } = first else {
        panic!("expected a fresh join");
    };

    // Same device joins again without ever disconnecting: the row still
    // exists, so this is a reconnect to the same participant id.
    let second = lifecycle::join_room(&store, &registry, &master_key, &room.room_id, guest_device, None)
        .await
        .unwrap();
    let JoinOutcome::Reconnect { participant: second_guest, .. } = second else {
        panic!("expected a reconnect while the row still exists");
    };
    assert_eq!(first_guest.id, second_guest.id);
}

#[tokio::test]
async fn rejoin_after_disconnect_is_a_fresh_join_with_a_new_participant_id() {
    let store = test_store();
    let registry = test_registry();
    let master_key = test_master_key();

    let room = lifecycle::create_room(&store, None).await.unwrap();
    let (room, _host, _key) = lifecycle::accept_room(&store, &master_key, &room.room_id, Uuid::new_v4(), None)
        .await
        .unwrap()
        .unwrap();

    let guest_device = Uuid::new_v4();
    let first = lifecycle::join_room(&store, &registry, &master_key, &room.room_id, guest_device, None)
        .await
        .unwrap();
    let JoinOutcome::Fresh { participant: first_guest, .. } = first else {
        panic!("expected a fresh join");
    };

    // The socket never registered with `registry`, so `live_participant_ids`
    // is empty and cleanup removes the disconnecting row immediately.
    lifecycle::handle_disconnect(&store, &registry, &room.room_id, first_guest.id)
        .await
        .unwrap();
    assert!(store.get_participant(first_guest.id).await.unwrap().is_none());

    let second = lifecycle::join_room(&store, &registry, &master_key, &room.room_id, guest_device, None)
        .await
        .unwrap();
    let JoinOutcome::Fresh { participant: second_guest, .. } = second else {
        panic!("expected a fresh join once the old row is gone");
    };
    assert_ne!(first_guest.id, second_guest.id);
    assert_eq!(second_guest.role, Role::Guest);
}
