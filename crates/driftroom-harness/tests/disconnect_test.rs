//! P8: a disconnect immediately clears `is_connected` for that participant,
//! and drops a `locked` room back to `active` once fewer than two sessions
//! remain live.

use driftroom_core::{Role, RoomStatus};
use driftroom_db::Store;
use driftroom_harness::{test_master_key, test_registry, test_store};
use driftroom_server::lifecycle::{self, JoinOutcome};
use uuid::Uuid;

#[tokio::test]
async fn disconnect_below_two_unlocks_a_locked_room() {
    let store = test_store();
    let registry = test_registry();
    let master_key = test_master_key();

    let room = lifecycle::create_room(&store, None).await.unwrap();
    let (room, host, _key) = lifecycle::accept_room(&store, &master_key, &room.room_id, Uuid::new_v4(), None)
        .await
        .unwrap()
        .unwrap();
    registry.add(&room.room_id, host.id, Role::Host, "sess-host");

    let JoinOutcome::Fresh { participant: guest, locked, .. } =
        lifecycle::join_room(&store, &registry, &master_key, &room.room_id, Uuid::new_v4(), None)
            .await
            .unwrap()
    else {
        panic!("expected a fresh join");
    };
    registry.add(&room.room_id, guest.id, Role::Guest, "sess-guest");
    assert!(locked);
    let _ = store.lock_room(&room.room_id).await;
    assert_eq!(store.get_room(&room.room_id).await.unwrap().unwrap().status, RoomStatus::Locked);

    // Mirrors `broker::on_disconnect`: remove the departing session from the
    // registry first, then hand the participant id to the lifecycle manager.
    registry.remove("sess-guest");
    assert!(!registry.is_connected(&room.room_id, guest.id));

    lifecycle::handle_disconnect(&store, &registry, &room.room_id, guest.id)
        .await
        .unwrap();

    let room = store.get_room(&room.room_id).await.unwrap().unwrap();
    assert_eq!(room.status, RoomStatus::Active, "room unlocks once only the host remains");
    assert!(store.get_participant(guest.id).await.unwrap().is_none());
}

#[tokio::test]
async fn disconnect_of_a_live_participant_is_reflected_in_the_registry_at_once() {
    let registry = test_registry();
    registry.add("Ab12", 1, Role::Host, "sess-1");
    assert!(registry.is_connected("Ab12", 1));

    registry.remove("sess-1");
    assert!(!registry.is_connected("Ab12", 1));
}
