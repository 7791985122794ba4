//! Scenario 4 (expiry/archive) and P3/P6: a closed room archives to a JSON
//! document whose transcript matches the live rows decrypted at close time,
//! and `archive_key` tracks the `archived` status exactly.

use chrono::Utc;
use driftroom_blob::BlobStore;
use driftroom_core::{MessageType, RoomStatus};
use driftroom_db::Store;
use driftroom_harness::{test_blob, test_master_key, test_store};
use driftroom_server::lifecycle;
use uuid::Uuid;

#[tokio::test]
async fn close_then_archive_flips_status_and_records_the_key() {
    let store = test_store();
    let blob = test_blob();
    let master_key = test_master_key();

    let room = lifecycle::create_room(&store, None).await.unwrap();
    let (room, host, room_key) = lifecycle::accept_room(&store, &master_key, &room.room_id, Uuid::new_v4(), None)
        .await
        .unwrap()
        .unwrap();

    for text in ["hi", "how are you", "bye"] {
        let (ct, nonce, tag) = driftroom_crypto::encrypt_message(&room_key, text).unwrap();
        store
            .create_message(&room.room_id, host.id, ct, nonce.to_vec(), tag.to_vec(), MessageType::Text, None)
            .await
            .unwrap();
    }

    assert!(lifecycle::close_room(&store, &room.room_id).await.unwrap());
    let room = store.get_room(&room.room_id).await.unwrap().unwrap();
    assert_eq!(room.status, RoomStatus::Closed);
    assert!(room.archive_key.is_none(), "P3: no archive key before archiving");

    let archived = lifecycle::archive_room(&store, &blob, &master_key, &room).await.unwrap();
    assert!(archived);

    let room = store.get_room(&room.room_id).await.unwrap().unwrap();
    assert_eq!(room.status, RoomStatus::Archived);
    let key = room.archive_key.clone().expect("P3: archive key set once archived");

    let stored = blob.get_archive(&key).await.unwrap().expect("archive object exists");
    let doc: serde_json::Value = serde_json::from_slice(&stored).unwrap();
    assert_eq!(doc["message_count"], serde_json::json!(3));

    let live_plaintexts: Vec<String> = store
        .get_room_messages(&room.room_id, i64::MAX)
        .await
        .unwrap()
        .iter()
        .map(|m| driftroom_crypto::decrypt_message(&room_key, &m.body_ct, &m.nonce, &m.tag).unwrap())
        .collect();
    let archived_plaintexts: Vec<String> = doc["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["plaintext"].as_str().unwrap().to_owned())
        .collect();
    assert_eq!(live_plaintexts, archived_plaintexts, "P6: archive matches the live transcript in order");
}

#[tokio::test]
async fn a_freshly_accepted_room_is_not_yet_expired() {
    let store = test_store();
    let master_key = test_master_key();

    let room = lifecycle::create_room(&store, None).await.unwrap();
    lifecycle::accept_room(&store, &master_key, &room.room_id, Uuid::new_v4(), None)
        .await
        .unwrap()
        .unwrap();

    let expired = store.get_expired_rooms(Utc::now()).await.unwrap();
    assert!(!expired.contains(&room.room_id));
}

#[test]
fn compute_expiry_is_exactly_24_hours_after_acceptance() {
    let accepted_at = Utc::now();
    let expiry = lifecycle::compute_expiry(accepted_at);
    assert_eq!(expiry - accepted_at, chrono::Duration::hours(24));
}
