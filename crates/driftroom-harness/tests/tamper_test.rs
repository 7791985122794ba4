//! Scenario 6 (tamper). A single corrupted message tag fails closed with
//! the decryption-failure sentinel while every other message in the room
//! still decrypts, and archival still completes for the room as a whole.

use driftroom_blob::BlobStore;
use driftroom_core::MessageType;
use driftroom_crypto::DECRYPTION_FAILED_SENTINEL;
use driftroom_db::Store;
use driftroom_harness::{test_blob, test_master_key, test_store};
use driftroom_server::lifecycle;
use uuid::Uuid;

#[tokio::test]
async fn one_tampered_message_does_not_block_the_rest_of_the_transcript() {
    let store = test_store();
    let blob = test_blob();
    let master_key = test_master_key();

    let room = lifecycle::create_room(&store, None).await.unwrap();
    let (room, host, room_key) = lifecycle::accept_room(&store, &master_key, &room.room_id, Uuid::new_v4(), None)
        .await
        .unwrap()
        .unwrap();

    let (ct, nonce, tag) = driftroom_crypto::encrypt_message(&room_key, "first").unwrap();
    store
        .create_message(&room.room_id, host.id, ct, nonce.to_vec(), tag.to_vec(), MessageType::Text, None)
        .await
        .unwrap();

    // A tampered tag, stored as-is: one byte flipped before it ever lands
    // in the row, equivalent to corrupting it at rest.
    let (ct, nonce, mut tampered_tag) = driftroom_crypto::encrypt_message(&room_key, "second").unwrap();
    tampered_tag[0] ^= 0xFF;
    store
        .create_message(&room.room_id, host.id, ct, nonce.to_vec(), tampered_tag.to_vec(), MessageType::Text, None)
        .await
        .unwrap();

    let (ct, nonce, tag) = driftroom_crypto::encrypt_message(&room_key, "third").unwrap();
    store
        .create_message(&room.room_id, host.id, ct, nonce.to_vec(), tag.to_vec(), MessageType::Text, None)
        .await
        .unwrap();

    let messages = store.get_room_messages(&room.room_id, i64::MAX).await.unwrap();
    let results: Vec<Result<String, _>> = messages
        .iter()
        .map(|m| driftroom_crypto::decrypt_message(&room_key, &m.body_ct, &m.nonce, &m.tag))
        .collect();
    assert_eq!(results[0].as_ref().unwrap(), "first");
    assert!(results[1].is_err(), "tampered tag fails closed");
    assert_eq!(results[2].as_ref().unwrap(), "third");

    assert!(lifecycle::close_room(&store, &room.room_id).await.unwrap());
    let room = store.get_room(&room.room_id).await.unwrap().unwrap();
    let archived = lifecycle::archive_room(&store, &blob, &master_key, &room).await.unwrap();
    assert!(archived, "one bad row never aborts the whole archive");

    let key = store.get_room(&room.room_id).await.unwrap().unwrap().archive_key.unwrap();
    let doc: serde_json::Value = serde_json::from_slice(&blob.get_archive(&key).await.unwrap().unwrap()).unwrap();
    let plaintexts: Vec<&str> = doc["messages"].as_array().unwrap().iter().map(|m| m["plaintext"].as_str().unwrap()).collect();
    assert_eq!(plaintexts, vec!["first", DECRYPTION_FAILED_SENTINEL, "third"]);
    assert!(doc["messages"][1]["error"].as_str().unwrap().contains("tag"));
}
