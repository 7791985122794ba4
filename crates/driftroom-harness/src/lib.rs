//! Shared fixtures for the integration tests in `tests/`: a fixed master
//! key, an in-memory [`Store`](driftroom_db::Store), an in-memory
//! [`BlobStore`](driftroom_blob::BlobStore), and a fresh connection
//! registry, wired the way `main.rs` wires the real ones but without a
//! database or object store on the other end.

use driftroom_blob::OpendalBlobStore;
use driftroom_crypto::MasterKey;
use driftroom_db::MemStore;
use driftroom_server::registry::Registry;
use opendal::Operator;
use opendal::services::Memory;

/// A fixed, non-secret key for tests. Never use a hardcoded key like this
/// outside a test fixture.
#[must_use]
pub fn test_master_key() -> MasterKey {
    MasterKey::from_bytes([0x42; 32])
}

/// A fresh in-memory store, independent of any other test's state.
#[must_use]
pub fn test_store() -> MemStore {
    MemStore::default()
}

/// A fresh in-memory blob store backing both attachments and archives.
#[must_use]
pub fn test_blob() -> OpendalBlobStore {
    let op = Operator::new(Memory::default())
        .expect("memory operator never fails to build")
        .finish();
    OpendalBlobStore::new(op.clone(), op)
}

/// A fresh, empty connection registry.
#[must_use]
pub fn test_registry() -> Registry {
    Registry::new()
}
