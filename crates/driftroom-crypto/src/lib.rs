//! AEAD envelope encryption for `driftroom`.
//!
//! Two layers, both AES-256-GCM, both pure functions with no side effects:
//!
//! - [`wrap`]/[`unwrap`] seal a per-room key under the process-global master
//!   key for at-rest storage.
//! - [`encrypt_message`]/[`decrypt_message`] seal individual message bodies
//!   under a room key.
//!
//! Associated data is always empty; nonces are 96 bits drawn from an OS CSPRNG
//! and are never reused by construction (fresh draw per call). Key material
//! is zeroized on drop.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length in bytes of an AES-256-GCM key.
pub const KEY_LEN: usize = 32;
/// Length in bytes of the random nonce.
pub const NONCE_LEN: usize = 12;
/// Length in bytes of the authentication tag.
pub const TAG_LEN: usize = 16;

/// Placeholder substituted for a message body that fails to decrypt during
/// archival. The archival pipeline never aborts on a single bad row.
pub const DECRYPTION_FAILED_SENTINEL: &str = "[DECRYPTION_FAILED]";

/// Failure modes for the crypto kernel.
#[derive(Debug, Error)]
pub enum CryptoFailure {
    /// A supplied key was not exactly [`KEY_LEN`] bytes.
    #[error("key must be {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),
    /// AEAD authentication failed: wrong key, tampered ciphertext, or
    /// tampered tag.
    #[error("AEAD tag verification failed")]
    TagMismatch,
    /// The sealed blob was too short to contain a nonce.
    #[error("sealed data truncated: expected at least {NONCE_LEN} bytes, got {0}")]
    Truncated(usize),
}

/// A 256-bit process-global key that wraps per-room keys at rest.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    /// Builds a master key from exactly [`KEY_LEN`] raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decodes a master key from its standard base64 representation.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoFailure::InvalidKeyLength`] if the decoded value is
    /// not exactly [`KEY_LEN`] bytes. Malformed base64 is also reported as
    /// this variant since the caller cannot usefully distinguish the two.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoFailure> {
        use base64::Engine as _;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| CryptoFailure::InvalidKeyLength(0))?;
        let bytes: [u8; KEY_LEN] = raw
            .as_slice()
            .try_into()
            .map_err(|_| CryptoFailure::InvalidKeyLength(raw.len()))?;
        Ok(Self(bytes))
    }
}

/// A 256-bit key unique to one room, used to seal all of that room's
/// messages.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RoomKey([u8; KEY_LEN]);

// Written by hand instead of derived so the key bytes are never printed.
impl std::fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RoomKey").finish_non_exhaustive()
    }
}

impl RoomKey {
    /// Draws a fresh random room key from the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Builds a room key from exactly [`KEY_LEN`] raw bytes (used when
    /// reconstructing a key read back from [`unwrap`]).
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes, e.g. to base64-encode for the host/guest
    /// response body.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

fn draw_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Seals `room_key` under `master`, returning `nonce ‖ ciphertext`.
///
/// # Errors
///
/// Never fails in practice (the key is always the right length by
/// construction); returns `Result` for symmetry with [`unwrap`] and to leave
/// room for a future key-length check if `MasterKey` ever stops guaranteeing
/// its own size.
pub fn wrap(master: &MasterKey, room_key: &RoomKey) -> Result<Vec<u8>, CryptoFailure> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&master.0));
    let nonce = draw_nonce();
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: &room_key.0,
                aad: &[],
            },
        )
        .map_err(|_| CryptoFailure::TagMismatch)?;
    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Opens a blob previously produced by [`wrap`], recovering the room key.
///
/// # Errors
///
/// [`CryptoFailure::Truncated`] if `wrapped` is shorter than a nonce;
/// [`CryptoFailure::TagMismatch`] if the seal does not open under `master`.
pub fn unwrap(master: &MasterKey, wrapped: &[u8]) -> Result<RoomKey, CryptoFailure> {
    if wrapped.len() < NONCE_LEN {
        return Err(CryptoFailure::Truncated(wrapped.len()));
    }
    let (nonce, ciphertext) = wrapped.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&master.0));
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: &[],
            },
        )
        .map_err(|_| CryptoFailure::TagMismatch)?;
    let bytes: [u8; KEY_LEN] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| CryptoFailure::TagMismatch)?;
    Ok(RoomKey(bytes))
}

/// AEAD-seals `plaintext` under `room_key`, splitting the sealed output into
/// ciphertext and tag for separate-column storage.
///
/// # Errors
///
/// Never fails in practice; see [`wrap`].
pub fn encrypt_message(
    room_key: &RoomKey,
    plaintext: &str,
) -> Result<(Vec<u8>, [u8; NONCE_LEN], [u8; TAG_LEN]), CryptoFailure> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&room_key.0));
    let nonce = draw_nonce();
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext.as_bytes(),
                aad: &[],
            },
        )
        .map_err(|_| CryptoFailure::TagMismatch)?;
    let split_at = sealed
        .len()
        .checked_sub(TAG_LEN)
        .ok_or(CryptoFailure::Truncated(sealed.len()))?;
    let (ciphertext, tag) = sealed.split_at(split_at);
    let tag: [u8; TAG_LEN] = tag.try_into().map_err(|_| CryptoFailure::TagMismatch)?;
    Ok((ciphertext.to_vec(), nonce, tag))
}

/// Reassembles `ciphertext ‖ tag` and opens it under `room_key`.
///
/// # Errors
///
/// [`CryptoFailure::TagMismatch`] on tamper or wrong key. Callers in the
/// archival pipeline should catch this and substitute
/// [`DECRYPTION_FAILED_SENTINEL`] rather than aborting; live-path callers
/// should propagate it.
pub fn decrypt_message(
    room_key: &RoomKey,
    ciphertext: &[u8],
    nonce: &[u8],
    tag: &[u8],
) -> Result<String, CryptoFailure> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoFailure::Truncated(nonce.len()));
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&room_key.0));
    let mut full = Vec::with_capacity(ciphertext.len() + tag.len());
    full.extend_from_slice(ciphertext);
    full.extend_from_slice(tag);
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: &full,
                aad: &[],
            },
        )
        .map_err(|_| CryptoFailure::TagMismatch)?;
    String::from_utf8(plaintext).map_err(|_| CryptoFailure::TagMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_master() -> MasterKey {
        MasterKey::from_bytes([7u8; KEY_LEN])
    }

    #[test]
    fn wrap_unwrap_round_trip() {
        let master = test_master();
        let key = RoomKey::generate();
        let wrapped = wrap(&master, &key).expect("wrap");
        let recovered = unwrap(&master, &wrapped).expect("unwrap");
        assert_eq!(key.as_bytes(), recovered.as_bytes());
    }

    #[test]
    fn unwrap_rejects_truncated_blob() {
        let master = test_master();
        let err = unwrap(&master, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, CryptoFailure::Truncated(4)));
    }

    #[test]
    fn unwrap_rejects_tampered_tag() {
        let master = test_master();
        let key = RoomKey::generate();
        let mut wrapped = wrap(&master, &key).expect("wrap");
        let last = wrapped.len() - 1;
        wrapped[last] ^= 0xFF;
        assert!(matches!(
            unwrap(&master, &wrapped).unwrap_err(),
            CryptoFailure::TagMismatch
        ));
    }

    #[test]
    fn message_round_trip() {
        let key = RoomKey::generate();
        let (ct, nonce, tag) = encrypt_message(&key, "hello").expect("encrypt");
        let plaintext = decrypt_message(&key, &ct, &nonce, &tag).expect("decrypt");
        assert_eq!(plaintext, "hello");
    }

    #[test]
    fn message_tamper_fails_closed() {
        let key = RoomKey::generate();
        let (mut ct, nonce, tag) = encrypt_message(&key, "hello").expect("encrypt");
        ct[0] ^= 0x01;
        assert!(matches!(
            decrypt_message(&key, &ct, &nonce, &tag).unwrap_err(),
            CryptoFailure::TagMismatch
        ));
    }

    proptest! {
        #[test]
        fn message_round_trip_arbitrary(plaintext in "\\PC*") {
            let key = RoomKey::generate();
            let (ct, nonce, tag) = encrypt_message(&key, &plaintext).expect("encrypt");
            let recovered = decrypt_message(&key, &ct, &nonce, &tag).expect("decrypt");
            prop_assert_eq!(recovered, plaintext);
        }

        #[test]
        fn wrap_round_trip_arbitrary(key_bytes in proptest::array::uniform32(any::<u8>())) {
            let master = test_master();
            let key = RoomKey::from_bytes(key_bytes);
            let wrapped = wrap(&master, &key).expect("wrap");
            let recovered = unwrap(&master, &wrapped).expect("unwrap");
            prop_assert_eq!(recovered.as_bytes(), key.as_bytes());
        }
    }
}
