//! Blob storage for archives and upload attachments, behind a uniform
//! [`opendal`] operator so a single implementation serves both an S3-backed
//! production deployment and a filesystem-backed development one.

use std::time::Duration;

use driftroom_core::ApiError;
use opendal::{Operator, Scheme};
use tracing::debug;

const PUT_URL_TTL: Duration = Duration::from_secs(10 * 60);
const GET_URL_TTL: Duration = Duration::from_secs(60 * 60);

fn opendal_err(err: opendal::Error) -> ApiError {
    ApiError::StorageFailure(err.to_string())
}

/// Time-limited object storage for user attachments and room archives
/// (§4.C). Buckets/prefixes are provisioned lazily on first use; their
/// absence is not an error.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// A presigned PUT URL valid for 10 minutes, for the client to upload
    /// an attachment directly.
    async fn presigned_put(&self, object_key: &str) -> Result<String, ApiError>;

    /// A presigned GET URL valid for 1 hour, for the client to download an
    /// attachment.
    async fn presigned_get(&self, object_key: &str) -> Result<String, ApiError>;

    /// Whether an attachment object exists (used to confirm uploads landed).
    async fn object_exists(&self, object_key: &str) -> Result<bool, ApiError>;

    /// Uploads a finished archive document.
    async fn put_archive(&self, key: &str, json_bytes: Vec<u8>) -> Result<(), ApiError>;

    /// Fetches a previously stored archive, if present.
    async fn get_archive(&self, key: &str) -> Result<Option<Vec<u8>>, ApiError>;
}

/// An [`opendal`]-backed [`BlobStore`] with separate operators for
/// attachments and archives, so they can live in different buckets (or
/// different backends entirely — S3 in production, the local filesystem in
/// development) while sharing one trait implementation.
#[derive(Clone)]
pub struct OpendalBlobStore {
    attachments: Operator,
    archives: Operator,
}

impl OpendalBlobStore {
    /// Builds a store from two already-constructed operators.
    #[must_use]
    pub fn new(attachments: Operator, archives: Operator) -> Self {
        Self {
            attachments,
            archives,
        }
    }

    /// Ensures the root prefix of both operators is reachable, creating it
    /// when the backend supports directories (e.g. the local filesystem).
    /// S3 operators report this as unsupported, which is not an error: the
    /// bucket is assumed to already exist, matching §4.C's "absence is
    /// created, not an error" for backends that allow it.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::StorageFailure`] on any failure other than the
    /// operation being unsupported by the backend.
    pub async fn ensure_ready(&self) -> Result<(), ApiError> {
        for (label, op) in [("attachments", &self.attachments), ("archives", &self.archives)] {
            match op.create_dir("/").await {
                Ok(()) => {}
                Err(err) if err.kind() == opendal::ErrorKind::Unsupported => {
                    debug!(bucket = label, "backend does not support lazy dir creation, assuming it exists");
                }
                Err(err) => return Err(opendal_err(err)),
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl BlobStore for OpendalBlobStore {
    async fn presigned_put(&self, object_key: &str) -> Result<String, ApiError> {
        let request = self
            .attachments
            .presign_write(object_key, PUT_URL_TTL)
            .await
            .map_err(opendal_err)?;
        Ok(request.uri().to_string())
    }

    async fn presigned_get(&self, object_key: &str) -> Result<String, ApiError> {
        let request = self
            .attachments
            .presign_read(object_key, GET_URL_TTL)
            .await
            .map_err(opendal_err)?;
        Ok(request.uri().to_string())
    }

    async fn object_exists(&self, object_key: &str) -> Result<bool, ApiError> {
        self.attachments
            .exists(object_key)
            .await
            .map_err(opendal_err)
    }

    async fn put_archive(&self, key: &str, json_bytes: Vec<u8>) -> Result<(), ApiError> {
        self.archives
            .write(key, json_bytes)
            .await
            .map_err(opendal_err)?;
        Ok(())
    }

    async fn get_archive(&self, key: &str) -> Result<Option<Vec<u8>>, ApiError> {
        match self.archives.read(key).await {
            Ok(buf) => Ok(Some(buf.to_vec())),
            Err(err) if err.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(opendal_err(err)),
        }
    }
}

/// Which backend scheme an operator was built from, used only for log
/// context at startup.
#[must_use]
pub fn scheme_name(scheme: Scheme) -> &'static str {
    match scheme {
        Scheme::S3 => "s3",
        Scheme::Fs => "fs",
        Scheme::Memory => "memory",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opendal::services::Memory;

    fn memory_store() -> OpendalBlobStore {
        let op = Operator::new(Memory::default()).unwrap().finish();
        OpendalBlobStore::new(op.clone(), op)
    }

    #[tokio::test]
    async fn archive_round_trips() {
        let store = memory_store();
        store
            .put_archive("archives/Ab12/x.json", b"{\"ok\":true}".to_vec())
            .await
            .unwrap();
        let read_back = store.get_archive("archives/Ab12/x.json").await.unwrap();
        assert_eq!(read_back, Some(b"{\"ok\":true}".to_vec()));
    }

    #[tokio::test]
    async fn missing_archive_is_none_not_error() {
        let store = memory_store();
        let read_back = store.get_archive("archives/missing.json").await.unwrap();
        assert!(read_back.is_none());
    }

    #[tokio::test]
    async fn object_exists_reflects_writes() {
        let store = memory_store();
        assert!(!store.object_exists("room/a.png").await.unwrap());
        store
            .attachments
            .write("room/a.png", b"data".to_vec())
            .await
            .unwrap();
        assert!(store.object_exists("room/a.png").await.unwrap());
    }
}
