//! Feed metadata collaborator interfaces.
//!
//! The descriptor of the globally active db generation and the archive
//! bytes both come from external collaborators. This module defines the
//! two narrow traits the sync manager consumes, plus the descriptor value
//! type. Production implementations are provided by the embedding daemon;
//! tests use in-memory fakes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   DbSyncManager  │
//! └────┬────────┬────┘
//!      │        │
//!      ▼        ▼
//! ┌──────────┐ ┌───────────────┐
//! │FeedMeta- │ │ArchiveObject- │  (traits)
//! │dataStore │ │Store          │
//! └──────────┘ └───────────────┘
//!      │             │
//!      ▼             ▼
//!  shared db     object store
//! ```

use serde::{Deserialize, Serialize};

use gantry_core::error::SyncError;

/// Identifies one globally active db generation.
///
/// Created when an archive is unpacked and immutable afterwards; a sync
/// replaces it with a newer descriptor rather than mutating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveDbDescriptor {
    /// Content hash of the distributed archive, also used as the on-disk
    /// directory key.
    pub archive_checksum: String,
    /// Schema version selecting the on-disk file layout.
    pub schema_version: String,
    /// Timestamp from the upstream build.
    pub built_at: Option<String>,
    /// Hash of the decompressed vulnerability file itself.
    pub db_checksum: Option<String>,
    /// Archive object store URL of the form `.../<bucket>/<key>`.
    pub object_url: String,
}

/// Shared feed-metadata store.
///
/// When multiple descriptors are marked active, the most recently created
/// one wins (creation timestamp descending). No active descriptor fails
/// with [`SyncError::NoActiveDatabase`].
pub trait FeedMetadataStore: Send + Sync {
    /// Fetches the most recent active db descriptor.
    fn most_recent_active(
        &self,
    ) -> impl Future<Output = Result<ActiveDbDescriptor, SyncError>> + Send;
}

/// Archive object store.
pub trait ArchiveObjectStore: Send + Sync {
    /// Fetches raw object bytes by bucket and key.
    fn get_raw_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<Vec<u8>, SyncError>> + Send;
}

/// Parses bucket and key from a descriptor's object URL.
///
/// The last two path segments of the URL are `<bucket>/<key>`.
pub fn parse_object_url(url: &str) -> Result<(String, String), SyncError> {
    let mut segments = url.trim_end_matches('/').rsplit('/');
    let key = segments.next().filter(|s| !s.is_empty());
    let bucket = segments.next().filter(|s| !s.is_empty());
    match (bucket, key) {
        (Some(bucket), Some(key)) => Ok((bucket.to_owned(), key.to_owned())),
        _ => Err(SyncError::Failed {
            reason: format!("cannot parse bucket and key from object url '{url}'"),
        }),
    }
}
