#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`config`]: Store configuration (`VulnStoreConfig`, builder)
//! - [`storage`]: Integrity verification and scratch storage
//!   (`verify_integrity`, `ScratchStorage`, `ChecksumWriter`)
//! - [`store`]: Two-slot database store manager (`VulnDbStore`, `Slot`,
//!   `SessionFactory`, query row types)
//! - [`feed`]: Collaborator interfaces (`FeedMetadataStore`,
//!   `ArchiveObjectStore`, `ActiveDbDescriptor`)
//! - [`sync`]: Sync decision and locking protocol (`DbSyncManager`)
//! - [`scanner`]: External scanner subprocess adapter (`ScannerCommand`)
//! - [`service`]: Periodic sync service (`SyncService`, `Pipeline` impl)
//!
//! # Architecture
//!
//! ```text
//! FeedMetadataStore --> DbSyncManager --(stale?)--> ArchiveObjectStore
//!                            |                            |
//!                       sync mutex                   archive bytes
//!                            |                            |
//!                            v                            v
//!                       VulnDbStore <-- verified file -- ScratchStorage
//!                      (write lock, unpack, swap)
//!                            |
//!              +-------------+--------------+
//!              |                            |
//!        query_* (read lock)      ScannerCommand (read lock, env)
//! ```

pub mod config;
pub mod feed;
pub mod scanner;
pub mod service;
pub mod storage;
pub mod store;
pub mod sync;

// --- Public API Re-exports ---

// Configuration
pub use config::{VulnStoreConfig, VulnStoreConfigBuilder};

// Storage
pub use storage::{ChecksumWriter, ScratchStorage, checksum_string, verify_integrity};

// Store
pub use store::{
    AffectedPackageRow, DbMetadata, EngineMetadata, RecordSourceCount, SessionFactory, Slot,
    VulnDbStore, VulnerabilityJoinRow, VulnerabilityMetadataRow,
};

// Feed collaborators
pub use feed::{ActiveDbDescriptor, ArchiveObjectStore, FeedMetadataStore, parse_object_url};

// Sync
pub use sync::{DbSyncManager, LOCK_ACQUISITION_TIMEOUT_SECS};

// Scanner adapter
pub use scanner::{ScannerCommand, ScannerVersion};

// Service
pub use service::{SyncService, SyncServiceBuilder};
