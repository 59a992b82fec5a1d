//! DB 동기화 판단과 잠금 프로토콜
//!
//! [`DbSyncManager`]는 로컬 DB가 전역 활성 버전보다 뒤처졌는지 판단하고,
//! 필요할 때 정확히 한 번만 비용이 큰 교체를 수행합니다.
//!
//! # 프로토콜
//!
//! 1. **Probe** (잠금 없음): 활성 기술자와 로컬 체크섬 비교. 최신이면 종료.
//! 2. **Acquire**: 타임아웃 바운드 동기화 뮤텍스 획득.
//! 3. **Re-probe** (잠금 하): 대기 중 상태가 바뀌었을 수 있으므로 재비교.
//!    최신이면 잠금 해제 후 종료 — 경쟁한 두 번째 스레드는 여기서
//!    싸게 no-op이 됩니다.
//! 4. **Execute**: 아카이브 획득(로컬 파일 또는 오브젝트 저장소), 무결성
//!    검증, production 슬롯 교체.
//!
//! 이중 확인 덕분에 흔한 "이미 최신" 경로는 잠금 뒤로 직렬화되지
//! 않습니다. 이 뮤텍스는 프로세스 내부 경쟁만 중재합니다. 호스트당 쓰기
//! 프로세스는 하나라는 전제이며, 여러 프로세스가 동시에 쓰는 경우는
//! 다루지 않습니다.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::Mutex;
use tracing::{error, info};

use gantry_core::error::SyncError;
use gantry_core::metrics::{
    LABEL_RESULT, VULN_STORE_SYNCS_SKIPPED_TOTAL, VULN_STORE_SYNCS_TOTAL,
};

use crate::feed::{ActiveDbDescriptor, ArchiveObjectStore, FeedMetadataStore, parse_object_url};
use crate::storage::{ScratchStorage, verify_integrity};
use crate::store::{Slot, VulnDbStore};

/// 동기화 뮤텍스 기본 획득 타임아웃 (초)
pub const LOCK_ACQUISITION_TIMEOUT_SECS: u64 = 60;

/// 활성 기술자와 로컬 체크섬을 비교해 동기화 필요 여부를 판단합니다.
///
/// 활성 체크섬이 비어 있거나 로컬과 같으면 동기화가 불필요합니다.
fn is_sync_necessary(active: &ActiveDbDescriptor, local_checksum: Option<&str>) -> bool {
    if active.archive_checksum.is_empty() || local_checksum == Some(active.archive_checksum.as_str())
    {
        info!("no vulnerability db sync needed at this time");
        return false;
    }
    true
}

/// DB 동기화 매니저
///
/// 프로세스 시작 시 스토어와 협력자를 주입받아 한 번 생성되는 서비스
/// 객체입니다.
pub struct DbSyncManager<F, O> {
    store: Arc<VulnDbStore>,
    feed_store: F,
    object_store: O,
    sync_lock: Mutex<()>,
    lock_timeout: Duration,
}

impl<F, O> DbSyncManager<F, O>
where
    F: FeedMetadataStore,
    O: ArchiveObjectStore,
{
    /// 기본 잠금 타임아웃으로 매니저를 생성합니다.
    pub fn new(store: Arc<VulnDbStore>, feed_store: F, object_store: O) -> Self {
        Self::with_lock_timeout(
            store,
            feed_store,
            object_store,
            Duration::from_secs(LOCK_ACQUISITION_TIMEOUT_SECS),
        )
    }

    /// 잠금 타임아웃을 지정하여 매니저를 생성합니다.
    pub fn with_lock_timeout(
        store: Arc<VulnDbStore>,
        feed_store: F,
        object_store: O,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            store,
            feed_store,
            object_store,
            sync_lock: Mutex::new(()),
            lock_timeout,
        }
    }

    /// 관리 중인 스토어
    pub fn store(&self) -> &Arc<VulnDbStore> {
        &self.store
    }

    /// 필요한 경우 로컬 DB를 전역 활성 버전으로 교체합니다.
    ///
    /// `local_archive`가 주어지면 네트워크 대신 해당 파일을 사용합니다
    /// (테스트와 운영자 수동 공급 경로).
    ///
    /// DB가 교체되었으면 `true`, 이미 최신이어서 건너뛰었으면 `false`를
    /// 반환합니다.
    pub async fn run_sync(&self, local_archive: Option<&Path>) -> Result<bool, SyncError> {
        // 잠금 밖에서 1차 확인 — 최신인 동기 경로가 잠금에 막히지 않도록
        let active = self.feed_store.most_recent_active().await?;
        let local_checksum = self.local_checksum().await;
        if !is_sync_necessary(&active, local_checksum.as_deref()) {
            counter!(VULN_STORE_SYNCS_SKIPPED_TOTAL).increment(1);
            return Ok(false);
        }

        let _guard = tokio::time::timeout(self.lock_timeout, self.sync_lock.lock())
            .await
            .map_err(|_| SyncError::LockAcquisitionTimeout {
                timeout_secs: self.lock_timeout.as_secs(),
            })?;

        // 잠금 대기 중 상태가 바뀌었을 수 있으므로 재확인
        let active = self.feed_store.most_recent_active().await?;
        let local_checksum = self.local_checksum().await;
        if !is_sync_necessary(&active, local_checksum.as_deref()) {
            counter!(VULN_STORE_SYNCS_SKIPPED_TOTAL).increment(1);
            return Ok(false);
        }

        info!(
            local = ?local_checksum,
            active = %active.archive_checksum,
            "updating local vulnerability db to the new globally active db"
        );

        match self.execute_update(&active, local_archive).await {
            Ok(()) => {
                counter!(VULN_STORE_SYNCS_TOTAL, LABEL_RESULT => "success").increment(1);
                Ok(true)
            }
            Err(e) => {
                counter!(VULN_STORE_SYNCS_TOTAL, LABEL_RESULT => "failure").increment(1);
                error!(error = %e, "vulnerability db sync failed");
                Err(e)
            }
        }
    }

    async fn local_checksum(&self) -> Option<String> {
        match self.store.current_checksum(Slot::Production).await {
            Ok(checksum) => checksum,
            Err(e) => {
                error!(error = %e, "failed to read local vulnerability db checksum");
                None
            }
        }
    }

    /// 아카이브를 획득/검증하고 production 슬롯을 교체합니다.
    ///
    /// 잠금 획득 이후의 모든 실패는 [`SyncError::Failed`]로 래핑됩니다.
    async fn execute_update(
        &self,
        active: &ActiveDbDescriptor,
        local_archive: Option<&Path>,
    ) -> Result<(), SyncError> {
        if let Some(archive) = local_archive {
            self.store
                .update_database(
                    archive,
                    &active.archive_checksum,
                    &active.schema_version,
                    Slot::Production,
                )
                .await
                .map_err(wrap)?;
            return Ok(());
        }

        let (bucket, key) = parse_object_url(&active.object_url)?;
        let document = self.object_store.get_raw_object(&bucket, &key).await?;

        // 해제 전에 아카이브 바이트 무결성 검증
        verify_integrity(&document, &active.archive_checksum).map_err(wrap)?;

        let scratch = ScratchStorage::new().map_err(wrap)?;
        let archive_path = scratch
            .create_file(&active.archive_checksum, &document)
            .map_err(wrap)?;
        self.store
            .update_database(
                &archive_path,
                &active.archive_checksum,
                &active.schema_version,
                Slot::Production,
            )
            .await
            .map_err(wrap)?;
        // scratch는 여기서 drop되어 임시 파일이 정리됨
        Ok(())
    }
}

fn wrap(e: gantry_core::error::StoreError) -> SyncError {
    SyncError::Failed {
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(checksum: &str) -> ActiveDbDescriptor {
        ActiveDbDescriptor {
            archive_checksum: checksum.to_owned(),
            schema_version: "5".to_owned(),
            built_at: None,
            db_checksum: None,
            object_url: "http://host/objects/bucket/key".to_owned(),
        }
    }

    // 동기화 판단 테이블: (local, active) -> 필요 여부
    #[test]
    fn sync_not_needed_when_both_empty() {
        assert!(!is_sync_necessary(&descriptor(""), None));
    }

    #[test]
    fn sync_not_needed_when_checksums_equal() {
        assert!(!is_sync_necessary(&descriptor("a"), Some("a")));
    }

    #[test]
    fn sync_needed_when_checksums_differ() {
        assert!(is_sync_necessary(&descriptor("b"), Some("a")));
    }

    #[test]
    fn sync_needed_when_local_missing() {
        assert!(is_sync_necessary(&descriptor("b"), None));
    }

    #[test]
    fn sync_not_needed_when_active_empty_regardless_of_local() {
        assert!(!is_sync_necessary(&descriptor(""), Some("a")));
    }
}
