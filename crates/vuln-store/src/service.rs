//! 동기화 서비스 — 주기적 동기화 태스크의 생명주기 관리
//!
//! [`SyncService`]는 core의 [`Pipeline`] trait을 구현하여 내장 데몬에서
//! 다른 모듈과 동일한 생명주기로 관리됩니다. 설정된 간격마다
//! [`DbSyncManager::run_sync`]를 호출하고, DB가 실제로 교체되면
//! [`SyncEvent`]를 발행합니다. 동기화 실패는 로그만 남기고 다음 틱에서
//! 재시도됩니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use gantry_core::error::{GantryError, PipelineError};
use gantry_core::event::SyncEvent;
use gantry_core::pipeline::{HealthStatus, Pipeline};

use crate::config::VulnStoreConfig;
use crate::feed::{ArchiveObjectStore, FeedMetadataStore};
use crate::store::{Slot, VulnDbStore};
use crate::sync::DbSyncManager;

/// 서비스 실행 상태
#[derive(Debug, Clone, PartialEq, Eq)]
enum ServiceState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 주기적 DB 동기화 서비스
///
/// # 재시작 제한
///
/// `stop()` 후 재시작이 필요하면 [`SyncServiceBuilder`]로 새 인스턴스를
/// 생성해야 합니다.
pub struct SyncService<F, O> {
    /// 스토어 설정
    config: VulnStoreConfig,
    /// 동기화 매니저 (공유)
    manager: Arc<DbSyncManager<F, O>>,
    /// 현재 상태
    state: ServiceState,
    /// 백그라운드 태스크 핸들
    tasks: Vec<tokio::task::JoinHandle<()>>,
    /// 동기화 이벤트 전송 채널
    sync_tx: mpsc::Sender<SyncEvent>,
    /// 완료된 교체 수
    syncs_completed: Arc<AtomicU64>,
    /// production DB가 초기화되었는지 여부
    db_synced: Arc<AtomicBool>,
}

impl<F, O> SyncService<F, O>
where
    F: FeedMetadataStore + 'static,
    O: ArchiveObjectStore + 'static,
{
    /// 현재 상태명을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            ServiceState::Initialized => "initialized",
            ServiceState::Running => "running",
            ServiceState::Stopped => "stopped",
        }
    }

    /// 완료된 DB 교체 수를 반환합니다.
    pub fn syncs_completed(&self) -> u64 {
        self.syncs_completed.load(Ordering::Relaxed)
    }

    /// 동기화 매니저에 대한 참조
    pub fn manager(&self) -> &Arc<DbSyncManager<F, O>> {
        &self.manager
    }

    /// 단일 동기화를 수동으로 수행합니다.
    ///
    /// 주기 태스크와 같은 매니저를 거치므로 동시 호출은 동기화 뮤텍스로
    /// 직렬화됩니다.
    pub async fn sync_once(
        &self,
        local_archive: Option<&std::path::Path>,
    ) -> Result<bool, gantry_core::error::SyncError> {
        let updated = self.manager.run_sync(local_archive).await?;
        if updated {
            self.syncs_completed.fetch_add(1, Ordering::Relaxed);
            self.db_synced.store(true, Ordering::Relaxed);
            emit_sync_event(&self.manager, &self.sync_tx).await;
        }
        Ok(updated)
    }
}

/// 교체 완료 후 현재 production 메타데이터로 이벤트를 발행합니다.
async fn emit_sync_event<F, O>(
    manager: &Arc<DbSyncManager<F, O>>,
    sync_tx: &mpsc::Sender<SyncEvent>,
) where
    F: FeedMetadataStore,
    O: ArchiveObjectStore,
{
    let metadata = match manager.store().engine_metadata(Slot::Production).await {
        Ok(Some(metadata)) => metadata,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "cannot read production engine metadata for sync event");
            return;
        }
    };
    let event = SyncEvent::new(metadata.archive_checksum, metadata.schema_version);
    if let Err(e) = sync_tx.try_send(event) {
        warn!(error = %e, "failed to send sync event (channel full or closed)");
    }
}

impl<F, O> Pipeline for SyncService<F, O>
where
    F: FeedMetadataStore + 'static,
    O: ArchiveObjectStore + 'static,
{
    async fn start(&mut self) -> Result<(), GantryError> {
        if self.state == ServiceState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!("starting vulnerability db sync service");

        if self.config.sync_interval_secs > 0 {
            let interval_secs = self.config.sync_interval_secs;
            let manager = Arc::clone(&self.manager);
            let sync_tx = self.sync_tx.clone();
            let syncs_completed = Arc::clone(&self.syncs_completed);
            let db_synced = Arc::clone(&self.db_synced);

            let task = tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));

                info!(interval_secs, "periodic vulnerability db sync task started");

                loop {
                    interval.tick().await;

                    match manager.run_sync(None).await {
                        Ok(true) => {
                            syncs_completed.fetch_add(1, Ordering::Relaxed);
                            db_synced.store(true, Ordering::Relaxed);
                            info!("vulnerability db updated by periodic sync");
                            emit_sync_event(&manager, &sync_tx).await;
                        }
                        Ok(false) => {
                            debug!("vulnerability db already current, sync skipped");
                            db_synced.store(true, Ordering::Relaxed);
                        }
                        Err(e) => {
                            // 다음 틱에서 재시도
                            warn!(error = %e, "periodic vulnerability db sync failed");
                        }
                    }
                }
            });

            self.tasks.push(task);
            info!(interval_secs, "periodic sync task spawned");
        }

        self.state = ServiceState::Running;
        info!("vulnerability db sync service started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), GantryError> {
        if self.state != ServiceState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping vulnerability db sync service");

        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }

        self.state = ServiceState::Stopped;
        info!("vulnerability db sync service stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            ServiceState::Running => {
                if self.db_synced.load(Ordering::Relaxed) {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded(
                        "vulnerability db not yet synchronized".to_owned(),
                    )
                }
            }
            ServiceState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            ServiceState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// [`SyncService`] 빌더
///
/// 스토어와 두 협력자는 필수이며, 설정과 이벤트 채널은 선택입니다.
pub struct SyncServiceBuilder<F, O> {
    config: VulnStoreConfig,
    store: Arc<VulnDbStore>,
    feed_store: F,
    object_store: O,
    sync_tx: Option<mpsc::Sender<SyncEvent>>,
    sync_channel_capacity: usize,
}

impl<F, O> SyncServiceBuilder<F, O>
where
    F: FeedMetadataStore + 'static,
    O: ArchiveObjectStore + 'static,
{
    /// 필수 의존성으로 새 빌더를 생성합니다.
    pub fn new(store: Arc<VulnDbStore>, feed_store: F, object_store: O) -> Self {
        Self {
            config: VulnStoreConfig::default(),
            store,
            feed_store,
            object_store,
            sync_tx: None,
            sync_channel_capacity: 16,
        }
    }

    /// 스토어 설정을 지정합니다.
    pub fn config(mut self, config: VulnStoreConfig) -> Self {
        self.config = config;
        self
    }

    /// 외부 이벤트 전송 채널을 설정합니다.
    ///
    /// 설정하지 않으면 빌더가 새 채널을 생성합니다.
    pub fn sync_sender(mut self, tx: mpsc::Sender<SyncEvent>) -> Self {
        self.sync_tx = Some(tx);
        self
    }

    /// 이벤트 채널 용량을 설정합니다 (외부 채널 미사용 시).
    pub fn sync_channel_capacity(mut self, capacity: usize) -> Self {
        self.sync_channel_capacity = capacity;
        self
    }

    /// 서비스를 빌드합니다.
    ///
    /// # Returns
    ///
    /// - `SyncService`: 서비스 인스턴스
    /// - `Option<mpsc::Receiver<SyncEvent>>`: 이벤트 수신 채널
    ///   (외부 sync_sender를 설정한 경우 None)
    pub fn build(
        self,
    ) -> Result<(SyncService<F, O>, Option<mpsc::Receiver<SyncEvent>>), GantryError> {
        self.config.validate()?;

        let (sync_tx, sync_rx) = if let Some(tx) = self.sync_tx {
            (tx, None)
        } else {
            let (tx, rx) = mpsc::channel(self.sync_channel_capacity);
            (tx, Some(rx))
        };

        let manager = Arc::new(DbSyncManager::with_lock_timeout(
            self.store,
            self.feed_store,
            self.object_store,
            std::time::Duration::from_secs(self.config.sync_lock_timeout_secs),
        ));

        let service = SyncService {
            config: self.config,
            manager,
            state: ServiceState::Initialized,
            tasks: Vec::new(),
            sync_tx,
            syncs_completed: Arc::new(AtomicU64::new(0)),
            db_synced: Arc::new(AtomicBool::new(false)),
        };

        Ok((service, sync_rx))
    }
}
