//! 취약점 DB 스토어 매니저 — 두 슬롯의 수명주기와 조회
//!
//! [`VulnDbStore`]는 production/staging 두 슬롯에 각각 하나씩, 최대 두 개의
//! DB 세대를 관리합니다. 슬롯 상태(디렉토리, 스키마 버전, 세션 팩토리)는
//! 프로세스 전역 reader/writer 잠금 하나로 보호됩니다. 조회는 공유 읽기
//! 잠금, [`VulnDbStore::update_database`]는 배타 쓰기 잠금을 사용하며,
//! 두 획득 모두 타임아웃으로 제한됩니다.
//!
//! # 교체 순서 보장
//!
//! 슬롯의 세 필드는 아카이브 해제와 메타데이터 기록이 전부 끝난 뒤
//! 마지막에 교체됩니다. 교체 이전에 세션 팩토리를 복제해 간 reader는
//! 이전 세대 파일을 계속 사용합니다. 이전 세대 디렉토리는 교체 시점에
//! 삭제되지 않으며, 회수는 명시적인 [`VulnDbStore::remove_db_dir`]입니다.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

use gantry_core::error::StoreError;
use gantry_core::metrics::{LABEL_SLOT, VULN_STORE_QUERIES_TOTAL, VULN_STORE_UPDATE_DURATION_SECONDS};

use crate::config::VulnStoreConfig;
use crate::scanner::{ScannerCommand, ScannerVersion};

/// 해제된 DB 디렉토리 안의 취약점 DB 파일명
pub const VULNERABILITY_FILE_NAME: &str = "vulnerability.db";
/// 업스트림 메타데이터 파일명
pub const METADATA_FILE_NAME: &str = "metadata.json";
/// 엔진이 기록하는 메타데이터 파일명
pub const ENGINE_METADATA_FILE_NAME: &str = "engine_metadata.json";

/// 업스트림 DB의 affected-package 테이블명
const VULNERABILITY_TABLE: &str = "vulnerability";
/// 업스트림 DB의 vulnerability-metadata 테이블명
const VULNERABILITY_METADATA_TABLE: &str = "vulnerability_metadata";

/// 조회 결과에 붙는 피드 이름
pub const VULNERABILITIES_FEED: &str = "vulnerabilities";

/// DB 슬롯 식별자
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// 스캔 쿼리를 서비스하는 현재 DB
    Production,
    /// 승격 전 검증 중인 후보 DB
    Staging,
}

impl Slot {
    /// 슬롯 이름 문자열
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 짧은 조회 세션을 여는 팩토리
///
/// 해제된 `vulnerability.db` 파일 경로를 보유하며, 세션마다 읽기 전용
/// SQLite 연결을 새로 엽니다. DB 파일은 업스트림에서만 생성되므로 쓰기
/// 트랜잭션 관리가 필요 없습니다.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    db_file: PathBuf,
}

impl SessionFactory {
    fn new(db_file: PathBuf) -> Self {
        Self { db_file }
    }

    /// 이 팩토리가 가리키는 DB 파일 경로
    pub fn db_file(&self) -> &Path {
        &self.db_file
    }

    /// 읽기 전용 조회 세션을 엽니다.
    pub fn open_session(&self) -> Result<Connection, StoreError> {
        Connection::open_with_flags(
            &self.db_file,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::Io {
            path: self.db_file.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// 엔진이 기록하는 DB 세대 메타데이터 (`engine_metadata.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineMetadata {
    /// 배포 아카이브의 체크섬 (디렉토리 키)
    pub archive_checksum: String,
    /// 압축 해제된 DB 파일 자체의 체크섬 (업스트림 metadata.json에서 파싱)
    pub db_checksum: Option<String>,
    /// 스키마 버전
    pub schema_version: String,
}

/// 업스트림이 제공하는 DB 메타데이터 (`metadata.json`, 읽기 전용)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbMetadata {
    /// 업스트림 빌드 시각
    #[serde(default)]
    pub built: Option<String>,
    /// 업스트림 스키마 버전
    #[serde(default)]
    pub version: Option<serde_json::Value>,
    /// 압축 해제된 DB 파일의 체크섬
    #[serde(default)]
    pub checksum: Option<String>,
}

/// affected-package 테이블의 한 행
///
/// `cpes` / `related_vulnerabilities` / `fixed_in_versions` / `advisories`
/// 컬럼은 직렬화된 JSON 문자열입니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffectedPackageRow {
    pub id: String,
    pub package_name: Option<String>,
    pub namespace: String,
    pub version_constraint: Option<String>,
    pub version_format: Option<String>,
    pub cpes: Option<String>,
    pub related_vulnerabilities: Option<String>,
    pub fixed_in_versions: Option<String>,
    pub fix_state: Option<String>,
    pub advisories: Option<String>,
}

impl AffectedPackageRow {
    /// `related_vulnerabilities` 컬럼을 JSON으로 역직렬화합니다.
    pub fn deserialized_related_vulnerabilities(&self) -> serde_json::Value {
        deserialize_column(self.related_vulnerabilities.as_deref())
    }

    /// `fixed_in_versions` 컬럼을 JSON으로 역직렬화합니다.
    pub fn deserialized_fixed_in_versions(&self) -> serde_json::Value {
        deserialize_column(self.fixed_in_versions.as_deref())
    }
}

/// vulnerability-metadata 테이블의 한 행
///
/// `urls` / `cvss` 컬럼은 직렬화된 JSON 문자열입니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VulnerabilityMetadataRow {
    pub id: String,
    pub namespace: String,
    pub data_source: Option<String>,
    pub record_source: Option<String>,
    pub severity: Option<String>,
    pub urls: Option<String>,
    pub description: Option<String>,
    pub cvss: Option<String>,
}

impl VulnerabilityMetadataRow {
    /// `urls` 컬럼을 JSON으로 역직렬화합니다.
    pub fn deserialized_urls(&self) -> serde_json::Value {
        deserialize_column(self.urls.as_deref())
    }

    /// `cvss` 컬럼을 JSON으로 역직렬화합니다.
    pub fn deserialized_cvss(&self) -> serde_json::Value {
        deserialize_column(self.cvss.as_deref())
    }
}

fn deserialize_column(raw: Option<&str>) -> serde_json::Value {
    match raw {
        Some(text) if !text.is_empty() => {
            serde_json::from_str(text).unwrap_or(serde_json::Value::Null)
        }
        _ => serde_json::Value::Null,
    }
}

/// left outer join 조회 결과의 한 행
///
/// 취약점은 0개 이상의 패키지에 영향을 줄 수 있으므로, 영향받는 패키지가
/// 없는 취약점은 `package`가 `None`인 행으로 나타납니다.
#[derive(Debug, Clone)]
pub struct VulnerabilityJoinRow {
    /// affected-package 측 (outer join의 null 측일 수 있음)
    pub package: Option<AffectedPackageRow>,
    /// vulnerability-metadata 측 (항상 존재)
    pub metadata: VulnerabilityMetadataRow,
}

/// 네임스페이스별 레코드 수
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSourceCount {
    /// 피드 이름 (항상 `vulnerabilities`)
    pub feed: String,
    /// 네임스페이스 (피드 그룹)
    pub group: String,
    /// 레코드 수
    pub count: u64,
    /// 해당 슬롯 DB의 업스트림 빌드 시각
    pub last_synced: Option<String>,
}

/// 슬롯 하나의 상태 — 세 필드는 교체 시점에 함께 갱신됩니다.
#[derive(Debug, Default, Clone)]
struct SlotState {
    dir: Option<PathBuf>,
    version: Option<String>,
    sessions: Option<SessionFactory>,
}

/// 두 슬롯 전체 — reader/writer 잠금이 이 값을 보호합니다.
#[derive(Debug, Default)]
struct Slots {
    production: SlotState,
    staging: SlotState,
}

impl Slots {
    fn slot(&self, slot: Slot) -> &SlotState {
        match slot {
            Slot::Production => &self.production,
            Slot::Staging => &self.staging,
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut SlotState {
        match slot {
            Slot::Production => &mut self.production,
            Slot::Staging => &mut self.staging,
        }
    }
}

/// 취약점 DB 스토어 매니저
///
/// 프로세스 시작 시 한 번 생성되어 `Arc`로 공유되는 서비스 객체입니다.
pub struct VulnDbStore {
    /// DB 세대가 보관되는 관리 디렉토리
    db_dir: PathBuf,
    /// 두 슬롯을 함께 보호하는 reader/writer 잠금
    lock: RwLock<Slots>,
    /// 읽기/쓰기 잠금 획득 타임아웃
    lock_timeout: Duration,
}

impl VulnDbStore {
    /// 설정으로부터 스토어를 생성합니다. 슬롯은 모두 비어 있습니다.
    pub fn new(config: &VulnStoreConfig) -> Self {
        Self {
            db_dir: PathBuf::from(&config.db_dir),
            lock: RwLock::new(Slots::default()),
            lock_timeout: Duration::from_secs(config.lock_timeout_secs),
        }
    }

    /// 관리 디렉토리 경로
    pub fn managed_root(&self) -> &Path {
        &self.db_dir
    }

    async fn read_guard(&self) -> Result<RwLockReadGuard<'_, Slots>, StoreError> {
        debug!("attempting to get read access for the vulnerability db lock");
        tokio::time::timeout(self.lock_timeout, self.lock.read())
            .await
            .map_err(|_| StoreError::LockTimeout {
                access: "read",
                timeout_secs: self.lock_timeout.as_secs(),
            })
    }

    async fn write_guard(&self) -> Result<RwLockWriteGuard<'_, Slots>, StoreError> {
        debug!("attempting to get write access for the vulnerability db lock");
        tokio::time::timeout(self.lock_timeout, self.lock.write())
            .await
            .map_err(|_| StoreError::LockTimeout {
                access: "write",
                timeout_secs: self.lock_timeout.as_secs(),
            })
    }

    /// 슬롯의 현재 체크섬을 디렉토리 이름에서 유도합니다.
    ///
    /// 슬롯이 설정되지 않았거나 디렉토리가 사라졌으면 `None`을 반환하며,
    /// 실패하지 않습니다.
    pub async fn current_checksum(&self, slot: Slot) -> Result<Option<String>, StoreError> {
        let slots = self.read_guard().await?;
        let checksum = slots.slot(slot).dir.as_ref().and_then(|dir| {
            if dir.exists() {
                dir.file_name().map(|name| name.to_string_lossy().into_owned())
            } else {
                None
            }
        });
        info!(slot = slot.as_str(), checksum = ?checksum, "returning current vulnerability db checksum");
        Ok(checksum)
    }

    /// 슬롯의 DB 디렉토리를 반환합니다.
    pub async fn slot_dir(&self, slot: Slot) -> Result<PathBuf, StoreError> {
        let slots = self.read_guard().await?;
        slots
            .slot(slot)
            .dir
            .clone()
            .ok_or_else(|| StoreError::DirNotInitialized {
                slot: slot.as_str().to_owned(),
            })
    }

    /// 슬롯의 스키마 버전을 반환합니다.
    pub async fn slot_version(&self, slot: Slot) -> Result<String, StoreError> {
        let slots = self.read_guard().await?;
        slots
            .slot(slot)
            .version
            .clone()
            .ok_or_else(|| StoreError::VersionNotInitialized {
                slot: slot.as_str().to_owned(),
            })
    }

    /// 슬롯의 세션 팩토리를 반환합니다.
    pub async fn session_factory(&self, slot: Slot) -> Result<SessionFactory, StoreError> {
        let slots = self.read_guard().await?;
        slots
            .slot(slot)
            .sessions
            .clone()
            .ok_or_else(|| StoreError::SessionNotInitialized {
                slot: slot.as_str().to_owned(),
            })
    }

    /// 제공된 아카이브로 대상 슬롯의 DB를 교체합니다.
    ///
    /// 배타 쓰기 잠금 하에서 아카이브를 관리 디렉토리로 옮기고
    /// `<db_dir>/<archive_checksum>/<schema_version>/`에 해제한 뒤,
    /// 임시 아카이브 사본을 제거하고 `engine_metadata.json`을 기록합니다.
    /// 새 세션 팩토리를 연 다음 마지막 단계로 슬롯 상태를 교체합니다.
    ///
    /// 같은 체크섬/버전으로 다시 호출해도 에러 없이 같은 최종 상태가
    /// 됩니다 (멱등).
    pub async fn update_database(
        &self,
        archive_path: &Path,
        archive_checksum: &str,
        schema_version: &str,
        slot: Slot,
    ) -> Result<EngineMetadata, StoreError> {
        info!(
            slot = slot.as_str(),
            archive = %archive_path.display(),
            checksum = archive_checksum,
            "updating vulnerability db to archive checksum"
        );
        let started = Instant::now();

        let mut slots = self.write_guard().await?;

        let db_dir = self.db_dir.clone();
        let archive = archive_path.to_path_buf();
        let checksum = archive_checksum.to_owned();
        let version = schema_version.to_owned();

        // 파일 이동/해제/메타데이터 기록은 블로킹 I/O
        let (slot_dir, engine_metadata) = tokio::task::spawn_blocking(
            move || -> Result<(PathBuf, EngineMetadata), StoreError> {
                let copied = move_archive(&archive, &db_dir)?;
                let slot_dir = unpack_archive(&copied, &db_dir, &checksum, &version)?;
                remove_archive(&copied);
                let engine_metadata = write_engine_metadata(&slot_dir, &checksum, &version)?;
                Ok((slot_dir, engine_metadata))
            },
        )
        .await
        .map_err(|e| StoreError::UnpackFailed {
            reason: format!("blocking task failed: {e}"),
        })??;

        let db_file = slot_dir.join(schema_version).join(VULNERABILITY_FILE_NAME);
        debug!(path = %db_file.display(), "creating new session factory for vulnerability db");
        let factory = SessionFactory::new(db_file);

        // 해제와 메타데이터 기록이 끝난 뒤 마지막 단계로 슬롯 상태 교체
        let state = slots.slot_mut(slot);
        state.dir = Some(slot_dir);
        state.version = Some(schema_version.to_owned());
        state.sessions = Some(factory);

        histogram!(VULN_STORE_UPDATE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        info!(
            slot = slot.as_str(),
            checksum = archive_checksum,
            "vulnerability db updated to archive checksum"
        );
        Ok(engine_metadata)
    }

    /// staging 슬롯을 비웁니다.
    ///
    /// staging의 세 필드를 모두 지우고 production의 엔진 메타데이터를
    /// 반환합니다. production도 비어 있으면 `None`을 반환합니다.
    /// staging의 파일은 디스크에서 삭제되지 않습니다 (회수는 호출자 몫).
    pub async fn unstage(&self) -> Result<Option<EngineMetadata>, StoreError> {
        let mut slots = self.write_guard().await?;
        slots.staging = SlotState::default();
        info!("staging vulnerability db cleared");

        let production = &slots.production;
        let (Some(dir), Some(version)) = (&production.dir, &production.version) else {
            warn!("cannot return production engine metadata, as none has been set");
            return Ok(None);
        };
        Ok(read_json_file(&dir.join(version).join(ENGINE_METADATA_FILE_NAME)))
    }

    /// 슬롯의 업스트림 메타데이터(`metadata.json`)를 읽습니다.
    ///
    /// 파일이 없거나 파싱할 수 없으면 에러 로그 후 `None`입니다.
    pub async fn db_metadata(&self, slot: Slot) -> Result<Option<DbMetadata>, StoreError> {
        let path = self.metadata_path(slot, METADATA_FILE_NAME).await?;
        Ok(read_json_file(&path))
    }

    /// 슬롯의 엔진 메타데이터(`engine_metadata.json`)를 읽습니다.
    pub async fn engine_metadata(&self, slot: Slot) -> Result<Option<EngineMetadata>, StoreError> {
        let path = self.metadata_path(slot, ENGINE_METADATA_FILE_NAME).await?;
        Ok(read_json_file(&path))
    }

    async fn metadata_path(&self, slot: Slot, file_name: &str) -> Result<PathBuf, StoreError> {
        let slots = self.read_guard().await?;
        let state = slots.slot(slot);
        let dir = state.dir.as_ref().ok_or_else(|| StoreError::DirNotInitialized {
            slot: slot.as_str().to_owned(),
        })?;
        let version = state
            .version
            .as_ref()
            .ok_or_else(|| StoreError::VersionNotInitialized {
                slot: slot.as_str().to_owned(),
            })?;
        Ok(dir.join(version).join(file_name))
    }

    /// 취약점을 조회합니다.
    ///
    /// vulnerability-metadata 측에서 affected-package 측으로 left outer
    /// join하므로, 영향받는 패키지가 없는 취약점도 `package = None`인 행
    /// 하나로 나타납니다. 필터는 모두 선택적이며 생략하면 제한이 없습니다.
    /// id/namespace 필터는 metadata 측에 적용되어 outer join 특성이
    /// 유지되고, `affected_package`는 package 측 동등 비교입니다.
    pub async fn query_vulnerabilities(
        &self,
        vuln_ids: Option<&[String]>,
        affected_package: Option<&str>,
        namespaces: Option<&[String]>,
    ) -> Result<Vec<VulnerabilityJoinRow>, StoreError> {
        let slots = self.read_guard().await?;
        let factory = slots
            .production
            .sessions
            .clone()
            .ok_or_else(|| StoreError::SessionNotInitialized {
                slot: Slot::Production.as_str().to_owned(),
            })?;
        counter!(VULN_STORE_QUERIES_TOTAL, LABEL_SLOT => Slot::Production.as_str()).increment(1);

        debug!(
            vuln_ids = ?vuln_ids,
            namespaces = ?namespaces,
            affected_package = ?affected_package,
            "querying vulnerability db for vulnerabilities"
        );

        let mut sql = format!(
            "SELECT m.id, m.namespace, m.data_source, m.record_source, m.severity, \
             m.urls, m.description, m.cvss, \
             v.id, v.package_name, v.namespace, v.version_constraint, v.version_format, \
             v.cpes, v.related_vulnerabilities, v.fixed_in_versions, v.fix_state, v.advisories \
             FROM {VULNERABILITY_METADATA_TABLE} m \
             LEFT OUTER JOIN {VULNERABILITY_TABLE} v \
             ON v.id = m.id AND v.namespace = m.namespace"
        );

        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<String> = Vec::new();

        if let Some(ids) = vuln_ids {
            clauses.push(format!("m.id IN ({})", placeholders(ids.len())));
            params.extend(ids.iter().cloned());
        }
        if let Some(namespaces) = namespaces {
            clauses.push(format!("m.namespace IN ({})", placeholders(namespaces.len())));
            params.extend(namespaces.iter().cloned());
        }
        if let Some(package) = affected_package {
            clauses.push("v.package_name = ?".to_owned());
            params.push(package.to_owned());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        let session = factory.open_session()?;
        let mut stmt = session.prepare(&sql).map_err(query_failed)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                let metadata = VulnerabilityMetadataRow {
                    id: row.get(0)?,
                    namespace: row.get(1)?,
                    data_source: row.get(2)?,
                    record_source: row.get(3)?,
                    severity: row.get(4)?,
                    urls: row.get(5)?,
                    description: row.get(6)?,
                    cvss: row.get(7)?,
                };
                // outer join의 null 측 판별은 v.id로 수행
                let package_id: Option<String> = row.get(8)?;
                let package = match package_id {
                    Some(id) => Some(AffectedPackageRow {
                        id,
                        package_name: row.get(9)?,
                        namespace: row.get(10)?,
                        version_constraint: row.get(11)?,
                        version_format: row.get(12)?,
                        cpes: row.get(13)?,
                        related_vulnerabilities: row.get(14)?,
                        fixed_in_versions: row.get(15)?,
                        fix_state: row.get(16)?,
                        advisories: row.get(17)?,
                    }),
                    None => None,
                };
                Ok(VulnerabilityJoinRow { package, metadata })
            })
            .map_err(query_failed)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_failed)?;

        Ok(rows)
    }

    /// id 목록으로 vulnerability-metadata 레코드만 조회합니다.
    ///
    /// id 목록이 비어 있으면 잠금을 건드리지 않고 즉시 빈 결과를
    /// 반환합니다. 네임스페이스 목록은 선택적 필터입니다.
    pub async fn query_vulnerability_metadata(
        &self,
        vuln_ids: &[String],
        namespaces: Option<&[String]>,
    ) -> Result<Vec<VulnerabilityMetadataRow>, StoreError> {
        if vuln_ids.is_empty() {
            debug!("no vulnerability ids provided for metadata query");
            return Ok(Vec::new());
        }

        let slots = self.read_guard().await?;
        let factory = slots
            .production
            .sessions
            .clone()
            .ok_or_else(|| StoreError::SessionNotInitialized {
                slot: Slot::Production.as_str().to_owned(),
            })?;
        counter!(VULN_STORE_QUERIES_TOTAL, LABEL_SLOT => Slot::Production.as_str()).increment(1);

        debug!(
            vuln_ids = ?vuln_ids,
            namespaces = ?namespaces,
            "querying vulnerability db for metadata records"
        );

        let mut sql = format!(
            "SELECT id, namespace, data_source, record_source, severity, urls, description, cvss \
             FROM {VULNERABILITY_METADATA_TABLE} WHERE id IN ({})",
            placeholders(vuln_ids.len())
        );
        let mut params: Vec<String> = vuln_ids.to_vec();
        if let Some(namespaces) = namespaces {
            sql.push_str(&format!(
                " AND namespace IN ({})",
                placeholders(namespaces.len())
            ));
            params.extend(namespaces.iter().cloned());
        }

        let session = factory.open_session()?;
        let mut stmt = session.prepare(&sql).map_err(query_failed)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Ok(VulnerabilityMetadataRow {
                    id: row.get(0)?,
                    namespace: row.get(1)?,
                    data_source: row.get(2)?,
                    record_source: row.get(3)?,
                    severity: row.get(4)?,
                    urls: row.get(5)?,
                    description: row.get(6)?,
                    cvss: row.get(7)?,
                })
            })
            .map_err(query_failed)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_failed)?;

        Ok(rows)
    }

    /// 슬롯 DB의 네임스페이스별 레코드 수를 조회합니다.
    ///
    /// 각 행에는 해당 슬롯 `metadata.json`의 빌드 시각이
    /// `last_synced`로 붙습니다.
    pub async fn query_record_source_counts(
        &self,
        slot: Slot,
    ) -> Result<Vec<RecordSourceCount>, StoreError> {
        let slots = self.read_guard().await?;
        let state = slots.slot(slot);
        let factory = state
            .sessions
            .clone()
            .ok_or_else(|| StoreError::SessionNotInitialized {
                slot: slot.as_str().to_owned(),
            })?;
        counter!(VULN_STORE_QUERIES_TOTAL, LABEL_SLOT => slot.as_str()).increment(1);

        debug!(slot = slot.as_str(), "querying vulnerability db for feed group counts");

        // last_synced는 같은 잠금 범위 안에서 읽음
        let last_synced = match (&state.dir, &state.version) {
            (Some(dir), Some(version)) => {
                read_json_file::<DbMetadata>(&dir.join(version).join(METADATA_FILE_NAME))
                    .and_then(|metadata| metadata.built)
            }
            _ => None,
        };

        let sql = format!(
            "SELECT namespace, COUNT(namespace) FROM {VULNERABILITY_METADATA_TABLE} \
             GROUP BY namespace"
        );
        let session = factory.open_session()?;
        let mut stmt = session.prepare(&sql).map_err(query_failed)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })
            .map_err(query_failed)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_failed)?;

        Ok(rows
            .into_iter()
            .map(|(group, count)| RecordSourceCount {
                feed: VULNERABILITIES_FEED.to_owned(),
                group,
                count,
                last_synced: last_synced.clone(),
            })
            .collect())
    }

    /// 스캐너 버전 정보를 조회합니다 (DB 환경변수 없이).
    pub async fn scanner_version(
        &self,
        scanner: &ScannerCommand,
    ) -> Result<ScannerVersion, StoreError> {
        let _read = self.read_guard().await?;
        scanner.version().await
    }

    /// 슬롯 DB를 대상으로 SBOM 문자열을 스캔합니다.
    ///
    /// 공유 읽기 잠금을 스캔이 끝날 때까지 유지합니다.
    pub async fn vulnerabilities_for_sbom(
        &self,
        scanner: &ScannerCommand,
        sbom: &str,
        slot: Slot,
    ) -> Result<serde_json::Value, StoreError> {
        let slots = self.read_guard().await?;
        let dir = slots
            .slot(slot)
            .dir
            .clone()
            .ok_or_else(|| StoreError::DirNotInitialized {
                slot: slot.as_str().to_owned(),
            })?;
        scanner.scan_sbom(sbom, &dir).await
    }

    /// 슬롯 DB를 대상으로 SBOM 파일을 스캔합니다.
    pub async fn vulnerabilities_for_sbom_file(
        &self,
        scanner: &ScannerCommand,
        sbom_file: &Path,
        slot: Slot,
    ) -> Result<serde_json::Value, StoreError> {
        let slots = self.read_guard().await?;
        let dir = slots
            .slot(slot)
            .dir
            .clone()
            .ok_or_else(|| StoreError::DirNotInitialized {
                slot: slot.as_str().to_owned(),
            })?;
        scanner.scan_sbom_file(sbom_file, &dir).await
    }

    /// 교체되어 더 이상 쓰지 않는 DB 세대 디렉토리를 제거합니다.
    ///
    /// 교체(`update_database`)는 이전 디렉토리를 삭제하지 않으므로,
    /// 회수가 필요할 때 호출자가 명시적으로 실행합니다.
    pub async fn remove_db_dir(&self, dir: &Path) {
        let dir = dir.to_path_buf();
        let result = tokio::task::spawn_blocking(move || {
            if dir.exists() {
                info!(path = %dir.display(), "removing old vulnerability db");
                std::fs::remove_dir_all(&dir)
            } else {
                warn!(path = %dir.display(), "failed to remove vulnerability db as it cannot be found");
                Ok(())
            }
        })
        .await;
        if let Ok(Err(e)) = result {
            warn!(error = %e, "failed to remove old vulnerability db dir");
        }
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn query_failed(e: rusqlite::Error) -> StoreError {
    StoreError::QueryFailed {
        reason: e.to_string(),
    }
}

/// 아카이브를 관리 디렉토리로 복사합니다.
fn move_archive(archive: &Path, db_dir: &Path) -> Result<PathBuf, StoreError> {
    if !archive.exists() {
        warn!(
            archive = %archive.display(),
            "unable to move vulnerability db archive because it does not exist"
        );
        return Err(StoreError::ArchiveNotFound {
            path: archive.display().to_string(),
        });
    }

    std::fs::create_dir_all(db_dir).map_err(|e| StoreError::Io {
        path: db_dir.display().to_string(),
        reason: e.to_string(),
    })?;

    let file_name = archive
        .file_name()
        .ok_or_else(|| StoreError::ArchiveNotFound {
            path: archive.display().to_string(),
        })?;
    let copied = db_dir.join(file_name);
    info!(
        from = %archive.display(),
        to = %copied.display(),
        "moving the vulnerability db archive"
    );
    std::fs::copy(archive, &copied).map_err(|e| StoreError::Io {
        path: copied.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok(copied)
}

/// 아카이브를 버전 디렉토리에 해제하고 슬롯 디렉토리를 반환합니다.
fn unpack_archive(
    copied: &Path,
    db_dir: &Path,
    archive_checksum: &str,
    schema_version: &str,
) -> Result<PathBuf, StoreError> {
    let slot_dir = db_dir.join(archive_checksum);
    let versioned_dir = slot_dir.join(schema_version);
    std::fs::create_dir_all(&versioned_dir).map_err(|e| StoreError::Io {
        path: versioned_dir.display().to_string(),
        reason: e.to_string(),
    })?;

    info!(
        checksum = archive_checksum,
        version = schema_version,
        archive = %copied.display(),
        dest = %slot_dir.display(),
        "unpacking the vulnerability db archive"
    );

    let file = std::fs::File::open(copied).map_err(|e| StoreError::Io {
        path: copied.display().to_string(),
        reason: e.to_string(),
    })?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    // tar::Archive::unpack은 대상 디렉토리를 벗어나는 엔트리를 거부
    archive
        .unpack(&versioned_dir)
        .map_err(|e| StoreError::UnpackFailed {
            reason: e.to_string(),
        })?;

    Ok(slot_dir)
}

fn remove_archive(copied: &Path) {
    info!(path = %copied.display(), "removing the now-unpacked vulnerability db archive");
    if let Err(e) = std::fs::remove_file(copied) {
        warn!(path = %copied.display(), error = %e, "failed to remove archive copy");
    }
}

/// `metadata.json`에서 db 체크섬을 읽어 `engine_metadata.json`을 기록합니다.
fn write_engine_metadata(
    slot_dir: &Path,
    archive_checksum: &str,
    schema_version: &str,
) -> Result<EngineMetadata, StoreError> {
    let versioned_dir = slot_dir.join(schema_version);
    let db_checksum = read_json_file::<DbMetadata>(&versioned_dir.join(METADATA_FILE_NAME))
        .and_then(|metadata| metadata.checksum);

    let engine_metadata = EngineMetadata {
        archive_checksum: archive_checksum.to_owned(),
        db_checksum,
        schema_version: schema_version.to_owned(),
    };

    let output = versioned_dir.join(ENGINE_METADATA_FILE_NAME);
    let serialized = serde_json::to_string(&engine_metadata).map_err(|e| StoreError::Io {
        path: output.display().to_string(),
        reason: e.to_string(),
    })?;
    std::fs::write(&output, serialized).map_err(|e| StoreError::Io {
        path: output.display().to_string(),
        reason: e.to_string(),
    })?;

    Ok(engine_metadata)
}

/// 파일을 JSON으로 읽습니다. 없거나 파싱 불가면 에러 로그 후 `None`.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        error!(path = %path.display(), "unable to read non-existent file to json");
        return None;
    }
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            error!(path = %path.display(), error = %e, "unable to read file to json");
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            error!(path = %path.display(), error = %e, "unable to parse file into json");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> VulnDbStore {
        let db_dir = std::env::temp_dir().join(format!("gantry-store-test-{}", uuid::Uuid::new_v4()));
        let config = VulnStoreConfig {
            db_dir: db_dir.display().to_string(),
            ..Default::default()
        };
        VulnDbStore::new(&config)
    }

    #[test]
    fn slot_as_str() {
        assert_eq!(Slot::Production.as_str(), "production");
        assert_eq!(Slot::Staging.as_str(), "staging");
        assert_eq!(Slot::Staging.to_string(), "staging");
    }

    #[tokio::test]
    async fn current_checksum_is_none_for_unset_slot() {
        let store = test_store();
        assert_eq!(store.current_checksum(Slot::Production).await.unwrap(), None);
        assert_eq!(store.current_checksum(Slot::Staging).await.unwrap(), None);
    }

    #[tokio::test]
    async fn accessors_fail_with_distinct_not_initialized_errors() {
        let store = test_store();

        let err = store.slot_dir(Slot::Production).await.unwrap_err();
        assert!(matches!(err, StoreError::DirNotInitialized { .. }));

        let err = store.slot_version(Slot::Production).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionNotInitialized { .. }));

        let err = store.session_factory(Slot::Production).await.unwrap_err();
        assert!(matches!(err, StoreError::SessionNotInitialized { .. }));
    }

    #[tokio::test]
    async fn unstage_with_empty_production_returns_none() {
        let store = test_store();
        assert!(store.unstage().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn metadata_for_unset_slot_fails() {
        let store = test_store();
        let err = store.engine_metadata(Slot::Staging).await.unwrap_err();
        assert!(matches!(err, StoreError::DirNotInitialized { .. }));
    }

    #[tokio::test]
    async fn query_metadata_with_empty_ids_short_circuits() {
        // 세션 팩토리가 없어도 빈 id 목록은 즉시 빈 결과
        let store = test_store();
        let rows = store.query_vulnerability_metadata(&[], None).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn query_without_production_session_fails() {
        let store = test_store();
        let err = store
            .query_vulnerabilities(None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SessionNotInitialized { .. }));
    }

    #[tokio::test]
    async fn update_database_missing_archive_fails() {
        let store = test_store();
        let err = store
            .update_database(
                Path::new("/nonexistent/archive.tar.gz"),
                "checksum",
                "5",
                Slot::Production,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ArchiveNotFound { .. }));
    }

    fn short_timeout_store() -> VulnDbStore {
        VulnDbStore {
            db_dir: std::env::temp_dir().join("gantry-lock-test"),
            lock: RwLock::new(Slots::default()),
            lock_timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn concurrent_readers_hold_the_lock_simultaneously() {
        let store = short_timeout_store();
        let first = store.read_guard().await.unwrap();
        // 첫 번째 reader가 아직 잠금을 쥔 상태에서 두 번째 획득이 성공해야 함
        let second = store.read_guard().await.unwrap();
        drop(first);
        drop(second);
    }

    #[tokio::test]
    async fn writer_excludes_readers_until_released() {
        let store = short_timeout_store();
        let writer = store.write_guard().await.unwrap();

        let err = store.read_guard().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::LockTimeout { access: "read", .. }
        ));

        drop(writer);
        store.read_guard().await.unwrap();
    }

    #[tokio::test]
    async fn reader_excludes_writer_until_released() {
        let store = short_timeout_store();
        let reader = store.read_guard().await.unwrap();

        let err = store.write_guard().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::LockTimeout { access: "write", .. }
        ));

        drop(reader);
        store.write_guard().await.unwrap();
    }

    #[tokio::test]
    async fn second_writer_blocks_until_first_releases() {
        let store = short_timeout_store();
        let first = store.write_guard().await.unwrap();
        let err = store.write_guard().await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));
        drop(first);
        store.write_guard().await.unwrap();
    }

    #[test]
    fn placeholders_format() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?, ?, ?");
    }

    #[test]
    fn engine_metadata_serialize_roundtrip() {
        let metadata = EngineMetadata {
            archive_checksum: "sha256:abc".to_owned(),
            db_checksum: Some("db123".to_owned()),
            schema_version: "5".to_owned(),
        };
        let json = serde_json::to_string(&metadata).unwrap();
        let parsed: EngineMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn db_metadata_tolerates_missing_fields() {
        let metadata: DbMetadata = serde_json::from_str("{}").unwrap();
        assert!(metadata.built.is_none());
        assert!(metadata.checksum.is_none());
    }

    #[test]
    fn deserialize_column_handles_null_and_garbage() {
        assert_eq!(deserialize_column(None), serde_json::Value::Null);
        assert_eq!(deserialize_column(Some("")), serde_json::Value::Null);
        assert_eq!(deserialize_column(Some("not json")), serde_json::Value::Null);
        assert_eq!(
            deserialize_column(Some("[\"a\"]")),
            serde_json::json!(["a"])
        );
    }
}
