//! 취약점 DB 스토어 설정
//!
//! [`VulnStoreConfig`]는 core의
//! [`VulnStoreSection`](gantry_core::config::VulnStoreSection)을 확장하여
//! 모듈 고유 설정(동기화 뮤텍스 타임아웃, 이벤트 채널 용량)을 추가합니다.
//!
//! # 사용 예시
//!
//! ```
//! use gantry_vuln_store::VulnStoreConfig;
//!
//! // 기본값으로 생성
//! let config = VulnStoreConfig::default();
//! config.validate().unwrap();
//!
//! // 빌더로 생성
//! use gantry_vuln_store::VulnStoreConfigBuilder;
//!
//! let config = VulnStoreConfigBuilder::new()
//!     .db_dir("/var/lib/gantry/vuln-db")
//!     .sync_interval_secs(3600)
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};

use gantry_core::error::{ConfigError, GantryError};

/// 설정 상한값 상수
const MAX_LOCK_TIMEOUT_SECS: u64 = 3_600;
const MAX_SYNC_INTERVAL_SECS: u64 = 604_800; // 7 days
const MAX_PATH_LEN: usize = 4096;

/// 취약점 DB 스토어 설정
///
/// # 필드
///
/// - **enabled**: 주기적 동기화 서비스 활성화 여부
/// - **db_dir**: DB 세대가 보관되는 관리 디렉토리
/// - **lock_timeout_secs**: 스토어 reader/writer 잠금 획득 타임아웃
/// - **sync_lock_timeout_secs**: 동기화 뮤텍스 획득 타임아웃
/// - **sync_interval_secs**: 주기적 동기화 간격 (0이면 수동 트리거만)
/// - **scanner_bin**: 외부 스캐너 실행 파일
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnStoreConfig {
    /// 주기적 동기화 서비스 활성화 여부
    pub enabled: bool,
    /// DB 세대가 보관되는 관리 디렉토리
    pub db_dir: String,
    /// 스토어 reader/writer 잠금 획득 타임아웃 (초)
    pub lock_timeout_secs: u64,
    /// 동기화 뮤텍스 획득 타임아웃 (초)
    pub sync_lock_timeout_secs: u64,
    /// 주기적 동기화 간격 (초). 0이면 수동 트리거만
    pub sync_interval_secs: u64,
    /// 외부 스캐너 실행 파일
    pub scanner_bin: String,
}

impl Default for VulnStoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            db_dir: "/var/lib/gantry/vuln-db".to_owned(),
            lock_timeout_secs: 60,
            sync_lock_timeout_secs: 60,
            sync_interval_secs: 21_600, // 6 hours
            scanner_bin: "grype".to_owned(),
        }
    }
}

impl VulnStoreConfig {
    /// core의 `VulnStoreSection`에서 스토어 설정을 생성합니다.
    ///
    /// core 설정에 없는 확장 필드는 기본값을 사용합니다.
    pub fn from_core(core: &gantry_core::config::VulnStoreSection) -> Self {
        Self {
            db_dir: core.db_dir.clone(),
            lock_timeout_secs: core.lock_timeout_secs,
            sync_interval_secs: core.sync_interval_secs,
            scanner_bin: core.scanner_bin.clone(),
            ..Self::default()
        }
    }

    /// 설정 값의 유효성을 검증합니다.
    ///
    /// # 검증 규칙
    ///
    /// - `lock_timeout_secs`, `sync_lock_timeout_secs`: 1-3600
    /// - `sync_interval_secs`: 0 또는 60-604800 (0은 수동 모드)
    /// - `db_dir`: 비어있지 않고 `..` 경로 순회가 없어야 함
    /// - `scanner_bin`: 비어있으면 안 됨
    pub fn validate(&self) -> Result<(), GantryError> {
        if self.lock_timeout_secs == 0 || self.lock_timeout_secs > MAX_LOCK_TIMEOUT_SECS {
            return Err(invalid(
                "lock_timeout_secs",
                format!("must be 1-{MAX_LOCK_TIMEOUT_SECS}"),
            ));
        }

        if self.sync_lock_timeout_secs == 0 || self.sync_lock_timeout_secs > MAX_LOCK_TIMEOUT_SECS {
            return Err(invalid(
                "sync_lock_timeout_secs",
                format!("must be 1-{MAX_LOCK_TIMEOUT_SECS}"),
            ));
        }

        if self.sync_interval_secs > 0 && self.sync_interval_secs < 60 {
            return Err(invalid(
                "sync_interval_secs",
                format!("must be 0 (manual) or 60-{MAX_SYNC_INTERVAL_SECS}"),
            ));
        }

        if self.sync_interval_secs > MAX_SYNC_INTERVAL_SECS {
            return Err(invalid(
                "sync_interval_secs",
                format!("must be 0 (manual) or 60-{MAX_SYNC_INTERVAL_SECS}"),
            ));
        }

        if self.db_dir.is_empty() {
            return Err(invalid("db_dir", "must not be empty".to_owned()));
        }

        if self.db_dir.len() > MAX_PATH_LEN {
            return Err(invalid(
                "db_dir",
                format!("exceeds maximum length {MAX_PATH_LEN}"),
            ));
        }

        // Path traversal 체크: Path::components()로 ParentDir 컴포넌트 검출
        if std::path::Path::new(&self.db_dir)
            .components()
            .any(|c| c == std::path::Component::ParentDir)
        {
            return Err(invalid(
                "db_dir",
                "contains path traversal pattern '..'".to_owned(),
            ));
        }

        if self.scanner_bin.is_empty() {
            return Err(invalid("scanner_bin", "must not be empty".to_owned()));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> GantryError {
    GantryError::Config(ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    })
}

/// [`VulnStoreConfig`] 빌더
#[derive(Default)]
pub struct VulnStoreConfigBuilder {
    config: VulnStoreConfig,
}

impl VulnStoreConfigBuilder {
    /// 기본값을 가진 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 동기화 서비스 활성화 여부를 설정합니다.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// 관리 디렉토리를 설정합니다.
    pub fn db_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.db_dir = dir.into();
        self
    }

    /// 스토어 잠금 타임아웃(초)을 설정합니다.
    pub fn lock_timeout_secs(mut self, secs: u64) -> Self {
        self.config.lock_timeout_secs = secs;
        self
    }

    /// 동기화 뮤텍스 타임아웃(초)을 설정합니다.
    pub fn sync_lock_timeout_secs(mut self, secs: u64) -> Self {
        self.config.sync_lock_timeout_secs = secs;
        self
    }

    /// 동기화 간격(초)을 설정합니다.
    pub fn sync_interval_secs(mut self, secs: u64) -> Self {
        self.config.sync_interval_secs = secs;
        self
    }

    /// 스캐너 실행 파일을 설정합니다.
    pub fn scanner_bin(mut self, bin: impl Into<String>) -> Self {
        self.config.scanner_bin = bin.into();
        self
    }

    /// 설정을 검증하고 빌드합니다.
    pub fn build(self) -> Result<VulnStoreConfig, GantryError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
