//! 설정 관리 — gantry.toml 파싱 및 런타임 설정
//!
//! [`GantryConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. 환경변수 (`GANTRY_VULN_STORE_DB_DIR=/var/lib/gantry/vuln-db` 형식)
//! 2. 설정 파일 (`gantry.toml`)
//! 3. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), gantry_core::error::GantryError> {
//! use gantry_core::config::GantryConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = GantryConfig::load("gantry.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = GantryConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, GantryError};

/// Gantry 통합 설정
///
/// `gantry.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GantryConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 취약점 DB 스토어 설정
    #[serde(default)]
    pub vuln_store: VulnStoreSection,
    /// 데이터 매핑 설정
    #[serde(default)]
    pub scan_mapper: ScanMapperSection,
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 서비스 데이터 디렉토리
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            data_dir: "/var/lib/gantry".to_owned(),
        }
    }
}

/// 취약점 DB 스토어 섹션
///
/// `gantry-vuln-store`는 이 섹션을 `VulnStoreConfig::from_core`로 받아
/// 확장 필드를 더해 사용합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VulnStoreSection {
    /// DB 세대가 보관되는 관리 디렉토리
    pub db_dir: String,
    /// 읽기/쓰기 잠금 획득 타임아웃 (초)
    pub lock_timeout_secs: u64,
    /// 주기적 동기화 간격 (초). 0이면 수동 트리거만
    pub sync_interval_secs: u64,
    /// 외부 스캐너 실행 파일
    pub scanner_bin: String,
}

impl Default for VulnStoreSection {
    fn default() -> Self {
        Self {
            db_dir: "/var/lib/gantry/vuln-db".to_owned(),
            lock_timeout_secs: 60,
            sync_interval_secs: 21_600, // 6 hours
            scanner_bin: "grype".to_owned(),
        }
    }
}

/// 데이터 매핑 섹션
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanMapperSection {
    /// 취약점 조회 링크 생성에 사용할 API 엔드포인트
    pub api_endpoint: String,
    /// 취약점 ID를 CVE ID로 치환할 피드 그룹 목록
    pub transform_id_feed_groups: Vec<String>,
}

impl Default for ScanMapperSection {
    fn default() -> Self {
        Self {
            api_endpoint: "http://localhost:8228".to_owned(),
            transform_id_feed_groups: vec!["vulndb".to_owned()],
        }
    }
}

impl GantryConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, GantryError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, GantryError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GantryError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                GantryError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, GantryError> {
        toml::from_str(toml_str).map_err(|e| {
            GantryError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `GANTRY_{SECTION}_{FIELD}`
    /// 예: `GANTRY_VULN_STORE_DB_DIR=/opt/gantry/vuln-db`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "GANTRY_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.data_dir, "GANTRY_GENERAL_DATA_DIR");

        // Vuln store
        override_string(&mut self.vuln_store.db_dir, "GANTRY_VULN_STORE_DB_DIR");
        override_u64(
            &mut self.vuln_store.lock_timeout_secs,
            "GANTRY_VULN_STORE_LOCK_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.vuln_store.sync_interval_secs,
            "GANTRY_VULN_STORE_SYNC_INTERVAL_SECS",
        );
        override_string(
            &mut self.vuln_store.scanner_bin,
            "GANTRY_VULN_STORE_SCANNER_BIN",
        );

        // Scan mapper
        override_string(
            &mut self.scan_mapper.api_endpoint,
            "GANTRY_SCAN_MAPPER_API_ENDPOINT",
        );
        override_csv(
            &mut self.scan_mapper.transform_id_feed_groups,
            "GANTRY_SCAN_MAPPER_TRANSFORM_ID_FEED_GROUPS",
        );
    }

    /// 설정 값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), GantryError> {
        const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LOG_LEVELS.contains(&self.general.log_level.as_str()) {
            return Err(GantryError::Config(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("'{}' is not one of {LOG_LEVELS:?}", self.general.log_level),
            }));
        }

        if self.vuln_store.db_dir.is_empty() {
            return Err(GantryError::Config(ConfigError::InvalidValue {
                field: "vuln_store.db_dir".to_owned(),
                reason: "must not be empty".to_owned(),
            }));
        }

        if self.vuln_store.lock_timeout_secs == 0 {
            return Err(GantryError::Config(ConfigError::InvalidValue {
                field: "vuln_store.lock_timeout_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }));
        }

        if self.vuln_store.scanner_bin.is_empty() {
            return Err(GantryError::Config(ConfigError::InvalidValue {
                field: "vuln_store.scanner_bin".to_owned(),
                reason: "must not be empty".to_owned(),
            }));
        }

        Ok(())
    }
}

fn override_string(target: &mut String, var: &str) {
    if let Ok(value) = std::env::var(var) {
        *target = value;
    }
}

fn override_u64(target: &mut u64, var: &str) {
    if let Ok(value) = std::env::var(var) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => {
                tracing::warn!(var, value, "ignoring non-numeric env override");
            }
        }
    }
}

fn override_csv(target: &mut Vec<String>, var: &str) {
    if let Ok(value) = std::env::var(var) {
        *target = value
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
