//! 이벤트 시스템 — 모듈 간 통신의 기본 단위
//!
//! [`EventMetadata`]는 모든 이벤트에 공통으로 포함되는 메타데이터이며,
//! [`Event`] trait은 모든 이벤트 타입이 구현해야 하는 인터페이스입니다.
//! 동기화 서비스는 DB 교체가 완료될 때마다 [`SyncEvent`]를 발행합니다.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// --- 모듈명 상수 ---

/// 취약점 DB 스토어 모듈명
pub const MODULE_VULN_STORE: &str = "vuln-store";
/// 데이터 매핑 모듈명
pub const MODULE_SCAN_MAPPER: &str = "scan-mapper";

// --- 이벤트 타입 상수 ---

/// DB 동기화 이벤트 타입
pub const EVENT_TYPE_SYNC: &str = "sync";

/// 이벤트 메타데이터 — 모든 이벤트에 공통으로 포함되는 추적 정보
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// 이벤트 발생 시각
    pub timestamp: SystemTime,
    /// 이벤트를 생성한 모듈명 (예: "vuln-store")
    pub source_module: String,
    /// 분산 추적 ID — 같은 흐름의 이벤트를 연결합니다
    pub trace_id: String,
}

impl EventMetadata {
    /// 기존 trace_id를 사용하여 새 메타데이터를 생성합니다.
    pub fn new(source_module: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: trace_id.into(),
        }
    }

    /// 새로운 UUID v4 trace_id를 생성하여 메타데이터를 만듭니다.
    pub fn with_new_trace(source_module: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl fmt::Display for EventMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] source={} trace={}",
            unix_timestamp_str(self.timestamp),
            self.source_module,
            self.trace_id,
        )
    }
}

/// 모든 이벤트가 구현해야 하는 기본 trait
pub trait Event: Send + Sync {
    /// 이벤트 타입 식별자 (예: "sync")
    fn event_type(&self) -> &str;

    /// 이벤트 메타데이터
    fn metadata(&self) -> &EventMetadata;
}

/// DB 동기화 완료 이벤트
///
/// 로컬 DB가 전역 활성 버전으로 교체되었을 때 발행됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    /// 이벤트 메타데이터
    pub metadata: EventMetadata,
    /// 교체 후 아카이브 체크섬
    pub archive_checksum: String,
    /// 교체 후 스키마 버전
    pub schema_version: String,
}

impl SyncEvent {
    /// 새 동기화 이벤트를 생성합니다.
    pub fn new(archive_checksum: impl Into<String>, schema_version: impl Into<String>) -> Self {
        Self {
            metadata: EventMetadata::with_new_trace(MODULE_VULN_STORE),
            archive_checksum: archive_checksum.into(),
            schema_version: schema_version.into(),
        }
    }
}

impl Event for SyncEvent {
    fn event_type(&self) -> &str {
        EVENT_TYPE_SYNC
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sync checksum={} version={}",
            self.archive_checksum, self.schema_version,
        )
    }
}

fn unix_timestamp_str(time: SystemTime) -> String {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_secs().to_string(),
        Err(_) => "0".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_with_new_trace_generates_uuid() {
        let a = EventMetadata::with_new_trace(MODULE_VULN_STORE);
        let b = EventMetadata::with_new_trace(MODULE_VULN_STORE);
        assert_ne!(a.trace_id, b.trace_id);
        assert_eq!(a.source_module, "vuln-store");
    }

    #[test]
    fn metadata_new_keeps_trace_id() {
        let meta = EventMetadata::new(MODULE_SCAN_MAPPER, "trace-123");
        assert_eq!(meta.trace_id, "trace-123");
    }

    #[test]
    fn sync_event_type_and_display() {
        let event = SyncEvent::new("sha256:abc", "5");
        assert_eq!(event.event_type(), EVENT_TYPE_SYNC);
        let display = event.to_string();
        assert!(display.contains("sha256:abc"));
        assert!(display.contains('5'));
    }

    #[test]
    fn sync_event_serialize_roundtrip() {
        let event = SyncEvent::new("abc", "3");
        let json = serde_json::to_string(&event).unwrap();
        let parsed: SyncEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.archive_checksum, "abc");
        assert_eq!(parsed.schema_version, "3");
    }

    #[test]
    fn metadata_display_contains_fields() {
        let meta = EventMetadata::new(MODULE_VULN_STORE, "t-1");
        let display = meta.to_string();
        assert!(display.contains("vuln-store"));
        assert!(display.contains("t-1"));
    }
}
