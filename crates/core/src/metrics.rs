//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `gantry_`
//! - 모듈명: `vuln_store_`, `scan_mapper_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(gantry_core::metrics::VULN_STORE_SYNCS_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 슬롯 레이블 키 (production, staging)
pub const LABEL_SLOT: &str = "slot";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

/// 패키지 타입 레이블 키 (rpm, dpkg, java, ...)
pub const LABEL_PKG_TYPE: &str = "pkg_type";

// ─── Vuln Store 메트릭 ─────────────────────────────────────────────

/// Vuln Store: 수행된 DB 동기화 수 (counter, label: result)
pub const VULN_STORE_SYNCS_TOTAL: &str = "gantry_vuln_store_syncs_total";

/// Vuln Store: 동기화 판단 결과 불필요로 스킵된 수 (counter)
pub const VULN_STORE_SYNCS_SKIPPED_TOTAL: &str = "gantry_vuln_store_syncs_skipped_total";

/// Vuln Store: DB 교체 소요 시간 (histogram, 초)
pub const VULN_STORE_UPDATE_DURATION_SECONDS: &str = "gantry_vuln_store_update_duration_seconds";

/// Vuln Store: 수행된 DB 조회 수 (counter, label: slot)
pub const VULN_STORE_QUERIES_TOTAL: &str = "gantry_vuln_store_queries_total";

/// Vuln Store: 스캐너 서브프로세스 호출 수 (counter, label: result)
pub const VULN_STORE_SCANNER_INVOCATIONS_TOTAL: &str =
    "gantry_vuln_store_scanner_invocations_total";

// ─── Scan Mapper 메트릭 ────────────────────────────────────────────

/// Scan Mapper: SBOM으로 변환된 패키지 수 (counter, label: pkg_type)
pub const SCAN_MAPPER_SBOM_PACKAGES_TOTAL: &str = "gantry_scan_mapper_sbom_packages_total";

/// Scan Mapper: 변환 중 스킵된 패키지/매치 수 (counter)
pub const SCAN_MAPPER_SKIPPED_RECORDS_TOTAL: &str = "gantry_scan_mapper_skipped_records_total";

/// Scan Mapper: 변환된 취약점 매치 수 (counter)
pub const SCAN_MAPPER_MATCHES_TOTAL: &str = "gantry_scan_mapper_matches_total";

/// 모든 메트릭의 설명을 레지스트리에 등록합니다.
///
/// `metrics::describe_counter!()` 등은 전역 recorder에 설명을 남기므로
/// 데몬 기동 시 한 번만 호출하면 됩니다.
pub fn describe_metrics() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!(
        VULN_STORE_SYNCS_TOTAL,
        "Total vulnerability db sync attempts by result"
    );
    describe_counter!(
        VULN_STORE_SYNCS_SKIPPED_TOTAL,
        "Sync attempts skipped because the local db was already current"
    );
    describe_histogram!(
        VULN_STORE_UPDATE_DURATION_SECONDS,
        "Duration of vulnerability db update (download, verify, unpack, swap)"
    );
    describe_counter!(
        VULN_STORE_QUERIES_TOTAL,
        "Total vulnerability db queries by slot"
    );
    describe_counter!(
        VULN_STORE_SCANNER_INVOCATIONS_TOTAL,
        "Total scanner subprocess invocations by result"
    );
    describe_counter!(
        SCAN_MAPPER_SBOM_PACKAGES_TOTAL,
        "Total packages converted into scanner sbom artifacts by package type"
    );
    describe_counter!(
        SCAN_MAPPER_SKIPPED_RECORDS_TOTAL,
        "Total records skipped during mapping due to per-record errors"
    );
    describe_counter!(
        SCAN_MAPPER_MATCHES_TOTAL,
        "Total scanner matches converted into engine vulnerability matches"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_follow_convention() {
        for name in [
            VULN_STORE_SYNCS_TOTAL,
            VULN_STORE_SYNCS_SKIPPED_TOTAL,
            VULN_STORE_QUERIES_TOTAL,
            VULN_STORE_SCANNER_INVOCATIONS_TOTAL,
            SCAN_MAPPER_SBOM_PACKAGES_TOTAL,
            SCAN_MAPPER_SKIPPED_RECORDS_TOTAL,
            SCAN_MAPPER_MATCHES_TOTAL,
        ] {
            assert!(name.starts_with("gantry_"));
            assert!(name.ends_with("_total"));
        }
        assert!(VULN_STORE_UPDATE_DURATION_SECONDS.ends_with("_seconds"));
    }

    #[test]
    fn describe_metrics_does_not_panic_without_recorder() {
        describe_metrics();
    }
}
