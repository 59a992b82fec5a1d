//! 스캐너 → 엔진 방향 변환
//!
//! 스캐너의 매치 출력 JSON을 정규화된 [`VulnerabilityMatch`] 레코드로
//! 변환합니다. 스캐너 출력은 신뢰하지 않습니다: CVSS 목록, 권고문, 관련
//! 취약점은 항목별 best-effort로 파싱하며, 손상된 항목 하나가 목록
//! 전체나 배치 전체를 실패시키지 않습니다.

use std::collections::BTreeSet;
use std::time::SystemTime;

use metrics::counter;
use serde_json::Value;
use tracing::{debug, error, warn};

use gantry_core::error::MappingError;
use gantry_core::metrics::{SCAN_MAPPER_MATCHES_TOTAL, SCAN_MAPPER_SKIPPED_RECORDS_TOTAL};
use gantry_core::types::{FixState, Severity};

use crate::sbom::{PackageMapper, SCANNER_PACKAGE_MAPPERS};
use crate::types::{
    Advisory, Cvss, FixedArtifact, MatchInfo, MatchedArtifact, NvdReference, VulnerabilityInfo,
    VulnerabilityMatch,
};

/// 매치 레코드의 피드 이름
const VULNERABILITIES_FEED: &str = "vulnerabilities";

/// 매치 변환 설정
#[derive(Debug, Clone)]
pub struct MatchMapperConfig {
    /// 취약점 조회 링크 생성에 사용할 API 엔드포인트
    pub api_endpoint: String,
    /// 취약점 ID를 CVE ID로 치환할 피드 그룹 목록
    pub transform_id_feed_groups: Vec<String>,
}

impl Default for MatchMapperConfig {
    fn default() -> Self {
        Self {
            api_endpoint: "http://localhost:8228".to_owned(),
            transform_id_feed_groups: vec!["vulndb".to_owned()],
        }
    }
}

impl MatchMapperConfig {
    /// core 설정 섹션에서 생성합니다.
    pub fn from_core(core: &gantry_core::config::ScanMapperSection) -> Self {
        Self {
            api_endpoint: core.api_endpoint.clone(),
            transform_id_feed_groups: core.transform_id_feed_groups.clone(),
        }
    }
}

/// 스캐너 매치 출력을 엔진 취약점 매치로 변환하는 매퍼
#[derive(Debug, Clone, Default)]
pub struct VulnerabilityMatchMapper {
    config: MatchMapperConfig,
}

impl VulnerabilityMatchMapper {
    /// 설정으로 매퍼를 생성합니다.
    pub fn new(config: MatchMapperConfig) -> Self {
        Self { config }
    }

    /// 스캐너 보고서 전체를 변환합니다.
    ///
    /// 매치 하나의 변환 실패는 로그 후 건너뛰며 배치는 항상 완료됩니다.
    pub fn scanner_matches_to_engine(&self, report: &Value) -> Vec<VulnerabilityMatch> {
        let now = SystemTime::now();
        let matches = report
            .get("matches")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::new();
        for item in &matches {
            let artifact_type = item
                .get("artifact")
                .and_then(|artifact| artifact.get("type"))
                .and_then(Value::as_str)
                .unwrap_or_default();

            let Some(mapper) = SCANNER_PACKAGE_MAPPERS.get(artifact_type) else {
                warn!(
                    artifact_type,
                    "no mapper found for scanner artifact type, skipping vulnerability match"
                );
                counter!(SCAN_MAPPER_SKIPPED_RECORDS_TOTAL).increment(1);
                continue;
            };

            match self.match_to_engine(item, mapper, now) {
                Ok(vuln_match) => {
                    counter!(SCAN_MAPPER_MATCHES_TOTAL).increment(1);
                    results.push(vuln_match);
                }
                Err(e) => {
                    counter!(SCAN_MAPPER_SKIPPED_RECORDS_TOTAL).increment(1);
                    error!(
                        error = %e,
                        "ignoring error in scanner to engine transformation for vulnerability match, skipping it from report"
                    );
                }
            }
        }
        results
    }

    /// 매치 하나를 변환합니다.
    fn match_to_engine(
        &self,
        item: &Value,
        mapper: &PackageMapper,
        now: SystemTime,
    ) -> Result<VulnerabilityMatch, MappingError> {
        let artifact = item.get("artifact").ok_or_else(|| MappingError::MissingField {
            field: "artifact".to_owned(),
            context: "scanner match".to_owned(),
        })?;
        let vulnerability = item
            .get("vulnerability")
            .ok_or_else(|| MappingError::MissingField {
                field: "vulnerability".to_owned(),
                context: "scanner match".to_owned(),
            })?;

        let cvss = try_parse_cvss(vulnerability.get("cvss"));

        // 수정 정보
        let mut fix = FixedArtifact {
            versions: Vec::new(),
            will_not_fix: false,
            observed_at: None,
            advisories: Vec::new(),
        };
        if let Some(fix_value) = vulnerability.get("fix") {
            fix.versions = fix_value
                .get("versions")
                .and_then(Value::as_array)
                .map(|versions| {
                    versions
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default();
            // fix-state 문자열은 여기서 한 번만 enum으로 정규화
            let state = fix_value
                .get("state")
                .and_then(Value::as_str)
                .map(FixState::from_str_loose)
                .unwrap_or_default();
            fix.will_not_fix = state.is_wont_fix();
            fix.observed_at = if fix.versions.is_empty() { None } else { Some(now) };
            fix.advisories = try_parse_advisories(fix_value.get("advisories"));
        }

        let nvd = try_parse_related_vulnerabilities(item.get("relatedVulnerabilities"));

        let location = artifact
            .get("locations")
            .and_then(Value::as_array)
            .and_then(|locations| locations.first())
            .and_then(|location| location.get("path"))
            .and_then(Value::as_str)
            .unwrap_or("NA")
            .to_owned();

        let vulnerability_id = vulnerability
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let feed_group = vulnerability
            .get("namespace")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let severity = vulnerability
            .get("severity")
            .and_then(Value::as_str)
            .and_then(Severity::from_str_loose)
            .unwrap_or_default();

        Ok(VulnerabilityMatch {
            vulnerability: VulnerabilityInfo {
                vulnerability_id: self.normalized_vulnerability_id(
                    vulnerability_id,
                    feed_group.as_deref(),
                    &nvd,
                ),
                description: vulnerability
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                severity,
                link: self.make_link(
                    Some(vulnerability_id),
                    vulnerability.get("dataSource").and_then(Value::as_str),
                ),
                feed: VULNERABILITIES_FEED.to_owned(),
                feed_group,
                cvss,
            },
            artifact: MatchedArtifact {
                name: artifact.get("name").and_then(Value::as_str).map(str::to_owned),
                version: artifact
                    .get("version")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                pkg_type: mapper.engine_type.clone(),
                location,
                cpes: try_parse_matched_cpes(item),
            },
            fix,
            match_info: MatchInfo { detected_at: now },
            nvd,
        })
    }

    /// 서드파티 취약점 식별자를 가능한 경우 CVE 식별자로 치환합니다.
    ///
    /// 설정된 피드 그룹에 한해, NVD 참조가 정확히 하나일 때만 치환합니다.
    /// 참조가 없거나 둘 이상이면 원래 ID를 유지합니다.
    fn normalized_vulnerability_id(
        &self,
        vulnerability_id: &str,
        feed_group: Option<&str>,
        nvd_references: &[NvdReference],
    ) -> String {
        let group_prefix = feed_group
            .and_then(|group| group.split(':').next())
            .map(str::to_lowercase);

        if let Some(prefix) = group_prefix {
            if self.config.transform_id_feed_groups.contains(&prefix)
                && nvd_references.len() == 1
            {
                return nvd_references[0].vulnerability_id.clone();
            }
        }
        vulnerability_id.to_owned()
    }

    /// 취약점 상세 링크를 만듭니다.
    ///
    /// 레코드에 데이터 소스가 없으면 API 조회 URL로 폴백합니다.
    pub(crate) fn make_link(&self, vulnerability_id: Option<&str>, source_url: Option<&str>) -> String {
        if let Some(url) = source_url.filter(|url| !url.is_empty()) {
            return url.to_owned();
        }
        match vulnerability_id.filter(|id| !id.is_empty()) {
            Some(id) => format!("{}/query/vulnerabilities?id={id}", self.config.api_endpoint),
            None => "N/A".to_owned(),
        }
    }
}

/// CVSS 목록의 best-effort 파싱. 손상된 항목은 개별적으로 건너뜁니다.
pub(crate) fn try_parse_cvss(cvss_list: Option<&Value>) -> Vec<Cvss> {
    let Some(entries) = cvss_list.and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut parsed = Vec::new();
    for entry in entries {
        if !entry.is_object() {
            debug!(entry = %entry, "ignoring error parsing cvss entry");
            continue;
        }
        let metrics = entry.get("metrics");
        parsed.push(Cvss {
            version: entry.get("version").and_then(Value::as_str).map(str::to_owned),
            vector: entry.get("vector").and_then(Value::as_str).map(str::to_owned),
            base_score: score_of(metrics, "baseScore"),
            exploitability_score: score_of(metrics, "exploitabilityScore"),
            impact_score: score_of(metrics, "impactScore"),
        });
    }
    parsed
}

fn score_of(metrics: Option<&Value>, key: &str) -> f64 {
    metrics
        .and_then(|metrics| metrics.get(key))
        .and_then(Value::as_f64)
        .unwrap_or(-1.0)
}

/// 관련 취약점 목록의 best-effort 파싱
fn try_parse_related_vulnerabilities(vulns: Option<&Value>) -> Vec<NvdReference> {
    let Some(entries) = vulns.and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut references = Vec::new();
    for entry in entries {
        let Some(id) = entry.get("id").and_then(Value::as_str) else {
            debug!(entry = %entry, "ignoring error parsing related vulnerability entry");
            continue;
        };
        references.push(NvdReference {
            vulnerability_id: id.to_owned(),
            description: None,
            severity: entry.get("severity").and_then(Value::as_str).map(str::to_owned),
            link: entry
                .get("dataSource")
                .and_then(Value::as_str)
                .map(str::to_owned),
            cvss: try_parse_cvss(entry.get("cvss")),
        });
    }
    references
}

/// 권고문 목록의 best-effort 파싱
fn try_parse_advisories(advisories: Option<&Value>) -> Vec<Advisory> {
    let Some(entries) = advisories.and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut parsed = Vec::new();
    for entry in entries {
        if !entry.is_object() {
            debug!(entry = %entry, "ignoring error parsing advisory entry");
            continue;
        }
        parsed.push(Advisory {
            id: entry.get("id").and_then(Value::as_str).map(str::to_owned),
            link: entry.get("link").and_then(Value::as_str).map(str::to_owned),
        });
    }
    parsed
}

/// matchDetails에서 매치에 사용된 CPE를 수집합니다 (중복 제거, 정렬).
fn try_parse_matched_cpes(match_value: &Value) -> Vec<String> {
    let mut cpes = BTreeSet::new();
    if let Some(details) = match_value.get("matchDetails").and_then(Value::as_array) {
        for detail in details {
            let matched = detail
                .get("searchedBy")
                .and_then(|searched| searched.get("cpes"))
                .and_then(Value::as_array);
            if let Some(matched) = matched {
                for cpe in matched.iter().filter_map(Value::as_str) {
                    cpes.insert(cpe.to_owned());
                }
            }
        }
    }
    cpes.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_match(id: &str, namespace: &str, related: serde_json::Value) -> Value {
        serde_json::json!({
            "artifact": {
                "name": "openssl",
                "version": "1.1.1k",
                "type": "rpm",
                "locations": [{"path": "pkgdb"}],
            },
            "vulnerability": {
                "id": id,
                "namespace": namespace,
                "severity": "High",
                "description": "buffer overflow",
                "dataSource": "https://access.redhat.com/security/cve/CVE-2024-1",
                "cvss": [
                    {"version": "3.1", "vector": "CVSS:3.1/AV:N", "metrics": {"baseScore": 7.5}},
                ],
                "fix": {
                    "versions": ["1.1.1t"],
                    "state": "fixed",
                    "advisories": [{"id": "RHSA-2024:1", "link": "https://rhsa.example/1"}],
                },
            },
            "relatedVulnerabilities": related,
            "matchDetails": [
                {
                    "matcher": "rpm-matcher",
                    "searchedBy": {"namespace": "rhel:8", "cpes": ["cpe:2.3:a:openssl:openssl:1.1.1k:*:*:*:*:*:*:*"]},
                },
                {
                    "matcher": "cpe-matcher",
                    "searchedBy": {"cpes": ["cpe:2.3:a:openssl:openssl:1.1.1k:*:*:*:*:*:*:*"]},
                },
            ],
        })
    }

    #[test]
    fn converts_a_full_match() {
        let mapper = VulnerabilityMatchMapper::default();
        let report = serde_json::json!({"matches": [sample_match("CVE-2024-1", "rhel:8", serde_json::json!([]))]});

        let results = mapper.scanner_matches_to_engine(&report);
        assert_eq!(results.len(), 1);

        let result = &results[0];
        assert_eq!(result.vulnerability.vulnerability_id, "CVE-2024-1");
        assert_eq!(result.vulnerability.severity, Severity::High);
        assert_eq!(result.vulnerability.feed, "vulnerabilities");
        assert_eq!(result.vulnerability.feed_group.as_deref(), Some("rhel:8"));
        assert_eq!(
            result.vulnerability.link,
            "https://access.redhat.com/security/cve/CVE-2024-1"
        );
        assert_eq!(result.vulnerability.cvss.len(), 1);
        assert_eq!(result.vulnerability.cvss[0].base_score, 7.5);

        assert_eq!(result.artifact.name.as_deref(), Some("openssl"));
        assert_eq!(result.artifact.pkg_type, "rpm");
        assert_eq!(result.artifact.location, "pkgdb");
        // 두 matchDetails의 같은 CPE는 중복 제거됨
        assert_eq!(result.artifact.cpes.len(), 1);

        assert_eq!(result.fix.versions, vec!["1.1.1t"]);
        assert!(!result.fix.will_not_fix);
        assert!(result.fix.observed_at.is_some());
        assert_eq!(result.fix.advisories.len(), 1);
        assert_eq!(result.fix.advisories[0].id.as_deref(), Some("RHSA-2024:1"));
    }

    #[test]
    fn wont_fix_state_variants_set_flag() {
        let mapper = VulnerabilityMatchMapper::default();
        for state in ["wont-fix", "Wont-Fix", "wont_fix", "wontfix"] {
            let mut item = sample_match("CVE-2024-2", "rhel:8", serde_json::json!([]));
            item["vulnerability"]["fix"] = serde_json::json!({"versions": [], "state": state});
            let report = serde_json::json!({"matches": [item]});
            let results = mapper.scanner_matches_to_engine(&report);
            assert!(results[0].fix.will_not_fix, "state {state} should set will_not_fix");
            // 수정 버전이 없으므로 관측 시각도 없음
            assert!(results[0].fix.observed_at.is_none());
        }
    }

    #[test]
    fn unknown_artifact_type_is_skipped_with_rest_converted() {
        let mapper = VulnerabilityMatchMapper::default();
        let mut unknown = sample_match("CVE-2024-3", "rhel:8", serde_json::json!([]));
        unknown["artifact"]["type"] = serde_json::json!("cobol-lib");
        let report = serde_json::json!({
            "matches": [unknown, sample_match("CVE-2024-4", "rhel:8", serde_json::json!([]))]
        });

        let results = mapper.scanner_matches_to_engine(&report);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].vulnerability.vulnerability_id, "CVE-2024-4");
    }

    #[test]
    fn malformed_match_is_skipped_without_failing_batch() {
        let mapper = VulnerabilityMatchMapper::default();
        let report = serde_json::json!({
            "matches": [
                {"artifact": {"type": "rpm"}},  // vulnerability 필드 없음
                sample_match("CVE-2024-5", "rhel:8", serde_json::json!([])),
            ]
        });
        let results = mapper.scanner_matches_to_engine(&report);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn malformed_cvss_entry_is_skipped_individually() {
        let parsed = try_parse_cvss(Some(&serde_json::json!([
            "not an object",
            {"version": "2.0", "metrics": {"baseScore": 5.0}},
        ])));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].version.as_deref(), Some("2.0"));
        assert_eq!(parsed[0].base_score, 5.0);
    }

    #[test]
    fn cvss_missing_scores_default_to_minus_one() {
        let parsed = try_parse_cvss(Some(&serde_json::json!([{"version": "3.1"}])));
        assert_eq!(parsed[0].base_score, -1.0);
        assert_eq!(parsed[0].exploitability_score, -1.0);
        assert_eq!(parsed[0].impact_score, -1.0);
    }

    #[test]
    fn vulndb_id_with_single_nvd_reference_is_normalized() {
        let mapper = VulnerabilityMatchMapper::default();
        let related = serde_json::json!([
            {"id": "CVE-2019-1234", "severity": "High", "dataSource": "https://nvd.example"},
        ]);
        let mut item = sample_match("VULNDB-999", "vulndb:vulnerabilities", related);
        item["artifact"]["type"] = serde_json::json!("python");
        let report = serde_json::json!({"matches": [item]});

        let results = mapper.scanner_matches_to_engine(&report);
        assert_eq!(results[0].vulnerability.vulnerability_id, "CVE-2019-1234");
    }

    #[test]
    fn vulndb_id_with_zero_or_many_nvd_references_is_unchanged() {
        let mapper = VulnerabilityMatchMapper::default();

        for related in [
            serde_json::json!([]),
            serde_json::json!([
                {"id": "CVE-2019-1"},
                {"id": "CVE-2019-2"},
            ]),
        ] {
            let item = sample_match("VULNDB-999", "vulndb:vulnerabilities", related);
            let report = serde_json::json!({"matches": [item]});
            let results = mapper.scanner_matches_to_engine(&report);
            assert_eq!(results[0].vulnerability.vulnerability_id, "VULNDB-999");
        }
    }

    #[test]
    fn non_transform_feed_group_keeps_id_even_with_single_reference() {
        let mapper = VulnerabilityMatchMapper::default();
        let related = serde_json::json!([{"id": "CVE-2019-1234"}]);
        let item = sample_match("RHSA-2024:1", "rhel:8", related);
        let report = serde_json::json!({"matches": [item]});

        let results = mapper.scanner_matches_to_engine(&report);
        assert_eq!(results[0].vulnerability.vulnerability_id, "RHSA-2024:1");
    }

    #[test]
    fn link_falls_back_to_query_url() {
        let mapper = VulnerabilityMatchMapper::default();
        assert_eq!(
            mapper.make_link(Some("CVE-1"), None),
            "http://localhost:8228/query/vulnerabilities?id=CVE-1"
        );
        assert_eq!(mapper.make_link(None, None), "N/A");
        assert_eq!(
            mapper.make_link(Some("CVE-1"), Some("https://source.example")),
            "https://source.example"
        );
    }

    #[test]
    fn empty_report_yields_empty_results() {
        let mapper = VulnerabilityMatchMapper::default();
        assert!(mapper.scanner_matches_to_engine(&serde_json::json!({})).is_empty());
        assert!(
            mapper
                .scanner_matches_to_engine(&serde_json::json!({"matches": []}))
                .is_empty()
        );
    }

    #[test]
    fn missing_location_defaults_to_na() {
        let mapper = VulnerabilityMatchMapper::default();
        let mut item = sample_match("CVE-2024-6", "rhel:8", serde_json::json!([]));
        item["artifact"]["locations"] = serde_json::json!([]);
        let report = serde_json::json!({"matches": [item]});
        let results = mapper.scanner_matches_to_engine(&report);
        assert_eq!(results[0].artifact.location, "NA");
    }
}
