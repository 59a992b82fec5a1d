//! DB 조회 결과 → 엔진 포맷 정규화
//!
//! 스토어의 left-outer-join 조회 결과를 `(id, namespace)`로 그룹핑해
//! 엔진이 기대하는 정규화 취약점 레코드로 변환합니다. CVSS 블록의 심각도
//! 분류는 NVD 정성 등급표를 그대로 따르며, 이 값이 다운스트림 정책
//! 게이트의 심각도 비교를 결정합니다.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::warn;

use gantry_core::types::Severity;
use gantry_vuln_store::{VulnerabilityJoinRow, VulnerabilityMetadataRow};

use crate::types::{
    BaseMetrics, CvssScore, CvssScoreBlock, NormalizedAffectedPackage, NormalizedVulnerability,
    UrlReference,
};

/// NVD 정성 등급표에 따라 기본 점수를 심각도로 분류합니다.
///
/// - v2: ≤3.9 Low, ≤6.9 Medium, ≤10 High
/// - v3: ≤3.9 Low, ≤6.9 Medium, ≤8.9 High, ≤10 Critical
/// - 버전을 인식할 수 없거나 점수가 없으면 Unknown
pub fn classify_severity(version: Option<&str>, base_score: Option<f64>) -> Severity {
    let Some(score) = base_score else {
        return Severity::Unknown;
    };
    match version {
        Some(version) if version.starts_with('2') => {
            if score <= 3.9 {
                Severity::Low
            } else if score <= 6.9 {
                Severity::Medium
            } else if score <= 10.0 {
                Severity::High
            } else {
                Severity::Unknown
            }
        }
        Some(version) if version.starts_with('3') => {
            if score <= 3.9 {
                Severity::Low
            } else if score <= 6.9 {
                Severity::Medium
            } else if score <= 8.9 {
                Severity::High
            } else if score <= 10.0 {
                Severity::Critical
            } else {
                Severity::Unknown
            }
        }
        _ => Severity::Unknown,
    }
}

/// DB 레코드 매퍼
#[derive(Debug, Clone)]
pub struct EngineDbMapper {
    /// 링크 폴백에 사용할 API 엔드포인트
    api_endpoint: String,
}

impl Default for EngineDbMapper {
    fn default() -> Self {
        Self::new("http://localhost:8228")
    }
}

impl EngineDbMapper {
    /// API 엔드포인트로 매퍼를 생성합니다.
    pub fn new(api_endpoint: impl Into<String>) -> Self {
        Self {
            api_endpoint: api_endpoint.into(),
        }
    }

    /// 원시 CVSS 객체 하나를 점수 블록으로 변환합니다.
    ///
    /// DB의 CVSS 블록은 대문자 키(`Version`, `Vector`, `Metrics`)를
    /// 사용합니다. 없는 점수는 -1.0으로 채웁니다.
    pub fn transform_cvss_score(&self, cvss: &Value) -> CvssScore {
        let version = cvss.get("Version").and_then(Value::as_str);
        let metrics = cvss.get("Metrics");
        let base_score = metrics
            .and_then(|metrics| metrics.get("BaseScore"))
            .and_then(Value::as_f64);

        CvssScore {
            version: version.map(str::to_owned),
            vector_string: cvss.get("Vector").and_then(Value::as_str).map(str::to_owned),
            severity: classify_severity(version, base_score),
            base_metrics: BaseMetrics {
                base_score: base_score.unwrap_or(-1.0),
                exploitability_score: metrics
                    .and_then(|metrics| metrics.get("ExploitabilityScore"))
                    .and_then(Value::as_f64)
                    .unwrap_or(-1.0),
                impact_score: metrics
                    .and_then(|metrics| metrics.get("ImpactScore"))
                    .and_then(Value::as_f64)
                    .unwrap_or(-1.0),
            },
        }
    }

    /// CVSS 객체를 버전 칸이 구분된 블록으로 변환합니다.
    ///
    /// v2/v3 이외의 버전은 경고 후 생략됩니다.
    pub fn transform_cvss(&self, vulnerability_id: &str, cvss: &Value) -> Option<CvssScoreBlock> {
        let version = cvss.get("Version").and_then(Value::as_str).unwrap_or_default();
        if version.starts_with('2') {
            Some(CvssScoreBlock {
                cvss_v2: Some(self.transform_cvss_score(cvss)),
                cvss_v3: None,
                id: vulnerability_id.to_owned(),
            })
        } else if version.starts_with('3') {
            Some(CvssScoreBlock {
                cvss_v2: None,
                cvss_v3: Some(self.transform_cvss_score(cvss)),
                id: vulnerability_id.to_owned(),
            })
        } else {
            warn!(
                vulnerability_id,
                version, "omitting cvss with unknown version from vulnerability"
            );
            None
        }
    }

    /// 메타데이터 행의 직렬화된 CVSS 컬럼 전체를 변환합니다.
    fn cvss_blocks_from_row(&self, row: &VulnerabilityMetadataRow) -> Vec<CvssScoreBlock> {
        let Value::Array(entries) = row.deserialized_cvss() else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|cvss| self.transform_cvss(&row.id, cvss))
            .collect()
    }

    fn transform_urls(&self, urls: &Value) -> Vec<UrlReference> {
        let Value::Array(entries) = urls else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(Value::as_str)
            .map(|url| UrlReference {
                source: "N/A".to_owned(),
                url: url.to_owned(),
            })
            .collect()
    }

    fn make_link(&self, vulnerability_id: &str, data_source: Option<&str>) -> String {
        match data_source.filter(|url| !url.is_empty()) {
            Some(url) => url.to_owned(),
            None => format!(
                "{}/query/vulnerabilities?id={vulnerability_id}",
                self.api_endpoint
            ),
        }
    }

    /// 조회 결과를 정규화 취약점 레코드 목록으로 변환합니다.
    ///
    /// `nvd_metadata_rows`는 관련 취약점의 NVD 레코드로, CVE id →
    /// CVSS 블록 맵을 구성하는 데 쓰입니다. outer join의 null 패키지
    /// 측은 affected_packages에 기여하지 않지만 레코드 자체는 남습니다.
    pub fn to_engine_vulnerabilities(
        &self,
        join_rows: &[VulnerabilityJoinRow],
        nvd_metadata_rows: &[VulnerabilityMetadataRow],
    ) -> Vec<NormalizedVulnerability> {
        // cve id → cvss 블록 맵
        let nvd_cvss_map: HashMap<&str, Vec<CvssScoreBlock>> = nvd_metadata_rows
            .iter()
            .map(|row| (row.id.as_str(), self.cvss_blocks_from_row(row)))
            .collect();

        // (id, namespace)별로 그룹핑, 입력 순서 유지
        let mut order: Vec<(String, String)> = Vec::new();
        let mut grouped: HashMap<(String, String), NormalizedVulnerability> = HashMap::new();

        for row in join_rows {
            let key = (row.metadata.id.clone(), row.metadata.namespace.clone());

            if !grouped.contains_key(&key) {
                let metadata = &row.metadata;
                let mut record = NormalizedVulnerability {
                    id: metadata.id.clone(),
                    namespace: metadata.namespace.clone(),
                    severity: metadata.severity.clone(),
                    link: self.make_link(&metadata.id, metadata.data_source.as_deref()),
                    description: metadata.description.clone(),
                    references: self.transform_urls(&metadata.deserialized_urls()),
                    affected_packages: Vec::new(),
                    nvd_data: Vec::new(),
                    vendor_data: Vec::new(),
                };

                if metadata.namespace.to_lowercase().contains("nvd") {
                    record.nvd_data = nvd_cvss_map
                        .get(metadata.id.as_str())
                        .cloned()
                        .unwrap_or_default();
                } else {
                    record.vendor_data = self.cvss_blocks_from_row(metadata);

                    // 관련 취약점의 NVD 레코드에서 nvd_data 보강
                    if let Some(package) = &row.package {
                        if let Value::Array(related) =
                            package.deserialized_related_vulnerabilities()
                        {
                            for related_vuln in &related {
                                let namespace = related_vuln
                                    .get("Namespace")
                                    .and_then(Value::as_str)
                                    .unwrap_or_default();
                                if !namespace.to_lowercase().contains("nvd") {
                                    continue;
                                }
                                let related_id = related_vuln
                                    .get("ID")
                                    .and_then(Value::as_str)
                                    .unwrap_or_default();
                                if let Some(blocks) = nvd_cvss_map.get(related_id) {
                                    record.nvd_data.extend(blocks.iter().cloned());
                                }
                            }
                        }
                    }
                }

                order.push(key.clone());
                grouped.insert(key.clone(), record);
            }

            // outer join이므로 패키지 측이 있는 행만 affected_packages에 기여
            if let Some(package) = &row.package {
                let version = match package.version_constraint.as_deref() {
                    Some(constraint) if !constraint.is_empty() => constraint
                        .split("||")
                        .map(|version| version.trim_matches([' ', '\'', '"']))
                        .collect::<Vec<_>>()
                        .join(","),
                    _ => "*".to_owned(),
                };

                let record = grouped.get_mut(&key).expect("group inserted above");
                record.affected_packages.push(NormalizedAffectedPackage {
                    name: package.package_name.clone(),
                    pkg_type: package.version_format.clone(),
                    version,
                    will_not_fix: package.fix_state.as_deref() == Some("wont-fix"),
                });
            }
        }

        // 영향받는 패키지 중복 제거 (첫 등장 순서 유지)
        let mut results = Vec::with_capacity(order.len());
        for key in order {
            let mut record = grouped.remove(&key).expect("group recorded in order");
            let mut seen = HashSet::new();
            record
                .affected_packages
                .retain(|package| seen.insert(package.clone()));
            results.push(record);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_vuln_store::AffectedPackageRow;

    fn metadata_row(id: &str, namespace: &str, cvss: &str) -> VulnerabilityMetadataRow {
        VulnerabilityMetadataRow {
            id: id.to_owned(),
            namespace: namespace.to_owned(),
            data_source: Some(format!("https://source.example/{id}")),
            record_source: Some("vulnerabilities".to_owned()),
            severity: Some("High".to_owned()),
            urls: Some("[\"https://example.com/advisory\"]".to_owned()),
            description: Some("test vulnerability".to_owned()),
            cvss: Some(cvss.to_owned()),
        }
    }

    fn package_row(id: &str, namespace: &str, name: &str, constraint: &str) -> AffectedPackageRow {
        AffectedPackageRow {
            id: id.to_owned(),
            package_name: Some(name.to_owned()),
            namespace: namespace.to_owned(),
            version_constraint: Some(constraint.to_owned()),
            version_format: Some("dpkg".to_owned()),
            cpes: Some("[]".to_owned()),
            related_vulnerabilities: Some("[]".to_owned()),
            fixed_in_versions: Some("[]".to_owned()),
            fix_state: Some("fixed".to_owned()),
            advisories: Some("[]".to_owned()),
        }
    }

    // 심각도 등급 경계값 — 정책 게이트가 이 값에 의존하므로 정확해야 함
    #[test]
    fn v3_severity_band_boundaries() {
        assert_eq!(classify_severity(Some("3.1"), Some(3.9)), Severity::Low);
        assert_eq!(classify_severity(Some("3.1"), Some(4.0)), Severity::Medium);
        assert_eq!(classify_severity(Some("3.1"), Some(6.9)), Severity::Medium);
        assert_eq!(classify_severity(Some("3.1"), Some(7.0)), Severity::High);
        assert_eq!(classify_severity(Some("3.1"), Some(8.9)), Severity::High);
        assert_eq!(classify_severity(Some("3.1"), Some(9.0)), Severity::Critical);
        assert_eq!(classify_severity(Some("3.1"), Some(10.0)), Severity::Critical);
    }

    #[test]
    fn v2_severity_band_boundaries() {
        assert_eq!(classify_severity(Some("2.0"), Some(3.9)), Severity::Low);
        assert_eq!(classify_severity(Some("2.0"), Some(4.0)), Severity::Medium);
        assert_eq!(classify_severity(Some("2.0"), Some(6.9)), Severity::Medium);
        assert_eq!(classify_severity(Some("2.0"), Some(7.0)), Severity::High);
        assert_eq!(classify_severity(Some("2.0"), Some(10.0)), Severity::High);
    }

    #[test]
    fn unknown_version_or_missing_score_is_unknown() {
        assert_eq!(classify_severity(None, Some(9.0)), Severity::Unknown);
        assert_eq!(classify_severity(Some("4.0"), Some(9.0)), Severity::Unknown);
        assert_eq!(classify_severity(Some("3.1"), None), Severity::Unknown);
    }

    #[test]
    fn transform_cvss_routes_by_version() {
        let mapper = EngineDbMapper::default();

        let v2 = serde_json::json!({"Version": "2.0", "Vector": "AV:N", "Metrics": {"BaseScore": 5.0}});
        let block = mapper.transform_cvss("CVE-1", &v2).unwrap();
        assert!(block.cvss_v2.is_some());
        assert!(block.cvss_v3.is_none());
        assert_eq!(block.cvss_v2.unwrap().severity, Severity::Medium);

        let v3 = serde_json::json!({"Version": "3.1", "Metrics": {"BaseScore": 9.8}});
        let block = mapper.transform_cvss("CVE-1", &v3).unwrap();
        assert!(block.cvss_v2.is_none());
        assert_eq!(block.cvss_v3.unwrap().severity, Severity::Critical);

        let unknown = serde_json::json!({"Version": "4.0"});
        assert!(mapper.transform_cvss("CVE-1", &unknown).is_none());
    }

    #[test]
    fn transform_cvss_score_defaults_missing_metrics() {
        let mapper = EngineDbMapper::default();
        let score = mapper.transform_cvss_score(&serde_json::json!({"Version": "3.1"}));
        assert_eq!(score.base_metrics.base_score, -1.0);
        assert_eq!(score.severity, Severity::Unknown);
    }

    #[test]
    fn groups_rows_by_id_and_namespace() {
        let mapper = EngineDbMapper::default();
        let rows = vec![
            VulnerabilityJoinRow {
                package: Some(package_row("CVE-1", "debian:10", "openssl", "< 1.1.1t")),
                metadata: metadata_row("CVE-1", "debian:10", "[]"),
            },
            VulnerabilityJoinRow {
                package: Some(package_row("CVE-1", "debian:10", "libssl-dev", "< 1.1.1t")),
                metadata: metadata_row("CVE-1", "debian:10", "[]"),
            },
        ];

        let results = mapper.to_engine_vulnerabilities(&rows, &[]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "CVE-1");
        assert_eq!(results[0].affected_packages.len(), 2);
        assert_eq!(results[0].severity.as_deref(), Some("High"));
        assert_eq!(results[0].link, "https://source.example/CVE-1");
        assert_eq!(results[0].references.len(), 1);
    }

    #[test]
    fn null_package_side_keeps_record_with_no_affected_packages() {
        let mapper = EngineDbMapper::default();
        let rows = vec![VulnerabilityJoinRow {
            package: None,
            metadata: metadata_row("CVE-X", "debian:10", "[]"),
        }];

        let results = mapper.to_engine_vulnerabilities(&rows, &[]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "CVE-X");
        assert!(results[0].affected_packages.is_empty());
    }

    #[test]
    fn version_constraint_split_and_fallback() {
        let mapper = EngineDbMapper::default();
        let rows = vec![
            VulnerabilityJoinRow {
                package: Some(package_row(
                    "CVE-1",
                    "debian:10",
                    "openssl",
                    "< 1.0 || >= 2.0, < 2.1",
                )),
                metadata: metadata_row("CVE-1", "debian:10", "[]"),
            },
            VulnerabilityJoinRow {
                package: Some(AffectedPackageRow {
                    version_constraint: None,
                    ..package_row("CVE-2", "debian:10", "zlib", "")
                }),
                metadata: metadata_row("CVE-2", "debian:10", "[]"),
            },
        ];

        let results = mapper.to_engine_vulnerabilities(&rows, &[]);
        assert_eq!(results[0].affected_packages[0].version, "< 1.0,>= 2.0, < 2.1");
        assert_eq!(results[1].affected_packages[0].version, "*");
    }

    #[test]
    fn duplicate_affected_packages_are_deduplicated() {
        let mapper = EngineDbMapper::default();
        let rows = vec![
            VulnerabilityJoinRow {
                package: Some(package_row("CVE-1", "debian:10", "openssl", "< 1.0")),
                metadata: metadata_row("CVE-1", "debian:10", "[]"),
            },
            VulnerabilityJoinRow {
                package: Some(package_row("CVE-1", "debian:10", "openssl", "< 1.0")),
                metadata: metadata_row("CVE-1", "debian:10", "[]"),
            },
        ];

        let results = mapper.to_engine_vulnerabilities(&rows, &[]);
        assert_eq!(results[0].affected_packages.len(), 1);
    }

    #[test]
    fn wont_fix_state_sets_flag() {
        let mapper = EngineDbMapper::default();
        let rows = vec![VulnerabilityJoinRow {
            package: Some(AffectedPackageRow {
                fix_state: Some("wont-fix".to_owned()),
                ..package_row("CVE-1", "rhel:8", "openssl", "< 1.0")
            }),
            metadata: metadata_row("CVE-1", "rhel:8", "[]"),
        }];

        let results = mapper.to_engine_vulnerabilities(&rows, &[]);
        assert!(results[0].affected_packages[0].will_not_fix);
    }

    #[test]
    fn nvd_namespace_uses_nvd_data_slot() {
        let mapper = EngineDbMapper::default();
        let cvss = r#"[{"Version": "3.1", "Metrics": {"BaseScore": 9.8}}]"#;
        let nvd_rows = vec![metadata_row("CVE-1", "nvd:cves", cvss)];
        let rows = vec![VulnerabilityJoinRow {
            package: None,
            metadata: metadata_row("CVE-1", "nvd:cves", cvss),
        }];

        let results = mapper.to_engine_vulnerabilities(&rows, &nvd_rows);
        assert_eq!(results[0].nvd_data.len(), 1);
        assert!(results[0].vendor_data.is_empty());
    }

    #[test]
    fn vendor_namespace_resolves_nvd_data_from_related_vulnerabilities() {
        let mapper = EngineDbMapper::default();
        let nvd_cvss = r#"[{"Version": "3.1", "Metrics": {"BaseScore": 7.5}}]"#;
        let nvd_rows = vec![metadata_row("CVE-2019-1234", "nvd:cves", nvd_cvss)];

        let vendor_cvss = r#"[{"Version": "2.0", "Metrics": {"BaseScore": 5.0}}]"#;
        let rows = vec![VulnerabilityJoinRow {
            package: Some(AffectedPackageRow {
                related_vulnerabilities: Some(
                    r#"[{"ID": "CVE-2019-1234", "Namespace": "nvd:cves"}]"#.to_owned(),
                ),
                ..package_row("RHSA-2024:1", "rhel:8", "openssl", "< 1.0")
            }),
            metadata: metadata_row("RHSA-2024:1", "rhel:8", vendor_cvss),
        }];

        let results = mapper.to_engine_vulnerabilities(&rows, &nvd_rows);
        assert_eq!(results[0].vendor_data.len(), 1);
        assert!(results[0].vendor_data[0].cvss_v2.is_some());
        assert_eq!(results[0].nvd_data.len(), 1);
        assert!(results[0].nvd_data[0].cvss_v3.is_some());
    }

    #[test]
    fn link_falls_back_to_query_url_when_no_data_source() {
        let mapper = EngineDbMapper::default();
        let rows = vec![VulnerabilityJoinRow {
            package: None,
            metadata: VulnerabilityMetadataRow {
                data_source: None,
                ..metadata_row("CVE-9", "debian:10", "[]")
            },
        }];
        let results = mapper.to_engine_vulnerabilities(&rows, &[]);
        assert_eq!(
            results[0].link,
            "http://localhost:8228/query/vulnerabilities?id=CVE-9"
        );
    }
}
