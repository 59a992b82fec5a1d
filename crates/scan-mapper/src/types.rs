//! 매핑 계층의 입출력 타입
//!
//! 입력은 이미지 분석 파이프라인이 추출한 패키지 콘텐츠 레코드이고,
//! 출력은 스캐너 SBOM 문서(엔진 → 스캐너)와 정규화된 취약점 매치
//! 레코드(스캐너 → 엔진)입니다. 스캐너 스키마 쪽 구조체는 스캐너가
//! 요구하는 camelCase 필드명으로 직렬화됩니다.
//!
//! 매핑 호출 동안만 생성되어 쓰이고 버려지는 일시적 타입들이며, 이
//! 크레이트는 아무것도 영속화하지 않습니다.

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use gantry_core::types::Severity;

// --- 입력 모델 (엔진 내부) ---

/// 스캔 대상 이미지의 배포판 정보
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageInfo {
    /// 배포판 이름 (예: "rhel", "debian")
    pub distro_name: Option<String>,
    /// 배포판 버전
    pub distro_version: Option<String>,
}

/// 이미지 콘텐츠의 패키지 레코드 하나
///
/// 콘텐츠 타입별 목록으로 묶여 [`ImageContentMap`]으로 전달됩니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageContent {
    /// 패키지 이름
    pub package: String,
    /// 패키지 버전 (rpm은 `epoch:version-release` 전체 문자열)
    pub version: String,
    /// 생태계 타입 태그 (os 콘텐츠에서 개별 레코드의 타입)
    #[serde(default)]
    pub pkg_type: String,
    /// 발견된 CPE 목록 (없으면 fuzzy 생성 대상)
    #[serde(default)]
    pub cpes: Vec<String>,
    /// 소스 패키지 이름 (sentinel "N/A" 가능)
    #[serde(default)]
    pub sourcepkg: Option<String>,
    /// 파일 경로 (언어 패키지)
    #[serde(default)]
    pub location: Option<String>,
    /// 생태계별 메타데이터 (예: java의 pom.properties)
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// 콘텐츠 타입 → 패키지 레코드 목록
///
/// `"os"` 키는 OS 패키지이며 레코드별 `pkg_type`으로 매퍼를 고릅니다.
/// 순회가 결정적이도록 `BTreeMap`을 사용합니다.
pub type ImageContentMap = BTreeMap<String, Vec<PackageContent>>;

// --- 스캐너 SBOM 문서 (엔진 → 스캐너 방향 출력) ---

/// 스캐너에 전달되는 SBOM 문서
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerSbom {
    /// SBOM 스키마 헤더
    pub schema: SbomSchema,
    /// 배포판 블록
    pub distro: ScannerDistro,
    /// 소스 블록 (이미지 스캔 고정값)
    pub source: SbomSource,
    /// 아티팩트 목록
    pub artifacts: Vec<SbomArtifact>,
}

/// SBOM 스키마 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SbomSchema {
    /// 스키마 버전
    pub version: String,
    /// 스키마 정의 URL
    pub url: String,
}

/// 스캐너가 인식하는 배포판 삼중항
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerDistro {
    /// 스캐너 측 배포판 이름
    pub name: String,
    /// 배포판 버전
    pub version: String,
    /// 계열 배포판
    #[serde(rename = "idLike")]
    pub id_like: String,
}

/// SBOM 소스 블록
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SbomSource {
    /// 소스 타입 (항상 "image")
    #[serde(rename = "type")]
    pub source_type: String,
    /// 스캔 대상 기술
    pub target: SbomTarget,
}

/// SBOM 소스 대상 블록
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SbomTarget {
    /// 레이어 범위
    pub scope: String,
    /// 매니페스트 미디어 타입
    #[serde(rename = "mediaType")]
    pub media_type: String,
}

/// 스캐너 SBOM의 아티팩트 하나
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SbomArtifact {
    /// 생성된 고유 id
    pub id: String,
    /// 패키지 이름
    pub name: String,
    /// 패키지 버전
    pub version: String,
    /// 스캐너가 인식하는 타입 태그
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// 언어 태그 (언어 패키지만)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language: String,
    /// CPE 목록
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cpes: Vec<String>,
    /// 위치 목록
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<ArtifactLocation>>,
    /// 메타데이터 타입 태그
    #[serde(
        rename = "metadataType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub metadata_type: Option<String>,
    /// 생태계별 메타데이터
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// 아티팩트 위치
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLocation {
    /// 경로
    pub path: String,
}

// --- 엔진 취약점 매치 (스캐너 → 엔진 방향 출력) ---

/// 하나의 아티팩트와 하나의 취약점을 잇는 매치 레코드
///
/// 외부로 보이는 출력 단위입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnerabilityMatch {
    /// 취약점 정보
    pub vulnerability: VulnerabilityInfo,
    /// 매칭된 아티팩트
    pub artifact: MatchedArtifact,
    /// 수정 정보
    pub fix: FixedArtifact,
    /// 매치 메타데이터
    #[serde(rename = "match")]
    pub match_info: MatchInfo,
    /// NVD 상호 참조
    pub nvd: Vec<NvdReference>,
}

/// 정규화된 취약점 정보
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulnerabilityInfo {
    /// 취약점 ID (피드 그룹 정책에 따라 CVE로 치환될 수 있음)
    pub vulnerability_id: String,
    /// 설명
    pub description: Option<String>,
    /// 심각도
    pub severity: Severity,
    /// 상세 링크
    pub link: String,
    /// 피드 이름 (항상 "vulnerabilities")
    pub feed: String,
    /// 피드 그룹 (네임스페이스)
    pub feed_group: Option<String>,
    /// CVSS 블록
    pub cvss: Vec<Cvss>,
}

/// CVSS 점수 블록
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cvss {
    /// CVSS 버전
    pub version: Option<String>,
    /// 벡터 문자열
    pub vector: Option<String>,
    /// 기본 점수 (-1.0 = 없음)
    pub base_score: f64,
    /// 공격 용이성 점수 (-1.0 = 없음)
    pub exploitability_score: f64,
    /// 영향 점수 (-1.0 = 없음)
    pub impact_score: f64,
}

/// NVD 상호 참조
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NvdReference {
    /// CVE ID
    pub vulnerability_id: String,
    /// 설명 (현재 미사용)
    pub description: Option<String>,
    /// 심각도
    pub severity: Option<String>,
    /// 데이터 소스 링크
    pub link: Option<String>,
    /// CVSS 블록
    pub cvss: Vec<Cvss>,
}

/// 권고문 참조
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    /// 권고문 ID
    pub id: Option<String>,
    /// 권고문 링크
    pub link: Option<String>,
}

/// 수정 정보
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedArtifact {
    /// 수정 버전 목록
    pub versions: Vec<String>,
    /// 벤더가 수정을 거부했는지 여부
    pub will_not_fix: bool,
    /// 수정 버전이 관측된 시각 (수정 버전이 있을 때만)
    pub observed_at: Option<SystemTime>,
    /// 권고문 목록
    pub advisories: Vec<Advisory>,
}

/// 매칭된 아티팩트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedArtifact {
    /// 패키지 이름
    pub name: Option<String>,
    /// 패키지 버전
    pub version: Option<String>,
    /// 엔진 패키지 타입
    pub pkg_type: String,
    /// 패키지 경로
    pub location: String,
    /// 매치에 사용된 CPE 목록 (중복 제거)
    pub cpes: Vec<String>,
}

/// 매치 메타데이터
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchInfo {
    /// 매치 시각
    pub detected_at: SystemTime,
}

// --- 정규화된 DB 레코드 (dbrecord 출력) ---

/// URL 참조
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlReference {
    /// 출처 태그
    pub source: String,
    /// URL
    pub url: String,
}

/// 정규화된 레코드의 영향받는 패키지 항목
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedAffectedPackage {
    /// 패키지 이름
    pub name: Option<String>,
    /// 버전 포맷 태그
    #[serde(rename = "type")]
    pub pkg_type: Option<String>,
    /// 버전 제약 (없으면 "*")
    pub version: String,
    /// 벤더가 수정을 거부했는지 여부
    pub will_not_fix: bool,
}

/// CVSS 기본 점수 집합
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseMetrics {
    /// 기본 점수 (-1.0 = 없음)
    pub base_score: f64,
    /// 공격 용이성 점수
    pub exploitability_score: f64,
    /// 영향 점수
    pub impact_score: f64,
}

impl Default for BaseMetrics {
    fn default() -> Self {
        Self {
            base_score: -1.0,
            exploitability_score: -1.0,
            impact_score: -1.0,
        }
    }
}

/// 변환된 CVSS 점수 하나
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvssScore {
    /// CVSS 버전
    pub version: Option<String>,
    /// 벡터 문자열
    pub vector_string: Option<String>,
    /// 기본 점수에서 유도한 심각도
    pub severity: Severity,
    /// 기본 점수 집합
    pub base_metrics: BaseMetrics,
}

/// 버전 칸이 구분된 CVSS 블록
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvssScoreBlock {
    /// v2 점수 (v3 블록이면 None)
    pub cvss_v2: Option<CvssScore>,
    /// v3 점수 (v2 블록이면 None)
    pub cvss_v3: Option<CvssScore>,
    /// 취약점 ID
    pub id: String,
}

/// 엔진 포맷으로 정규화된 취약점 레코드
///
/// 스토어의 left-outer-join 조회 결과를 `(id, namespace)`로 그룹핑한
/// 결과입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedVulnerability {
    /// 취약점 ID
    pub id: String,
    /// 네임스페이스
    pub namespace: String,
    /// 심각도 (업스트림 문자열 그대로)
    pub severity: Option<String>,
    /// 상세 링크
    pub link: String,
    /// 설명
    pub description: Option<String>,
    /// URL 참조 목록
    pub references: Vec<UrlReference>,
    /// 영향받는 패키지 목록 (중복 제거)
    pub affected_packages: Vec<NormalizedAffectedPackage>,
    /// NVD CVSS 데이터
    pub nvd_data: Vec<CvssScoreBlock>,
    /// 벤더 CVSS 데이터
    pub vendor_data: Vec<CvssScoreBlock>,
}
