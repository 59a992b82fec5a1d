//! 엔진 → 스캐너 방향 변환
//!
//! 이미지 콘텐츠 레코드를 스캐너 SBOM 문서로 변환합니다. 생태계별 매핑은
//! 태그된 [`MapperKind`]로 디스패치되는 자유 함수 조합이며, 모든 변형은
//! 공유 [`base_artifact`] 헬퍼 위에 각자의 증강을 더합니다.
//!
//! 개별 패키지의 변환 실패는 해당 항목만 로그 후 건너뛰고 전체 SBOM
//! 변환은 계속됩니다.

use std::collections::HashMap;
use std::sync::LazyLock;

use metrics::counter;
use tracing::{error, warn};

use gantry_core::error::MappingError;
use gantry_core::metrics::{
    LABEL_PKG_TYPE, SCAN_MAPPER_SBOM_PACKAGES_TOTAL, SCAN_MAPPER_SKIPPED_RECORDS_TOTAL,
};

use crate::cpe::{generate_fuzzy_cpes, generate_fuzzy_go_cpes, generate_java_cpes};
use crate::types::{
    ArtifactLocation, ImageContentMap, ImageInfo, PackageContent, SbomArtifact, SbomSchema,
    SbomSource, SbomTarget, ScannerDistro, ScannerSbom,
};

/// SBOM 스키마 버전 — 스캐너가 이해하는 고정값
const SBOM_SCHEMA_VERSION: &str = "1.1.0";
const SBOM_SCHEMA_URL: &str =
    "https://raw.githubusercontent.com/anchore/syft/main/schema/json/schema-1.1.0.json";

/// OS 패키지가 아닌 콘텐츠 타입 키
const NONOS_CONTENT_TYPES: [&str; 11] = [
    "python", "npm", "gem", "java", "maven", "go", "binary", "js", "composer", "nuget", "kb",
];

/// sentinel 값("N/A")을 걸러낸 값을 반환합니다.
fn non_sentinel(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty() && *v != "N/A" && *v != "n/a")
}

/// rpm 전체 버전 문자열(`epoch:version-release`)에서 epoch를 분리합니다.
///
/// epoch가 없거나 정수가 아니면 `None`입니다.
fn split_epoch(full_version: &str) -> (Option<i64>, &str) {
    match full_version.split_once(':') {
        Some((epoch, rest)) => match epoch.parse::<i64>() {
            Ok(parsed) => (Some(parsed), rest),
            // 유효한 epoch가 아니면 버전 전체를 그대로 사용
            Err(_) => (None, full_version),
        },
        None => (None, full_version),
    }
}

/// 생태계별 증강 방식 태그
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapperKind {
    /// rpm: epoch 분리 + sourceRpm 메타데이터
    Rpm,
    /// debian: 소스 패키지 메타데이터
    Dpkg,
    /// alpine: origin 패키지 메타데이터
    Apk,
    /// CPE 기반 언어 패키지
    Cpe,
    /// Go 모듈 (CPE 생성기만 다름)
    Go,
    /// Java (pom.properties 메타데이터 + 전용 CPE 생성기)
    Java,
    /// microsoft KB (레지스트리 위치, sourcepkg가 제품 id)
    Kb,
}

/// 생태계 하나의 매핑 정책
#[derive(Debug, Clone)]
pub struct PackageMapper {
    /// 엔진 측 패키지 타입
    pub engine_type: String,
    /// 스캐너 측 타입 태그
    pub scanner_type: String,
    /// 스캐너 측 언어 태그 (언어 패키지만)
    pub language: String,
    kind: MapperKind,
}

impl PackageMapper {
    fn new(engine_type: &str, scanner_type: &str, language: &str, kind: MapperKind) -> Self {
        Self {
            engine_type: engine_type.to_owned(),
            scanner_type: scanner_type.to_owned(),
            language: language.to_owned(),
            kind,
        }
    }

    /// 알 수 없는 타입을 위한 일반 CPE 매퍼
    pub fn generic(pkg_type: &str) -> Self {
        Self::new(pkg_type, pkg_type, "", MapperKind::Cpe)
    }

    /// 레코드 하나를 SBOM 아티팩트로 변환합니다.
    pub fn to_artifact(&self, record: &PackageContent) -> Result<SbomArtifact, MappingError> {
        let mut artifact = base_artifact(self, record);
        match self.kind {
            MapperKind::Rpm => augment_rpm(&mut artifact, record),
            MapperKind::Dpkg => augment_dpkg(&mut artifact, record),
            MapperKind::Apk => augment_apk(&mut artifact, record),
            MapperKind::Cpe => augment_cpe(self, &mut artifact, record),
            MapperKind::Go => augment_cpe(self, &mut artifact, record),
            MapperKind::Java => {
                augment_cpe(self, &mut artifact, record);
                augment_java_metadata(&mut artifact, record)?;
            }
            MapperKind::Kb => augment_kb(&mut artifact, record)?,
        }
        Ok(artifact)
    }
}

/// 모든 매퍼가 공유하는 기본 아티팩트
fn base_artifact(mapper: &PackageMapper, record: &PackageContent) -> SbomArtifact {
    SbomArtifact {
        id: uuid::Uuid::new_v4().to_string(),
        name: record.package.clone(),
        version: record.version.clone(),
        artifact_type: mapper.scanner_type.clone(),
        language: String::new(),
        cpes: record.cpes.clone(),
        locations: None,
        metadata_type: None,
        metadata: None,
    }
}

fn pkgdb_location() -> Option<Vec<ArtifactLocation>> {
    Some(vec![ArtifactLocation {
        path: "pkgdb".to_owned(),
    }])
}

/// rpm: 바이너리 패키지의 epoch는 sourceRpm 이름에 없는 경우가 많지만
/// 스캐너는 버전 비교에 epoch가 필요하므로 여기서 분리해 넘깁니다.
fn augment_rpm(artifact: &mut SbomArtifact, record: &PackageContent) {
    artifact.locations = pkgdb_location();

    let (epoch, _) = split_epoch(&record.version);
    let source_rpm = non_sentinel(record.sourcepkg.as_deref());

    artifact.metadata_type = Some("RpmdbMetadata".to_owned());
    artifact.metadata = Some(serde_json::json!({
        "sourceRpm": source_rpm,
        "epoch": epoch,
    }));
}

fn augment_dpkg(artifact: &mut SbomArtifact, record: &PackageContent) {
    artifact.locations = pkgdb_location();
    if let Some(source) = non_sentinel(record.sourcepkg.as_deref()) {
        artifact.metadata_type = Some("DpkgMetadata".to_owned());
        artifact.metadata = Some(serde_json::json!({ "source": source }));
    }
}

fn augment_apk(artifact: &mut SbomArtifact, record: &PackageContent) {
    artifact.locations = pkgdb_location();
    if let Some(origin) = non_sentinel(record.sourcepkg.as_deref()) {
        artifact.metadata_type = Some("ApkMetadata".to_owned());
        artifact.metadata = Some(serde_json::json!({ "originPackage": origin }));
    }
}

/// CPE 기반 언어 패키지 공통 증강: 언어 태그, 파일 위치, CPE 폴백 생성
fn augment_cpe(mapper: &PackageMapper, artifact: &mut SbomArtifact, record: &PackageContent) {
    artifact.language = mapper.language.clone();
    if let Some(location) = non_sentinel(record.location.as_deref()) {
        artifact.locations = Some(vec![ArtifactLocation {
            path: location.to_owned(),
        }]);
    }

    if artifact.cpes.is_empty() {
        artifact.cpes = match mapper.kind {
            MapperKind::Go => generate_fuzzy_go_cpes(&record.package, &record.version),
            MapperKind::Java => generate_java_cpes(record),
            _ => generate_fuzzy_cpes(&record.package, &record.version, &mapper.engine_type),
        };
    }
}

/// java: pom.properties를 구조화된 properties 맵으로 변환해 부착합니다.
fn augment_java_metadata(
    artifact: &mut SbomArtifact,
    record: &PackageContent,
) -> Result<(), MappingError> {
    let Some(pom) = record
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get("pom.properties"))
    else {
        return Ok(());
    };

    let properties = match pom {
        serde_json::Value::String(raw) => serde_json::Value::Object(parse_pom_properties(raw)),
        serde_json::Value::Object(map) => serde_json::Value::Object(map.clone()),
        other => {
            warn!(pom = %other, "unknown format for pom.properties, skip parsing");
            return Ok(());
        }
    };

    artifact.metadata_type = Some("JavaMetadata".to_owned());
    artifact.metadata = Some(serde_json::json!({ "pomProperties": properties }));
    Ok(())
}

/// 원시 `key=value` 텍스트를 properties 맵으로 파싱합니다.
///
/// 빈 줄과 `#` 주석 줄은 건너뛰며, 값에 포함된 `=`는 보존됩니다.
fn parse_pom_properties(raw: &str) -> serde_json::Map<String, serde_json::Value> {
    let mut properties = serde_json::Map::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next().unwrap_or_default().trim();
        let value = parts.next().unwrap_or_default().trim();
        if !key.is_empty() {
            properties.insert(key.to_owned(), serde_json::Value::String(value.to_owned()));
        }
    }
    properties
}

/// microsoft KB: 제품 id(sourcepkg)가 아티팩트 이름이 됩니다.
fn augment_kb(artifact: &mut SbomArtifact, record: &PackageContent) -> Result<(), MappingError> {
    let product = record
        .sourcepkg
        .as_deref()
        .ok_or_else(|| MappingError::MissingField {
            field: "sourcepkg".to_owned(),
            context: "kb package record".to_owned(),
        })?;
    artifact.name = product.to_owned();
    artifact.cpes = Vec::new();
    artifact.locations = Some(vec![ArtifactLocation {
        path: "registry".to_owned(),
    }]);
    Ok(())
}

/// 배포판 하나의 매핑 정책
#[derive(Debug, Clone)]
pub struct DistroMapper {
    /// 엔진 측 배포판 이름
    pub engine_distro: String,
    /// 스캐너 측 배포판 이름
    pub scanner_os: String,
    /// 스캐너 측 계열 배포판
    pub scanner_like_os: String,
}

impl DistroMapper {
    fn new(engine_distro: &str, scanner_os: &str, scanner_like_os: &str) -> Self {
        Self {
            engine_distro: engine_distro.to_owned(),
            scanner_os: scanner_os.to_owned(),
            scanner_like_os: scanner_like_os.to_owned(),
        }
    }

    /// 스캐너가 인식하는 배포판 블록을 만듭니다.
    pub fn to_scanner_distro(&self, version: &str) -> ScannerDistro {
        ScannerDistro {
            name: self.scanner_os.clone(),
            version: version.to_owned(),
            id_like: self.scanner_like_os.clone(),
        }
    }
}

/// 엔진 배포판 이름으로 키된 정적 배포판 테이블
pub static ENGINE_DISTRO_MAPPERS: LazyLock<HashMap<&'static str, DistroMapper>> =
    LazyLock::new(|| {
        HashMap::from([
            ("rhel", DistroMapper::new("rhel", "redhat", "fedora")),
            ("debian", DistroMapper::new("debian", "debian", "debian")),
            ("ubuntu", DistroMapper::new("ubuntu", "ubuntu", "debian")),
            ("alpine", DistroMapper::new("alpine", "alpine", "alpine")),
            ("ol", DistroMapper::new("ol", "oraclelinux", "fedora")),
            ("amzn", DistroMapper::new("amzn", "amazonlinux", "fedora")),
            ("centos", DistroMapper::new("centos", "centos", "fedora")),
            ("busybox", DistroMapper::new("busybox", "busybox", "")),
            ("sles", DistroMapper::new("sles", "sles", "sles")),
            ("windows", DistroMapper::new("windows", "windows", "")),
            ("rocky", DistroMapper::new("rocky", "rockylinux", "fedora")),
        ])
    });

/// 엔진 패키지 타입으로 키된 매퍼 테이블 (엔진 → 스캐너)
pub static ENGINE_PACKAGE_MAPPERS: LazyLock<HashMap<&'static str, PackageMapper>> =
    LazyLock::new(|| {
        HashMap::from([
            ("rpm", PackageMapper::new("rpm", "rpm", "", MapperKind::Rpm)),
            ("dpkg", PackageMapper::new("dpkg", "deb", "", MapperKind::Dpkg)),
            ("APKG", PackageMapper::new("APKG", "apk", "", MapperKind::Apk)),
            ("apkg", PackageMapper::new("apkg", "apk", "", MapperKind::Apk)),
            (
                "python",
                PackageMapper::new("python", "python", "python", MapperKind::Cpe),
            ),
            (
                "npm",
                PackageMapper::new("npm", "npm", "javascript", MapperKind::Cpe),
            ),
            (
                "gem",
                PackageMapper::new("gem", "gem", "ruby", MapperKind::Cpe),
            ),
            (
                "java",
                PackageMapper::new("java", "java-archive", "java", MapperKind::Java),
            ),
            (
                "maven",
                PackageMapper::new("maven", "java-archive", "java", MapperKind::Cpe),
            ),
            (
                "go",
                PackageMapper::new("go", "go-module", "go", MapperKind::Go),
            ),
            (
                "binary",
                PackageMapper::new("binary", "binary", "", MapperKind::Cpe),
            ),
            (
                "js",
                PackageMapper::new("js", "js", "javascript", MapperKind::Cpe),
            ),
            (
                "composer",
                PackageMapper::new("composer", "composer", "", MapperKind::Cpe),
            ),
            (
                "nuget",
                PackageMapper::new("nuget", "nuget", "", MapperKind::Cpe),
            ),
            ("kb", PackageMapper::new("kb", "msrc-kb", "", MapperKind::Kb)),
        ])
    });

/// 스캐너 아티팩트 타입으로 키된 매퍼 테이블 (스캐너 → 엔진)
pub static SCANNER_PACKAGE_MAPPERS: LazyLock<HashMap<&'static str, PackageMapper>> =
    LazyLock::new(|| {
        HashMap::from([
            ("rpm", PackageMapper::new("rpm", "rpm", "", MapperKind::Rpm)),
            ("deb", PackageMapper::new("dpkg", "deb", "", MapperKind::Dpkg)),
            ("apk", PackageMapper::new("apkg", "apk", "", MapperKind::Apk)),
            (
                "python",
                PackageMapper::new("python", "python", "python", MapperKind::Cpe),
            ),
            (
                "npm",
                PackageMapper::new("npm", "npm", "javascript", MapperKind::Cpe),
            ),
            (
                "gem",
                PackageMapper::new("gem", "gem", "ruby", MapperKind::Cpe),
            ),
            (
                "java-archive",
                PackageMapper::new("java", "java-archive", "java", MapperKind::Java),
            ),
            (
                "jenkins-plugin",
                PackageMapper::new("java", "jenkins-plugin", "java", MapperKind::Java),
            ),
            (
                "go-module",
                PackageMapper::new("go", "go-module", "go", MapperKind::Go),
            ),
            (
                "binary",
                PackageMapper::new("binary", "binary", "", MapperKind::Cpe),
            ),
            (
                "js",
                PackageMapper::new("js", "js", "javascript", MapperKind::Cpe),
            ),
            (
                "composer",
                PackageMapper::new("composer", "composer", "", MapperKind::Cpe),
            ),
            (
                "nuget",
                PackageMapper::new("nuget", "nuget", "", MapperKind::Cpe),
            ),
            ("msrc-kb", PackageMapper::new("kb", "msrc-kb", "", MapperKind::Kb)),
        ])
    });

/// 이미지 콘텐츠 전체를 스캐너 SBOM 문서로 변환합니다.
///
/// 알 수 없는 배포판은 변환 전체를 실패시키는 대신 "unknown" 배포판
/// 블록으로 대체됩니다. busybox 배포판은 배포판 버전을 버전으로 갖는
/// 합성 busybox 패키지 아티팩트 하나로 특수 처리됩니다.
pub fn image_content_to_scanner_sbom(image: &ImageInfo, content: &ImageContentMap) -> ScannerSbom {
    let distro_version = image.distro_version.as_deref().unwrap_or("");
    let distro_name = image.distro_name.as_deref().unwrap_or("");

    let distro = match ENGINE_DISTRO_MAPPERS.get(distro_name) {
        Some(mapper) => mapper.to_scanner_distro(distro_version),
        None => {
            warn!(
                distro = distro_name,
                "no distro mapper found, using unknown distro placeholder"
            );
            ScannerDistro {
                name: "unknown".to_owned(),
                version: distro_version.to_owned(),
                id_like: String::new(),
            }
        }
    };

    let mut artifacts = Vec::new();

    // busybox 이미지는 패키지 db가 없으므로 배포판 자체가 곧 패키지
    if distro_name == "busybox" && !distro_version.is_empty() {
        let record = PackageContent {
            package: "busybox".to_owned(),
            version: distro_version.to_owned(),
            pkg_type: "binary".to_owned(),
            ..Default::default()
        };
        if let Ok(artifact) = PackageMapper::generic("binary").to_artifact(&record) {
            artifacts.push(artifact);
        }
    }

    for (content_type, packages) in content {
        for package in packages {
            let mapper = select_mapper(content_type, package);

            match mapper.to_artifact(package) {
                Ok(artifact) => {
                    counter!(SCAN_MAPPER_SBOM_PACKAGES_TOTAL, LABEL_PKG_TYPE => mapper.engine_type.clone())
                        .increment(1);
                    artifacts.push(artifact);
                }
                Err(e) => {
                    // 항목 하나의 실패가 전체 변환을 중단시키지 않음
                    counter!(SCAN_MAPPER_SKIPPED_RECORDS_TOTAL).increment(1);
                    error!(
                        package = %package.package,
                        error = %e,
                        "skipping sbom entry due to error in engine to scanner transformation"
                    );
                }
            }
        }
    }

    ScannerSbom {
        schema: SbomSchema {
            version: SBOM_SCHEMA_VERSION.to_owned(),
            url: SBOM_SCHEMA_URL.to_owned(),
        },
        distro,
        source: SbomSource {
            source_type: "image".to_owned(),
            target: SbomTarget {
                scope: "Squashed".to_owned(),
                media_type: "application/vnd.docker.distribution.manifest.v2+json".to_owned(),
            },
        },
        artifacts,
    }
}

/// 콘텐츠 타입과 레코드로 매퍼를 선택합니다.
fn select_mapper(content_type: &str, package: &PackageContent) -> PackageMapper {
    let mapper = if NONOS_CONTENT_TYPES.contains(&content_type) {
        ENGINE_PACKAGE_MAPPERS.get(content_type)
    } else if content_type == "os" && !package.pkg_type.is_empty() {
        ENGINE_PACKAGE_MAPPERS.get(package.pkg_type.to_lowercase().as_str())
    } else {
        None
    };

    match mapper {
        Some(mapper) => mapper.clone(),
        None => {
            warn!(
                content_type,
                pkg_type = %package.pkg_type,
                "no mapper found for engine image content, using a default mapper"
            );
            let fallback_type = if package.pkg_type.is_empty() {
                content_type
            } else {
                package.pkg_type.as_str()
            };
            PackageMapper::generic(fallback_type)
        }
    }
}
