//! Fuzzy CPE 생성
//!
//! 정밀한 출처 정보가 없는 패키지는 CPE로 모호 매칭됩니다. 여기서
//! 생성되는 CPE는 이름/버전/생태계에서 결정적으로 유도되므로 같은
//! 입력은 항상 같은 목록을 만듭니다.

use crate::types::PackageContent;

/// cpe:2.3 문자열을 조립합니다.
fn cpe23(vendor: &str, product: &str, version: &str, target_sw: &str) -> String {
    format!("cpe:2.3:a:{vendor}:{product}:{version}:*:*:*:*:{target_sw}:*:*")
}

/// CPE 필드에 쓸 수 없는 문자를 정리합니다.
fn sanitize(field: &str) -> String {
    field
        .chars()
        .map(|c| if c == ':' || c.is_whitespace() { '_' } else { c })
        .collect::<String>()
        .to_lowercase()
}

/// 생태계를 CPE `target_sw` 필드로 변환합니다.
fn target_sw(ecosystem: &str) -> &'static str {
    match ecosystem.to_lowercase().as_str() {
        "python" => "python",
        "npm" | "js" => "node.js",
        "gem" => "ruby",
        "java" | "maven" => "java",
        "go" => "golang",
        "composer" => "php",
        "nuget" => ".net",
        _ => "*",
    }
}

/// 이름/버전/생태계에서 결정적으로 fuzzy CPE를 생성합니다.
///
/// 벤더 후보는 패키지 이름 자체, 하이픈을 언더스코어로 바꾼 변형,
/// 와일드카드 순서이며 중복은 제거됩니다.
pub fn generate_fuzzy_cpes(name: &str, version: &str, ecosystem: &str) -> Vec<String> {
    let product = sanitize(name);
    let version = sanitize(version);
    let sw = target_sw(ecosystem);

    let mut vendors = vec![product.clone()];
    if product.contains('-') {
        vendors.push(product.replace('-', "_"));
    }
    vendors.push("*".to_owned());

    let mut cpes = Vec::new();
    for vendor in vendors {
        let cpe = cpe23(&vendor, &product, &version, sw);
        if !cpes.contains(&cpe) {
            cpes.push(cpe);
        }
    }
    cpes
}

/// Go 모듈 전용 fuzzy CPE 생성
///
/// `github.com/<vendor>/<product>` 형태의 모듈 경로에서 벤더와 제품을
/// 분리합니다. 경로 형태가 아니면 일반 생성기로 폴백합니다.
pub fn generate_fuzzy_go_cpes(name: &str, version: &str) -> Vec<String> {
    let segments: Vec<&str> = name.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return generate_fuzzy_cpes(name, version, "go");
    }

    let product = sanitize(segments[segments.len() - 1]);
    let vendor = sanitize(segments[segments.len() - 2]);
    let version = sanitize(version);

    let mut cpes = vec![cpe23(&vendor, &product, &version, "golang")];
    let generic = cpe23(&product, &product, &version, "golang");
    if !cpes.contains(&generic) {
        cpes.push(generic);
    }
    cpes
}

/// Java 패키지 전용 fuzzy CPE 생성
///
/// pom.properties의 groupId/artifactId가 있으면 이를 벤더/제품으로
/// 사용하고, 없으면 일반 생성기로 폴백합니다.
pub fn generate_java_cpes(record: &PackageContent) -> Vec<String> {
    let pom = record
        .metadata
        .as_ref()
        .and_then(|metadata| metadata.get("pom.properties"));

    let (group_id, artifact_id) = match pom {
        Some(serde_json::Value::Object(properties)) => (
            properties.get("groupId").and_then(|v| v.as_str()),
            properties.get("artifactId").and_then(|v| v.as_str()),
        ),
        _ => (None, None),
    };

    let mut cpes = Vec::new();
    if let (Some(group_id), Some(artifact_id)) = (group_id, artifact_id) {
        // groupId의 마지막 세그먼트가 관례상 조직 이름
        let vendor = sanitize(group_id.rsplit('.').next().unwrap_or(group_id));
        cpes.push(cpe23(
            &vendor,
            &sanitize(artifact_id),
            &sanitize(&record.version),
            "java",
        ));
    }

    for cpe in generate_fuzzy_cpes(&record.package, &record.version, "java") {
        if !cpes.contains(&cpe) {
            cpes.push(cpe);
        }
    }
    cpes
}
