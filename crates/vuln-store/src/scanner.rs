//! 외부 스캐너 서브프로세스 어댑터
//!
//! 매칭 자체는 외부 grype 실행 파일이 수행합니다. 이 모듈은 통제된
//! 환경변수로 서브프로세스를 실행하고 표준 출력의 JSON 문서를 수집하는
//! 얇은 어댑터입니다.
//!
//! # 환경변수
//!
//! 모든 호출은 자동 업데이트를 끄고 구조화 로그를 켠 상태로 실행됩니다.
//! 스캔 호출은 추가로 `GRYPE_DB_CACHE_DIR`을 해당 슬롯의 DB 디렉토리로
//! 지정합니다 — DB 수명주기는 전적으로 이 엔진이 관리하므로 스캐너가
//! 스스로 DB를 받아오는 일이 없어야 합니다.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use metrics::counter;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error};

use gantry_core::error::StoreError;
use gantry_core::metrics::{LABEL_RESULT, VULN_STORE_SCANNER_INVOCATIONS_TOTAL};

/// 스캐너 자체 업데이트 확인 비활성화 플래그
pub const ENV_CHECK_FOR_APP_UPDATE: &str = "GRYPE_CHECK_FOR_APP_UPDATE";
/// 구조화 로그 형식 플래그
pub const ENV_LOG_STRUCTURED: &str = "GRYPE_LOG_STRUCTURED";
/// DB 자동 업데이트 비활성화 플래그
pub const ENV_DB_AUTO_UPDATE: &str = "GRYPE_DB_AUTO_UPDATE";
/// DB 캐시 디렉토리 — 스캔 대상 슬롯의 디렉토리로 전환됨
pub const ENV_DB_CACHE_DIR: &str = "GRYPE_DB_CACHE_DIR";

/// 스캐너 버전 질의 결과 (`grype version -o json`)
#[derive(Debug, Clone, Deserialize)]
pub struct ScannerVersion {
    /// 애플리케이션 이름
    pub application: String,
    /// 버전 문자열
    pub version: String,
}

/// 외부 스캐너 실행 파일 어댑터
#[derive(Debug, Clone)]
pub struct ScannerCommand {
    binary: PathBuf,
}

impl ScannerCommand {
    /// 실행 파일 경로로 어댑터를 생성합니다.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// 실행 파일 경로
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn base_command(&self, db_cache_dir: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.env(ENV_CHECK_FOR_APP_UPDATE, "0")
            .env(ENV_LOG_STRUCTURED, "1")
            .env(ENV_DB_AUTO_UPDATE, "0");
        if let Some(dir) = db_cache_dir {
            cmd.env(ENV_DB_CACHE_DIR, dir);
        }
        cmd
    }

    /// 스캐너 버전 정보를 질의합니다.
    pub async fn version(&self) -> Result<ScannerVersion, StoreError> {
        debug!(binary = %self.binary.display(), "getting scanner version");
        let mut cmd = self.base_command(None);
        cmd.args(["version", "-o", "json"]);
        let stdout = self.run(cmd, None).await?;
        serde_json::from_slice(&stdout).map_err(|e| StoreError::ScannerOutput {
            reason: e.to_string(),
        })
    }

    /// SBOM 문자열을 표준 입력으로 전달하여 스캔합니다.
    pub async fn scan_sbom(
        &self,
        sbom: &str,
        db_cache_dir: &Path,
    ) -> Result<serde_json::Value, StoreError> {
        debug!(
            binary = %self.binary.display(),
            db_cache_dir = %db_cache_dir.display(),
            "running scanner with sbom on stdin"
        );
        let mut cmd = self.base_command(Some(db_cache_dir));
        cmd.args(["-vv", "-o", "json"]);
        let stdout = self.run(cmd, Some(sbom)).await?;
        serde_json::from_slice(&stdout).map_err(|e| StoreError::ScannerOutput {
            reason: e.to_string(),
        })
    }

    /// SBOM 파일 경로를 인자로 전달하여 스캔합니다.
    pub async fn scan_sbom_file(
        &self,
        sbom_file: &Path,
        db_cache_dir: &Path,
    ) -> Result<serde_json::Value, StoreError> {
        debug!(
            binary = %self.binary.display(),
            sbom = %sbom_file.display(),
            db_cache_dir = %db_cache_dir.display(),
            "running scanner with sbom file"
        );
        let mut cmd = self.base_command(Some(db_cache_dir));
        cmd.args(["-vv", "-o", "json"]);
        cmd.arg(format!("sbom:{}", sbom_file.display()));
        let stdout = self.run(cmd, None).await?;
        serde_json::from_slice(&stdout).map_err(|e| StoreError::ScannerOutput {
            reason: e.to_string(),
        })
    }

    async fn run(&self, mut cmd: Command, input: Option<&str>) -> Result<Vec<u8>, StoreError> {
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::ScannerNotFound {
                    binary: self.binary.display().to_string(),
                }
            } else {
                StoreError::Io {
                    path: self.binary.display().to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        if let Some(input) = input {
            let mut stdin = child.stdin.take().ok_or_else(|| StoreError::Io {
                path: self.binary.display().to_string(),
                reason: "failed to open scanner stdin".to_owned(),
            })?;
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| StoreError::Io {
                    path: self.binary.display().to_string(),
                    reason: e.to_string(),
                })?;
            drop(stdin);
        }

        let output = child.wait_with_output().await.map_err(|e| StoreError::Io {
            path: self.binary.display().to_string(),
            reason: e.to_string(),
        })?;

        if output.status.success() {
            counter!(VULN_STORE_SCANNER_INVOCATIONS_TOTAL, LABEL_RESULT => "success").increment(1);
            Ok(output.stdout)
        } else {
            counter!(VULN_STORE_SCANNER_INVOCATIONS_TOTAL, LABEL_RESULT => "failure").increment(1);
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            error!(
                binary = %self.binary.display(),
                status = output.status.code().unwrap_or(-1),
                stderr = %stderr,
                "scanner command failed"
            );
            Err(StoreError::ScannerCommand {
                status: output.status.code().unwrap_or(-1),
                stderr,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_executable_is_distinct_error() {
        let scanner = ScannerCommand::new("/nonexistent/bin/grype-missing");
        let err = scanner.version().await.unwrap_err();
        assert!(matches!(err, StoreError::ScannerNotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_carries_stderr() {
        // `false`는 stderr 없이 status 1로 종료
        let scanner = ScannerCommand::new("false");
        let err = scanner.version().await.unwrap_err();
        match err {
            StoreError::ScannerCommand { status, .. } => assert_eq!(status, 1),
            other => panic!("expected ScannerCommand error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn malformed_output_is_parse_error() {
        // `echo`는 JSON이 아닌 인자 문자열을 그대로 출력
        let scanner = ScannerCommand::new("echo");
        let err = scanner.version().await.unwrap_err();
        assert!(matches!(err, StoreError::ScannerOutput { .. }));
    }

    #[test]
    fn scanner_version_deserializes() {
        let version: ScannerVersion =
            serde_json::from_str(r#"{"application": "grype", "version": "0.74.0"}"#).unwrap();
        assert_eq!(version.application, "grype");
        assert_eq!(version.version, "0.74.0");
    }
}
