//! 아카이브 무결성 검증과 스크래치 스토리지
//!
//! 업스트림에서 받은 DB 아카이브는 해제 단계에 도달하기 전에 반드시
//! [`verify_integrity`]를 통과해야 합니다. [`ScratchStorage`]는 다운로드한
//! 바이트를 검증된 파일로 만드는 임시 작업 공간이며, 값이 drop되는 모든
//! 경로(정상 반환, 에러, 취소)에서 디렉토리 전체가 제거됩니다.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use gantry_core::error::StoreError;

/// 체크섬 문자열의 알고리즘 접두어
const SHA256_PREFIX: &str = "sha256";

/// 바이트 블롭의 체크섬을 `sha256:<hex>` 형식으로 계산합니다.
pub fn checksum_string(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{SHA256_PREFIX}:{}", hex::encode(hasher.finalize()))
}

/// 바이트 블롭이 기대 체크섬과 일치하는지 검증합니다.
///
/// `expected`는 `"<algorithm>:<hex-digest>"` 형식입니다. 지원 알고리즘은
/// sha256 하나이며, 알 수 없는 알고리즘 태그는 즉시 실패합니다.
/// 접두어 없는 순수 hex digest도 허용합니다 (업스트림 metadata.json의
/// checksum 필드는 접두어를 생략하는 경우가 있습니다).
///
/// 부작용이 없는 순수 함수입니다.
pub fn verify_integrity(data: &[u8], expected: &str) -> Result<(), StoreError> {
    let expected_digest = match expected.split_once(':') {
        Some((algorithm, digest)) => {
            if !algorithm.eq_ignore_ascii_case(SHA256_PREFIX) {
                return Err(StoreError::UnsupportedChecksum {
                    algorithm: algorithm.to_owned(),
                });
            }
            digest
        }
        None => expected,
    };

    let mut hasher = Sha256::new();
    hasher.update(data);
    let actual_digest = hex::encode(hasher.finalize());

    if actual_digest.eq_ignore_ascii_case(expected_digest) {
        Ok(())
    } else {
        Err(StoreError::ChecksumMismatch {
            expected: expected.to_owned(),
            actual: format!("{SHA256_PREFIX}:{actual_digest}"),
        })
    }
}

/// DB 아카이브용 스크래치 스토리지
///
/// 획득 시 비공개 루트 디렉토리를 만들고, drop 시 재귀적으로 제거합니다.
/// 내부에 생성되는 파일은 닫히는 시점에 체크섬 검증을 통과해야만
/// 유효한 것으로 간주됩니다.
pub struct ScratchStorage {
    dir: tempfile::TempDir,
}

impl ScratchStorage {
    /// 새 스크래치 디렉토리를 생성합니다.
    pub fn new() -> Result<Self, StoreError> {
        let dir = tempfile::Builder::new()
            .prefix("gantry-vuln-db-")
            .tempdir()
            .map_err(|e| StoreError::Io {
                path: std::env::temp_dir().display().to_string(),
                reason: e.to_string(),
            })?;
        debug!(path = %dir.path().display(), "created scratch storage");
        Ok(Self { dir })
    }

    /// 스크래치 루트 디렉토리 경로
    pub fn root_path(&self) -> &Path {
        self.dir.path()
    }

    /// 전체 내용을 한 번에 기록하고 검증된 파일을 생성합니다.
    ///
    /// 검증 실패 시 부분 파일은 제거되고 `ChecksumMismatch`가 전파됩니다.
    pub fn create_file(&self, expected_checksum: &str, data: &[u8]) -> Result<PathBuf, StoreError> {
        let mut writer = self.create_writer(expected_checksum)?;
        writer.write(data)?;
        writer.finish()
    }

    /// 스트리밍 기록용 핸들을 생성합니다.
    ///
    /// 호출자는 [`ChecksumWriter::finish`]로 핸들을 닫아야 하며, 그 시점에
    /// 전체 내용이 검증됩니다.
    pub fn create_writer(&self, expected_checksum: &str) -> Result<ChecksumWriter, StoreError> {
        let path = self
            .dir
            .path()
            .join(format!("archive-{}", uuid::Uuid::new_v4()));
        let file = std::fs::File::create(&path).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(ChecksumWriter {
            file,
            hasher: Sha256::new(),
            path,
            expected: expected_checksum.to_owned(),
        })
    }
}

/// 닫히는 시점에 체크섬이 검증되는 쓰기 핸들
pub struct ChecksumWriter {
    file: std::fs::File,
    hasher: Sha256,
    path: PathBuf,
    expected: String,
}

impl ChecksumWriter {
    /// 바이트를 기록하며 해시를 갱신합니다.
    pub fn write(&mut self, data: &[u8]) -> Result<(), StoreError> {
        self.file.write_all(data).map_err(|e| StoreError::Io {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        self.hasher.update(data);
        Ok(())
    }

    /// 핸들을 닫고 전체 내용을 검증합니다.
    ///
    /// 검증에 성공하면 파일 경로를 반환합니다. 실패하면 부분 파일을
    /// 제거한 뒤 `ChecksumMismatch`를 반환합니다.
    pub fn finish(self) -> Result<PathBuf, StoreError> {
        let ChecksumWriter {
            file,
            hasher,
            path,
            expected,
        } = self;
        file.sync_all().map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        drop(file);

        let expected_digest = match expected.split_once(':') {
            Some((algorithm, digest)) => {
                if !algorithm.eq_ignore_ascii_case(SHA256_PREFIX) {
                    remove_partial(&path);
                    return Err(StoreError::UnsupportedChecksum {
                        algorithm: algorithm.to_owned(),
                    });
                }
                digest.to_owned()
            }
            None => expected.clone(),
        };

        let actual_digest = hex::encode(hasher.finalize());
        if actual_digest.eq_ignore_ascii_case(&expected_digest) {
            debug!(path = %path.display(), "scratch file checksum verified");
            Ok(path)
        } else {
            remove_partial(&path);
            Err(StoreError::ChecksumMismatch {
                expected,
                actual: format!("{SHA256_PREFIX}:{actual_digest}"),
            })
        }
    }
}

fn remove_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to remove partial scratch file");
    }
}
