//! 에러 타입 — 도메인별 에러 정의

/// Gantry 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum GantryError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 취약점 DB 스토어 에러
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// DB 동기화 에러
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// 데이터 매핑 에러
    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// 파이프라인 생명주기 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 취약점 DB 스토어 에러
///
/// 슬롯 상태 에러는 필드별로 구분됩니다. 호출자는 "설정된 적 없음"과
/// "비어 있음"을 구별할 수 있어야 하므로 null 역참조 대신 항상 이 에러가
/// 반환됩니다.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 슬롯의 DB 디렉토리가 아직 설정되지 않음
    #[error("vulnerability db dir not initialized for slot '{slot}'")]
    DirNotInitialized { slot: String },

    /// 슬롯의 스키마 버전이 아직 설정되지 않음
    #[error("vulnerability db version not initialized for slot '{slot}'")]
    VersionNotInitialized { slot: String },

    /// 슬롯의 세션 팩토리가 아직 설정되지 않음
    #[error("vulnerability db session factory not initialized for slot '{slot}'")]
    SessionNotInitialized { slot: String },

    /// 체크섬 불일치 — 손상된 아카이브/파일
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// 지원하지 않는 체크섬 알고리즘
    #[error("unsupported checksum algorithm: {algorithm}")]
    UnsupportedChecksum { algorithm: String },

    /// 읽기/쓰기 잠금 획득 타임아웃
    #[error(
        "unable to acquire {access} access for the vulnerability db lock within {timeout_secs}s"
    )]
    LockTimeout {
        access: &'static str,
        timeout_secs: u64,
    },

    /// 아카이브 파일을 찾을 수 없음
    #[error("vulnerability db archive not found: {path}")]
    ArchiveNotFound { path: String },

    /// 아카이브 해제 실패
    #[error("failed to unpack vulnerability db archive: {reason}")]
    UnpackFailed { reason: String },

    /// SQLite 쿼리 실패
    #[error("vulnerability db query failed: {reason}")]
    QueryFailed { reason: String },

    /// 스캐너 실행 파일을 찾을 수 없음
    #[error("scanner executable not found: {binary}")]
    ScannerNotFound { binary: String },

    /// 스캐너 명령 실패 (non-zero exit)
    #[error("scanner command failed with status {status}: {stderr}")]
    ScannerCommand { status: i32, stderr: String },

    /// 스캐너 출력 파싱 실패
    #[error("failed to parse scanner output: {reason}")]
    ScannerOutput { reason: String },

    /// 파일 I/O 에러
    #[error("io error: {path}: {reason}")]
    Io { path: String, reason: String },
}

/// DB 동기화 에러
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// 전역 활성 DB가 존재하지 않음
    #[error("local sync failed because no active db found in the feed metadata store")]
    NoActiveDatabase,

    /// 동기화 잠금 획득 타임아웃 — 데드락 가능성 신호
    #[error(
        "acquisition timeout of {timeout_secs} seconds encountered before lock was released, \
         potential deadlock in system"
    )]
    LockAcquisitionTimeout { timeout_secs: u64 },

    /// 동기화 실행 중 발생한 하위 에러 래핑
    #[error("db sync failed: {reason}")]
    Failed { reason: String },
}

/// 데이터 매핑 에러
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    /// 매퍼가 등록되지 않은 패키지/아티팩트 타입
    #[error("no mapper found for type '{pkg_type}'")]
    UnknownPackageType { pkg_type: String },

    /// 변환 대상 레코드에 필수 필드가 없음
    #[error("missing field '{field}' in {context}")]
    MissingField { field: String, context: String },

    /// 스캐너 출력 파싱 실패
    #[error("failed to parse scanner output: {reason}")]
    ParseFailed { reason: String },
}

/// 파이프라인 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 이미 실행 중인 파이프라인을 다시 시작함
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아닌 파이프라인을 정지함
    #[error("pipeline not running")]
    NotRunning,

    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),
}
