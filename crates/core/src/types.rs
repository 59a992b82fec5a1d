//! 도메인 타입 — 시스템 전역에서 사용되는 공통 타입
//!
//! 취약점 심각도와 수정 상태 등, 모든 모듈이 공유하는 어휘를 정의합니다.
//! 업스트림 피드가 사용하는 문자열 표현은 `from_str_loose`에서 한 번만
//! 파싱되며, 이후의 비교는 전부 enum 값으로 수행됩니다.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 취약점 심각도 레벨
///
/// 업스트림 피드의 심각도 어휘를 따릅니다.
/// `Ord` 구현으로 심각도 비교가 가능합니다
/// (`Unknown < Negligible < Low < Medium < High < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    /// 알 수 없음 — 점수/등급 정보 없음
    #[default]
    Unknown,
    /// 무시 가능
    Negligible,
    /// 낮은 심각도
    Low,
    /// 중간 심각도
    Medium,
    /// 높은 심각도
    High,
    /// 치명적 — 즉시 대응 필요
    Critical,
}

impl Severity {
    /// 문자열에서 심각도를 파싱합니다.
    ///
    /// 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unknown" => Some(Self::Unknown),
            "negligible" => Some(Self::Negligible),
            "low" => Some(Self::Low),
            "medium" | "med" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Negligible => write!(f, "Negligible"),
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// 패키지별 수정 상태
///
/// 벤더가 해당 취약점/패키지 쌍에 대한 수정본을 출시했는지를 나타냅니다.
/// 업스트림 DB의 `fix_state` 문자열은 표기 변형이 있으므로
/// (`wont-fix`, `wont_fix`, `wontfix`) 매핑 경계에서 이 enum으로 한 번만
/// 정규화합니다.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum FixState {
    /// 수정 버전이 출시됨
    Fixed,
    /// 아직 수정되지 않음
    NotFixed,
    /// 벤더가 수정하지 않기로 결정함
    WontFix,
    /// 알 수 없음
    #[default]
    Unknown,
}

impl FixState {
    /// 문자열에서 수정 상태를 파싱합니다.
    ///
    /// 대소문자, 하이픈/언더스코어 표기를 구분하지 않습니다.
    /// 인식할 수 없는 값은 `Unknown`으로 정규화됩니다.
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_lowercase().replace(['_', ' '], "-").as_str() {
            "fixed" => Self::Fixed,
            "not-fixed" | "notfixed" => Self::NotFixed,
            "wont-fix" | "wontfix" | "will-not-fix" => Self::WontFix,
            _ => Self::Unknown,
        }
    }

    /// 벤더가 수정을 거부한 상태인지 여부
    pub fn is_wont_fix(self) -> bool {
        self == Self::WontFix
    }
}

impl fmt::Display for FixState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::NotFixed => write!(f, "not-fixed"),
            Self::WontFix => write!(f, "wont-fix"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}
