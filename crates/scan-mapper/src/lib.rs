#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`types`]: Input/output models (`PackageContent`, `ScannerSbom`,
//!   `VulnerabilityMatch`, `NormalizedVulnerability`)
//! - [`cpe`]: Deterministic fuzzy CPE generation
//! - [`sbom`]: Engine → scanner direction (`image_content_to_scanner_sbom`,
//!   mapper dispatch tables)
//! - [`matches`]: Scanner → engine direction (`VulnerabilityMatchMapper`)
//! - [`dbrecord`]: Db query rows → normalized engine records
//!   (`EngineDbMapper`, severity banding)
//!
//! # Architecture
//!
//! ```text
//! ImageContentMap --> sbom::image_content_to_scanner_sbom --> ScannerSbom
//!                              (per-ecosystem dispatch)            |
//!                                                            scanner run
//!                                                                 |
//! Vec<VulnerabilityMatch> <-- matches::scanner_matches_to_engine <-+
//!
//! VulnerabilityJoinRow* --> dbrecord::to_engine_vulnerabilities
//!                       --> Vec<NormalizedVulnerability>
//! ```

pub mod cpe;
pub mod dbrecord;
pub mod matches;
pub mod sbom;
pub mod types;

// --- Public API Re-exports ---

// Engine -> scanner direction
pub use sbom::{
    DistroMapper, ENGINE_DISTRO_MAPPERS, ENGINE_PACKAGE_MAPPERS, PackageMapper,
    SCANNER_PACKAGE_MAPPERS, image_content_to_scanner_sbom,
};

// Scanner -> engine direction
pub use matches::{MatchMapperConfig, VulnerabilityMatchMapper};

// Db record normalization
pub use dbrecord::{EngineDbMapper, classify_severity};

// CPE generation
pub use cpe::{generate_fuzzy_cpes, generate_fuzzy_go_cpes, generate_java_cpes};

// Types
pub use types::{
    ArtifactLocation, ImageContentMap, ImageInfo, NormalizedVulnerability, PackageContent,
    SbomArtifact, ScannerDistro, ScannerSbom, VulnerabilityMatch,
};
