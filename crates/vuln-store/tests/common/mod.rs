//! Shared fixtures for vuln-store integration tests.
//!
//! Builds a gzip tarball shaped like the upstream db distribution:
//! `vulnerability.db` (SQLite) + `metadata.json` side by side.

use std::path::PathBuf;

use rusqlite::Connection;

use gantry_vuln_store::checksum_string;

/// Upstream table layout consumed read-only by the store.
pub const SCHEMA_SQL: &str = "
CREATE TABLE vulnerability (
    pk INTEGER PRIMARY KEY,
    id TEXT,
    package_name TEXT,
    namespace TEXT,
    version_constraint TEXT,
    version_format TEXT,
    cpes TEXT,
    related_vulnerabilities TEXT,
    fixed_in_versions TEXT,
    fix_state TEXT,
    advisories TEXT
);
CREATE TABLE vulnerability_metadata (
    id TEXT,
    namespace TEXT,
    data_source TEXT,
    record_source TEXT,
    severity TEXT,
    urls TEXT,
    description TEXT,
    cvss TEXT,
    PRIMARY KEY (id, namespace)
);
";

/// A built archive plus the scratch dir keeping it alive.
pub struct ArchiveFixture {
    pub path: PathBuf,
    pub checksum: String,
    _dir: tempfile::TempDir,
}

/// Builds a db archive; `seed` runs against the fresh SQLite db for inserts.
pub fn build_archive(db_checksum: &str, built: &str, seed: impl FnOnce(&Connection)) -> ArchiveFixture {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("vulnerability.db");

    let conn = Connection::open(&db_path).unwrap();
    conn.execute_batch(SCHEMA_SQL).unwrap();
    seed(&conn);
    drop(conn);

    let metadata_path = dir.path().join("metadata.json");
    std::fs::write(
        &metadata_path,
        serde_json::json!({
            "built": built,
            "version": 5,
            "checksum": db_checksum,
        })
        .to_string(),
    )
    .unwrap();

    let archive_path = dir.path().join("vulnerability-db.tar.gz");
    let archive_file = std::fs::File::create(&archive_path).unwrap();
    let encoder = flate2::write::GzEncoder::new(archive_file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder
        .append_path_with_name(&db_path, "vulnerability.db")
        .unwrap();
    builder
        .append_path_with_name(&metadata_path, "metadata.json")
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap();

    let checksum = checksum_string(&std::fs::read(&archive_path).unwrap());

    ArchiveFixture {
        path: archive_path,
        checksum,
        _dir: dir,
    }
}

/// Inserts one affected-package row.
pub fn seed_package(
    conn: &Connection,
    id: &str,
    namespace: &str,
    package_name: &str,
    version_constraint: &str,
    fix_state: &str,
) {
    conn.execute(
        "INSERT INTO vulnerability \
         (id, package_name, namespace, version_constraint, version_format, cpes, \
          related_vulnerabilities, fixed_in_versions, fix_state, advisories) \
         VALUES (?1, ?2, ?3, ?4, 'dpkg', '[]', '[]', '[]', ?5, '[]')",
        rusqlite::params![id, package_name, namespace, version_constraint, fix_state],
    )
    .unwrap();
}

/// Inserts one vulnerability-metadata row.
pub fn seed_metadata(conn: &Connection, id: &str, namespace: &str, severity: &str) {
    conn.execute(
        "INSERT INTO vulnerability_metadata \
         (id, namespace, data_source, record_source, severity, urls, description, cvss) \
         VALUES (?1, ?2, 'https://security-tracker.debian.org', 'vulnerabilities', ?3, \
                 '[\"https://example.com/advisory\"]', 'test vulnerability', '[]')",
        rusqlite::params![id, namespace, severity],
    )
    .unwrap();
}
