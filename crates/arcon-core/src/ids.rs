//! Dataset and accession identifier generation.
//!
//! Dataset IDs are deterministic URNs derived from the upload location;
//! accession IDs are opaque URN-form UUIDs. Neither performs any I/O.

use uuid::Uuid;

/// Derive the deterministic dataset URN for a file.
///
/// Files submitted at the inbox root (two or fewer path segments) group into
/// a per-user dataset `urn:default:<user>`; deeper files group by their top
/// directory as `urn:dir:<dir>`.
pub fn generate_dataset_id(user: &str, inbox_path: &str) -> String {
    let segments: Vec<&str> = inbox_path.split('/').collect();
    if segments.len() <= 2 {
        format!("urn:default:{user}")
    } else if inbox_path.starts_with('/') {
        // Absolute paths have a leading empty segment.
        format!("urn:dir:{}", segments[1])
    } else {
        format!("urn:dir:{}", segments[0])
    }
}

/// Generate a fresh accession identifier in URN form.
pub fn generate_accession_id() -> String {
    format!("urn:uuid:{}", Uuid::new_v4())
}
