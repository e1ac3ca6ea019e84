//! Instance identifier generation and parsing
//!
//! Identifiers look like `{project}-{role}-{hash6}`, e.g. `odin-PS-3fa9c2`.
//! The hash is the first 6 hex characters of a SHA-256 digest over the current
//! timestamp, 16 random bytes, the project and the role (~24 bits, roughly a
//! 1-in-16M collision chance per project/role pair).

use crate::error::{Error, Result};
use crate::types::Role;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the digest
pub const HASH_LEN: usize = 6;

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9._-]*-(PS|FS)-[0-9a-f]{6}$").expect("static regex")
});

static PROJECT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").expect("static regex"));

/// The three parts of an instance identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    pub project: String,
    pub role: Role,
    pub hash: String,
}

/// Lower-case the project name and collapse whitespace into `-`.
pub fn normalize_project(project: &str) -> Result<String> {
    let normalized = project
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();

    if !PROJECT_PATTERN.is_match(&normalized) {
        return Err(Error::InvalidInput(format!(
            "project name '{}' must start with a letter or digit and contain only [a-z0-9._-]",
            project
        )));
    }
    Ok(normalized)
}

/// Generate a fresh identifier for `project` and `role`.
pub fn generate(project: &str, role: Role) -> Result<String> {
    let project = normalize_project(project)?;

    let mut hasher = Sha256::new();
    hasher.update(
        Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_le_bytes(),
    );
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    hasher.update(project.as_bytes());
    hasher.update(role.as_str().as_bytes());
    let digest = hex::encode(hasher.finalize());

    let id = format!("{}-{}-{}", project, role.as_str(), &digest[..HASH_LEN]);

    // A malformed id must never leave this function.
    if !is_valid(&id) {
        return Err(Error::Internal(format!(
            "generated identifier '{}' violates the canonical pattern",
            id
        )));
    }
    Ok(id)
}

/// Strict validator for the canonical pattern.
pub fn is_valid(id: &str) -> bool {
    ID_PATTERN.is_match(id)
}

/// Split an identifier back into project, role and hash.
///
/// Splits from the right, so projects that contain `-` survive intact.
pub fn parse(id: &str) -> Result<ParsedId> {
    if !is_valid(id) {
        return Err(Error::InvalidInput(format!(
            "'{}' is not a valid instance id",
            id
        )));
    }

    let mut parts = id.rsplitn(3, '-');
    let (Some(hash), Some(role), Some(project)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::InvalidInput(format!(
            "'{}' is not a valid instance id",
            id
        )));
    };

    Ok(ParsedId {
        project: project.to_string(),
        role: role.parse().map_err(Error::InvalidInput)?,
        hash: hash.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_matches_pattern() {
        let id = generate("odin", Role::ProjectSupervisor).unwrap();
        assert!(id.starts_with("odin-PS-"));
        assert_eq!(id.len(), "odin-PS-".len() + HASH_LEN);
        assert!(is_valid(&id));
    }

    #[test]
    fn test_generate_is_unique_enough() {
        let ids: HashSet<String> = (0..200)
            .map(|_| generate("odin", Role::FleetSupervisor).unwrap())
            .collect();
        // 200 draws from 16M buckets; a collision here means the entropy is broken
        assert_eq!(ids.len(), 200);
    }

    #[test]
    fn test_project_normalization() {
        let id = generate("My App", Role::ProjectSupervisor).unwrap();
        assert!(id.starts_with("my-app-PS-"));
        assert!(generate("!!!", Role::ProjectSupervisor).is_err());
        assert!(generate("", Role::ProjectSupervisor).is_err());
    }

    #[test]
    fn test_validator_rejects_near_misses() {
        assert!(is_valid("demo-PS-abc123"));
        assert!(!is_valid("demo-PS-abc12"));
        assert!(!is_valid("demo-PS-ABC123"));
        assert!(!is_valid("demo-XX-abc123"));
        assert!(!is_valid("-PS-abc123"));
        assert!(!is_valid("demo-ps-abc123"));
    }

    #[test]
    fn test_parse_splits_from_right() {
        let parsed = parse("my-cool-app-FS-0f9e8d").unwrap();
        assert_eq!(parsed.project, "my-cool-app");
        assert_eq!(parsed.role, Role::FleetSupervisor);
        assert_eq!(parsed.hash, "0f9e8d");
    }

    #[test]
    fn test_parse_project_containing_role_code() {
        let parsed = parse("tools-ps-PS-abc123").unwrap();
        assert_eq!(parsed.project, "tools-ps");
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(parse("not an id").is_err());
    }
}
