//! Confidence scoring for reconstructed contexts
//!
//! A pure function of the reconstruction source, the age of the data and a
//! handful of validity checks. Scores at or above
//! [`ReconstructedContext::AUTO_RESUME_THRESHOLD`] are safe to resume
//! without manual verification.

use crate::types::{ReconstructedContext, ReconstructionSource};
use serde::Serialize;

/// Validity inputs gathered by the reconstructor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidityChecks {
    pub working_directory_missing: bool,
    pub branch_missing: bool,
    /// Any of the first sampled modified files is gone
    pub sampled_files_missing: bool,
    /// Event replay fell back from the chain walk to a flat scan
    pub replay_degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceScore {
    pub score: u8,
    pub reason: String,
    pub warnings: Vec<String>,
    pub auto_resume_safe: bool,
}

pub fn base_score(source: ReconstructionSource) -> i32 {
    match source {
        ReconstructionSource::Checkpoint => 100,
        ReconstructionSource::Events => 85,
        ReconstructionSource::Commands => 70,
        ReconstructionSource::Basic => 40,
    }
}

pub fn age_penalty(source: ReconstructionSource, age_minutes: i64) -> i32 {
    let age = age_minutes.max(0);
    match source {
        ReconstructionSource::Checkpoint => match age {
            0..=5 => 0,
            6..=30 => 10,
            31..=60 => 20,
            _ => 30,
        },
        ReconstructionSource::Events | ReconstructionSource::Commands => {
            let periods = (age / 30).min(i64::from(i32::MAX / 5)) as i32;
            periods * 5
        }
        ReconstructionSource::Basic => {
            if age > 60 {
                10
            } else {
                0
            }
        }
    }
}

/// Score a reconstruction.
pub fn score(
    source: ReconstructionSource,
    age_minutes: i64,
    checks: &ValidityChecks,
) -> ConfidenceScore {
    let base = base_score(source);
    let age = age_penalty(source, age_minutes);
    let mut total = base - age;
    let mut warnings = Vec::new();

    if checks.working_directory_missing {
        total -= 10;
        warnings.push("working directory no longer exists".to_string());
    }
    if checks.branch_missing {
        total -= 5;
        warnings.push("recorded branch no longer exists".to_string());
    }
    if checks.sampled_files_missing {
        total -= 5;
        warnings.push("some recorded modified files are missing".to_string());
    }
    if checks.replay_degraded {
        total -= 10;
        warnings.push("event chain was broken; used a flat scan of recent events".to_string());
    }

    let score = total.clamp(0, 100) as u8;
    let reason = format!(
        "{} source (base {}), {}m old (-{}){}",
        source,
        base,
        age_minutes.max(0),
        age,
        if warnings.is_empty() {
            String::new()
        } else {
            let suffix = if warnings.len() == 1 { "y" } else { "ies" };
            format!(", {} validity penalt{}", warnings.len(), suffix)
        }
    );

    ConfidenceScore {
        score,
        reason,
        warnings,
        auto_resume_safe: score >= ReconstructedContext::AUTO_RESUME_THRESHOLD,
    }
}
