//! Resume-hint resolution
//!
//! Maps free text from `resume <hint>` to one instance. Strategies run in a
//! fixed order and the first one that matches anything wins:
//!
//! | # | Strategy | Applies when |
//! |---|----------|--------------|
//! | 1 | Exact id | hint is a canonical instance id |
//! | 2 | Prefix | short hint (`^[a-z0-9]{3,12}$`) equal to the project or prefixing the hash |
//! | 3 | Task | hint equals an instance's `current_task` |
//! | 4 | Project | hint names a project |
//! | 5 | Most recent | no hint at all |
//!
//! Closed instances never match. Active instances are set aside; a strategy
//! whose only matches are active fails with [`Error::ActiveInstance`].

use crate::error::{Error, Result};
use crate::id;
use crate::registry::{InstanceRegistry, ListFilter};
use crate::types::{Instance, InstanceStatus};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;

static SHORT_HINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]{3,12}$").expect("static regex"));

/// Which strategy produced a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ExactId,
    Prefix,
    TaskId,
    Project,
    MostRecentStale,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::ExactId => "exact_id",
            Strategy::Prefix => "prefix",
            Strategy::TaskId => "task_id",
            Strategy::Project => "project",
            Strategy::MostRecentStale => "most_recent_stale",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    Resolved {
        instance: Instance,
        strategy: Strategy,
    },
    /// Never an arbitrary pick: the caller must choose
    MultipleMatches {
        candidates: Vec<Instance>,
        suggestion: String,
        strategy: Strategy,
    },
    NotFound {
        hint: Option<String>,
    },
}

pub struct InstanceResolver {
    registry: Arc<InstanceRegistry>,
}

impl InstanceResolver {
    pub fn new(registry: Arc<InstanceRegistry>) -> Self {
        Self { registry }
    }

    pub fn resolve(&self, hint: Option<&str>) -> Result<Resolution> {
        self.resolve_at(hint, Utc::now())
    }

    pub fn resolve_at(&self, hint: Option<&str>, now: DateTime<Utc>) -> Result<Resolution> {
        let hint = hint.map(str::trim).filter(|h| !h.is_empty());

        // Status is derived against `now`; closed rows never take part.
        let mut open: Vec<Instance> = self
            .registry
            .list_at(&ListFilter::default(), now)?
            .into_iter()
            .filter(|i| i.status != InstanceStatus::Closed)
            .collect();
        open.sort_by(|a, b| {
            b.last_heartbeat
                .cmp(&a.last_heartbeat)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });

        let Some(hint) = hint else {
            return Ok(
                match open.into_iter().find(|i| i.status == InstanceStatus::Stale) {
                    Some(instance) => {
                        tracing::debug!(
                            instance_id = %instance.instance_id,
                            "Resolved most recent stale instance"
                        );
                        Resolution::Resolved {
                            instance,
                            strategy: Strategy::MostRecentStale,
                        }
                    }
                    None => Resolution::NotFound { hint: None },
                },
            );
        };

        let lowered = hint.to_lowercase();
        let strategies: [(Strategy, Box<dyn Fn(&Instance) -> bool + '_>); 4] = [
            (
                Strategy::ExactId,
                Box::new(|i: &Instance| id::is_valid(hint) && i.instance_id == hint),
            ),
            (
                Strategy::Prefix,
                Box::new(|i: &Instance| {
                    SHORT_HINT.is_match(&lowered)
                        && (i.project == lowered || i.short_hash().starts_with(lowered.as_str()))
                }),
            ),
            (
                Strategy::TaskId,
                Box::new(|i: &Instance| i.current_task.as_deref() == Some(hint)),
            ),
            (
                Strategy::Project,
                Box::new(|i: &Instance| {
                    id::normalize_project(hint)
                        .map(|p| i.project == p)
                        .unwrap_or(false)
                }),
            ),
        ];

        for (strategy, predicate) in strategies.iter() {
            let (stale, active): (Vec<&Instance>, Vec<&Instance>) = open
                .iter()
                .filter(|&i| predicate(i))
                .partition(|i| i.status == InstanceStatus::Stale);

            if stale.is_empty() {
                if let Some(newest) = active.first() {
                    return Err(Error::ActiveInstance {
                        instance_id: newest.instance_id.clone(),
                        age_secs: newest.heartbeat_age_secs(now),
                    });
                }
                continue;
            }

            tracing::debug!(
                hint,
                strategy = %strategy,
                matches = stale.len(),
                "Resolved resume hint"
            );

            if stale.len() == 1 {
                return Ok(Resolution::Resolved {
                    instance: stale[0].clone(),
                    strategy: *strategy,
                });
            }
            return Ok(Resolution::MultipleMatches {
                suggestion: format!("resume {}", stale[0].instance_id),
                candidates: stale.into_iter().cloned().collect(),
                strategy: *strategy,
            });
        }

        Ok(Resolution::NotFound {
            hint: Some(hint.to_string()),
        })
    }
}
