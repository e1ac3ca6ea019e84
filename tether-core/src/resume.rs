//! The `resume <hint>` protocol
//!
//! Glues the resolver, the reconstructor and the brief together. A request
//! yields a recovery brief, a disambiguation list, or a "no instance found"
//! answer echoing the hint. Resuming an instance that is still heartbeating
//! is an [`Error::ActiveInstance`].

use crate::brief;
use crate::error::{Error, Result};
use crate::format::format_relative_time;
use crate::reconstruct::{Reconstructor, Workspace};
use crate::registry::InstanceRegistry;
use crate::resolver::{InstanceResolver, Resolution};
use crate::types::{Instance, ReconstructedContext};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;

/// Protocol verb
pub const COMMAND: &str = "resume";

/// Parse `resume [hint]`. Returns `None` for anything else.
///
/// The hint is the rest of the line, trimmed; an empty hint is `Some(None)`.
pub fn parse_command(input: &str) -> Option<Option<String>> {
    let input = input.trim();
    let rest = input.strip_prefix(COMMAND)?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let hint = rest.trim();
    Some((!hint.is_empty()).then(|| hint.to_string()))
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResumeOutcome {
    Brief {
        instance: Instance,
        context: ReconstructedContext,
        brief: String,
    },
    Disambiguation {
        hint: Option<String>,
        candidates: Vec<Instance>,
        suggestion: String,
    },
    NotFound {
        hint: Option<String>,
    },
}

impl ResumeOutcome {
    /// Text returned to the session.
    pub fn render(&self, now: DateTime<Utc>) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.render_into(&mut out, now);
        out
    }

    fn render_into(&self, out: &mut String, now: DateTime<Utc>) -> std::fmt::Result {
        match self {
            ResumeOutcome::Brief {
                instance,
                context,
                brief,
            } => {
                writeln!(
                    out,
                    "Resuming {} (project {})",
                    instance.instance_id, instance.project
                )?;
                writeln!(
                    out,
                    "Source: {}, confidence {}/100 ({})",
                    context.source,
                    context.confidence_score,
                    if context.is_auto_resume_safe() {
                        "safe to auto-resume"
                    } else {
                        "verify before continuing"
                    }
                )?;
                writeln!(out, "Reason: {}", context.confidence_reason)?;
                if !context.warnings.is_empty() {
                    writeln!(out, "Warnings:")?;
                    for warning in &context.warnings {
                        writeln!(out, "  - {}", warning)?;
                    }
                }
                writeln!(out)?;
                write!(out, "{}", brief)?;
            }
            ResumeOutcome::Disambiguation {
                hint,
                candidates,
                suggestion,
            } => {
                writeln!(
                    out,
                    "Multiple instances match '{}':",
                    hint.as_deref().unwrap_or("")
                )?;
                for (i, candidate) in candidates.iter().enumerate() {
                    writeln!(
                        out,
                        "  {}. {}  {}  task {}  ctx {}%  last seen {}",
                        i + 1,
                        candidate.instance_id,
                        candidate.status,
                        candidate.current_task.as_deref().unwrap_or("-"),
                        candidate.context_percent,
                        format_relative_time(candidate.last_heartbeat, now)
                    )?;
                }
                writeln!(out, "Suggested: {}", suggestion)?;
            }
            ResumeOutcome::NotFound { hint: Some(hint) } => {
                writeln!(out, "No instance found for hint '{}'.", hint)?;
            }
            ResumeOutcome::NotFound { hint: None } => {
                writeln!(out, "No instance found: nothing is waiting to be resumed.")?;
            }
        }
        Ok(())
    }
}

pub struct ResumeService {
    resolver: InstanceResolver,
    reconstructor: Reconstructor,
}

impl ResumeService {
    pub fn new(registry: Arc<InstanceRegistry>, workspace: Arc<dyn Workspace>) -> Self {
        Self {
            resolver: InstanceResolver::new(Arc::clone(&registry)),
            reconstructor: Reconstructor::new(registry, workspace),
        }
    }

    pub fn resume(&self, hint: Option<&str>) -> Result<ResumeOutcome> {
        self.resume_at(hint, Utc::now())
    }

    pub fn resume_at(&self, hint: Option<&str>, now: DateTime<Utc>) -> Result<ResumeOutcome> {
        let hint_text = hint.map(str::trim).filter(|h| !h.is_empty());

        match self.resolver.resolve_at(hint_text, now)? {
            Resolution::Resolved { instance, strategy } => {
                let context = self.reconstructor.reconstruct_at(&instance.instance_id, now)?;
                let brief = brief::generate(&context.work_state, context.checkpoint_type);
                tracing::info!(
                    instance_id = %instance.instance_id,
                    strategy = %strategy,
                    confidence = context.confidence_score,
                    "Prepared resume brief"
                );
                Ok(ResumeOutcome::Brief {
                    instance,
                    context,
                    brief,
                })
            }
            Resolution::MultipleMatches {
                candidates,
                suggestion,
                ..
            } => Ok(ResumeOutcome::Disambiguation {
                hint: hint_text.map(str::to_string),
                candidates,
                suggestion,
            }),
            Resolution::NotFound { hint } => Ok(ResumeOutcome::NotFound { hint }),
        }
    }

    /// Answer one protocol line.
    pub fn handle(&self, input: &str) -> Result<String> {
        self.handle_at(input, Utc::now())
    }

    pub fn handle_at(&self, input: &str, now: DateTime<Utc>) -> Result<String> {
        let hint = parse_command(input).ok_or_else(|| {
            Error::InvalidInput(format!("expected `{} <hint>`, got '{}'", COMMAND, input.trim()))
        })?;
        Ok(self.resume_at(hint.as_deref(), now)?.render(now))
    }
}
