//! Session footer line
//!
//! Appended to every outward-facing response of an active session, e.g.
//!
//! ```text
//! [odin-PS-3fa9c2 | task T-7 | ctx 45% | 1h12m]
//! ```
//!
//! Past the configured context threshold the line also tells the reader how
//! to pick the work back up.

use crate::config::FooterConfig;
use crate::error::Result;
use crate::format::format_elapsed_minutes;
use crate::registry::InstanceRegistry;
use crate::resume::COMMAND;
use crate::types::Instance;
use chrono::{DateTime, Utc};

/// Render the footer for an instance as of `now`.
pub fn render(instance: &Instance, now: DateTime<Utc>, config: &FooterConfig) -> String {
    let mut parts = vec![instance.instance_id.clone()];
    if let Some(task) = &instance.current_task {
        parts.push(format!("task {}", task));
    }
    parts.push(format!("ctx {}%", instance.context_percent));
    parts.push(format_elapsed_minutes(instance.elapsed_minutes(now)));

    let mut line = format!("[{}]", parts.join(" | "));
    if instance.context_percent > config.resume_hint_percent {
        line.push_str(&format!(
            " context high: checkpoint now; continue later with `{} {}`",
            COMMAND,
            instance.short_hash()
        ));
    }
    line
}

/// Look the instance up and render its footer.
pub fn render_for(
    registry: &InstanceRegistry,
    instance_id: &str,
    config: &FooterConfig,
) -> Result<String> {
    let now = Utc::now();
    let instance = registry.require_at(instance_id, now)?;
    Ok(render(&instance, now, config))
}
