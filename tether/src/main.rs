//! tether - session continuity for long-running agent sessions
//!
//! Command-line front-end over tether-core: register and heartbeat sessions,
//! record events and commands, take checkpoints, and answer `resume <hint>`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tether_core::checkpoint::{CaptureRequest, DEFAULT_LIST_LIMIT};
use tether_core::event_store::{EventKind, EventQuery};
use tether_core::failures::{self, FailureReceiver};
use tether_core::format::{format_relative_time, truncate_chars};
use tether_core::{
    footer, CheckpointManager, CheckpointType, CommandLogSink, Config, Database, EventStore,
    FsWorkspace, HeartbeatManager, Instance, InstanceRegistry, ListFilter, NewCommand,
    Reconstructor, ResumeService, Role, TaskDescriptor, WorkStateSerializer,
};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Register, checkpoint and resume long-running agent sessions")]
#[command(version)]
struct Cli {
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a new session and print its instance id
    Register {
        /// Project name (normalized to lower case)
        #[arg(short, long)]
        project: String,
        /// Role code: PS (project supervisor) or FS (fleet supervisor)
        #[arg(short, long, default_value = "PS")]
        role: Role,
        /// Where the session runs
        #[arg(long, default_value = "local")]
        host: String,
    },
    /// Report liveness for a session
    Heartbeat {
        instance_id: String,
        /// Context usage, 0-100
        #[arg(short, long, allow_hyphen_values = true)]
        context: i64,
        /// Current external task reference
        #[arg(short, long)]
        task: Option<String>,
        /// Write on the background pool and report failures on stderr
        #[arg(long)]
        detached: bool,
    },
    /// Close a session for good
    Close { instance_id: String },
    /// List sessions
    List {
        #[arg(short, long)]
        project: Option<String>,
        /// Only sessions with a recent heartbeat
        #[arg(long)]
        active: bool,
    },
    /// Show one session by id or unique prefix
    Show { hint: String },
    /// Append an event
    Emit {
        instance_id: String,
        /// Event type, e.g. task_started
        event_type: String,
        /// Payload as a JSON object
        #[arg(short, long, default_value = "{}")]
        data: String,
        /// Metadata as a JSON object
        #[arg(short, long)]
        metadata: Option<String>,
    },
    /// Query a session's events
    Events(EventsArgs),
    /// Fold a session's events into a summary
    Replay {
        instance_id: String,
        /// Stop after this sequence number
        #[arg(long)]
        up_to: Option<i64>,
    },
    /// Record a command in the command log
    Log(LogArgs),
    /// Checkpoint management
    #[command(subcommand)]
    Checkpoint(CheckpointCommand),
    /// Reconstruct what a session was doing
    Reconstruct { instance_id: String },
    /// Resolve a hint and print a recovery brief
    Resume {
        /// Id, id prefix, hash, task id or project; empty for the most recent stale session
        hint: Vec<String>,
    },
    /// Print the footer status line for a session
    Footer { instance_id: String },
}

#[derive(Args)]
struct EventsArgs {
    instance_id: String,
    /// Only these types (repeatable)
    #[arg(short = 't', long = "type")]
    types: Vec<EventKind>,
    /// RFC 3339 lower bound
    #[arg(long)]
    since: Option<DateTime<Utc>>,
    /// RFC 3339 upper bound
    #[arg(long)]
    until: Option<DateTime<Utc>>,
    /// Substring match on payloads
    #[arg(short, long)]
    keyword: Option<String>,
    #[arg(short, long, default_value_t = 100)]
    limit: usize,
    #[arg(long, default_value_t = 0)]
    offset: usize,
}

#[derive(Args)]
struct LogArgs {
    instance_id: String,
    /// What was done, e.g. "cargo test"
    action: String,
    /// Tool that performed it
    #[arg(long)]
    tool: Option<String>,
    /// Parameters as a JSON object
    #[arg(short, long)]
    params: Option<String>,
    #[arg(short, long)]
    result: Option<String>,
    /// Mark the command as failed
    #[arg(long)]
    failed: bool,
    #[arg(long, default_value_t = 0)]
    duration_ms: i64,
    /// Free-form tags (repeatable)
    #[arg(long = "tag")]
    tags: Vec<String>,
}

#[derive(Subcommand)]
enum CheckpointCommand {
    /// Capture the current work state and store it
    Create {
        instance_id: String,
        /// context_pressure, task_completion or manual
        #[arg(short = 't', long = "type", default_value = "manual")]
        checkpoint_type: CheckpointType,
        #[arg(short, long)]
        context: Option<u8>,
        /// Repository to probe; defaults to the current directory
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Name of the current task
        #[arg(long)]
        task: Option<String>,
        #[arg(long)]
        task_id: Option<String>,
        #[arg(long)]
        epic: Option<String>,
        /// Task phase, e.g. implementation
        #[arg(long)]
        status: Option<String>,
        /// Pending task (repeatable)
        #[arg(long = "pending")]
        pending: Vec<String>,
        /// Context worth carrying over (repeatable)
        #[arg(long = "note")]
        notes: Vec<String>,
    },
    /// List checkpoints, newest first
    List {
        instance_id: String,
        #[arg(short = 't', long = "type")]
        checkpoint_type: Option<CheckpointType>,
        #[arg(short, long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Print a checkpoint's recovery brief
    Show { checkpoint_id: String },
    /// Delete checkpoints older than the retention window
    Cleanup {
        /// Overrides checkpoint.retention_days
        #[arg(long)]
        days: Option<u32>,
    },
}

/// Shared handles for one invocation
struct Services {
    config: Config,
    db: Arc<Database>,
    registry: Arc<InstanceRegistry>,
    failures: failures::FailureReporter,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        tether_core::logging::init(&config.logging).context("failed to initialize logging")?;

    // Open database
    let db_path = Config::database_path();
    tracing::debug!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    let db = Arc::new(db);

    let (reporter, mut receiver) = failures::channel(config.failures.channel_capacity);
    let services = Services {
        registry: Arc::new(InstanceRegistry::from_config(
            Arc::clone(&db),
            &config.registry,
        )),
        db,
        config,
        failures: reporter,
    };

    let result = run(cli.command, cli.json, &services).await;

    report_failures(&mut receiver);
    result
}

async fn run(command: Command, json: bool, s: &Services) -> Result<()> {
    match command {
        Command::Register {
            project,
            role,
            host,
        } => {
            let instance = s
                .registry
                .register(&project, role, &host)
                .context("failed to register instance")?;
            if json {
                print_json(&instance)?;
            } else {
                println!("{}", instance.instance_id);
            }
        }

        Command::Heartbeat {
            instance_id,
            context,
            task,
            detached,
        } => {
            let manager = HeartbeatManager::with_config(
                Arc::clone(&s.registry),
                s.failures.clone(),
                &s.config.heartbeat,
            );
            if detached {
                // The CLI waits so the process does not exit mid-write.
                manager
                    .beat_detached(instance_id, context, task)
                    .await
                    .context("heartbeat task panicked")?;
            } else {
                let report = manager
                    .beat(&instance_id, context, task.as_deref())
                    .with_context(|| format!("heartbeat failed for {}", instance_id))?;
                if json {
                    print_json(&serde_json::json!({
                        "instance": report.instance,
                        "previous_age_secs": report.previous_age_secs,
                        "was_stale": report.was_stale,
                        "elapsed_ms": report.elapsed_ms as u64,
                    }))?;
                } else if report.was_stale {
                    println!(
                        "ok (was stale for {}s)",
                        report.previous_age_secs
                    );
                } else {
                    println!("ok");
                }
            }
        }

        Command::Close { instance_id } => {
            let instance = s
                .registry
                .mark_closed(&instance_id)
                .with_context(|| format!("failed to close {}", instance_id))?;
            if json {
                print_json(&instance)?;
            } else {
                println!("closed {}", instance.instance_id);
            }
        }

        Command::List { project, active } => {
            let filter = ListFilter {
                project,
                active_only: active,
            };
            let instances = s.registry.list(&filter).context("failed to list instances")?;
            if json {
                print_json(&instances)?;
            } else if instances.is_empty() {
                println!("No instances found.");
            } else {
                let now = Utc::now();
                for instance in &instances {
                    print_instance_row(instance, now);
                }
            }
        }

        Command::Show { hint } => {
            let instance = s
                .registry
                .get_details(&hint)?
                .with_context(|| format!("no unique instance matches '{}'", hint))?;
            if json {
                print_json(&instance)?;
            } else {
                print_instance_details(&instance, Utc::now());
            }
        }

        Command::Emit {
            instance_id,
            event_type,
            data,
            metadata,
        } => {
            let data: serde_json::Value =
                serde_json::from_str(&data).context("--data is not valid JSON")?;
            let metadata = metadata
                .map(|m| serde_json::from_str::<serde_json::Value>(&m))
                .transpose()
                .context("--metadata is not valid JSON")?;

            let emitted = EventStore::new(Arc::clone(&s.db))
                .emit_raw(&instance_id, &event_type, data, metadata)
                .with_context(|| format!("failed to emit {} for {}", event_type, instance_id))?;
            if json {
                print_json(&emitted)?;
            } else {
                println!("{} #{}", emitted.event_id, emitted.sequence_num);
            }
        }

        Command::Events(args) => {
            let query = EventQuery {
                types: args.types,
                since: args.since,
                until: args.until,
                keyword: args.keyword,
                limit: args.limit,
                offset: args.offset,
            };
            let page = EventStore::new(Arc::clone(&s.db))
                .query(&args.instance_id, &query)
                .context("failed to query events")?;
            if json {
                print_json(&page)?;
            } else {
                for event in &page.events {
                    let data = event.payload.to_data().unwrap_or_default();
                    println!(
                        "#{:<4} {}  {:<20} {}",
                        event.sequence_num,
                        event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        event.event_type,
                        truncate_chars(&data.to_string(), 80)
                    );
                }
                println!(
                    "{} of {} event(s){}",
                    page.events.len(),
                    page.total,
                    if page.has_more { ", more available" } else { "" }
                );
            }
        }

        Command::Replay { instance_id, up_to } => {
            let state = EventStore::new(Arc::clone(&s.db))
                .replay(&instance_id, up_to)
                .context("failed to replay events")?;
            if json {
                print_json(&state)?;
            } else {
                println!("Events applied: {}", state.events_applied);
                if let Some(task) = &state.last_task {
                    println!("Task: {} ({})", task.name, task.status);
                }
                if let Some(tests) = &state.last_tests {
                    println!(
                        "Tests: {} ({} passed, {} failed)",
                        tests.outcome, tests.passed, tests.failed
                    );
                }
                if let Some(branch) = &state.branch {
                    println!("Branch: {}", branch);
                }
                if let Some(error) = &state.last_error {
                    println!("Last error: {}", error);
                }
                println!("Checkpoints: {}", state.checkpoints_seen);
            }
        }

        Command::Log(args) => {
            let parameters = match &args.params {
                Some(p) => serde_json::from_str(p).context("--params is not valid JSON")?,
                None => serde_json::json!({}),
            };
            let mut command = match &args.tool {
                Some(tool) => NewCommand::tool_call(&args.instance_id, tool, parameters),
                None => {
                    let mut c = NewCommand::explicit(&args.instance_id, &args.action);
                    c.parameters = parameters;
                    c
                }
            };
            command.action = args.action;
            command.result = args.result;
            command.success = !args.failed;
            command.execution_time_ms = args.duration_ms;
            command.tags = args.tags;

            let id = CommandLogSink::new(Arc::clone(&s.db), s.failures.clone())
                .record(&command)
                .context("failed to record command")?;
            if json {
                print_json(&serde_json::json!({ "id": id }))?;
            } else {
                println!("{}", id);
            }
        }

        Command::Checkpoint(cmd) => run_checkpoint(cmd, json, s).await?,

        Command::Reconstruct { instance_id } => {
            let context = Reconstructor::new(Arc::clone(&s.registry), Arc::new(FsWorkspace))
                .reconstruct(&instance_id)
                .with_context(|| format!("failed to reconstruct {}", instance_id))?;
            if json {
                print_json(&context)?;
            } else {
                println!("Source: {}", context.source);
                println!("Confidence: {}/100", context.confidence_score);
                println!("Reason: {}", context.confidence_reason);
                println!("Age: {}m", context.age_minutes);
                println!("Summary: {}", context.summary);
                for warning in &context.warnings {
                    println!("Warning: {}", warning);
                }
            }
        }

        Command::Resume { hint } => {
            let hint = hint.join(" ");
            let hint = (!hint.trim().is_empty()).then_some(hint.as_str());
            let service = ResumeService::new(Arc::clone(&s.registry), Arc::new(FsWorkspace));
            let outcome = service.resume(hint).context("resume failed")?;
            if json {
                print_json(&outcome)?;
            } else {
                print!("{}", outcome.render(Utc::now()));
            }
        }

        Command::Footer { instance_id } => {
            let line = footer::render_for(&s.registry, &instance_id, &s.config.footer)
                .with_context(|| format!("failed to render footer for {}", instance_id))?;
            println!("{}", line);
        }
    }

    Ok(())
}

async fn run_checkpoint(command: CheckpointCommand, json: bool, s: &Services) -> Result<()> {
    let manager = CheckpointManager::new(Arc::clone(&s.db));

    match command {
        CheckpointCommand::Create {
            instance_id,
            checkpoint_type,
            context,
            dir,
            task,
            task_id,
            epic,
            status,
            pending,
            notes,
        } => {
            let instance = s
                .registry
                .require(&instance_id)
                .with_context(|| format!("unknown instance {}", instance_id))?;
            let working_directory = match dir {
                Some(dir) => Some(dir),
                None => Some(std::env::current_dir().context("failed to read current directory")?),
            };

            let current_task = task.or_else(|| instance.current_task.clone()).map(|name| {
                TaskDescriptor {
                    id: task_id,
                    name,
                    status: status.unwrap_or_default(),
                    epic_id: epic,
                    elapsed_minutes: Some(instance.elapsed_minutes(Utc::now())),
                    ..Default::default()
                }
            });

            let serializer = WorkStateSerializer::new(Arc::clone(&s.db), &s.config.checkpoint);
            let work_state = serializer
                .capture(&CaptureRequest {
                    instance_id: instance.instance_id.clone(),
                    project: instance.project.clone(),
                    working_directory,
                    current_task,
                    external_document_status: None,
                    pending_tasks: pending,
                    important_context: notes,
                })
                .await;

            let context = context.or(Some(instance.context_percent));
            let created = manager
                .create(&instance_id, checkpoint_type, context, &work_state, None)
                .context("failed to create checkpoint")?;
            if json {
                print_json(&created)?;
            } else {
                println!(
                    "{} #{} ({} bytes)",
                    created.checkpoint_id, created.sequence_num, created.size_bytes
                );
            }
        }

        CheckpointCommand::List {
            instance_id,
            checkpoint_type,
            limit,
            offset,
        } => {
            let page = manager
                .list(&instance_id, checkpoint_type, limit, offset)
                .context("failed to list checkpoints")?;
            if json {
                print_json(&page)?;
            } else {
                let now = Utc::now();
                for cp in &page.checkpoints {
                    println!(
                        "#{:<3} {}  {:<16} {:>4}  {:<24} {}",
                        cp.sequence_num,
                        cp.checkpoint_id,
                        cp.checkpoint_type.as_str(),
                        cp.context_percent
                            .map(|p| format!("{}%", p))
                            .unwrap_or_else(|| "-".to_string()),
                        truncate_chars(cp.task_name.as_deref().unwrap_or("-"), 24),
                        format_relative_time(cp.created_at, now)
                    );
                }
                println!(
                    "{} of {} checkpoint(s){}",
                    page.checkpoints.len(),
                    page.total,
                    if page.has_more { ", more available" } else { "" }
                );
            }
        }

        CheckpointCommand::Show { checkpoint_id } => {
            let found = manager
                .get(&checkpoint_id)
                .with_context(|| format!("failed to load checkpoint {}", checkpoint_id))?;
            if json {
                print_json(&found)?;
            } else {
                print!("{}", found.brief);
            }
        }

        CheckpointCommand::Cleanup { days } => {
            let days = days.unwrap_or(s.config.checkpoint.retention_days);
            let report = manager.cleanup(days).context("checkpoint cleanup failed")?;
            if json {
                print_json(&report)?;
            } else {
                println!(
                    "Deleted {} checkpoint(s), freed {} bytes (older than {})",
                    report.deleted,
                    report.bytes_freed,
                    report.cutoff.format("%Y-%m-%d %H:%M UTC")
                );
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize output")?
    );
    Ok(())
}

fn print_instance_row(instance: &Instance, now: DateTime<Utc>) {
    println!(
        "{:<28} {:<7} {:>4}%  {:<16} {}",
        instance.instance_id,
        instance.status.as_str(),
        instance.context_percent,
        truncate_chars(instance.current_task.as_deref().unwrap_or("-"), 16),
        format_relative_time(instance.last_heartbeat, now)
    );
}

fn print_instance_details(instance: &Instance, now: DateTime<Utc>) {
    println!("Instance:   {}", instance.instance_id);
    println!("Project:    {}", instance.project);
    println!("Role:       {}", instance.role.display_name());
    println!("Status:     {}", instance.status);
    println!("Context:    {}%", instance.context_percent);
    println!(
        "Task:       {}",
        instance.current_task.as_deref().unwrap_or("-")
    );
    println!("Host:       {}", instance.host_location);
    println!(
        "Heartbeat:  {}",
        format_relative_time(instance.last_heartbeat, now)
    );
    println!(
        "Created:    {}",
        instance.created_at.format("%Y-%m-%d %H:%M UTC")
    );
    if let Some(closed) = instance.closed_at {
        println!("Closed:     {}", closed.format("%Y-%m-%d %H:%M UTC"));
    }
}

/// Surface failures swallowed by detached writes.
fn report_failures(receiver: &mut FailureReceiver) {
    for failure in receiver.drain() {
        eprintln!(
            "warning: background {} failed for {}: {}",
            failure.operation, failure.instance_id, failure.message
        );
    }
    let dropped = receiver.dropped();
    if dropped > 0 {
        eprintln!("warning: {} background failure(s) were dropped", dropped);
    }
}
