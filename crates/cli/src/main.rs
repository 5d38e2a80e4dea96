//! Rota CLI - hourly task rotation for on-duty operators.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use rota_core::{
    AssignmentId, BreakKind, Decision, HourWindow, OperatorId, ParamField, ParamSchema, ParamType,
    Params, RequestFilter, RequestId, RequestStatus, ShiftId, TaskRef, TaskTemplate, Time,
};
use rota_engine::{Engine, EngineConfig, Notifier, SettingsHandle, SlotOutcome, WebhookNotifier};
use rota_storage::{JsonStorage, Storage};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rota")]
#[command(about = "Hourly task rotation for on-duty operators", long_about = None)]
struct Cli {
    /// Data directory
    #[arg(long, global = true, default_value = ".rota")]
    data: PathBuf,

    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Post notices to this webhook instead of the log
    #[arg(long, global = true)]
    webhook: Option<String>,

    /// Acting operator or admin id
    #[arg(long = "as", global = true, default_value = "admin")]
    actor: String,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Run,
    /// Run the hourly cycle once
    Tick,
    /// Manage operators
    Operator {
        #[command(subcommand)]
        command: OperatorCommand,
    },
    /// Manage shifts
    Shift {
        #[command(subcommand)]
        command: ShiftCommand,
    },
    /// Manage task templates
    Template {
        #[command(subcommand)]
        command: TemplateCommand,
    },
    /// Show or change settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    /// Force-assign a task to an operator for the current hour
    Assign {
        /// Operator id
        operator: String,
        /// Task: "Lead", "Data Labelling" or a template name
        task: String,
        /// Parameter as key=value (repeatable)
        #[arg(long = "param")]
        params: Vec<String>,
    },
    /// Start an assignment (as the assigned operator)
    Start {
        /// Assignment id
        assignment: AssignmentId,
    },
    /// Come back from a break early (as the assigned operator)
    EndBreak {
        /// Assignment id
        assignment: AssignmentId,
    },
    /// Submit a change request (as the assigned operator)
    Request {
        #[command(subcommand)]
        command: RequestCommand,
    },
    /// Approve or deny a request
    Decide {
        /// Request id
        request: RequestId,
        /// approve | deny
        decision: Decision,
    },
    /// List requests
    Requests {
        /// Only pending requests
        #[arg(long)]
        pending: bool,
    },
    /// Show open assignments
    Status,
}

#[derive(Subcommand)]
enum OperatorCommand {
    /// Register or refresh an operator
    Add {
        /// Operator id
        id: String,
        /// Display name
        name: String,
    },
    /// Mark an operator inactive
    Deactivate {
        /// Operator id
        id: String,
    },
    /// List operators
    List,
}

#[derive(Subcommand)]
enum ShiftCommand {
    /// Open a shift
    Open {
        /// Operators on the roster
        operators: Vec<String>,
        /// Start instant (RFC 3339), defaults to now
        #[arg(long)]
        start: Option<Time>,
    },
    /// Join a running shift
    Join {
        /// Shift id
        shift: ShiftId,
        /// Operator id
        operator: String,
    },
    /// Leave a shift
    Leave {
        /// Shift id
        shift: ShiftId,
        /// Operator id
        operator: String,
    },
    /// List shifts
    List,
}

#[derive(Subcommand)]
enum TemplateCommand {
    /// Create or update a template
    Add {
        /// Template name
        name: String,
        /// Priority, lower is more urgent
        #[arg(long, default_value = "100")]
        priority: i32,
        /// Local hour window, e.g. 9-17
        #[arg(long)]
        window: Option<HourWindow>,
        /// Operator the template is bound to
        #[arg(long)]
        operator: Option<String>,
        /// Instructions shown on the widget
        #[arg(long)]
        instructions: Option<String>,
        /// Schema field as name:type[:required] (repeatable)
        #[arg(long = "field")]
        fields: Vec<String>,
    },
    /// Retire a template
    Retire {
        /// Template name
        name: String,
    },
    /// List templates
    List,
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Show current settings
    Show,
    /// Change a setting
    Set {
        /// Setting key
        key: String,
        /// New value
        value: String,
    },
}

#[derive(Subcommand)]
enum RequestCommand {
    /// Propose a parameter change
    Edit {
        /// Assignment id
        assignment: AssignmentId,
        /// Reason
        #[arg(long)]
        reason: String,
        /// Field as key=value, key=null removes it (repeatable)
        #[arg(long = "param", required = true)]
        params: Vec<String>,
    },
    /// Ask to end the assignment early
    EndEarly {
        /// Assignment id
        assignment: AssignmentId,
        /// Reason
        #[arg(long)]
        reason: String,
    },
    /// Ask for a break
    Break {
        /// Assignment id
        assignment: AssignmentId,
        /// short | long
        kind: BreakKind,
        /// Reason
        #[arg(long)]
        reason: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let storage: Arc<dyn Storage> = Arc::new(
        JsonStorage::new(&cli.data)
            .await
            .with_context(|| format!("opening data directory {}", cli.data.display()))?,
    );
    let config = match &cli.config {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    let settings = SettingsHandle::load(storage.clone()).await?;
    let notify_timeout = config.notify_timeout();
    let mut builder = Engine::builder(storage.clone()).settings(settings.clone()).config(config);
    if let Some(url) = &cli.webhook {
        let notifier: Arc<dyn Notifier> =
            Arc::new(WebhookNotifier::new(url.clone(), settings, notify_timeout));
        builder = builder.notifier(notifier);
    }
    let (engine, timers) = builder.build().await?;
    let actor = OperatorId::new(cli.actor.as_str());

    match cli.command {
        Commands::Run => {
            info!(data = %cli.data.display(), "rota scheduler starting");
            engine
                .run(timers, async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
        }
        Commands::Tick => {
            let report = engine.tick().await?;
            println!("Cycle at {}: closed {}, shifts ended {}", report.at, report.closed, report.shifts_closed.len());
            for slot in report.slots {
                let outcome = match slot.outcome {
                    SlotOutcome::Scheduled { created, lead } => format!(
                        "scheduled {created}, lead {}",
                        lead.map_or_else(|| "-".to_string(), |l| l.to_string())
                    ),
                    SlotOutcome::AlreadyScheduled { backfilled } => {
                        format!("already scheduled, backfilled {backfilled}")
                    }
                    SlotOutcome::NoRoster => "no active operators".to_string(),
                };
                println!("  {} hour {} | {}", slot.shift, slot.hour, outcome);
            }
        }
        Commands::Operator { command } => match command {
            OperatorCommand::Add { id, name } => {
                let op = engine.observe_operator(OperatorId::new(id), &name).await?;
                println!("Operator: {} ({})", op.id, op.display_name);
            }
            OperatorCommand::Deactivate { id } => {
                let op = engine.deactivate_operator(&OperatorId::new(id)).await?;
                println!("Deactivated: {}", op.id);
            }
            OperatorCommand::List => {
                let operators = storage.list_operators().await?;
                println!("Operators ({})", operators.len());
                for op in operators {
                    println!(
                        "  {} | {} | {} | last lead {}",
                        op.id,
                        if op.is_active { "ACTIVE" } else { "INACTIVE" },
                        op.display_name,
                        op.last_lead_at.map_or_else(|| "never".to_string(), |t| t.to_rfc3339()),
                    );
                }
            }
        },
        Commands::Shift { command } => match command {
            ShiftCommand::Open { operators, start } => {
                let start = start.unwrap_or_else(|| engine.clock().now());
                let roster = operators.into_iter().map(OperatorId::new).collect();
                let shift = engine.open_shift(start, roster).await?;
                println!("Opened shift {} at {} ({} operators)", shift.id, shift.start_at, shift.roster.len());
            }
            ShiftCommand::Join { shift, operator } => {
                let shift = engine.join_shift(shift, &OperatorId::new(operator)).await?;
                println!("Shift {} roster: {}", shift.id, shift.roster.len());
            }
            ShiftCommand::Leave { shift, operator } => {
                let shift = engine.leave_shift(shift, &OperatorId::new(operator)).await?;
                println!("Shift {} roster: {}", shift.id, shift.roster.len());
            }
            ShiftCommand::List => {
                let shifts = storage.list_shifts().await?;
                println!("Shifts ({})", shifts.len());
                for shift in shifts {
                    println!(
                        "  {} | {} - {} | {} | {} operators",
                        shift.id,
                        shift.start_at,
                        shift.end_at(),
                        if shift.ended_at.is_some() { "ENDED" } else { "OPEN" },
                        shift.roster.len(),
                    );
                }
            }
        },
        Commands::Template { command } => match command {
            TemplateCommand::Add { name, priority, window, operator, instructions, fields } => {
                let mut template = TaskTemplate::new(name, engine.clock().now());
                template.priority = priority;
                template.window = window;
                template.bound_operator = operator.map(OperatorId::new);
                template.instructions = instructions;
                if !fields.is_empty() {
                    let fields = fields.iter().map(|f| parse_field(f)).collect::<Result<Vec<_>>>()?;
                    template.params_schema = Some(ParamSchema { fields });
                }
                let template = engine.upsert_template(template, &actor).await?;
                println!("Template: {} (priority {})", template.name, template.priority);
            }
            TemplateCommand::Retire { name } => {
                let template = engine.retire_template(&name, &actor).await?;
                println!("Retired: {}", template.name);
            }
            TemplateCommand::List => {
                let templates = storage.list_templates().await?;
                println!("Templates ({})", templates.len());
                for t in templates {
                    println!(
                        "  {} | {} | window {} | bound {}{}",
                        t.name,
                        t.priority,
                        t.window.map_or_else(|| "any".to_string(), |w| format!("{}-{}", w.start, w.end)),
                        t.bound_operator.map_or_else(|| "-".to_string(), |o| o.to_string()),
                        if t.retired { " | RETIRED" } else { "" },
                    );
                }
            }
        },
        Commands::Settings { command } => match command {
            SettingsCommand::Show => {
                println!("{}", serde_json::to_string_pretty(&*engine.settings())?);
            }
            SettingsCommand::Set { key, value } => {
                engine.update_settings(&key, &value, &actor).await?;
                println!("Updated {key}");
            }
        },
        Commands::Assign { operator, task, params } => {
            let params = parse_params(&params)?;
            let assignment = engine
                .force_assign(&OperatorId::new(operator), TaskRef::from_name(&task), params, &actor)
                .await?;
            println!("Assigned {} to {} ({})", assignment.task, assignment.operator, assignment.id);
        }
        Commands::Start { assignment } => {
            let assignment = engine.start(assignment, &actor).await?;
            println!("Started {} - {}", assignment.id, assignment.task);
        }
        Commands::EndBreak { assignment } => {
            let assignment = engine.end_break(assignment, &actor).await?;
            println!("Back from break on {} - {}", assignment.id, assignment.task);
        }
        Commands::Request { command } => {
            let request = match command {
                RequestCommand::Edit { assignment, reason, params } => {
                    engine.submit_edit(assignment, &actor, &reason, parse_params(&params)?).await?
                }
                RequestCommand::EndEarly { assignment, reason } => {
                    engine.submit_end_early(assignment, &actor, &reason).await?
                }
                RequestCommand::Break { assignment, kind, reason } => {
                    engine.submit_break(assignment, &actor, &reason, kind).await?
                }
            };
            println!("Submitted {} request {}", request.kind(), request.id);
        }
        Commands::Decide { request, decision } => {
            let request = engine.decide(request, decision, &actor).await?;
            println!("Request {} {}", request.id, request.status);
        }
        Commands::Requests { pending } => {
            let filter = RequestFilter {
                status: pending.then_some(RequestStatus::Pending),
                ..RequestFilter::default()
            };
            let requests = engine.requests(&filter).await?;
            println!("Requests ({})", requests.len());
            for r in requests {
                println!(
                    "  {} | {} | {} | {} | {}",
                    r.id,
                    r.status.to_string().to_uppercase(),
                    r.kind(),
                    r.requested_by,
                    r.reason,
                );
            }
        }
        Commands::Status => {
            let open = engine.status().await?;
            println!("Open assignments ({})", open.len());
            for a in open {
                println!(
                    "  {} | {} | hour {} | {} | {}{}",
                    a.id,
                    a.operator,
                    a.hour,
                    a.task,
                    a.status.to_string().to_uppercase(),
                    match (&a.on_break, &a.covering) {
                        (Some(_), _) => " | ON BREAK".to_string(),
                        (None, Some(c)) => format!(" | COVERING {} FOR {}", c.task, c.operator),
                        (None, None) => String::new(),
                    },
                );
            }
        }
    }

    engine.flush().await;
    Ok(())
}

/// `key=value` pairs; values are read as JSON when they parse, text otherwise.
fn parse_params(pairs: &[String]) -> Result<Params> {
    pairs
        .iter()
        .map(|pair| {
            let (key, raw) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("expected key=value, got '{pair}'"))?;
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok((key.trim().to_string(), value))
        })
        .collect()
}

/// `name:type[:required]`
fn parse_field(spec: &str) -> Result<ParamField> {
    let mut parts = spec.split(':');
    let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(|| anyhow!("empty field name"))?;
    let kind: ParamType = parts
        .next()
        .ok_or_else(|| anyhow!("field '{name}' needs a type"))?
        .parse()
        .map_err(|e: String| anyhow!(e))?;
    let required = match parts.next() {
        None => false,
        Some("required") => true,
        Some(other) => return Err(anyhow!("unexpected field flag '{other}'")),
    };
    Ok(ParamField { name: name.to_string(), kind, required })
}
