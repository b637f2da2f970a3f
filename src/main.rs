use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};

use taskmover_lib::config::MigrationConfig;
use taskmover_lib::model::{Collection, Person};
use taskmover_lib::operator::{AutoOperator, Operator, TerminalOperator};
use taskmover_lib::orchestrator::{
    DemoRecord, MigrationOrchestrator, MigrationState, OrchestratorEvent, OrchestratorRun,
};
use taskmover_lib::steps::{
    self, RecordOutcome, RecordReport, StepContext, StepEvent, StepEventHandler, StepKind,
    StepReport,
};
use taskmover_lib::store::{MemoryStore, NotionStore, RecordStore};
use taskmover_lib::summary::RecordSummary;
use taskmover_lib::{report, AppError, AppResult};

/// Exit code when the run finished but at least one record failed.
const EXIT_RECORD_FAILURES: i32 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "taskmover",
    about = "Move project records from Tasks to Projects without losing relations",
    version
)]
struct Cli {
    /// Notion integration token.
    #[arg(long, env = "NOTION_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,
    /// Configuration file (defaults to the user config directory).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Dump the retrieved records and collection schema as JSON into DIR.
    #[arg(long, value_name = "DIR", global = true)]
    raw: Option<PathBuf>,
    /// Write the step report as JSON into DIR.
    #[arg(long, value_name = "DIR", global = true)]
    report_dir: Option<PathBuf>,
    /// Print the report as JSON instead of the table view.
    #[arg(long, global = true)]
    json: bool,
    /// Accept every confirmation and keep the first of several assignees.
    #[arg(long, global = true)]
    yes: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check that queued Tasks records can be migrated; marks the others Error.
    Validate,
    /// Leave exactly one assignee on every queued record.
    FixAssignee,
    /// Park parent relations in the Parent Transfer field.
    SaveParentRelations,
    /// Park subtask relations and queue the subtasks for relinking.
    SaveSubtaskRelations,
    /// Detach saved subtasks so the record can be moved.
    RemoveSubtasks,
    /// List queued records that already arrived in Projects.
    VerifyMove,
    /// Copy task properties onto their project counterparts.
    PostMoveUpdate,
    /// Restore parked parents into Parent Projects.
    RelinkParentProjects,
    /// Link parked subtasks back to their project and finish the record.
    RelinkSubtasks,
    /// Walk one freshly created record through the whole migration.
    Demo(DemoArgs),
}

#[derive(Debug, Clone, Args)]
struct DemoArgs {
    /// Run against an in-memory store; the move is simulated.
    #[arg(long)]
    offline: bool,
    /// Title of the created record.
    #[arg(long)]
    title: Option<String>,
    /// Number of subtasks created with the record.
    #[arg(long, default_value_t = 2)]
    subtasks: usize,
    /// Give up after this many failed move checks (1 with --yes).
    #[arg(long, value_name = "N")]
    max_move_attempts: Option<usize>,
}

impl Commands {
    fn step(&self) -> Option<StepKind> {
        Some(match self {
            Commands::Validate => StepKind::Validate,
            Commands::FixAssignee => StepKind::FixAssignee,
            Commands::SaveParentRelations => StepKind::SaveParentRelations,
            Commands::SaveSubtaskRelations => StepKind::SaveSubtaskRelations,
            Commands::RemoveSubtasks => StepKind::RemoveSubtasks,
            Commands::VerifyMove => StepKind::VerifyMove,
            Commands::PostMoveUpdate => StepKind::PostMoveUpdate,
            Commands::RelinkParentProjects => StepKind::RelinkParentProjects,
            Commands::RelinkSubtasks => StepKind::RelinkSubtasks,
            Commands::Demo(_) => return None,
        })
    }
}

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config = MigrationConfig::load(cli.config.as_deref()).map_err(AppError::from)?;
    let _log_guard = taskmover_lib::init_logging(config.log_dir.as_deref())?;
    tracing::debug!(target: "taskmover", event = "cli_started", command = ?cli.command);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(async {
        match &cli.command {
            Commands::Demo(args) => handle_demo(&cli, args, &config).await,
            command => match command.step() {
                Some(step) => handle_step(&cli, step, &config).await,
                None => Ok(0),
            },
        }
    })
}

fn connect(cli: &Cli, config: &MigrationConfig) -> AppResult<NotionStore> {
    let token = cli
        .token
        .as_deref()
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| {
            AppError::new(
                AppError::MISSING_TOKEN,
                "A Notion integration token is required (--token or NOTION_TOKEN)",
            )
        })?;
    config.validate()?;
    NotionStore::new(token, config)
}

fn operator_for(cli: &Cli) -> Box<dyn Operator> {
    if cli.yes {
        Box::new(AutoOperator)
    } else {
        Box::new(TerminalOperator)
    }
}

async fn handle_step(cli: &Cli, step: StepKind, config: &MigrationConfig) -> Result<i32> {
    let store = connect(cli, config)?;
    let operator = operator_for(cli);
    let mut ctx = StepContext::new(&store, config, operator.as_ref());
    if let Some(dir) = &cli.raw {
        ctx = ctx.with_raw_dir(dir);
    }
    if !cli.json {
        let printer: StepEventHandler = Arc::new(|event: StepEvent| match event {
            StepEvent::Started { step, total } => {
                println!("{step}: {total} record(s) in {}", step.collection());
            }
            StepEvent::Record { report, .. } => print_record(&report),
            StepEvent::Finished { .. } => {}
        });
        ctx = ctx.with_observer(printer);
    }

    let step_report = steps::run_step(&ctx, step).await?;
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&step_report).context("serialize step report")?
        );
    } else {
        print_summary(&step_report);
    }
    if let Some(dir) = &cli.report_dir {
        let path = report::write_step_report(dir, &step_report)?;
        eprintln!("Report written to {}", path.display());
    }
    Ok(if step_report.has_failures() {
        EXIT_RECORD_FAILURES
    } else {
        0
    })
}

fn outcome_label(outcome: RecordOutcome) -> &'static str {
    match outcome {
        RecordOutcome::Succeeded => "ok",
        RecordOutcome::Skipped => "skipped",
        RecordOutcome::Failed => "failed",
    }
}

fn print_record(report: &RecordReport) {
    println!(
        "  {:<8} {}  {}",
        outcome_label(report.outcome),
        report.record,
        report.message
    );
    for detail in &report.details {
        println!("           - {detail}");
    }
}

fn print_summary(report: &StepReport) {
    for note in &report.notes {
        println!("  {note}");
    }
    println!();
    println!(
        "{}: {} succeeded, {} skipped, {} failed ({} ms)",
        report.step,
        report.succeeded(),
        report.skipped(),
        report.failed(),
        report.duration_ms
    );
}

/// Operator for offline demos: answers come from the wrapped operator, the
/// move itself is performed on the in-memory store.
struct SimulatedMove {
    store: Arc<MemoryStore>,
    inner: Box<dyn Operator>,
}

#[async_trait]
impl Operator for SimulatedMove {
    async fn choose_assignee(
        &self,
        record: &RecordSummary,
        candidates: &[Person],
    ) -> AppResult<Option<usize>> {
        self.inner.choose_assignee(record, candidates).await
    }

    async fn confirm(&self, prompt: &str) -> AppResult<bool> {
        self.inner.confirm(prompt).await
    }

    async fn wait_for_move(&self, record: &RecordSummary, destination: Collection) -> AppResult<()> {
        tracing::info!(
            target: "taskmover",
            event = "simulated_move",
            record_id = %record.id,
            destination = destination.as_str()
        );
        self.store.move_record(&record.id, destination)
    }
}

async fn handle_demo(cli: &Cli, args: &DemoArgs, config: &MigrationConfig) -> Result<i32> {
    let mut demo = DemoRecord::default();
    if let Some(title) = &args.title {
        demo.title = title.clone();
    }
    demo.subtasks = (1..=args.subtasks)
        .map(|n| format!("Demo subtask {n}"))
        .collect();

    let notion;
    let memory;
    let operator: Box<dyn Operator>;
    let store: &dyn RecordStore = if args.offline {
        let store = Arc::new(MemoryStore::new());
        store.add_principal(Person::named("demo-operator", "Demo Operator"));
        operator = Box::new(SimulatedMove {
            store: store.clone(),
            inner: operator_for(cli),
        });
        memory = store;
        memory.as_ref()
    } else {
        notion = connect(cli, config)?;
        operator = operator_for(cli);
        &notion
    };

    let mut orchestrator =
        MigrationOrchestrator::new(store, config, operator.as_ref()).with_demo(demo);
    if let Some(limit) = args.max_move_attempts.or(cli.yes.then_some(1)) {
        orchestrator = orchestrator.with_max_move_attempts(limit);
    }
    if !cli.json {
        orchestrator = orchestrator.with_observer(Arc::new(|event: OrchestratorEvent| match event {
            OrchestratorEvent::StateChanged(change) => {
                println!("{:<18} -> {}", change.from.as_str(), change.to.as_str());
            }
            OrchestratorEvent::StepApplied { step, report } => {
                println!("  {step}");
                print_record(&report);
            }
        }));
    }

    let run = orchestrator.run().await?;
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&run).context("serialize demo run")?
        );
    } else {
        print_run(&run);
    }
    if let Some(dir) = &cli.report_dir {
        let path = report::write_run_report(dir, &run)?;
        eprintln!("Report written to {}", path.display());
    }
    finish_demo(run)
}

fn print_run(run: &OrchestratorRun) {
    println!();
    match (&run.record_id, run.state) {
        (Some(id), MigrationState::Complete) => println!("Record {id} migrated."),
        (Some(id), state) => println!("Record {id} stopped in state '{state}'."),
        (None, state) => println!("No record created; stopped in state '{state}'."),
    }
}

fn finish_demo(run: OrchestratorRun) -> Result<i32> {
    if run.is_complete() {
        return Ok(0);
    }
    match run.error {
        Some(err) if err.is_fatal() => Err(err.into()),
        Some(err) => {
            eprintln!("Error: {err}");
            Ok(EXIT_RECORD_FAILURES)
        }
        None => Ok(EXIT_RECORD_FAILURES),
    }
}
