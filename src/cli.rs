use crate::api::{OrchestratorClient, RunBackend};
use crate::model::{ClientConfig, CreatePlanInput, RunWithPhases, UpdatePlanInput};
use crate::orchestrator::{self, UiCommand, WatchEvent, WatchOptions, WatchTarget};
use crate::sync::{CommandDispatcher, LocalChangeFeed, RefreshPolicy, SnapshotStore, SyncEvent};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "phase-orchestrator-cli",
    version,
    about = "Manage phase plans and follow orchestrator runs live"
)]
pub struct Cli {
    /// Orchestrator backend origin (the /phase-orchestrator prefix is appended)
    #[arg(
        long,
        global = true,
        env = "PHASE_ORCHESTRATOR_API_URL",
        default_value = "http://localhost:3001"
    )]
    pub api_url: String,

    /// How often a running run is re-fetched while watching
    #[arg(
        long,
        global = true,
        env = "PHASE_ORCHESTRATOR_POLL_INTERVAL",
        default_value = "2s"
    )]
    pub poll_interval: humantime::Duration,

    /// Per-request timeout (off by default)
    #[arg(long, global = true)]
    pub request_timeout: Option<humantime::Duration>,

    /// Print JSON and exit (no TUI)
    #[arg(long, global = true, conflicts_with = "text")]
    pub json: bool,

    /// Print text and exit (no TUI)
    #[arg(long, global = true)]
    pub text: bool,

    /// Verbose logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Manage plans
    #[command(subcommand)]
    Plans(PlansCommand),
    /// Start, inspect, watch and cancel runs
    #[command(subcommand)]
    Runs(RunsCommand),
}

#[derive(Debug, Subcommand, Clone)]
pub enum PlansCommand {
    /// List all plans
    List,
    /// Show a plan and its parsed phases
    Show { id: String },
    /// Create a plan from markdown
    Create(PlanCreateArgs),
    /// Change a plan's name, content or working directory
    Update {
        id: String,
        #[command(flatten)]
        fields: PlanUpdateArgs,
    },
    /// Delete a plan
    Delete { id: String },
}

#[derive(Debug, Args, Clone)]
pub struct PlanCreateArgs {
    #[arg(long)]
    pub name: String,
    /// Plan markdown, inline
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub content: Option<String>,
    /// Read plan markdown from a file
    #[arg(long)]
    pub file: Option<PathBuf>,
    #[arg(long)]
    pub working_directory: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct PlanUpdateArgs {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long, conflicts_with = "file")]
    pub content: Option<String>,
    #[arg(long)]
    pub file: Option<PathBuf>,
    #[arg(long)]
    pub working_directory: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum RunsCommand {
    /// Start a run of a plan
    Start {
        plan_id: String,
        /// Keep watching the new run until it finishes
        #[arg(long)]
        watch: bool,
        /// With --watch: write the final snapshot as JSON
        #[arg(long, requires = "watch")]
        export_json: Option<PathBuf>,
        /// With --watch: read row changes as JSON lines from this file ("-" for stdin)
        #[arg(long, requires = "watch")]
        changes: Option<PathBuf>,
    },
    /// Fetch a run once
    Show {
        run_id: String,
        /// Also write the snapshot as JSON
        #[arg(long)]
        export_json: Option<PathBuf>,
    },
    /// Follow a run until it finishes
    Watch {
        run_id: String,
        /// Write the final snapshot as JSON
        #[arg(long)]
        export_json: Option<PathBuf>,
        /// Read row changes as JSON lines from this file ("-" for stdin)
        #[arg(long)]
        changes: Option<PathBuf>,
    },
    /// Request cancellation of a pending or running run
    Cancel { run_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Text,
    Json,
    Tui,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else if self.text || cfg!(not(feature = "tui")) {
            OutputMode::Text
        } else {
            OutputMode::Tui
        }
    }

    /// Logging would corrupt the alternate screen, so it stays off when the TUI is up.
    pub fn wants_tui(&self) -> bool {
        let watching = matches!(
            self.command,
            Command::Runs(RunsCommand::Watch { .. })
                | Command::Runs(RunsCommand::Start { watch: true, .. })
        );
        watching && self.output_mode() == OutputMode::Tui
    }
}

/// Build a `ClientConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> ClientConfig {
    ClientConfig {
        base_url: args.api_url.clone(),
        poll_interval: Duration::from(args.poll_interval),
        request_timeout: args.request_timeout.map(Duration::from),
        user_agent: format!("phase-orchestrator-cli/{}", env!("CARGO_PKG_VERSION")),
    }
}

/// Everything a command needs, resolved once from the arguments.
struct Ctx {
    client: OrchestratorClient,
    policy: RefreshPolicy,
    mode: OutputMode,
    /// `None` while the TUI owns the terminal.
    out: Option<mpsc::UnboundedSender<OutputLine>>,
}

impl Ctx {
    fn stdout(&self, line: impl Into<String>) {
        if let Some(tx) = self.out.as_ref() {
            let _ = tx.send(OutputLine::Stdout(line.into()));
        }
    }

    fn stderr(&self, line: impl Into<String>) {
        if let Some(tx) = self.out.as_ref() {
            let _ = tx.send(OutputLine::Stderr(line.into()));
        }
    }

    fn print_json<T: Serialize>(&self, value: &T) -> Result<()> {
        self.stdout(serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn backend(&self) -> Arc<dyn RunBackend> {
        Arc::new(self.client.clone())
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let client = OrchestratorClient::new(&cfg).context("failed to set up HTTP client")?;
    // The writer holds the stdout lock, so it must not run alongside the TUI.
    let (out, out_handle) = if args.wants_tui() {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };
    let ctx = Ctx {
        client,
        policy: RefreshPolicy::new(cfg.poll_interval),
        mode: args.output_mode(),
        out,
    };

    let res = match args.command {
        Command::Plans(cmd) => run_plans(&ctx, cmd).await,
        Command::Runs(cmd) => run_runs(&ctx, cmd).await,
    };

    drop(ctx);
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }
    res
}

fn read_content(content: Option<String>, file: Option<&Path>) -> Result<Option<String>> {
    match (content, file) {
        (Some(c), _) => Ok(Some(c)),
        (None, Some(p)) => std::fs::read_to_string(p)
            .map(Some)
            .with_context(|| format!("failed to read plan file {}", p.display())),
        (None, None) => Ok(None),
    }
}

async fn run_plans(ctx: &Ctx, cmd: PlansCommand) -> Result<()> {
    match cmd {
        PlansCommand::List => {
            let plans = ctx.client.list_plans().await?;
            if ctx.mode == OutputMode::Json {
                return ctx.print_json(&plans);
            }
            for line in crate::text_summary::plan_list_lines(&plans).lines {
                ctx.stdout(line);
            }
        }
        PlansCommand::Show { id } => {
            let plan = ctx.client.get_plan(&id).await?;
            if ctx.mode == OutputMode::Json {
                return ctx.print_json(&plan);
            }
            for line in crate::text_summary::plan_detail_lines(&plan).lines {
                ctx.stdout(line);
            }
        }
        PlansCommand::Create(args) => {
            let content = read_content(args.content, args.file.as_deref())?.unwrap_or_default();
            let input = CreatePlanInput {
                name: args.name,
                content,
                working_directory: args.working_directory,
            };
            let plan = ctx.client.create_plan(&input).await?;
            if ctx.mode == OutputMode::Json {
                return ctx.print_json(&plan);
            }
            ctx.stdout(format!(
                "Created plan {} ({} phases): {}",
                plan.name, plan.phase_count, plan.id
            ));
        }
        PlansCommand::Update { id, fields } => {
            let input = UpdatePlanInput {
                name: fields.name,
                content: read_content(fields.content, fields.file.as_deref())?,
                working_directory: fields.working_directory,
            };
            let plan = ctx.client.update_plan(&id, &input).await?;
            if ctx.mode == OutputMode::Json {
                return ctx.print_json(&plan);
            }
            ctx.stdout(format!("Updated plan {} ({})", plan.plan.name, plan.plan.id));
        }
        PlansCommand::Delete { id } => {
            ctx.client.delete_plan(&id).await?;
            if ctx.mode != OutputMode::Json {
                ctx.stdout(format!("Deleted plan {id}"));
            }
        }
    }
    Ok(())
}

async fn run_runs(ctx: &Ctx, cmd: RunsCommand) -> Result<()> {
    match cmd {
        RunsCommand::Start {
            plan_id,
            watch,
            export_json,
            changes,
        } => {
            let store = SnapshotStore::new();
            let dispatcher = CommandDispatcher::new(ctx.backend(), store.clone());
            let run = dispatcher.start(&plan_id).await?;
            if watch {
                ctx.stderr(format!("Started run {}", run.run.id));
                let opts = WatchArgs {
                    export_json: export_json.as_deref(),
                    changes: changes.as_deref(),
                };
                return watch_run(ctx, store, run.run.id, opts).await;
            }
            if ctx.mode == OutputMode::Json {
                return ctx.print_json(&run);
            }
            ctx.stdout(format!("Started run {}", run.run.id));
            ctx.stdout(crate::text_summary::run_status_line(&run));
        }
        RunsCommand::Show {
            run_id,
            export_json,
        } => {
            let run = ctx.client.get_run(&run_id).await?;
            if let Some(path) = export_json.as_deref() {
                orchestrator::export_json(path, &run)?;
                ctx.stderr(format!("Exported JSON: {}", path.display()));
            }
            if ctx.mode == OutputMode::Json {
                return ctx.print_json(&run);
            }
            let now = time::OffsetDateTime::now_utc();
            for line in crate::text_summary::build_run_summary(&run, now).lines {
                ctx.stdout(line);
            }
        }
        RunsCommand::Watch {
            run_id,
            export_json,
            changes,
        } => {
            let opts = WatchArgs {
                export_json: export_json.as_deref(),
                changes: changes.as_deref(),
            };
            watch_run(ctx, SnapshotStore::new(), run_id, opts).await?;
        }
        RunsCommand::Cancel { run_id } => {
            let store = SnapshotStore::new();
            let run = ctx
                .client
                .get_run(&run_id)
                .await
                .context("could not load run before cancelling")?;
            store.set(&run_id, run);
            CommandDispatcher::new(ctx.backend(), store)
                .cancel(&run_id)
                .await?;
            if ctx.mode != OutputMode::Json {
                ctx.stdout(format!(
                    "Cancellation requested for run {run_id}; the status updates once the orchestrator stops it"
                ));
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy)]
struct WatchArgs<'a> {
    export_json: Option<&'a Path>,
    changes: Option<&'a Path>,
}

fn is_stdin(path: &Path) -> bool {
    path == Path::new("-")
}

/// Feed the session from `changes` when given. Without it the session runs
/// on polling alone, so pending runs are nudged.
async fn open_feed(
    changes: Option<&Path>,
) -> Result<(LocalChangeFeed, Option<tokio::task::JoinHandle<usize>>)> {
    let feed = LocalChangeFeed::new();
    let Some(path) = changes else {
        return Ok((feed, None));
    };
    let pump = if is_stdin(path) {
        let reader = tokio::io::BufReader::new(tokio::io::stdin());
        tokio::spawn(crate::sync::pump_ndjson(reader, feed.clone()))
    } else {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("failed to open change stream {}", path.display()))?;
        let reader = tokio::io::BufReader::new(file);
        tokio::spawn(crate::sync::pump_ndjson(reader, feed.clone()))
    };
    Ok((feed, Some(pump)))
}

async fn watch_run(
    ctx: &Ctx,
    store: SnapshotStore,
    run_id: String,
    args: WatchArgs<'_>,
) -> Result<()> {
    if ctx.mode == OutputMode::Tui && args.changes.is_some_and(is_stdin) {
        anyhow::bail!(
            "reading changes from stdin needs --text or --json (the TUI reads keys from it)"
        );
    }
    let (feed, pump) = open_feed(args.changes).await?;
    let target = WatchTarget {
        backend: ctx.backend(),
        feed: Arc::new(feed),
        store,
        run_id,
        policy: ctx.policy,
    };
    let nudge_pending = pump.is_none();

    let res = match ctx.mode {
        #[cfg(feature = "tui")]
        OutputMode::Tui => {
            crate::tui::run(target, nudge_pending, args.export_json.map(Path::to_path_buf)).await
        }
        _ => watch_headless(ctx, target, nudge_pending, args.export_json).await,
    };
    if let Some(pump) = pump {
        pump.abort();
    }
    res
}

/// Text/JSON watch: follow until a terminal status, Ctrl-C, or an initial fetch failure.
async fn watch_headless(
    ctx: &Ctx,
    target: WatchTarget,
    nudge_pending: bool,
    export_json: Option<&Path>,
) -> Result<()> {
    let run_id = target.run_id.clone();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<WatchEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let opts = WatchOptions {
        exit_on_terminal: true,
        fail_on_initial_fetch: true,
        nudge_pending,
    };
    let handle = tokio::spawn(orchestrator::run_controller(target, opts, event_tx, cmd_rx));

    let mut last_line = String::new();
    let mut interrupted = false;
    loop {
        tokio::select! {
            ev = event_rx.recv() => {
                let Some(ev) = ev else { break };
                match ev {
                    WatchEvent::Snapshot(snapshot) => {
                        let line = crate::text_summary::run_status_line(&snapshot);
                        if ctx.mode == OutputMode::Text && line != last_line {
                            ctx.stdout(line.clone());
                        }
                        last_line = line;
                    }
                    WatchEvent::Sync(SyncEvent::FetchFailed { message, has_snapshot: true }) => {
                        ctx.stderr(format!("Refresh failed, showing last known state: {message}"));
                    }
                    WatchEvent::Sync(SyncEvent::FeedDisconnected) => {
                        ctx.stderr("Live updates disconnected; relying on polling");
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                let _ = cmd_tx.send(UiCommand::Quit);
            }
        }
    }

    let last = handle
        .await
        .context("watch task failed")?
        .with_context(|| format!("could not load run {run_id}"))?;

    for msg in orchestrator::process_watch_completion(export_json, last.as_ref()) {
        ctx.stderr(msg);
    }
    report_final(ctx, last.as_ref(), interrupted)
}

fn report_final(ctx: &Ctx, last: Option<&RunWithPhases>, interrupted: bool) -> Result<()> {
    let Some(snapshot) = last else {
        return Ok(());
    };
    if ctx.mode == OutputMode::Json {
        return ctx.print_json(snapshot);
    }
    if interrupted && !snapshot.status().is_terminal() {
        ctx.stderr(format!(
            "Stopped watching run {} ({})",
            snapshot.run.id,
            snapshot.status().label()
        ));
        return Ok(());
    }
    let now = time::OffsetDateTime::now_utc();
    for line in crate::text_summary::build_run_summary(snapshot, now).lines {
        ctx.stdout(line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn config_defaults() {
        let cli = Cli::try_parse_from(["phase-orchestrator-cli", "runs", "watch", "R1"]).unwrap();
        let cfg = build_config(&cli);
        assert_eq!(cfg.poll_interval, Duration::from_millis(2000));
        assert_eq!(cfg.request_timeout, None);
        assert!(cfg.user_agent.starts_with("phase-orchestrator-cli/"));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "phase-orchestrator-cli",
            "runs",
            "show",
            "R1",
            "--json",
            "--api-url",
            "http://orchestrator:9000",
            "--poll-interval",
            "500ms",
        ])
        .unwrap();
        assert_eq!(cli.output_mode(), OutputMode::Json);
        assert!(!cli.wants_tui());
        let cfg = build_config(&cli);
        assert_eq!(cfg.base_url, "http://orchestrator:9000");
        assert_eq!(cfg.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn plan_create_needs_exactly_one_source() {
        let base = ["phase-orchestrator-cli", "plans", "create", "--name", "Deploy"];
        assert!(Cli::try_parse_from(base).is_err());
        assert!(Cli::try_parse_from(
            base.iter()
                .copied()
                .chain(["--content", "# P", "--file", "plan.md"])
        )
        .is_err());
        assert!(Cli::try_parse_from(base.iter().copied().chain(["--content", "# P"])).is_ok());
    }

    #[test]
    fn text_and_json_conflict() {
        assert!(Cli::try_parse_from([
            "phase-orchestrator-cli",
            "--json",
            "--text",
            "plans",
            "list"
        ])
        .is_err());
    }
}
