//! Tutorial runner CLI: run tutorial lessons against a local work directory.
//!
//! Mounts a lesson (and its template) into a directory, runs the lesson's
//! command pipeline in a PTY and streams its output.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // CLI must print to stdout
#![allow(clippy::print_stderr)] // CLI must print to stderr

mod lesson;
mod local;
mod progress;
mod surface;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use miette::{miette, IntoDiagnostic, Result};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use tutorial_runner::model::{FilesystemSchema, Lesson, RunnerConfig, ShellConfig};
use tutorial_runner::steps::StepStatus;
use tutorial_runner::{
    LessonLoader, PrepareFilesOptions, TaskError, TaskResult, TutorialRunner, TutorialStore,
};

use crate::lesson::{load_lesson, DirLoader};
use crate::local::LocalBooter;
use crate::progress::StepProgress;
use crate::surface::StdoutSurface;

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(
    name = "tutorial-runner",
    version,
    about = "Run tutorial lessons against a local work directory"
)]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Mount a lesson into a work directory and run its commands
    Run {
        #[arg(help = "Lesson directory (lesson.yaml or lesson.json, _files/, _solution/)")]
        lesson: PathBuf,
        #[arg(long, help = "Directory holding one sub-directory per template")]
        templates: Option<PathBuf>,
        #[arg(long, help = "Work directory the lesson is mounted into")]
        workdir: PathBuf,
        #[arg(long, help = "Runner configuration file (YAML or JSON)")]
        config: Option<PathBuf>,
        #[arg(long, help = "Mount the lesson's solution instead of its starting files")]
        solve: bool,
        #[arg(long, help = "Keep running and mirror edits made in the work directory")]
        watch: bool,
    },
    /// Print the portable snapshot of a lesson as JSON
    Snapshot {
        #[arg(help = "Lesson directory (lesson.yaml or lesson.json, _files/, _solution/)")]
        lesson: PathBuf,
        #[arg(long, help = "Directory holding one sub-directory per template")]
        templates: Option<PathBuf>,
        #[arg(long, help = "Work directory the lesson is mounted into")]
        workdir: PathBuf,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
}

/// Handle the color mode setting.
/// Configures miette error output colors and respects `NO_COLOR` env var.
fn configure_colors(mode: ColorMode) {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            if std::env::var("NO_COLOR").is_ok() {
                false
            } else {
                supports_color::on(supports_color::Stream::Stderr).is_some()
            }
        }
    };

    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
}

/// Logs go to stderr; `RUST_LOG` overrides the `-v` level.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_colors(cli.color);
    init_logging(cli.verbose);
    match cli.command {
        Commands::Run {
            lesson,
            templates,
            workdir,
            config,
            solve,
            watch,
        } => block_on(cmd_run(RunArgs {
            lesson,
            templates,
            workdir,
            config,
            solve,
            watch,
        })),
        Commands::Snapshot {
            lesson,
            templates,
            workdir,
        } => block_on(cmd_snapshot(&lesson, templates, workdir)),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

fn block_on(work: impl std::future::Future<Output = Result<()>>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    runtime.block_on(work)
}

// =============================================================================
// Command Handlers
// =============================================================================

struct RunArgs {
    lesson: PathBuf,
    templates: Option<PathBuf>,
    workdir: PathBuf,
    config: Option<PathBuf>,
    solve: bool,
    watch: bool,
}

/// Handle the run command.
async fn cmd_run(args: RunArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let mut lesson = load_lesson(&args.lesson)?;
    // Only the output panel has somewhere to render.
    lesson.data.terminal = None;
    if args.watch {
        lesson.data.filesystem = Some(FilesystemSchema { watch: true });
    }

    let runner = TutorialRunner::new(
        Arc::new(LocalBooter::new(args.workdir)),
        Arc::default(),
        config,
    );
    let loader = Arc::new(DirLoader::new(args.lesson.clone(), args.templates));
    let store = TutorialStore::new(runner.clone(), loader);
    let progress = Arc::new(StepProgress::new());
    let interrupted = interrupt_channel()?;

    let title = lesson_title(&lesson).to_string();
    let load = store.set_lesson(lesson)?;
    if let Some(output) = runner.output_panel() {
        runner.attach_terminal(output.id(), StdoutSurface::new(Arc::clone(&progress)));
    }
    let follower = {
        let progress = Arc::clone(&progress);
        let steps = runner.steps().subscribe();
        tokio::spawn(async move { progress.follow(steps).await })
    };

    task_outcome(load.await)?;
    if args.solve {
        if let Some(solve) = store.solve() {
            task_outcome(solve.await)?;
        }
    }
    info!(lesson = %title, "lesson mounted");

    let interrupted = match runner.run_task() {
        Some(run) => run_until_interrupted(&run, interrupted).await,
        None => Some(interrupted),
    };
    if args.watch {
        if let Some(mut interrupted) = interrupted {
            info!("watching for changes, press Ctrl-C to stop");
            interrupted.recv().await;
        }
    }

    // Let forwarded output reach stdout before the spinner is torn down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    follower.abort();
    progress.clear();
    let failed: Vec<String> = runner
        .steps()
        .get()
        .into_iter()
        .filter(|step| step.status == StepStatus::Failed)
        .map(|step| step.title)
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(miette!("failed steps: {}", failed.join(", ")))
    }
}

/// Await `run`, cancelling it on Ctrl-C. Returns the interrupt receiver if
/// no interrupt arrived.
async fn run_until_interrupted(
    run: &tutorial_runner::Task<()>,
    mut interrupted: mpsc::UnboundedReceiver<()>,
) -> Option<mpsc::UnboundedReceiver<()>> {
    tokio::select! {
        outcome = run.outcome() => {
            if let Err(TaskError::Failed(err)) = outcome {
                debug!(error = %err, "run failed");
            }
            Some(interrupted)
        }
        _ = interrupted.recv() => {
            info!("interrupted, stopping commands");
            run.cancel();
            run.settled().await;
            None
        }
    }
}

fn interrupt_channel() -> Result<mpsc::UnboundedReceiver<()>> {
    let (sender, receiver) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = sender.send(());
    })
    .into_diagnostic()?;
    Ok(receiver)
}

/// Handle the snapshot command.
async fn cmd_snapshot(lesson_dir: &Path, templates: Option<PathBuf>, workdir: PathBuf) -> Result<()> {
    let lesson = load_lesson(lesson_dir)?;
    let loader = DirLoader::new(lesson_dir.to_path_buf(), templates);
    let runner = TutorialRunner::new(
        Arc::new(LocalBooter::new(workdir)),
        Arc::default(),
        RunnerConfig::default(),
    );

    runner.set_commands(&lesson.data.commands);
    let mut options = PrepareFilesOptions::new(loader.files(&lesson).await?);
    if let Some(template) = &lesson.data.template {
        options = options.with_template(loader.template(template).await?);
    }
    task_outcome(runner.prepare_files(options).await)?;

    let snapshot = runner.take_snapshot();
    let json = serde_json::to_string_pretty(&snapshot).into_diagnostic()?;
    println!("{json}");
    Ok(())
}

/// Handle the completions command.
fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

/// Runner configuration for a local work directory. A file overrides the
/// defaults field by field.
fn load_config(path: Option<&Path>) -> Result<RunnerConfig> {
    let Some(path) = path else {
        return Ok(local_config());
    };
    let text = std::fs::read_to_string(path).into_diagnostic()?;
    let config = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&text).into_diagnostic()?
    } else {
        serde_yml::from_str(&text).into_diagnostic()?
    };
    Ok(config)
}

fn local_config() -> RunnerConfig {
    RunnerConfig {
        shell: ShellConfig {
            program: "sh".to_string(),
            command_args: vec!["-c".to_string()],
            interactive_args: vec!["-i".to_string()],
        },
        ..RunnerConfig::default()
    }
}

fn task_outcome(outcome: TaskResult<()>) -> Result<()> {
    match outcome {
        Ok(()) => Ok(()),
        Err(TaskError::Cancelled) => Err(miette!("cancelled")),
        Err(TaskError::Failed(err)) => Err(err.as_ref().clone().into()),
    }
}

fn lesson_title(lesson: &Lesson) -> &str {
    lesson.title.as_deref().unwrap_or(&lesson.id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_posix_shell() {
        let config = local_config();
        assert_eq!(
            config.shell.command_line("npm install"),
            (
                "sh".to_string(),
                vec!["-c".to_string(), "npm install".to_string()]
            )
        );
    }

    #[test]
    fn cancelled_task_is_an_error() {
        assert!(task_outcome(Err(TaskError::Cancelled)).is_err());
        assert!(task_outcome(Ok(())).is_ok());
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "tutorial-runner",
            "-vv",
            "run",
            "lessons/intro",
            "--workdir",
            "/tmp/work",
            "--watch",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Run { watch: true, solve: false, .. }));
    }
}
