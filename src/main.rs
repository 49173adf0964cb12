use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stepbreak::{
    Callbacks, InterruptCoordinator, ResumeOutcome, StepbreakConfig, TaskExit, TaskSet,
};
use tracing_subscriber::EnvFilter;

/// Run a loop of labeled steps that Ctrl-C pauses, Enter resumes,
/// and a second Ctrl-C or SIGTERM ends.
#[derive(Parser, Debug)]
#[command(name = "stepbreak", version, about)]
pub struct Cli {
    /// Override number of steps (default: from config)
    #[arg(value_name = "STEPS")]
    steps: Option<u32>,

    /// Config file path
    #[arg(short, long, default_value = "stepbreak.toml")]
    config: PathBuf,

    /// Step duration in milliseconds (overrides config)
    #[arg(long)]
    step_ms: Option<u64>,

    /// Stay paused on a second Ctrl-C instead of exiting
    #[arg(long)]
    no_exit_on_second: bool,

    /// Process status for forced exits (overrides config)
    #[arg(long)]
    exit_code: Option<i32>,

    /// Print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (cancellations, dispatched signals)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match StepbreakConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };
    if let Some(steps) = cli.steps {
        config.run.steps = steps;
    }
    if let Some(step_ms) = cli.step_ms {
        config.run.step_duration_ms = step_ms;
    }
    if cli.no_exit_on_second {
        config.interrupt.exit_on_second_interrupt = false;
    }
    if let Some(code) = cli.exit_code {
        config.interrupt.exit_code = code;
    }

    if cli.dry_run {
        println!("Config file: {}", cli.config.display());
        println!("{config:#?}");
        return;
    }

    run(config).await;
}

/// Set by the pause callback, taken by the step loop.
#[derive(Clone, Default)]
struct PauseFlag(Arc<AtomicBool>);

impl PauseFlag {
    fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Whether the loop should show the resume prompt after a step ended
    /// with `exit`. Clears the flag.
    fn take<T>(&self, exit: &TaskExit<T>) -> bool {
        let flagged = self.0.swap(false, Ordering::SeqCst);
        // The task can be cancelled before the pause callback has run.
        flagged || matches!(exit, TaskExit::Interrupted)
    }
}

async fn run(config: StepbreakConfig) {
    let tasks = TaskSet::new();
    let paused = PauseFlag::default();
    let flag = paused.clone();
    let callbacks = Callbacks::default()
        .on_pause(move || {
            flag.raise();
            tracing::info!("step loop paused");
            Ok(())
        })
        .on_resume(|| {
            tracing::info!("step loop resuming");
            Ok(())
        })
        .on_exit(|| {
            tracing::info!("step loop exiting");
            Ok(())
        });

    let coordinator = InterruptCoordinator::new(config.interrupt, callbacks, tasks.clone());
    let mode = coordinator.register();
    tracing::debug!(?mode, "interrupt handling ready");

    let step_duration = Duration::from_millis(config.run.step_duration_ms);
    let mut step = 1;
    while step <= config.run.steps {
        let join = tasks.spawn(format!("step-{step}"), run_step(step, step_duration));
        let exit = match join.await {
            Ok(exit) => exit,
            Err(e) => {
                tracing::error!(step, error = %e, "step failed");
                break;
            }
        };
        match exit {
            TaskExit::Completed(()) => step += 1,
            TaskExit::Interrupted => tracing::info!(step, "step interrupted"),
        }

        // A Ctrl-C that lands just after a step completes still pauses.
        if paused.take(&exit) {
            match coordinator.wait_for_resume().await {
                // Drop a flag raised after the step already came back interrupted.
                ResumeOutcome::Resumed => paused.clear(),
                ResumeOutcome::InputClosed => {
                    tracing::warn!("operator input closed while paused, stopping");
                    break;
                }
                ResumeOutcome::Exited => return,
            }
        }
    }

    let cleanup = tasks.spawn("cleanup-1", async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        tracing::info!("cleanup finished");
    });
    if let Err(e) = cleanup.await {
        tracing::error!(error = %e, "cleanup failed");
    }

    coordinator.unregister();
    println!("Completed {} of {} steps.", step - 1, config.run.steps);
}

async fn run_step(step: u32, duration: Duration) {
    tracing::info!(step, "step started");
    tokio::time::sleep(duration).await;
    tracing::info!(step, "step finished");
}
