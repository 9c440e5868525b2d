//! Runpad CLI
//!
//! A terminal front-end for running Python and C snippets.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use runpad::{
    AttachOptions, BackendKind, Config, ControllerError, EXAMPLE_CONFIG, RunController,
    RunOutcome, TerminalSink, TextBuffer,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "runpad")]
#[command(about = "Run Python and C snippets from the terminal")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path (default: runpad.toml)
        #[arg(short, long, default_value = "runpad.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run a source file once
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Backend to use (python or c; default: from the file extension)
        #[arg(short, long)]
        backend: Option<BackendKind>,
    },

    /// Start an interactive editing session
    Session {
        /// Backend selected at start (python or c)
        #[arg(short, long)]
        backend: Option<BackendKind>,
    },

    /// List example snippets
    Examples,

    /// Show effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Load configuration
    let config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    match cli.command {
        Commands::Init { output, force } => init_config(&output, force).await,
        Commands::Run { source, backend } => run_file(config, &source, backend).await,
        Commands::Session { backend } => run_session(config, backend).await,
        Commands::Examples => {
            list_examples(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
    }
}

/// Backend implied by a source file's extension
fn backend_for_path(config: &Config, path: &Path) -> Option<BackendKind> {
    let ext = path.extension()?.to_str()?;
    if ext == "py" {
        Some(BackendKind::ManagedRuntime)
    } else if ext == config.interpreter.extension.as_str() {
        Some(BackendKind::EmbeddedInterpreter)
    } else {
        None
    }
}

async fn run_file(mut config: Config, source: &Path, backend: Option<BackendKind>) -> Result<()> {
    let code = tokio::fs::read_to_string(source)
        .await
        .context("failed to read source file")?;

    if let Some(kind) = backend.or_else(|| backend_for_path(&config, source)) {
        config.default_backend = kind;
    }
    info!(backend = %config.default_backend, ?source, "running file");

    let sink = TerminalSink::stdout(std::io::stdout().is_terminal());
    let controller = RunController::from_config_with(
        &config,
        sink,
        TextBuffer::new(code, ""),
        AttachOptions::one_shot(),
    );

    let outcome = controller.run().await;
    controller.dispose().await;

    match outcome {
        RunOutcome::Completed(report) if !report.faulted => Ok(()),
        RunOutcome::Completed(_) | RunOutcome::EmptyInput => std::process::exit(1),
        RunOutcome::InitFailed(err) => {
            warn!(%err, "backend failed to start");
            std::process::exit(1);
        }
        RunOutcome::Ignored => anyhow::bail!("run request was ignored"),
    }
}

const SESSION_HELP: &str = "\
Lines not starting with ':' are appended to the source buffer.

  :run            run the buffer
  :python, :c     switch backend
  :clear          empty the buffer
  :show           print the buffer
  :examples       list examples for the selected backend
  :example N      load example N
  :status         print the run status
  :reload         retry a failed backend initialization
  :help           show this help
  :quit           leave the session";

async fn run_session(mut config: Config, backend: Option<BackendKind>) -> Result<()> {
    if let Some(kind) = backend {
        config.default_backend = kind;
    }

    let buffer = TextBuffer::shared("", "");
    let sink = TerminalSink::stdout(std::io::stdout().is_terminal());
    let controller = RunController::from_config(&config, sink, buffer.clone());
    controller.start();

    // Report status changes as they happen, warm-up included
    let mut status_rx = controller.subscribe();
    let watcher = {
        let controller = controller.clone();
        tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                debug!(status = %controller.status_text(), "status");
            }
        })
    };

    println!("{SESSION_HELP}\n");
    println!("[{}] {}", controller.selection(), controller.status_text());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let Some(command) = line.strip_prefix(':') else {
            buffer
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push_line(&line);
            continue;
        };

        let mut parts = command.split_whitespace();
        match (parts.next().unwrap_or_default(), parts.next()) {
            ("run" | "r", _) => {
                if let RunOutcome::Ignored = controller.run().await {
                    println!("busy, run ignored");
                }
            }
            ("python" | "py", _) => switch(&controller, BackendKind::ManagedRuntime),
            ("c", _) => switch(&controller, BackendKind::EmbeddedInterpreter),
            ("switch", Some(name)) => match name.parse() {
                Ok(kind) => switch(&controller, kind),
                Err(e) => println!("{e}"),
            },
            ("clear", _) => controller.clear_source(),
            ("show", _) => print!("{}", controller.source()),
            ("examples", _) => {
                for (i, example) in controller.examples().iter().enumerate() {
                    println!("  {:<3} {}", i + 1, example.title);
                }
            }
            ("example", Some(n)) => {
                let examples = controller.examples();
                match n.parse::<usize>().ok().and_then(|n| examples.get(n.wrapping_sub(1))) {
                    Some(example) => {
                        controller.load_example(&example.code);
                        println!("loaded '{}'", example.title);
                    }
                    None => println!("no example {n}"),
                }
            }
            ("status", _) => {
                println!("[{}] {}", controller.selection(), controller.status_text())
            }
            ("reload", _) => match controller.retry_initialization().await {
                Ok(()) => println!("{}", controller.status_text()),
                Err(e) => println!("{e}"),
            },
            ("help" | "h", _) => println!("{SESSION_HELP}"),
            ("quit" | "q" | "exit", _) => break,
            (other, _) => println!("unknown command ':{other}' (try :help)"),
        }
    }

    controller.dispose().await;
    watcher.abort();
    Ok(())
}

fn switch(controller: &RunController, kind: BackendKind) {
    match controller.switch_backend(kind) {
        Ok(()) => println!("[{}] {}", kind, controller.status_text()),
        Err(ControllerError::Busy) => println!("busy, cannot switch now"),
        Err(e) => println!("{e}"),
    }
}

fn list_examples(config: &Config) {
    for kind in BackendKind::ALL {
        println!("{kind}:");
        for (i, example) in config.examples_for(kind).enumerate() {
            println!("  {:<3} {}", i + 1, example.title);
        }
    }
}

fn show_config(config: &Config) {
    println!("Default backend: {}", config.default_backend);
    println!();
    println!("Default limits:");
    println!("  Wall time limit: {:?}", config.limits.wall_time_limit);
    println!("  Max output: {:?} KB", config.limits.max_output);
    println!();
    println!("Managed runtime: {}", config.runtime.name);
    println!("  Command: {}", config.runtime.command.join(" "));
    println!("  Startup timeout: {}s", config.runtime.startup_timeout);
    println!();
    println!("Embedded interpreter: {}", config.interpreter.name);
    if let Some(compile) = &config.interpreter.compile {
        println!("  Compile: {}", compile.command.join(" "));
    }
    println!("  Run: {}", config.interpreter.run.command.join(" "));
    println!();
    println!("Examples configured: {}", config.examples.len());
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
