//! jupyter-agent - run code in a Jupyter kernel and keep the notebook in step.
//!
//! ## Usage
//!
//! ```bash
//! # Check the server is reachable
//! jupyter-agent status
//! jupyter-agent ls research
//!
//! # Create a notebook and run code in it
//! jupyter-agent new research/experiment.ipynb --title "Experiment"
//! jupyter-agent exec research/experiment.ipynb 'import math; math.pi'
//!
//! # Fix a failing cell in place
//! jupyter-agent edit-run research/experiment.ipynb 1 'print("fixed")'
//!
//! # Report edits made by someone else
//! jupyter-agent watch research/experiment.ipynb --interval 5
//! ```

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{LevelFilter, info};
use serde::Serialize;

use jupyter_agent::config::{self, AppConfig};
use jupyter_agent::format::{format_diff, format_execution_result, short_id};
use jupyter_agent::{
    JupyterClient, NotebookSession, Persistence, ReadMode, WebSocketConnector,
};

type Session = NotebookSession<JupyterClient, WebSocketConnector>;

#[derive(Debug, Parser)]
#[command(author, version, about = "Run code in a Jupyter kernel on behalf of an agent")]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<String>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Output machine readable JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check the notebook server is reachable
    Status,

    /// List running kernels, or start or shut one down
    Kernels {
        /// Start a kernel from this kernel spec
        #[arg(long, value_name = "SPEC", conflicts_with = "shutdown")]
        start: Option<String>,
        /// Shut down the kernel with this id
        #[arg(long, value_name = "ID")]
        shutdown: Option<String>,
    },

    /// List a directory on the notebook server
    Ls {
        /// Directory relative to the server root
        #[arg(default_value = "")]
        path: String,
    },

    /// Create a notebook and start a kernel for it
    New {
        /// Notebook path relative to the server root
        path: String,
        /// Title added as a markdown cell at the top
        #[arg(long)]
        title: Option<String>,
    },

    /// Print a notebook
    Read {
        path: String,
        #[arg(long, value_enum, default_value_t = ReadModeArg::Full)]
        mode: ReadModeArg,
        /// Cells shown in `last` mode
        #[arg(long, default_value_t = 5)]
        last: usize,
    },

    /// Execute code, recording it as a new cell unless --no-save is given
    Exec {
        path: String,
        /// Code to run, or `-` to read it from stdin
        code: String,
        /// Store the code and outputs in this existing cell
        #[arg(long, value_name = "INDEX")]
        cell: Option<usize>,
        /// Run without touching the notebook
        #[arg(long)]
        no_save: bool,
        /// Seconds to wait for completion
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,
    },

    /// Replace a cell's source and run it
    EditRun {
        path: String,
        index: usize,
        /// New source, or `-` to read it from stdin
        source: String,
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,
    },

    /// Print the stored outputs of a cell
    Output { path: String, index: usize },

    /// Restart the notebook's kernel
    Restart { path: String },

    /// Interrupt the notebook's kernel
    Interrupt { path: String },

    /// Report edits to a notebook as they happen
    Watch {
        path: String,
        /// Seconds between checks
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },

    /// Show the effective configuration
    Config {
        /// Print the default configuration file instead
        #[arg(long)]
        example: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReadModeArg {
    Full,
    Last,
    Summary,
}

#[tokio::main]
async fn main() -> ExitCode {
    match try_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = match &cli.common.config {
        Some(path) => config::expand_path(path)?,
        None => config::default_config_file()?,
    };
    let created = !config_path.exists();
    let config = AppConfig::load_or_init(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    init_logging(&cli.common, &config.logging.level);
    if created {
        info!("Wrote default config to {}", config_path.display());
    }

    let app = App {
        json: cli.common.json,
        config,
        config_path,
    };
    app.run(cli.command).await
}

fn init_logging(common: &CommonOpts, configured: &str) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    if common.quiet {
        log::set_max_level(LevelFilter::Off);
        return;
    }

    let level = match common.verbose {
        0 => configured.parse().unwrap_or(LevelFilter::Info),
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let directive = level.to_string().to_lowercase();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "jupyter_agent={directive},jupyter_agent_protocol={directive}"
        ))
    });

    // Results go to stdout; diagnostics stay on stderr.
    if common.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_ansi(io::stderr().is_terminal())
                    .with_target(level >= LevelFilter::Debug),
            )
            .try_init()
            .ok();
    }

    // Also init env_logger for compatibility with log crate users
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.filter_level(level);
    builder.try_init().ok();
}

struct App {
    json: bool,
    config: AppConfig,
    config_path: PathBuf,
}

impl App {
    async fn run(&self, command: Command) -> Result<ExitCode> {
        match command {
            Command::Status => self.status().await,
            Command::Kernels { start, shutdown } => self.kernels(start, shutdown).await,
            Command::Ls { path } => self.list(&path).await,
            Command::New { path, title } => {
                let mut session = self.session()?;
                let kernel_id = session
                    .create_notebook(&path, title.as_deref())
                    .await
                    .with_context(|| format!("creating notebook {path}"))?;
                println!(
                    "Created notebook: {path}\nKernel: {} ({})\nReady for execution.",
                    self.config.kernel.name,
                    short_id(&kernel_id)
                );
                session.close().await;
                Ok(ExitCode::SUCCESS)
            }
            Command::Read { path, mode, last } => {
                let session = self.open(&path).await?;
                let mode = match mode {
                    ReadModeArg::Full => ReadMode::Full,
                    ReadModeArg::Last => ReadMode::LastN(last),
                    ReadModeArg::Summary => ReadMode::Summary,
                };
                println!("{}", session.read(mode).await?);
                Ok(ExitCode::SUCCESS)
            }
            Command::Exec {
                path,
                code,
                cell,
                no_save,
                timeout,
            } => {
                let code = read_arg(code)?;
                let mut session = self.open(&path).await?;
                let execution = session
                    .execute_cell(&code, timeout.map(Duration::from_secs), !no_save, cell)
                    .await?;
                session.close().await;
                self.report_execution(&execution)
            }
            Command::EditRun {
                path,
                index,
                source,
                timeout,
            } => {
                let source = read_arg(source)?;
                let mut session = self.open(&path).await?;
                let execution = session
                    .edit_and_run_cell(index, &source, timeout.map(Duration::from_secs))
                    .await?;
                session.close().await;
                self.report_execution(&execution)
            }
            Command::Output { path, index } => {
                let session = self.open(&path).await?;
                println!("{}", session.cell_output(index).await?);
                Ok(ExitCode::SUCCESS)
            }
            Command::Restart { path } => {
                let mut session = self.open(&path).await?;
                session.restart_kernel().await?;
                println!("Kernel restarted. All variables cleared. Re-run cells to restore state.");
                Ok(ExitCode::SUCCESS)
            }
            Command::Interrupt { path } => {
                let mut session = self.open(&path).await?;
                session.interrupt_kernel().await?;
                println!("Kernel interrupted.");
                Ok(ExitCode::SUCCESS)
            }
            Command::Watch { path, interval } => {
                let mut session = self.open(&path).await?;
                self.watch(&mut session, Duration::from_secs(interval.max(1)))
                    .await?;
                Ok(ExitCode::SUCCESS)
            }
            Command::Config { example } => {
                if example {
                    print!("{}", config::example_config()?);
                } else {
                    println!("# {}", self.config_path.display());
                    print!("{}", toml::to_string_pretty(&self.config)?);
                }
                Ok(ExitCode::SUCCESS)
            }
        }
    }

    fn client(&self) -> Result<JupyterClient> {
        JupyterClient::new(&self.config.server.url, &self.config.server.token)
            .context("building HTTP client")
    }

    fn session(&self) -> Result<Session> {
        let connector =
            WebSocketConnector::new(&self.config.server.url, &self.config.server.token);
        Ok(NotebookSession::new(
            self.client()?,
            connector,
            self.config.session_settings(),
        ))
    }

    async fn open(&self, path: &str) -> Result<Session> {
        let mut session = self.session()?;
        session
            .open(path)
            .await
            .with_context(|| format!("opening notebook {path}"))?;
        Ok(session)
    }

    async fn status(&self) -> Result<ExitCode> {
        let status = self.client()?.check_connection().await?;
        if self.json {
            print_json(&status)?;
        } else {
            println!(
                "Connected to Jupyter server at {}\nKernels: {}, connections: {}",
                self.config.server.url, status.kernels, status.connections
            );
        }
        Ok(ExitCode::SUCCESS)
    }

    async fn kernels(&self, start: Option<String>, shutdown: Option<String>) -> Result<ExitCode> {
        let client = self.client()?;
        if let Some(name) = start {
            let kernel = client
                .start_kernel(&name)
                .await
                .with_context(|| format!("starting kernel {name}"))?;
            info!("started kernel {} ({})", kernel.id, kernel.name);
            if self.json {
                print_json(&kernel)?;
            } else {
                println!("Started kernel: {} ({})", kernel.id, kernel.name);
            }
            return Ok(ExitCode::SUCCESS);
        }
        if let Some(id) = shutdown {
            client
                .shutdown_kernel(&id)
                .await
                .with_context(|| format!("shutting down kernel {id}"))?;
            info!("shut down kernel {id}");
            if self.json {
                print_json(&serde_json::json!({ "shutdown": id }))?;
            } else {
                println!("Shut down kernel: {id}");
            }
            return Ok(ExitCode::SUCCESS);
        }

        let kernels = client.list_kernels().await?;
        if self.json {
            print_json(&kernels)?;
        } else if kernels.is_empty() {
            println!("No running kernels.");
        } else {
            for kernel in &kernels {
                println!(
                    "{}  {}  {}",
                    kernel.id,
                    kernel.name,
                    kernel.execution_state.as_deref().unwrap_or("unknown")
                );
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    async fn list(&self, path: &str) -> Result<ExitCode> {
        let entries = self
            .client()?
            .list_contents(path)
            .await
            .with_context(|| format!("listing {}", if path.is_empty() { "/" } else { path }))?;
        if self.json {
            print_json(&entries)?;
        } else if entries.is_empty() {
            println!("(empty)");
        } else {
            for entry in &entries {
                let name = if entry.kind == "directory" {
                    format!("{}/", entry.name)
                } else {
                    entry.name.clone()
                };
                println!(
                    "{:<10} {:<25} {}",
                    entry.kind,
                    entry.last_modified.as_deref().unwrap_or("-"),
                    name
                );
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    fn report_execution(&self, execution: &jupyter_agent::CellExecution) -> Result<ExitCode> {
        if self.json {
            print_json(execution)?;
        } else {
            println!(
                "{}",
                format_execution_result(&execution.outcome, execution.cell_index)
            );
            if let Persistence::Failed(reason) = &execution.persistence {
                eprintln!("Warning: outputs were not saved to the notebook: {reason}");
            }
        }
        Ok(if execution.outcome.is_ok() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(2)
        })
    }

    async fn watch(&self, session: &mut Session, interval: Duration) -> Result<()> {
        session.snapshot().await?;
        if !self.json {
            println!(
                "Watching {} every {}s (Ctrl-C to stop)",
                session.path().unwrap_or_default(),
                interval.as_secs()
            );
        }

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some((result, notebook)) = session.poll_changes().await? else {
                        continue;
                    };
                    if self.json {
                        print_json(&result)?;
                    } else {
                        println!("{}\n", format_diff(&result, &notebook));
                    }
                }
                _ = &mut ctrl_c => break,
            }
        }
        session.close().await;
        Ok(())
    }
}

/// `-` reads the value from stdin.
fn read_arg(value: String) -> Result<String> {
    if value != "-" {
        return Ok(value);
    }
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("reading code from stdin")?;
    Ok(buffer)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
