use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{info, warn};
use switchboard_core::engines::EngineLocator;
use switchboard_core::persistence::{save_checkpoint_record, save_session_summary};
use switchboard_core::{paths, CoreConfig, CoreContext, EngineKind, SessionEventKind, SessionStatus};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "switchboard-daemon")]
#[command(about = "Drive command-line AI engines and stream session events as JSON", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.config/switchboard/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a session and print its events, one JSON object per line
    Run {
        #[arg(long, default_value = "claude")]
        engine: EngineKind,

        #[arg(long, default_value = ".")]
        project: PathBuf,

        #[arg(long)]
        prompt: String,

        /// Save the session summary and a final checkpoint here when the run ends
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Show where each engine binary resolves
    Engines,
    /// List the tools available on an engine
    Tools {
        #[arg(long, default_value = "claude")]
        engine: EngineKind,

        /// Also discover `.claude/commands` in this project
        #[arg(long)]
        project: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn Error>> {
    let config_path = cli
        .config
        .or_else(|| paths::default_config_dir().map(|dir| dir.join("config.json")));
    let config = match config_path {
        Some(path) => CoreConfig::load(&path)?,
        None => CoreConfig::default(),
    };

    match cli.command {
        Command::Run {
            engine,
            project,
            prompt,
            data_dir,
        } => run_session(config, engine, project, &prompt, data_dir).await,
        Command::Engines => {
            let locator = EngineLocator::from_config(&config);
            for kind in EngineKind::ALL {
                match locator.locate(kind) {
                    Ok(path) => println!("{kind}\t{}", path.display()),
                    Err(e) => println!("{kind}\tunavailable ({e})"),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Tools { engine, project } => {
            let mut builder = CoreContext::builder().config(config);
            if let Some(project) = project {
                builder = builder.command_root(project);
            }
            let ctx = builder.build();
            let tools = ctx.list_tools(engine);
            println!("{}", serde_json::to_string_pretty(&tools)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_session(
    config: CoreConfig,
    engine: EngineKind,
    project: PathBuf,
    prompt: &str,
    data_dir: Option<PathBuf>,
) -> Result<ExitCode, Box<dyn Error>> {
    let project = std::fs::canonicalize(&project)?;
    let ctx = CoreContext::builder()
        .config(config)
        .command_root(project.clone())
        .build();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let (session_id, _) = ctx.start_session_with_listener(engine, project, prompt, tx)?;
    info!("Session {} started on {}", session_id, engine);

    let mut stdout = tokio::io::stdout();
    let mut final_status = SessionStatus::Failed;
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let mut line = serde_json::to_string(&event)?;
                line.push('\n');
                stdout.write_all(line.as_bytes()).await?;
                stdout.flush().await?;
                if let SessionEventKind::Terminated { status, .. } = event.kind {
                    final_status = status;
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling session {}", session_id);
                if let Err(e) = ctx.cancel(&session_id) {
                    warn!("Cancel failed: {}", e);
                }
            }
        }
    }

    if let Some(dir) = data_dir {
        let checkpoint = ctx.create_checkpoint(&session_id, "final")?;
        save_checkpoint_record(&dir, &ctx.checkpoint_record(&checkpoint)?)?;
        let summary = ctx.archive_session(&session_id)?;
        save_session_summary(&dir, &summary)?;
        info!("Saved session {} to {}", session_id, dir.display());
    }

    Ok(match final_status {
        SessionStatus::Completed | SessionStatus::AwaitingInput => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}
