use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use colloquy::clients::Provider;
use colloquy::config::{ExperimentConfig, RelayConfig};
use colloquy::event::{EventHandler, ExperimentEvent};
use colloquy::orchestrator::Orchestrator;
use colloquy::relay::Relay;
use colloquy::session::{ConversationMessage, RunStatus};
use colloquy::transport::{HttpTransport, InProcessTransport, TurnTransport};
use serde::Serialize;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "colloquy", version)]
#[command(about = "Turn-based multi-agent conversations over a streaming LLM relay")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the streaming relay server.
    Serve(ServeArgs),
    /// Run an experiment headlessly and print every transcript as JSON on stdout.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Listen address [env: COLLOQUY_ADDR, default 127.0.0.1:3000]
    #[arg(long)]
    addr: Option<SocketAddr>,
    /// anthropic | openai [env: COLLOQUY_PROVIDER]
    #[arg(long)]
    provider: Option<Provider>,
    /// Custom upstream endpoint [env: COLLOQUY_BASE_URL]
    #[arg(long)]
    base_url: Option<String>,
    /// Token cap per completion [env: COLLOQUY_MAX_TOKENS, default 1024]
    #[arg(long)]
    max_tokens: Option<u32>,
    /// Forward only the latest N user/assistant pairs upstream [env: COLLOQUY_MAX_HISTORY_PAIRS]
    #[arg(long)]
    max_history_pairs: Option<usize>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Experiment YAML file.
    #[arg(long, short)]
    config: PathBuf,
    /// Relay endpoint to talk to.
    #[arg(
        long,
        default_value = "http://127.0.0.1:3000/api/experiment/stream",
        conflicts_with = "direct"
    )]
    relay_url: String,
    /// Call the upstream provider from this process instead of going through a relay server.
    #[arg(long)]
    direct: bool,
    /// Override `num_samples` from the file.
    #[arg(long)]
    samples: Option<usize>,
    /// Pause between turns in milliseconds.
    #[arg(long, default_value = "1000")]
    turn_delay_ms: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SampleTranscript {
    sample: usize,
    session_id: Uuid,
    status: RunStatus,
    messages: Vec<ConversationMessage>,
}

/// Streams the conversation to stderr while it runs.
struct ConsolePrinter;

#[async_trait]
impl EventHandler for ConsolePrinter {
    async fn on_experiment_event(&self, event: &ExperimentEvent) {
        let mut err = std::io::stderr().lock();
        let _ = match event {
            ExperimentEvent::TurnStarted {
                turn,
                agent,
                speaker,
                ..
            } => write!(err, "\n[turn {} | agent {} | {}] ", turn, agent, speaker),
            ExperimentEvent::TextDelta { content, .. } => write!(err, "{}", content),
            ExperimentEvent::TurnCompleted { .. } => writeln!(err),
            ExperimentEvent::RunFailed { error, .. } => writeln!(err, "\nrun failed: {}", error),
            ExperimentEvent::RunStopped { message_count, .. } => {
                writeln!(err, "\nstopped after {} messages", message_count)
            }
            _ => Ok(()),
        };
        let _ = err.flush();
    }
}

fn relay_config(args: &ServeArgs) -> Result<RelayConfig, Box<dyn std::error::Error>> {
    let mut config = RelayConfig::from_env()?;
    if let Some(addr) = args.addr {
        config.addr = addr;
    }
    if let Some(provider) = args.provider {
        config.provider = provider;
        config.api_key = std::env::var(provider.api_key_var()).unwrap_or_default();
    }
    if let Some(base_url) = &args.base_url {
        config.base_url = Some(base_url.clone());
    }
    if let Some(max_tokens) = args.max_tokens {
        config.max_tokens = max_tokens;
    }
    if args.max_history_pairs.is_some() {
        config.max_history_pairs = args.max_history_pairs;
    }
    Ok(config)
}

async fn serve(args: ServeArgs, shutdown: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
    let config = relay_config(&args)?;
    if config.api_key.is_empty() {
        log::warn!(
            "{} is not set; upstream calls will fail",
            config.provider.api_key_var()
        );
    }
    log::info!(
        "serving {} relay on {} (max_tokens {}, history window {:?})",
        config.provider,
        config.addr,
        config.max_tokens,
        config.max_history_pairs
    );
    let relay = Arc::new(Relay::from_config(&config));
    colloquy::server::serve(config.addr, relay, shutdown).await?;
    Ok(())
}

async fn run(args: RunArgs, shutdown: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
    let mut experiment = ExperimentConfig::from_yaml_file(&args.config)?;
    if let Some(samples) = args.samples {
        experiment = experiment.with_samples(samples);
        experiment.validate()?;
    }
    let samples = experiment.num_samples;

    let transport: Arc<dyn TurnTransport> = if args.direct {
        let relay = Relay::from_config(&RelayConfig::from_env()?);
        Arc::new(InProcessTransport::new(Arc::new(relay)))
    } else {
        Arc::new(HttpTransport::new(args.relay_url.clone()))
    };

    let mut orchestrator = Orchestrator::new(experiment, transport)?
        .with_turn_delay(Duration::from_millis(args.turn_delay_ms))
        .with_event_handler(Arc::new(ConsolePrinter));

    let stop = orchestrator.stop_handle();
    let shutdown_requested = shutdown.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        stop.stop();
    });

    let mut transcripts = Vec::with_capacity(samples);
    let mut failure = None;
    for sample in 0..samples {
        if shutdown_requested.is_cancelled() {
            log::info!("interrupted before sample {}/{}", sample + 1, samples);
            break;
        }
        log::info!("sample {}/{}", sample + 1, samples);
        let result = orchestrator.start().await;
        let session = orchestrator.session();
        transcripts.push(SampleTranscript {
            sample,
            session_id: session.id(),
            status: session.status().clone(),
            messages: session.messages().to_vec(),
        });
        match result {
            Err(err) => {
                failure = Some(err);
                break;
            }
            Ok(()) if session.status() == &RunStatus::Stopped => break,
            Ok(()) => {}
        }
    }

    println!("{}", serde_json::to_string_pretty(&transcripts)?);
    match failure {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    colloquy::init_logger();

    let cli = Cli::parse();

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received, shutting down");
            on_signal.cancel();
        }
        // tokio keeps the SIGINT handler installed; a second interrupt forces the exit.
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("second interrupt received, exiting");
            std::process::exit(130);
        }
    });

    match cli.command {
        Command::Serve(args) => serve(args, shutdown).await,
        Command::Run(args) => run(args, shutdown).await,
    }
}
