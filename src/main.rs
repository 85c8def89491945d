use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use promo_video::voices::{self, VoiceCategory, DEFAULT_VOICE_ID};
use promo_video::{
    ArtifactWriter, CredentialGate, ExecutorConfig, GeminiVideoClient, GenerationWorkflow, HistoryStore,
    ImagePayload, KeySelector, Settings, StaticKeySelector, TerminalKeySelector, VideoGenerationApi,
    WorkflowEvent,
};

/// Shown one per status check while the video renders.
const LOADING_MESSAGES: [&str; 9] = [
    "Interpreting your creative prompt...",
    "Writing the advertising script...",
    "Animating your logo with AI magic...",
    "Picking the best shots and footage...",
    "Composing the perfect soundtrack...",
    "Synthesizing the professional narration...",
    "Adding text overlays and visual effects...",
    "Rendering your video in high quality...",
    "Almost there! Finishing the last details...",
];

#[derive(Parser)]
#[command(name = "promo-video")]
#[command(about = "Generate animated promotional videos from a prompt and a logo")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// History file (overrides HISTORY_PATH)
    #[arg(long, global = true)]
    history: Option<PathBuf>,

    /// Directory for downloaded videos (overrides OUTPUT_DIR)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a promotional video
    Generate {
        /// What the ad should be about
        #[arg(short, long)]
        prompt: String,

        /// Logo or mascot image (PNG, JPG or SVG, up to 10MB)
        #[arg(short, long)]
        image: PathBuf,

        /// Narration voice id (see `voices`)
        #[arg(long, default_value = DEFAULT_VOICE_ID)]
        voice: String,

        /// Ask for the API key on the terminal when none is configured or it turns out invalid
        #[arg(long)]
        interactive_key: bool,
    },

    /// List past generations, most recent first
    History {
        #[arg(long)]
        json: bool,
    },

    /// List available narration voices
    Voices {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let mut settings = Settings::from_env();
    if let Some(path) = cli.history {
        settings.history_path = path;
    }
    if let Some(dir) = cli.output_dir {
        settings.output_dir = dir;
    }

    let result = match cli.command {
        Commands::Generate {
            prompt,
            image,
            voice,
            interactive_key,
        } => generate(&settings, &prompt, &image, &voice, interactive_key).await,
        Commands::History { json } => print_history(&settings, json).await,
        Commands::Voices { json } => print_voices(json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("Error: {}", message);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Get log level from environment or pick a default for the build
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if verbose || cfg!(debug_assertions) {
            "debug,promo_video=trace,reqwest=info,hyper=info".to_string()
        } else {
            "warn,promo_video=info,reqwest=warn,hyper=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    // stdout carries command output; logs go to stderr
    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(verbose)
            .with_line_number(verbose)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init()?;

    tracing::debug!("🎬 promo-video {} starting", env!("CARGO_PKG_VERSION"));
    Ok(())
}

async fn generate(
    settings: &Settings,
    prompt: &str,
    image_path: &Path,
    voice: &str,
    interactive_key: bool,
) -> Result<(), String> {
    settings.log_summary();

    let image = ImagePayload::from_file(image_path).await.map_err(|e| e.user_message())?;

    let selector: Arc<dyn KeySelector> = if interactive_key {
        Arc::new(TerminalKeySelector::new(settings.api_key.clone()))
    } else {
        Arc::new(StaticKeySelector::new(settings.api_key.clone()))
    };
    let gate = Arc::new(CredentialGate::new(settings.api_key.clone(), Some(selector)));
    gate.probe().await;

    let api: Arc<dyn VideoGenerationApi> = Arc::new(GeminiVideoClient::from_settings(settings));
    let history = Arc::new(HistoryStore::open(&settings.history_path).await);

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(watch_ctrl_c(ctrl_c_token));

    // One retry after re-selecting the key, only when the user can type one.
    let attempts = if interactive_key { 2 } else { 1 };
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err("Video generation was cancelled".to_string());
        }
        if !gate.is_present() {
            if !interactive_key {
                return Err("No API key is selected. Set GEMINI_API_KEY or pass --interactive-key.".to_string());
            }
            gate.request_selection().await?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let progress = tokio::spawn(show_progress(rx));

        let workflow = GenerationWorkflow::new(
            api.clone(),
            gate.clone(),
            history.clone(),
            ArtifactWriter::new(&settings.output_dir),
            ExecutorConfig::from(settings),
        )
        .with_cancellation(cancel.clone())
        .with_events(tx);

        let result = workflow.submit_form(prompt, Some(image.clone()), voice).await;
        let _ = progress.await;

        match result {
            Ok(outcome) => {
                println!();
                println!("✅ Video saved to {}", outcome.video.path.display());
                println!("   {} bytes, sha256 {}", outcome.video.size_bytes, outcome.video.sha256);
                println!("   History entry {} ({} voice)", outcome.record.id, outcome.record.voice_name);
                return Ok(());
            }
            Err(failure) if failure.error.is_credential() && attempt < attempts => {
                eprintln!("{}", failure.user_message);
            }
            Err(failure) => {
                if failure.error.is_credential() {
                    return Err(format!(
                        "{} Run again with --interactive-key or update GEMINI_API_KEY.",
                        failure.user_message
                    ));
                }
                return Err(failure.user_message);
            }
        }
    }

    Err("Video generation did not complete.".to_string())
}

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    Cancel,
    Exit,
}

/// First Ctrl-C cancels the running generation; a second one exits at once,
/// which also breaks out of a blocking key prompt.
fn on_interrupt(token: &CancellationToken) -> Interrupt {
    if token.is_cancelled() {
        Interrupt::Exit
    } else {
        token.cancel();
        Interrupt::Cancel
    }
}

async fn watch_ctrl_c(token: CancellationToken) {
    while tokio::signal::ctrl_c().await.is_ok() {
        match on_interrupt(&token) {
            Interrupt::Cancel => eprintln!("\nCancelling... press Ctrl-C again to quit."),
            Interrupt::Exit => {
                eprintln!("\nAborted.");
                std::process::exit(130);
            }
        }
    }
}

async fn show_progress(mut rx: mpsc::UnboundedReceiver<WorkflowEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            WorkflowEvent::StateChanged { to, .. } => {
                tracing::debug!("Workflow state: {}", to.label());
            }
            WorkflowEvent::PollTick {
                attempt,
                elapsed_seconds,
                ..
            } => {
                let message = LOADING_MESSAGES[(attempt as usize - 1) % LOADING_MESSAGES.len()];
                println!("⏳ [{:>4.0}s] {}", elapsed_seconds, message);
            }
            WorkflowEvent::VideoReady { .. } => {}
        }
    }
}

async fn print_history(settings: &Settings, json: bool) -> Result<(), String> {
    let store = HistoryStore::open(&settings.history_path).await;
    let records = store.list_all().await;

    if json {
        let text = serde_json::to_string_pretty(&records).map_err(|e| e.to_string())?;
        println!("{}", text);
        return Ok(());
    }

    if records.is_empty() {
        println!("No videos generated yet.");
        return Ok(());
    }

    for record in records {
        println!(
            "{}  {:<8}  {}",
            record.created_at.format("%d %b %Y %H:%M"),
            record.voice_name,
            truncate(&record.prompt, 60)
        );
        println!("    video: {}", record.video_reference);
    }
    Ok(())
}

fn print_voices(json: bool) -> Result<(), String> {
    if json {
        let all: Vec<_> = voices::all_voices().collect();
        let text = serde_json::to_string_pretty(&all).map_err(|e| e.to_string())?;
        println!("{}", text);
        return Ok(());
    }

    for category in [VoiceCategory::Male, VoiceCategory::Female] {
        println!("{}:", category.label());
        for voice in voices::voices_in(category) {
            let marker = if voice.id == DEFAULT_VOICE_ID { " (default)" } else { "" };
            println!("  {:<10} {}{}", voice.id, voice.name, marker);
        }
    }
    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
