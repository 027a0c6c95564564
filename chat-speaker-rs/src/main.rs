//! chat-speaker-rs: speaks periodic summaries of live chat.

mod api;
mod buffer;
mod chat;
mod config;
mod error;
mod history;
mod overlay;
mod playback;
mod scheduler;
mod service;
mod summarizer;
mod voice;

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "chat-speaker-rs", about = "Summarize live chat and speak it")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broadcast summaries to the overlay only, without audio
    #[arg(long)]
    text_only: bool,

    /// Print the utterance report for a date ('today', 'list', or YYYY-MM-DD) and exit
    #[arg(long)]
    report: Option<String>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy HTTP/WebSocket internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info,tungstenite=info")
    } else {
        EnvFilter::new("info,hyper=warn,tungstenite=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = config::Config::load(args.config.as_deref());

    if let Some(date) = args.report.as_deref() {
        let history = history::HistoryLog::new(config.history.dir.clone());
        if date == "list" {
            for d in history.list_dates() {
                println!("{d}");
            }
        } else {
            println!("{}", history.report(date));
        }
        return Ok(());
    }

    info!("chat-speaker-rs starting");
    info!(
        "Summarizer: {}, artifact: {}",
        config.summarizer.host,
        config.playback.artifact_path.display()
    );

    service::SpeakerService::new(config, args.text_only)
        .run()
        .await
}
