//! Send one prompt to the study API and stream the reply to stdout.
//!
//! Usage: `study-chat [--title <title>] <prompt...>`. Ctrl-C stops the stream
//! and keeps whatever text already arrived.

use std::io::Write;
use study_engine::chat::{ChatError, ConversationSession};
use study_engine::config::EngineConfig;
use study_engine::telemetry::{self, LogFormat};
use study_engine::transport::HttpTransport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = telemetry::init_tracing(LogFormat::from_env()) {
        eprintln!("logging disabled: {e}");
    }

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let title = match args.iter().position(|a| a == "--title") {
        Some(i) if i + 1 < args.len() => {
            let title = args.remove(i + 1);
            args.remove(i);
            Some(title)
        }
        _ => None,
    };
    let prompt = args.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("usage: study-chat [--title <title>] <prompt...>");
        std::process::exit(2);
    }

    let config = EngineConfig::from_env();
    tracing::info!(api_url = %config.api_url, "Starting study-chat");
    let session = ConversationSession::new(HttpTransport::from_config(&config)?);
    if let Some(title) = &title {
        session.start_with_title(title).await?;
    }

    let mut printed = 0;
    let send = session.send(&prompt, |message| {
        if let Some(delta) = message.content.get(printed..) {
            print!("{delta}");
            let _ = std::io::stdout().flush();
            printed = message.content.len();
        }
    });
    tokio::pin!(send);

    let result = loop {
        tokio::select! {
            result = &mut send => break result,
            _ = tokio::signal::ctrl_c() => session.cancel(),
        }
    };
    println!();

    match result {
        Ok(_) => Ok(()),
        Err(ChatError::Cancelled { .. }) => {
            eprintln!("[cancelled]");
            Ok(())
        }
        Err(e) => {
            if let Some(partial) = e.partial() {
                tracing::warn!(chars = partial.content.len(), "Reply incomplete");
            }
            Err(e.into())
        }
    }
}
