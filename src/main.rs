mod api;
mod chat;
mod config;
mod logger;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::chat::{ChatSession, Output};
use crate::config::Settings;

/// Terminal chat client for a remote AI API
#[derive(Parser, Debug)]
#[command(name = "assistant-shell")]
#[command(about = "Chat with an externally hosted AI API configured through a .env file")]
struct Args {
    /// Path to the KEY=VALUE settings file
    #[arg(short = 'f', long = "env-file", default_value = ".env", env = "ASSISTANT_ENV_FILE")]
    env_file: PathBuf,

    /// Print the resolved settings (credentials masked) and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Console-only subscriber until the settings say where logs go
    let bootstrap = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .finish();
    let settings = tracing::subscriber::with_default(bootstrap, || {
        Settings::load(&args.env_file)
    })
    .with_context(|| {
        format!(
            "invalid configuration in {}; fix it and restart",
            args.env_file.display()
        )
    })?;
    let settings = Arc::new(settings);

    if args.show_config {
        print!("{}", settings.redacted().to_env_string());
        return Ok(());
    }

    let log_file = logger::init_tracing(&settings)?;

    info!("{} v{} - Starting", settings.app_name, settings.app_version);
    info!("Debug mode: {}", settings.debug_mode);
    info!("API Base URL: {}", settings.api_base_url);
    if let Some(path) = log_file {
        info!("Log file: {}", path.display());
    }
    if settings.api_key.is_none() {
        warn!("API_KEY is not set (may be required for authentication)");
    }

    let api = ApiClient::new(settings.clone())?;
    let mut session = ChatSession::new(api);

    println!("{}", session.welcome_message());
    print_output(session.check_health().await);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("[{}] > ", session.status());
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match session.process_input(&line).await {
            Output::Quit => break,
            output => print_output(output),
        }
    }

    info!("Shutting down");
    Ok(())
}

fn print_output(output: Output) {
    match output {
        Output::Reply(text) => println!("AI: {}", text),
        Output::Notice(text) => println!("{}", text),
        Output::Failure { message, status } => println!("[{}] {}", status, message),
        Output::Nothing | Output::Quit => {}
    }
}
