use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mail_relay::config::PipelineConfig;
use mail_relay::generator::{AssistantConfig, AssistantGenerator, TokioSleeper};
use mail_relay::mailbox::{GmailConfig, GmailGateway, GoogleAuth, GoogleAuthConfig};
use mail_relay::pipeline::{Pipeline, PipelineDeps};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real environment variables still apply.
    dotenvy::dotenv().ok();

    // Keep the appender guard alive until exit so buffered lines are flushed.
    let _log_guard = init_tracing();

    let (config, auth_config, assistant_config) =
        load_config().context("failed to load configuration")?;

    eprintln!("📬 mail-relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Store: {}", config.root_dir.display());
    eprintln!("   Labels: {}", config.labels.join(", "));
    eprintln!("   Assistant: {}", assistant_config.assistant_id);

    let http = reqwest::Client::builder()
        .user_agent(concat!("mail-relay/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let auth = Arc::new(GoogleAuth::new(auth_config, http.clone()));
    let mailbox = Arc::new(GmailGateway::new(GmailConfig::from_env(), http.clone(), auth));
    let generator = Arc::new(AssistantGenerator::new(assistant_config, http));

    let pipeline = Pipeline::new(
        &config,
        PipelineDeps {
            mailbox,
            generator,
            sleeper: Arc::new(TokioSleeper),
        },
    );

    let summary = pipeline.run_once().await;
    eprintln!("   Done: {summary}");
    Ok(())
}

fn load_config() -> mail_relay::error::Result<(PipelineConfig, GoogleAuthConfig, AssistantConfig)> {
    Ok((
        PipelineConfig::from_env()?,
        GoogleAuthConfig::from_env()?,
        AssistantConfig::from_env()?,
    ))
}

/// Console logging filtered by `RUST_LOG` (default `info`), plus daily log
/// files when `MAIL_RELAY_LOG_DIR` is set.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    match std::env::var("MAIL_RELAY_LOG_DIR").ok().filter(|d| !d.trim().is_empty()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(file)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .init();
            None
        }
    }
}
