#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::assigning_clones,
    clippy::bool_to_int_with_if,
    clippy::case_sensitive_file_extension_comparisons,
    clippy::cast_possible_wrap,
    clippy::doc_markdown,
    clippy::field_reassign_with_default,
    clippy::float_cmp,
    clippy::implicit_clone,
    clippy::items_after_statements,
    clippy::map_unwrap_or,
    clippy::manual_let_else,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::needless_raw_string_hashes,
    clippy::redundant_closure_for_method_calls,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args,
    clippy::unused_self,
    clippy::cast_precision_loss,
    clippy::unnecessary_cast,
    clippy::unnecessary_lazy_evaluations,
    clippy::unnecessary_literal_bound,
    clippy::unnecessary_map_or,
    clippy::unnecessary_wraps,
    dead_code
)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use larkgpt::channels::LarkClient;
use larkgpt::config::Config;
use larkgpt::dedup::MessageDedup;
use larkgpt::handlers::MessageHandler;
use larkgpt::providers::OpenAiBackend;
use larkgpt::session::SessionStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Lark/Feishu chat bot backed by OpenAI-compatible models.
#[derive(Parser, Debug)]
#[command(name = "larkgpt")]
#[command(version)]
#[command(about = "Lark/Feishu chat bot backed by OpenAI-compatible models.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the webhook gateway
    Serve {
        /// Path to config.toml (defaults to the platform config directory)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on; overrides config and environment
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the JSON schema of the configuration file
    ConfigSchema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Schema output must stay stdout-only, so it runs before logging is set up.
    if let Commands::ConfigSchema = cli.command {
        let schema = schemars::schema_for!(Config);
        println!(
            "{}",
            serde_json::to_string_pretty(&schema).context("Failed to serialize JSON schema")?
        );
        return Ok(());
    }

    // Respects RUST_LOG, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;

    match cli.command {
        Commands::ConfigSchema => Ok(()),
        Commands::Serve { config, port } => serve(config, port).await,
    }
}

async fn serve(config_path: Option<PathBuf>, port: Option<u16>) -> Result<()> {
    let mut config = Config::load(config_path.as_deref()).await?;
    if let Some(port) = port {
        config.gateway.port = port;
    }
    config.validate()?;

    let platform = Arc::new(LarkClient::new(&config.lark)?);
    let backend = Arc::new(OpenAiBackend::new(&config.openai)?);
    info!(
        "Starting larkgpt: platform={}, model={}, streaming={}",
        platform.base_url(),
        config.openai.model,
        config.stream.enabled
    );

    let sessions = Arc::new(SessionStore::default());
    let dedup = Arc::new(MessageDedup::from_config(&config.dedup));
    let gateway = config.gateway.clone();
    let handler = Arc::new(MessageHandler::new(
        platform,
        backend,
        sessions,
        dedup,
        Arc::new(config),
    ));

    larkgpt::gateway::run_gateway(&gateway, handler, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
    })
    .await
}
