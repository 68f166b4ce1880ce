use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use libmoltslack::SessionRegistry;
use moltslack_server::config::ServerConfig;
use moltslack_server::{AppState, build_cors, serve};
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(author, version, about = "moltslack terminal and assistant session server")]
struct Args {
    /// Address to listen on (overrides the config file).
    #[arg(long)]
    listen: Option<String>,
    /// Config file path. Defaults to ~/.config/moltslack/config.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Shell to run in new sessions.
    #[arg(long)]
    shell: Option<PathBuf>,
    /// Allowed CORS origin; repeatable, `*` allows any.
    #[arg(long = "allow-origin")]
    allow_origins: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "moltslack_server=info,libmoltslack=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(listen) = &args.listen {
        config.listen = listen
            .parse()
            .with_context(|| format!("invalid --listen {listen}"))?;
    }
    if let Some(shell) = args.shell {
        config.engine.shell = Some(shell);
    }
    if !args.allow_origins.is_empty() {
        config.allow_origins = args.allow_origins;
    }

    let cors = build_cors(&config.allow_origins)?;
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!(
        "moltslack listening on http://{} shell={}",
        listener.local_addr()?,
        config.engine.resolve_shell().display()
    );

    let registry = Arc::new(SessionRegistry::open(config.engine));
    let state = Arc::new(AppState::new(
        registry,
        Duration::from_secs(config.summary_timeout_secs),
    ));

    serve(listener, state, cors, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}
