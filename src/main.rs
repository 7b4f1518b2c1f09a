//! `slack-dispatch` binary: run a demo app over HTTP or Socket Mode.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use slack_dispatch::config::schema_json;
use slack_dispatch::response::MessageResponse;
use slack_dispatch::socket_mode::SocketModeClient;
use slack_dispatch::{server, AppConfig, Assistant, Listener, SlackApp, SlackRequest};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slack-dispatch")]
#[command(about = "Dispatch Slack requests to listeners over HTTP or Socket Mode")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Config file (default: the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Tracing filter; overrides RUST_LOG and the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP events endpoint
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Connect over Socket Mode
    Socket,
    /// Print the JSON schema of the config file
    ConfigSchema,
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Listeners for the demo app.
fn register_demo(app: &mut SlackApp) {
    app.command(
        "/echo",
        Listener::ack(|req: SlackRequest| async move {
            let text = req.body.get("text").and_then(|t| t.as_str()).unwrap_or_default();
            Ok(MessageResponse::new(format!("echo: {text}")).ephemeral())
        })
        .with_lazy(|req: SlackRequest| async move {
            if let Some(respond) = req.context.respond() {
                respond
                    .send(json!({"text": "echo finished", "response_type": "ephemeral"}))
                    .await?;
            }
            Ok(())
        }),
    );
    app.event("app_mention", |req: SlackRequest| async move {
        if let Some(say) = req.context.say() {
            let user = req.context.user_id.clone().unwrap_or_default();
            say.send(format!("<@{user}> hi there")).await?;
        }
        Ok(())
    });
    app.assistant(Assistant::new().user_message(|req: SlackRequest| async move {
        if let Some(assistant) = req.context.assistant() {
            assistant.set_status("is typing...").await?;
        }
        if let Some(say) = req.context.say() {
            let text = req.payload().get("text").and_then(|t| t.as_str()).unwrap_or_default();
            say.send(format!("You said: {text}")).await?;
        }
        Ok(())
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::ConfigSchema = cli.command {
        println!("{}", schema_json()?);
        return Ok(());
    }

    let mut config = AppConfig::load(cli.config.as_deref()).context("failed to load config")?;
    init_tracing(cli.log_level.as_deref().or(config.log_level.as_deref()));

    match cli.command {
        Commands::Serve { host, port } => {
            config.socket_mode = false;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let mut app = SlackApp::new(config)?;
            register_demo(&mut app);
            server::serve(Arc::new(app)).await
        }
        Commands::Socket => {
            config.socket_mode = true;
            let mut app = SlackApp::new(config)?;
            register_demo(&mut app);
            let client = SocketModeClient::new(Arc::new(app))?;
            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Slack: shutdown requested");
                }
                trigger.cancel();
            });
            client.run(shutdown).await;
            Ok(())
        }
        Commands::ConfigSchema => Ok(()),
    }
}
