mod audio;
mod autosend;
mod config;
mod notice;
mod protocol;
mod recognition;
mod server;
mod socket;
mod speech;
mod transport;
mod webhook;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::server::{ServiceOptions, SocketServer};
use crate::socket::DEFAULT_SOCKET_PATH;
use crate::speech::{DEFAULT_LOCALE, EngineConfig};
use crate::transport::AsyncTransport;
use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "voicehook")]
#[command(about = "Voice-to-text capture with webhook forwarding")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the voicehook service
    Service {
        /// Unix socket path
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,

        /// Transcription model file
        #[arg(long)]
        model: Option<PathBuf>,

        /// Recognition locale
        #[arg(long, default_value = DEFAULT_LOCALE)]
        locale: String,

        /// Seconds without speech before a session auto-stops
        #[arg(long, default_value = "3")]
        silence_timeout: u64,

        /// Auto-send debounce in milliseconds
        #[arg(long, default_value = "500")]
        debounce_ms: u64,

        /// Webhook config file (defaults to the platform config directory)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Start listening for speech
    Start {
        /// Service socket path
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,
    },

    /// Stop the active session
    Stop {
        /// Service socket path
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,
    },

    /// Clear the accumulated text
    Clear {
        /// Service socket path
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,
    },

    /// Send the accumulated text to the webhook now
    Send {
        /// Service socket path
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,
    },

    /// Set the webhook destination URL
    Webhook {
        /// Destination URL (empty string unsets it)
        url: String,

        /// Service socket path
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,
    },

    /// Enable or disable automatic delivery
    Autosend {
        /// on or off
        #[arg(value_enum)]
        state: Switch,

        /// Service socket path
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,
    },

    /// Check service health and configuration
    Status {
        /// Service socket path
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,
    },

    /// Subscribe to the service and print events
    Listen {
        /// Service socket path
        #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
        socket_path: String,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Switch {
    On,
    Off,
}

fn get_uid() -> String {
    std::env::var("UID").unwrap_or_else(|_| {
        // Fallback: use nix to get actual UID
        nix::unistd::getuid().to_string()
    })
}

fn expand_socket_path(path: &str) -> String {
    let expanded = path.replace("$UID", &get_uid());

    // Support $RUNTIME_DIRECTORY for systemd RuntimeDirectory=
    if let Ok(runtime_dir) = std::env::var("RUNTIME_DIRECTORY") {
        expanded.replace("$RUNTIME_DIRECTORY", &runtime_dir)
    } else {
        expanded
    }
}

fn default_model_path() -> Result<PathBuf> {
    let data_dir = directories::BaseDirs::new()
        .ok_or_else(|| anyhow!("Could not find data directory"))?
        .data_local_dir()
        .join("voicehook")
        .join("models");
    Ok(data_dir.join("whisper-base.bin"))
}

async fn run_service(
    socket_path: String,
    model: Option<PathBuf>,
    locale: String,
    silence_timeout: u64,
    debounce_ms: u64,
    config: Option<PathBuf>,
) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let expanded_socket_path = expand_socket_path(&socket_path);
    let model_path = match model {
        Some(path) => path,
        None => default_model_path()?,
    };
    let config_path = match config {
        Some(path) => path,
        None => crate::config::default_config_path()?,
    };

    tracing::info!(socket = %expanded_socket_path, "Starting voicehook service");
    tracing::info!(model = %model_path.display(), %locale, "Engine configuration");

    let options = ServiceOptions {
        socket_path: expanded_socket_path,
        config_path,
        engine_config: EngineConfig {
            locale,
            model_path,
            ..EngineConfig::default()
        },
        silence_timeout: Duration::from_secs(silence_timeout),
        debounce: Duration::from_millis(debounce_ms),
    };

    let mut server = SocketServer::new(options)
        .map_err(|e| anyhow!("Failed to create socket server: {}", e))?;
    server
        .run()
        .await
        .map_err(|e| anyhow!("Socket server error: {}", e))?;
    Ok(())
}

/// Send one request and print the outcome
async fn run_request(socket_path: &str, message: ClientMessage, ok_text: &str) {
    let transport = AsyncTransport::new(expand_socket_path(socket_path));

    match transport.send_request(&message).await {
        Ok(ServerMessage::Ack { .. }) => println!("{}", ok_text),
        Ok(ServerMessage::Error { error, .. }) => eprintln!("Error from service: {}", error),
        Ok(other) => eprintln!("Unexpected response: {:?}", other),
        Err(e) => eprintln!("Request failed: {}", e),
    }
}

async fn run_status(socket_path: &str) {
    let transport = AsyncTransport::new(expand_socket_path(socket_path));

    match transport.send_request(&ClientMessage::new_status()).await {
        Ok(ServerMessage::Status {
            service_running,
            listening,
            auto_send_enabled,
            webhook_configured,
            uptime_seconds,
            text_chars,
            ..
        }) => {
            let status_json = serde_json::json!({
                "service_running": service_running,
                "listening": listening,
                "auto_send_enabled": auto_send_enabled,
                "webhook_configured": webhook_configured,
                "uptime_seconds": uptime_seconds,
                "text_chars": text_chars,
            });
            match serde_json::to_string_pretty(&status_json) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Failed to serialize status to JSON: {}", e),
            }
        }
        Ok(ServerMessage::Error { error, .. }) => eprintln!("Error from service: {}", error),
        Ok(_) => eprintln!("Unexpected response type"),
        Err(e) => eprintln!("Failed to get status: {}", e),
    }
}

async fn run_listen(socket_path: &str) {
    let transport = AsyncTransport::new(expand_socket_path(socket_path));

    let mut conn = match transport.connect().await {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("Failed to connect: {}", e);
            eprintln!();
            eprintln!("Make sure the service is running:");
            eprintln!("  voicehook service");
            return;
        }
    };

    if let Err(e) = conn.write_message(&ClientMessage::new_subscribe()).await {
        eprintln!("Failed to subscribe: {}", e);
        return;
    }

    loop {
        match conn.read_server_message().await {
            Ok(Some(ServerMessage::Subscribed { .. })) => {
                println!("Subscribed; waiting for events...");
            }
            Ok(Some(ServerMessage::StatusEvent {
                state, level, text, ..
            })) => {
                println!("[{}] level={:.2} text={:?}", state.as_str(), level, text);
            }
            Ok(Some(ServerMessage::Notice { severity, message })) => {
                println!("{:?}: {}", severity, message);
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                println!("Service closed the connection");
                break;
            }
            Err(e) => {
                eprintln!("Connection error: {}", e);
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Service {
            socket_path,
            model,
            locale,
            silence_timeout,
            debounce_ms,
            config,
        } => {
            if let Err(e) = run_service(
                socket_path,
                model,
                locale,
                silence_timeout,
                debounce_ms,
                config,
            )
            .await
            {
                eprintln!("{}", e);
            }
        }

        Commands::Start { socket_path } => {
            run_request(&socket_path, ClientMessage::new_start(), "Listening").await;
        }

        Commands::Stop { socket_path } => {
            run_request(&socket_path, ClientMessage::new_stop(), "Stopped").await;
        }

        Commands::Clear { socket_path } => {
            run_request(&socket_path, ClientMessage::new_clear(), "Text cleared").await;
        }

        Commands::Send { socket_path } => {
            run_request(&socket_path, ClientMessage::new_send(), "Text sent to webhook").await;
        }

        Commands::Webhook { url, socket_path } => {
            run_request(
                &socket_path,
                ClientMessage::new_set_webhook(url),
                "Webhook URL updated",
            )
            .await;
        }

        Commands::Autosend { state, socket_path } => {
            let enabled = matches!(state, Switch::On);
            let ok_text = if enabled {
                "Auto-send enabled"
            } else {
                "Auto-send disabled"
            };
            run_request(
                &socket_path,
                ClientMessage::new_set_auto_send(enabled),
                ok_text,
            )
            .await;
        }

        Commands::Status { socket_path } => {
            run_status(&socket_path).await;
        }

        Commands::Listen { socket_path } => {
            run_listen(&socket_path).await;
        }
    }
}
