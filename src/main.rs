//! API key limiter proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────────┐
//!                     │                   API KEY LIMITER                         │
//!                     │                                                          │
//!  CONNECT host:443   │  ┌──────────┐   ┌──────────────┐   ┌───────────────┐     │
//!  ───────────────────┼─▶│   net    │──▶│ http server  │──▶│     auth      │     │
//!  Proxy-Authorization│  │ listener │   │ (CONNECT)    │   │ tenant+config │     │
//!                     │  └──────────┘   └──────┬───────┘   └───────────────┘     │
//!                     │                        │ 200, leaf from authority         │
//!                     │                        ▼                                  │
//!  TLS to "host"      │                 ┌──────────────┐   ┌───────────────┐     │
//!  ───────────────────┼────────────────▶│    tunnel    │──▶│   pipeline    │     │
//!                     │                 │ (TLS accept) │   │ limit, rewrite│     │
//!                     │                 └──────────────┘   └──────┬────────┘     │
//!                     │                                           ▼              │
//!                     │                                    ┌───────────────┐     │      Origin
//!                     │                                    │   forwarder   │─────┼────▶ host:443
//!                     │                                    └───────────────┘     │
//!                     └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use api_key_limiter::authority::RootAuthority;
use api_key_limiter::config::loader;
use api_key_limiter::lifecycle::{signals, startup, Shutdown};
use api_key_limiter::net::listener::Listener;
use api_key_limiter::observability::{logging, metrics};
use api_key_limiter::security::secrets::SecretCipher;

#[derive(Parser)]
#[command(name = "api-key-limiter")]
#[command(about = "Intercepting proxy that injects API keys and enforces rate limits", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy
    Serve {
        #[arg(short, long, default_value = "proxy.toml")]
        config: PathBuf,
    },
    /// Write a fresh self-signed root CA for clients to trust
    GenerateCa {
        #[arg(long)]
        cert: PathBuf,

        #[arg(long)]
        key: PathBuf,

        #[arg(long, default_value = "API Key Limiter Root CA")]
        common_name: String,
    },
    /// Encrypt a header value for storage in a header replacement
    EncryptHeader {
        value: String,

        #[arg(long, default_value = "SECRET_KEY")]
        key_env: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve {
        config: PathBuf::from("proxy.toml"),
    }) {
        Commands::Serve { config } => serve(config).await,
        Commands::GenerateCa {
            cert,
            key,
            common_name,
        } => {
            let authority = RootAuthority::generate(&common_name)?;
            authority.persist(&cert, &key)?;
            println!("Wrote root certificate to {}", cert.display());
            println!("Wrote root private key to {}", key.display());
            Ok(())
        }
        Commands::EncryptHeader { value, key_env } => {
            let cipher = SecretCipher::from_env(&key_env)?;
            println!("{}", cipher.encrypt(&value)?);
            Ok(())
        }
    }
}

async fn serve(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = loader::load_or_default(&config_path)?;

    logging::init(
        &config.observability.log_level,
        logging::LogFormat::from_name(&config.observability.log_format),
    );

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = %config_path.display(),
        "api-key-limiter starting"
    );
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        rate_limit_backend = ?config.rate_limit.backend,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = startup::build(&config).await?;
    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        signals::wait_for_signal().await;
        shutdown.trigger();
    });

    server.run(listener, receiver).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
