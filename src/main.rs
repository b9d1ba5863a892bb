//! CLI for TideMQ
//!
//! Subcommands:
//! - `server`: run the broker until Ctrl-C
//! - `client`: subscribe to a topic, optionally publish to it, and print
//!   deliveries (useful for smoke tests)

use clap::Parser;
use tidemq::config::{Settings, load_config};
use tidemq::utils::logging;
use tidemq::{AuthPayload, Broker, ClientSession};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "tidemq")]
enum Command {
    /// Start the broker
    Server,
    /// Subscribe to a topic and print what arrives
    Client {
        /// Broker address (default: server.host:server.port from configuration)
        #[arg(long)]
        addr: Option<String>,
        #[arg(long, default_value = "cli")]
        client_id: String,
        /// Token to authenticate with (default: auth.token from configuration)
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        topic: String,
        /// Publish this message once subscribed
        #[arg(long)]
        message: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&settings.logging.level);

    let result = match cmd {
        Command::Server => run_server(&settings).await,
        Command::Client {
            addr,
            client_id,
            token,
            topic,
            message,
        } => {
            let addr = addr.unwrap_or_else(|| settings.server.addr());
            let token = token.unwrap_or_else(|| settings.auth.token.clone());
            run_client(&settings, &addr, AuthPayload::new(client_id, token), &topic, message).await
        }
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run_server(settings: &Settings) -> tidemq::Result<()> {
    let authenticator = tidemq::auth::from_settings(&settings.auth);
    let broker = Broker::new(settings.broker.clone(), authenticator);
    broker.serve(settings.server.addr()).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            broker.close();
        }
        _ = broker.closed() => {}
    }
    Ok(())
}

async fn run_client(
    settings: &Settings,
    addr: &str,
    credentials: AuthPayload,
    topic: &str,
    message: Option<String>,
) -> tidemq::Result<()> {
    let session = ClientSession::connect_with(addr, credentials, &settings.client).await?;

    let subscribed = topic.to_string();
    session
        .subscribe(topic, move |data| {
            println!("[{subscribed}] {}", String::from_utf8_lossy(&data));
        })
        .await?;
    info!("Subscribed to {topic}");

    if let Some(message) = message {
        session.publish(topic, message).await?;
        info!("Published to {topic}");
    }

    if tokio::signal::ctrl_c().await.is_err() {
        error!("Unable to listen for Ctrl-C");
    }
    session.close().await;
    Ok(())
}
