//! Binary entrypoint for the Meshgate CLI.
//!
//! Commands:
//! - `start [--port <path>] [--role gateway|endpoint]` - run a node
//! - `init` - create a starter `config.toml`
//! - `status` - print the resolved configuration and counters
//!
//! See the library crate docs for module-level details: `meshgate::`.
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};

use meshgate::config::Config;
use meshgate::endpoint::EndpointNode;
use meshgate::gateway::GatewayServer;

#[derive(Parser)]
#[command(name = "meshgate")]
#[command(about = "A polling telemetry gateway for broadcast-radio sensor networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Role {
    Gateway,
    Endpoint,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node
    Start {
        /// Radio modem serial port (e.g., /dev/ttyUSB0); overrides config
        #[arg(short, long)]
        port: Option<String>,

        /// Which role this node plays
        #[arg(short, long, value_enum, default_value_t = Role::Gateway)]
        role: Role,
    },
    /// Initialize a new configuration file
    Init,
    /// Show the resolved configuration and counters
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config early to configure logging (except for Init which writes it)
    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { port, role } => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            info!("Starting Meshgate v{}", env!("CARGO_PKG_VERSION"));

            // CLI port overrides config; fall back to config when absent
            let configured_port = config.radio.port.clone();
            let chosen_port = match port {
                Some(cli_port) => Some(cli_port),
                None => {
                    if !configured_port.is_empty() {
                        Some(configured_port)
                    } else {
                        None
                    }
                }
            };

            match role {
                Role::Gateway => {
                    let mut server = GatewayServer::new(config)?;
                    connect_radio_if_possible(&mut server, chosen_port).await;
                    server.connect_uplink().await?;
                    info!("Gateway starting...");
                    server.run().await?;
                }
                Role::Endpoint => {
                    let mut node = EndpointNode::new(config)?;
                    #[cfg(feature = "serial")]
                    if let Some(port_path) = chosen_port {
                        match node.connect_radio(&port_path).await {
                            Ok(_) => info!("Connected to radio modem on {}", port_path),
                            Err(e) => {
                                warn!(
                                    "Failed to connect to radio on {}: {} (endpoint continuing without radio)",
                                    port_path, e
                                );
                            }
                        }
                    }
                    #[cfg(not(feature = "serial"))]
                    let _ = chosen_port;
                    info!("Endpoint starting...");
                    node.run().await?;
                }
            }
        }
        Commands::Init => {
            info!("Initializing new configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Status => {
            let config = match pre_config {
                Some(config) => config,
                None => Config::load(&cli.config).await?,
            };
            let server = GatewayServer::new(config)?;
            server.show_status();
        }
    }

    Ok(())
}

async fn connect_radio_if_possible(server: &mut GatewayServer, chosen_port: Option<String>) {
    #[cfg(feature = "serial")]
    match chosen_port {
        Some(port_path) => match server.connect_radio(&port_path).await {
            Ok(_) => info!("Connected to radio modem on {}", port_path),
            Err(e) => {
                // Warn and continue so the gateway can still serve its own
                // telemetry and the uplink.
                warn!(
                    "Failed to connect to radio on {}: {} (gateway continuing without radio)",
                    port_path, e
                );
            }
        },
        None => info!("No radio port specified; starting without a radio."),
    }
    #[cfg(not(feature = "serial"))]
    {
        let _ = (server, chosen_port);
        info!("Radio support not compiled in; starting without a radio.");
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // Base level from config, CLI verbosity overrides upward
    let config_level = config
        .as_ref()
        .map(|c| c.logging.level.as_str())
        .unwrap_or("info");
    let base_level = match (verbosity, config_level) {
        (0, "error") => log::LevelFilter::Error,
        (0, "warn") => log::LevelFilter::Warn,
        (0, "debug") => log::LevelFilter::Debug,
        (0, "trace") => log::LevelFilter::Trace,
        (0, _) => log::LevelFilter::Info,
        (1, _) => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    if let Some(file) = config.as_ref().and_then(|c| c.logging.file.clone()) {
        if let Ok(f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file)
        {
            let mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            let write_mutex = mutex.clone();

            // When stdout is piped the process is supervised by a host
            // agent; keep records in the file only.
            let is_tty = atty::is(atty::Stream::Stdout);

            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        } else {
            builder.format(|fmt, record| {
                writeln!(
                    fmt,
                    "{} [{}] {}",
                    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                    record.level(),
                    record.args()
                )
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
