use clap::Parser;
use log::{error, info};
use server::{Server, ServerConfig, SimulationConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Simulation ticks per second (at most 1000)
    #[arg(short, long, default_value = "30")]
    tick_rate: u32,

    /// Maximum number of joined players
    #[arg(short = 'm', long, default_value = "100")]
    max_players: usize,

    /// Maximum number of live dummies
    #[arg(long, default_value = "500")]
    max_dummies: usize,

    /// Horizontal speed in units per second
    #[arg(long, default_value_t = shared::MOVE_SPEED)]
    move_speed: f32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        max_players: args.max_players,
        simulation: SimulationConfig {
            tick_rate: args.tick_rate,
            max_dummies: args.max_dummies,
            move_speed: args.move_speed,
            ..SimulationConfig::default()
        },
        ..ServerConfig::default()
    };

    info!("Starting server...");
    info!(
        "Tick rate: {} Hz, capacity: {} players, {} dummies",
        config.simulation.effective_tick_rate(),
        args.max_players,
        args.max_dummies
    );

    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to bind {}:{}: {}", args.host, args.port, e);
            return Err(e.into());
        }
    };

    server
        .run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C"),
                Err(e) => {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;

    Ok(())
}
