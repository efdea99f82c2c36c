use clap::Parser;
use client::harness::{HarnessConfig, LoadHarness};
use log::info;
use std::time::Duration;
use tokio::time::{interval, sleep_until, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about = "Connects many simulated clients to a world server", long_about = None)]
struct Args {
    /// Server URL to connect to
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:9002")]
    server: String,

    /// Number of simulated sessions
    #[arg(short = 'n', long, default_value = "10")]
    count: usize,

    /// Delay between connection attempts in milliseconds
    #[arg(long, default_value = "200")]
    stagger_ms: u64,

    /// Interval between inputs of one session in milliseconds
    #[arg(long, default_value = "100")]
    input_interval_ms: u64,

    /// Stop after this many seconds; runs until Ctrl+C when omitted
    #[arg(short, long)]
    duration_secs: Option<u64>,

    /// Seconds between status reports
    #[arg(long, default_value = "5")]
    report_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut harness = LoadHarness::new(HarnessConfig {
        server_url: args.server.clone(),
        stagger: Duration::from_millis(args.stagger_ms),
        input_interval: Duration::from_millis(args.input_interval_ms),
        ..HarnessConfig::default()
    });

    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let interrupted = tokio::select! {
        _ = harness.spawn_batch(args.count) => false,
        _ = &mut ctrl_c => true,
    };

    if !interrupted {
        info!("All {} sessions started", args.count);
        let mut report = interval(Duration::from_secs(args.report_secs.max(1)));
        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Received Ctrl+C");
                    break;
                }
                _ = async {
                    match deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    info!("Duration elapsed");
                    break;
                }
                _ = report.tick() => info!("{}", harness.summary()),
            }
        }
    }

    harness.teardown().await;
    info!("Final: {}", harness.summary());
    Ok(())
}
