use clap::Parser;
use client::game::{Correction, ReconcileConfig, Reconciler};
use client::input::{camera_relative, InputCommand, InputTracker};
use client::network::GameClient;
use log::{debug, info, warn};
use shared::{Message, Rgb};
use std::time::{Duration, Instant};
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server URL to connect to
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:9002")]
    server: String,

    /// Nickname to join with
    #[arg(short, long, default_value = "Player")]
    nickname: String,

    /// Player color as r,g,b in [0, 1]
    #[arg(short, long, default_value = "1.0,0.3,0.3", value_parser = parse_color)]
    color: Rgb,

    /// Sideways input in [-1, 1]
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    strafe: f32,

    /// Forward input in [-1, 1]
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    forward: f32,

    /// Press jump every N seconds (0 disables)
    #[arg(long, default_value = "0")]
    jump_every: f32,

    /// Ask the server to spawn this many dummies after joining
    #[arg(long, default_value = "0")]
    spawn_dummies: u32,

    /// Frames per second of the local update loop
    #[arg(long, default_value = "60")]
    frame_rate: u32,

    /// Snap the local entity when it drifts further than this
    #[arg(long, default_value = "0.5")]
    snap_threshold: f32,
}

fn parse_color(value: &str) -> Result<Rgb, String> {
    let parts: Vec<f32> = value
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid color component: {}", e))?;
    match parts.as_slice() {
        [r, g, b] => Ok(Rgb::new(*r, *g, *b).clamped()),
        _ => Err("expected three comma separated components".to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let client = GameClient::join(
        &args.server,
        &args.nickname,
        args.color,
        Duration::from_secs(5),
    )
    .await?;
    let local_id = client.entity_id();
    let (mut sender, mut receiver) = client.into_split();

    if args.spawn_dummies > 0 {
        sender.spawn_dummies(args.spawn_dummies).await?;
    }

    let mut reconciler = Reconciler::new(ReconcileConfig {
        snap_threshold: args.snap_threshold,
        ..ReconcileConfig::default()
    });
    reconciler.set_local_id(Some(local_id));

    let mut tracker = InputTracker::default();
    let movement = camera_relative(args.strafe, args.forward, 0.0);
    let jump_period = (args.jump_every > 0.0).then(|| Duration::from_secs_f32(args.jump_every));
    let mut last_jump = Instant::now();

    let mut frames = interval(Duration::from_secs_f64(1.0 / f64::from(args.frame_rate.max(1))));
    let mut report = interval(Duration::from_secs(1));
    let mut last_frame = Instant::now();
    let mut snaps = 0u64;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, leaving");
                break;
            }
            message = receiver.next_message() => match message {
                Ok(Message::GameState(snapshot)) => {
                    let outcome = reconciler.apply_snapshot(&snapshot);
                    if let Some(Correction::Snap { divergence }) = outcome.correction {
                        snaps += 1;
                        debug!("Snap correction of {:.3}", divergence);
                    }
                    if !outcome.added.is_empty() || !outcome.removed.is_empty() {
                        debug!("Entities added {:?}, removed {:?}", outcome.added, outcome.removed);
                    }
                }
                Ok(other) => debug!("Ignoring {}", other.message_type()),
                Err(e) => {
                    warn!("Connection lost: {}", e);
                    break;
                }
            },
            _ = frames.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last_frame).as_secs_f32();
                last_frame = now;
                reconciler.update(dt);

                let jump_down = match jump_period {
                    Some(period) if now.duration_since(last_jump) >= period => {
                        last_jump = now;
                        true
                    }
                    _ => false,
                };

                for command in tracker.update(movement, jump_down, now) {
                    let sent = match command {
                        InputCommand::Move(movement) => sender.send_input(movement).await,
                        InputCommand::Jump => sender.send_jump().await,
                    };
                    if let Err(e) = sent {
                        warn!("Failed to send input: {}", e);
                    }
                }
            }
            _ = report.tick() => {
                let views = reconciler.views();
                let local = reconciler.position(local_id);
                info!(
                    "Tick {} | {} players, {} dummies | local at {:?} | {} snaps",
                    views.tick,
                    views.players.len(),
                    views.dummies.len(),
                    local,
                    snaps
                );
            }
        }
    }

    sender.close().await;
    Ok(())
}
