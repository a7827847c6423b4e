use clap::Parser;
use client::game::ArenaView;
use client::network::GameClient;
use log::{error, info, warn};
use rand::Rng;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint to connect to
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:3000/ws")]
    server: String,

    /// Number of bots to run
    #[arg(short = 'n', long, default_value = "1")]
    bots: usize,

    /// Steering messages per second per bot
    #[arg(short = 'r', long, default_value = "10")]
    input_rate: u32,

    /// Nickname prefix
    #[arg(long, default_value = "bot")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("Starting {} bot(s) against {}", args.bots, args.server);

    let mut handles = Vec::with_capacity(args.bots);
    for index in 0..args.bots {
        let url = args.server.clone();
        let nickname = format!("{}{}", args.name, index);
        let rate = args.input_rate.max(1);
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_bot(&url, &nickname, rate).await {
                error!("{}: {}", nickname, e);
            }
        }));
    }

    tokio::select! {
        _ = futures_util::future::join_all(handles) => {
            info!("All bots finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    Ok(())
}

async fn run_bot(url: &str, nickname: &str, input_rate: u32) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = GameClient::connect(url).await?;
    client.join(nickname).await?;

    let mut view = ArenaView::new();
    let mut steer_timer = interval(Duration::from_secs_f32(1.0 / input_rate as f32));
    steer_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            message = client.recv() => {
                let Some(message) = message? else {
                    warn!("{}: server closed the connection", nickname);
                    return Ok(());
                };
                view.apply(&message);
                if !view.alive && view.player_id.is_some() {
                    info!("{} died ({} so far), respawning", nickname, view.deaths);
                    client.respawn(nickname).await?;
                    view.alive = true;
                }
            }
            _ = steer_timer.tick() => {
                let heading = view
                    .choose_heading()
                    .unwrap_or_else(|| rand::thread_rng().gen_range(0.0..std::f32::consts::TAU));
                let boosting = rand::thread_rng().gen_bool(0.1);
                client.steer(heading as f64, boosting).await?;
            }
        }
    }
}
