mod bot;
mod report;
mod script;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Parser;

use bot::{Bot, BotSettings};
use netsync::SyncConfig;
use script::CircleScript;

#[derive(Parser)]
#[command(name = "netsync-client")]
#[command(about = "Headless sync client that walks a scripted path")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:7777",
        help = "Server address to connect to"
    )]
    server: String,

    #[arg(long, help = "RON file with sync settings")]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 10.0, help = "Radius of the walked circle")]
    radius: f32,

    #[arg(long, default_value_t = 1.0, help = "Seconds between attacks, 0 disables")]
    attack_interval: f64,

    #[arg(long, default_value_t = 2.0, help = "Seconds between status lines")]
    report_interval: f64,

    #[arg(long, help = "Exit after this many seconds")]
    duration: Option<f64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server_addr: SocketAddr = args.server.parse()?;
    let config = match &args.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };

    let settings = BotSettings {
        script: CircleScript::new(args.radius, netsync::LinearMotion::default().speed),
        attack_interval: args.attack_interval,
        report_interval: args.report_interval,
    };

    let mut bot = Bot::connect(server_addr, config, settings)?;
    let running = bot.running();

    while running.load(Ordering::SeqCst) {
        bot.tick_once();
        if args.duration.is_some_and(|limit| bot.elapsed() >= limit) {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    let report = bot.report();
    log::info!(
        "Done: {} appeared, {} removed, {} corrections",
        report.appeared,
        report.removed,
        report.corrections
    );
    Ok(())
}
