mod config;
mod events;
mod server;
mod simulation;
mod tui;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use config::ServerConfig;
use events::ServerEvent;
use netsync::SyncConfig;
use server::GameServer;
use tui::TuiState;

pub const DEFAULT_PORT: u16 = 7777;

#[derive(Parser)]
#[command(name = "netsync-server")]
#[command(about = "Authoritative state sync server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, help = "RON file with sync settings")]
    config: Option<PathBuf>,

    #[arg(long, help = "Network ticks per second (overrides config)")]
    network_tick_rate: Option<u32>,

    #[arg(long, help = "Simulation ticks per second (overrides config)")]
    client_tick_rate: Option<u32>,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(short, long, default_value_t = 64)]
    npc_count: usize,

    #[arg(long)]
    headless: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let mut sync = match &args.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(rate) = args.network_tick_rate {
        sync.network_tick_rate = rate;
    }
    if let Some(rate) = args.client_tick_rate {
        sync.client_tick_rate = rate;
    }

    let config = ServerConfig {
        sync,
        max_clients: args.max_clients,
        npc_count: args.npc_count,
        ..Default::default()
    };

    let mut server = GameServer::bind(&bind_addr, config)?;

    if args.headless {
        log::info!("Server started on {}", server.local_addr());
        run_headless(&mut server);
        log::info!("Server shutting down");
    } else {
        run_with_tui(&mut server)?;
    }

    Ok(())
}

fn run_headless(server: &mut GameServer) {
    let running = server.running();
    while running.load(Ordering::SeqCst) {
        server.tick_once();
        for event in server.drain_events() {
            match event {
                ServerEvent::Error { message } => log::warn!("{}", message),
                other => log::info!("{}", describe(&other)),
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn describe(event: &ServerEvent) -> String {
    match event {
        ServerEvent::ClientConnected {
            client_id,
            entity_id,
        } => format!("Client {} connected (entity {})", client_id, entity_id),
        ServerEvent::ClientDisconnected { client_id } => {
            format!("Client {} disconnected", client_id)
        }
        ServerEvent::Hit {
            attacker,
            target,
            confidence,
        } => format!("{} hit {} ({:?})", attacker, target, confidence),
        ServerEvent::Miss {
            attacker,
            target,
            distance,
        } => format!("{} missed {} by {:.2}", attacker, target, distance),
        ServerEvent::Error { message } => message.clone(),
    }
}

fn run_with_tui(server: &mut GameServer) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = server.running();
    let mut tui_state = TuiState::new();

    tui_state.log_info(format!("Server started on {}", server.local_addr()));

    while running.load(Ordering::SeqCst) {
        server.tick_once();

        for event in server.drain_events() {
            match event {
                ServerEvent::Error { message } => tui_state.log_error(message),
                ServerEvent::Miss { .. } => tui_state.log_warn(describe(&event)),
                other => tui_state.log_info(describe(&other)),
            }
        }

        if event::poll(Duration::from_millis(1))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
            && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
        {
            running.store(false, Ordering::SeqCst);
        }

        let stats = server.stats();
        let clients = server.client_infos();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &stats, &clients);
        })?;
    }

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
