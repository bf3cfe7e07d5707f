mod ui;
mod state;
mod data;
mod map_draw;
mod incident;
mod config;

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyEvent, KeyEventKind, DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{fs::File, io, path::Path, sync::{Mutex, mpsc::Receiver}, time::Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Args;
use data::{LoadEvent, spawn_loaders};
use incident::MetadataIndex;
use map_draw::{PerimeterLayer, Viewport};
use state::{AppState, Slot};

/// Logi idą do pliku, żeby nie psuć ekranu terminala
fn init_logging(path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("cannot create log file {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_file)?;
    info!(
        perimeters = %args.perimeters_source().describe(),
        incidents = %args.incidents_source().describe(),
        "starting"
    );

    let events = spawn_loaders(args.perimeters_source(), args.incidents_source())
        .context("cannot start loaders")?;
    let mut state = AppState::new(Viewport::new(args.lat, args.lon, args.zoom));

    if args.list {
        return list(&mut state, &events);
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run(&mut terminal, &mut state, &events);

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    result
}

fn run<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    state: &mut AppState,
    events: &Receiver<LoadEvent>,
) -> Result<()> {
    loop {
        // Zakończone ładowania, bez blokowania pętli
        while let Ok(event) = events.try_recv() {
            state.apply(event);
        }

        terminal.draw(|f| ui::draw(f, state))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(KeyEvent { code, kind: KeyEventKind::Press, .. }) = event::read()? {
                if state.handle_input(code) {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Tryb bez interfejsu: czeka na oba zbiory i wypisuje znaczniki
fn list(state: &mut AppState, events: &Receiver<LoadEvent>) -> Result<()> {
    for event in events.iter().take(2) {
        state.apply(event);
    }
    if let Slot::Failed(e) = &state.perimeters {
        bail!("perimeters: {e}");
    }
    if let Slot::Failed(e) = &state.incidents {
        bail!("incidents: {e}");
    }
    if state.overlay().is_some_and(PerimeterLayer::is_empty) {
        warn!("no perimeters matched the query");
    }
    if state.incidents.loaded().is_some_and(MetadataIndex::is_empty) {
        warn!("no incident metadata in the query extent");
    }
    for marker in &state.markers {
        println!(
            "[{:.5}, {:.5}] {}",
            marker.lat(),
            marker.lon(),
            marker.key.as_deref().unwrap_or("-")
        );
        for line in marker.popup.lines() {
            println!("  {line}");
        }
        println!();
    }
    info!(markers = state.markers.len(), "listed");
    Ok(())
}
