pub mod app;
pub mod checkpoint;
pub mod cpuset;
pub mod error;
pub mod numa_node;
pub mod reader;
pub mod sys_numa_info;
pub mod topology;
mod ui;

pub use checkpoint::{
    CPU_MANAGER_STATE_FILE, CheckpointFormat, CheckpointRecord, CheckpointSource,
    CheckpointVersion, FileCheckpointStore, LoadError, MemoryCheckpointStore,
};
pub use cpuset::{CpuSet, CpuSetError};
pub use error::{Error, Result};
pub use reader::{CoresAllocation, Reader, UnmappedCore};
pub use topology::Topology;

use app::App;
use std::{
    io,
    time::{Duration, Instant},
};

use ratatui::{
    DefaultTerminal, Frame,
    crossterm::event::{self, Event, KeyCode, KeyEventKind},
};

fn draw<S: CheckpointSource>(app: &App<S>, frame: &mut Frame) {
    ui::draw(app, frame);
}

fn handle_events<S>(app: &mut App<S>, tick_rate: Duration, last_tick: Instant) -> io::Result<()>
where
    S: CheckpointSource,
{
    let timeout = tick_rate
        .checked_sub(last_tick.elapsed())
        .unwrap_or_else(|| Duration::from_secs(0));

    if event::poll(timeout)? {
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press
                && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
            {
                app.quit();
            }
        }
    }

    Ok(())
}

/// Refreshes the allocation every `tick_rate` and redraws until the user quits.
pub fn run_app<S: CheckpointSource>(
    terminal: &mut DefaultTerminal,
    app: &mut App<S>,
    tick_rate: Duration,
) -> io::Result<()> {
    let mut last_tick = Instant::now();
    app.update();

    while !app.should_quit {
        terminal.draw(|frame| draw(app, frame))?;
        handle_events(app, tick_rate, last_tick)?;
        if last_tick.elapsed() >= tick_rate {
            app.update();
            last_tick = Instant::now();
        }
    }

    Ok(())
}
