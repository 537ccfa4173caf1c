use anyhow::{Context, Result};
use ratatui::{Terminal, backend::TermionBackend};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use termion::{input::TermRead, raw::IntoRawMode};

use virtmic::audio::{AudioEngine, CommandBackend};
use virtmic::config::ConfigManager;
use virtmic::logging;
use virtmic::ui::App;

fn main() -> Result<()> {
    let _log_guard = logging::init_logging()?;

    let config = ConfigManager::new()?.load()?;
    let backend = Arc::new(CommandBackend::new(config.command_set()));

    // Initialize audio engine before taking over the terminal
    let mut audio_engine = AudioEngine::new(backend, config.router_settings())?;
    audio_engine.start().context("Failed to start audio engine")?;

    let result = run_ui(&audio_engine);

    // Cleanup: unlink the route and remove the virtual microphone
    audio_engine.stop()?;
    result
}

fn run_ui(audio_engine: &AudioEngine) -> Result<()> {
    // Initialize terminal
    let stdout = io::stdout().into_raw_mode()?;
    let backend = TermionBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let mut app = App::new();

    // Non-blocking key input
    let mut keys = termion::async_stdin().keys();

    while app.running {
        app.handle_audio_events(&audio_engine.poll_events());

        terminal.draw(|frame| {
            app.render(frame);
        })?;

        while let Some(Ok(key)) = keys.next() {
            if let Some(command) = app.handle_input(key) {
                audio_engine.send_command(command)?;
            }
        }

        // Small sleep to prevent busy-waiting
        std::thread::sleep(Duration::from_millis(16)); // ~60 FPS
    }

    terminal.clear()?;
    Ok(())
}
