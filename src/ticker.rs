//! "Still running" ticker shown while a test command executes
//!
//! The ticker owns nothing but a stop channel and the terminal line it draws
//! on. It never sees pipeline state.

use crossterm::{
    cursor::MoveToColumn,
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use std::io::{self, IsTerminal, Write};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const STATUS_MESSAGES: [&str; 3] = [
    "Running tests... Please wait.",
    "Still running tests... Hang tight!",
    "Tests are still executing... Almost there!",
];

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

pub struct StatusTicker {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<usize>>,
}

impl StatusTicker {
    /// Start ticking on stderr. When stderr is not a terminal the ticker
    /// stays silent but still honours the stop signal.
    pub fn start() -> Self {
        Self::with_interval(DEFAULT_INTERVAL, io::stderr().is_terminal())
    }

    pub fn with_interval(interval: Duration, draw: bool) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            let mut ticks = 0usize;
            loop {
                if draw {
                    render(STATUS_MESSAGES[ticks % STATUS_MESSAGES.len()]);
                }
                ticks += 1;
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            if draw {
                clear_line();
            }
            ticks
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Signal the ticker and wait for it to clear its line. Returns how many
    /// messages were shown.
    pub fn stop(mut self) -> usize {
        self.shutdown()
    }

    fn shutdown(&mut self) -> usize {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or(0)
    }
}

impl Drop for StatusTicker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn render(message: &str) {
    let _ = execute!(
        io::stderr(),
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        SetForegroundColor(Color::Rgb { r: 180, g: 180, b: 180 }),
        Print(message),
        ResetColor
    );
    let _ = io::stderr().flush();
}

fn clear_line() {
    let _ = execute!(io::stderr(), MoveToColumn(0), Clear(ClearType::CurrentLine));
}
