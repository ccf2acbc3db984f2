use std::io::{IsTerminal, Write};

use parking_lot::Mutex;

use super::{LiveWriter, ProgressBar};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

#[derive(Debug, Default)]
struct BarState {
    total: u64,
    position: u64,
    active: bool,
}

/// Single-line progress bar on stderr.
#[derive(Debug, Default)]
pub struct TerminalProgressBar {
    state: Mutex<BarState>,
}

impl TerminalProgressBar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn render(state: &BarState) {
        let line = if state.total == 0 {
            format_bytes(state.position)
        } else {
            let percent = state
                .position
                .min(state.total)
                .saturating_mul(100)
                .checked_div(state.total)
                .unwrap_or(100);
            format!(
                "{percent:>3}% {} / {}",
                format_bytes(state.position),
                format_bytes(state.total)
            )
        };
        write_stderr(&format!("\r\x1b[2K{line}"));
    }
}

impl ProgressBar for TerminalProgressBar {
    fn set_total(&self, total: u64) {
        let mut state = self.state.lock();
        state.total = total;
        state.position = 0;
    }

    fn kickoff(&self) {
        let mut state = self.state.lock();
        state.active = true;
        Self::render(&state);
    }

    fn set_position(&self, position: u64) {
        let mut state = self.state.lock();
        state.position = position;
        if state.active {
            Self::render(&state);
        }
    }

    fn end(&self) {
        let mut state = self.state.lock();
        if state.active {
            Self::render(&state);
            write_stderr("\n");
            state.active = false;
        }
    }
}

#[derive(Debug, Default)]
struct LiveState {
    dirty: bool,
}

/// Heartbeat line on stderr, rewritten in place.
#[derive(Debug, Default)]
pub struct TerminalLiveWriter {
    state: Mutex<LiveState>,
}

impl TerminalLiveWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LiveWriter for TerminalLiveWriter {
    fn start(&self) {
        self.state.lock().dirty = false;
    }

    fn write_line(&self, line: &str) {
        let mut state = self.state.lock();
        write_stderr(&format!("\r\x1b[2K{line}"));
        state.dirty = true;
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        if state.dirty {
            write_stderr("\r\x1b[2K");
            state.dirty = false;
        }
    }
}

/// Renders nothing. Used when stderr is not a terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl SilentProgress {
    /// Whether terminal rendering makes sense for this process.
    #[must_use]
    pub fn stderr_is_terminal() -> bool {
        std::io::stderr().is_terminal()
    }
}

impl ProgressBar for SilentProgress {
    fn set_total(&self, _total: u64) {}
    fn kickoff(&self) {}
    fn set_position(&self, _position: u64) {}
    fn end(&self) {}
}

impl LiveWriter for SilentProgress {
    fn start(&self) {}
    fn write_line(&self, _line: &str) {}
    fn stop(&self) {}
}

fn write_stderr(text: &str) {
    let mut stderr = std::io::stderr().lock();
    if let Err(e) = stderr.write_all(text.as_bytes()).and_then(|()| stderr.flush()) {
        tracing::trace!(error = %e, "could not write progress to stderr");
    }
}

/// Human readable size with one decimal, binary units.
fn format_bytes(bytes: u64) -> String {
    let (unit, suffix) = match bytes {
        b if b >= GIB => (GIB, "GiB"),
        b if b >= MIB => (MIB, "MiB"),
        b if b >= KIB => (KIB, "KiB"),
        b => return format!("{b} B"),
    };
    let tenths = bytes.saturating_mul(10).div_euclid(unit);
    format!("{}.{} {suffix}", tenths.div_euclid(10), tenths.rem_euclid(10))
}
