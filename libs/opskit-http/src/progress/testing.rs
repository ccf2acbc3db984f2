//! Recording progress sinks for tests.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{LiveWriter, ProgressBar};

/// Something that happened to a recording sink, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    SetTotal(u64),
    Kickoff,
    Position(u64),
    End,
    LiveStart,
    Line(String),
    LiveStop,
}

/// Records every call made to it. Clones share one event log, so a single
/// recorder can serve as both bar and live writer and keep their relative
/// order.
#[derive(Debug, Clone, Default)]
pub struct ProgressRecorder {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl ProgressRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn count(&self, event: &ProgressEvent) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    /// Heartbeat lines written so far
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Line(line) => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    /// Index of the first occurrence of `event`
    #[must_use]
    pub fn position_of(&self, event: &ProgressEvent) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }

    fn push(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}

impl ProgressBar for ProgressRecorder {
    fn set_total(&self, total: u64) {
        self.push(ProgressEvent::SetTotal(total));
    }

    fn kickoff(&self) {
        self.push(ProgressEvent::Kickoff);
    }

    fn set_position(&self, position: u64) {
        self.push(ProgressEvent::Position(position));
    }

    fn end(&self) {
        self.push(ProgressEvent::End);
    }
}

impl LiveWriter for ProgressRecorder {
    fn start(&self) {
        self.push(ProgressEvent::LiveStart);
    }

    fn write_line(&self, line: &str) {
        self.push(ProgressEvent::Line(line.to_owned()));
    }

    fn stop(&self) {
        self.push(ProgressEvent::LiveStop);
    }
}
