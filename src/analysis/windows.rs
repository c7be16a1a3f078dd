//! Rolling 12-month window construction.
//!
//! Consumes one location's records in chronological order and lazily yields
//! every contiguous [`WINDOW_LEN`]-month window. A gap, duplicate month or
//! out-of-order month discards the rolling buffer and restarts accumulation
//! from the offending record; missing months are never interpolated.

use std::collections::VecDeque;

use chrono::NaiveDate;
use serde::Serialize;

use crate::model::{FeatureRecord, FeatureWindow, WINDOW_LEN, months_between};

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

/// Why the rolling buffer was restarted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GapReason {
    /// One or more calendar months are absent.
    MissingMonths { missing: u32 },
    /// The same month appeared twice in a row.
    Duplicate,
    /// The month precedes the previous record's month.
    OutOfOrder,
}

/// Non-fatal notice produced while building windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WindowDiagnostic {
    /// The buffer spanning `discarded_from..=discarded_to` was dropped and
    /// accumulation restarted at `resumed_at`.
    GapSkipped {
        location: String,
        discarded_from: NaiveDate,
        discarded_to: NaiveDate,
        discarded_records: usize,
        resumed_at: NaiveDate,
        reason: GapReason,
    },
    /// No window could be formed for the location.
    InsufficientHistory {
        location: String,
        records: usize,
        required: usize,
    },
}

/// One item of the lazy window sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowEvent {
    Window(FeatureWindow),
    Diagnostic(WindowDiagnostic),
}

// ---------------------------------------------------------------------------
// Rolling buffer
// ---------------------------------------------------------------------------

/// Incremental window builder for a single location.
#[derive(Debug)]
pub struct RollingWindowBuilder {
    location: String,
    buffer: VecDeque<FeatureRecord>,
    seen: usize,
    emitted: usize,
}

/// What a single [`RollingWindowBuilder::push`] produced.
#[derive(Debug, Default)]
pub struct PushOutcome {
    pub gap: Option<WindowDiagnostic>,
    pub window: Option<FeatureWindow>,
}

impl RollingWindowBuilder {
    pub fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            buffer: VecDeque::with_capacity(WINDOW_LEN),
            seen: 0,
            emitted: 0,
        }
    }

    /// Feeds the next record. Returns a gap notice if the buffer had to be
    /// restarted, and a window once the buffer holds [`WINDOW_LEN`]
    /// contiguous records.
    pub fn push(&mut self, record: FeatureRecord) -> PushOutcome {
        self.seen += 1;
        let mut outcome = PushOutcome::default();

        if let Some(last) = self.buffer.back() {
            let delta = months_between(last.month, record.month);
            if delta != 1 {
                let reason = match delta {
                    0 => GapReason::Duplicate,
                    d if d < 0 => GapReason::OutOfOrder,
                    d => GapReason::MissingMonths {
                        missing: (d - 1) as u32,
                    },
                };
                outcome.gap = Some(WindowDiagnostic::GapSkipped {
                    location: self.location.clone(),
                    discarded_from: self.buffer.front().map_or(last.month, |r| r.month),
                    discarded_to: last.month,
                    discarded_records: self.buffer.len(),
                    resumed_at: record.month,
                    reason,
                });
                self.buffer.clear();
            }
        }

        self.buffer.push_back(record);
        if self.buffer.len() > WINDOW_LEN {
            self.buffer.pop_front();
        }
        if self.buffer.len() == WINDOW_LEN {
            // contiguity is maintained by the restart above
            outcome.window = FeatureWindow::new(self.buffer.iter().cloned().collect()).ok();
            if outcome.window.is_some() {
                self.emitted += 1;
            }
        }
        outcome
    }

    /// Number of windows emitted so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Closes the sequence. Reports insufficient history if no window was
    /// ever emitted.
    pub fn finish(&self) -> Option<WindowDiagnostic> {
        (self.emitted == 0).then(|| WindowDiagnostic::InsufficientHistory {
            location: self.location.clone(),
            records: self.seen,
            required: WINDOW_LEN,
        })
    }
}

// ---------------------------------------------------------------------------
// Lazy sequence
// ---------------------------------------------------------------------------

/// Iterator adapter over a record stream yielding windows and diagnostics
/// in input order.
pub struct WindowIter<I> {
    records: I,
    builder: RollingWindowBuilder,
    pending: VecDeque<WindowEvent>,
    finished: bool,
}

impl<I> Iterator for WindowIter<I>
where
    I: Iterator<Item = FeatureRecord>,
{
    type Item = WindowEvent;

    fn next(&mut self) -> Option<WindowEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }
            match self.records.next() {
                Some(record) => {
                    let outcome = self.builder.push(record);
                    if let Some(gap) = outcome.gap {
                        self.pending.push_back(WindowEvent::Diagnostic(gap));
                    }
                    if let Some(window) = outcome.window {
                        self.pending.push_back(WindowEvent::Window(window));
                    }
                }
                None => {
                    self.finished = true;
                    if let Some(diag) = self.builder.finish() {
                        self.pending.push_back(WindowEvent::Diagnostic(diag));
                    }
                }
            }
        }
    }
}

/// Builds the lazy window sequence for one location's chronologically
/// sorted records.
pub fn build_windows<I>(location: &str, records: I) -> WindowIter<I::IntoIter>
where
    I: IntoIterator<Item = FeatureRecord>,
{
    WindowIter {
        records: records.into_iter(),
        builder: RollingWindowBuilder::new(location),
        pending: VecDeque::new(),
        finished: false,
    }
}

/// Eagerly splits a record sequence into windows and diagnostics.
pub fn collect_windows(
    location: &str,
    records: Vec<FeatureRecord>,
) -> (Vec<FeatureWindow>, Vec<WindowDiagnostic>) {
    let mut windows = Vec::new();
    let mut diagnostics = Vec::new();
    for event in build_windows(location, records) {
        match event {
            WindowEvent::Window(w) => windows.push(w),
            WindowEvent::Diagnostic(d) => diagnostics.push(d),
        }
    }
    (windows, diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
