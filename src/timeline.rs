//! Per-request timelines and the process-wide profiler ring.
//!
//! The scheduler owns one [`Timeline`] per request and records a span per
//! stage. Completed timelines land in the [`Profiler`]'s bounded ring so
//! the status surface can show recent request breakdowns.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

/// Completed request timelines retained by the profiler.
const PROFILER_RING_CAP: usize = 64;

/// One recorded stage span, offsets relative to request start.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEvent {
    /// Stage ("advisor") that ran.
    pub advisor: String,
    /// Position in the executed chain, 0-based.
    pub order: usize,
    /// Start offset in millis.
    pub start_ms: u64,
    /// End offset in millis.
    pub end_ms: u64,
    /// Span duration in millis.
    pub duration_ms: u64,
}

/// Span collector for one request.
#[derive(Debug)]
pub struct Timeline {
    trace_id: String,
    origin: Instant,
    events: Vec<TimelineEvent>,
}

impl Timeline {
    /// Starts a timeline for a trace.
    #[must_use]
    pub fn start(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            origin: Instant::now(),
            events: Vec::new(),
        }
    }

    /// Marks the start of a span; pass the returned instant to
    /// [`Timeline::finish_span`].
    #[must_use]
    pub fn begin_span(&self) -> Instant {
        Instant::now()
    }

    /// Records a completed span.
    pub fn finish_span(&mut self, advisor: &str, started: Instant) {
        let start_ms = millis_between(self.origin, started);
        let end_ms = millis_between(self.origin, Instant::now());
        self.events.push(TimelineEvent {
            advisor: advisor.to_string(),
            order: self.events.len(),
            start_ms,
            end_ms,
            duration_ms: end_ms.saturating_sub(start_ms),
        });
    }

    /// The trace id this timeline belongs to.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Recorded events in execution order.
    #[must_use]
    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Finalizes into a snapshot for the profiler.
    #[must_use]
    pub fn into_snapshot(self) -> TimelineSnapshot {
        let total_ms = millis_between(self.origin, Instant::now());
        TimelineSnapshot {
            trace_id: self.trace_id,
            total_ms,
            events: self.events,
        }
    }
}

/// An immutable completed timeline.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineSnapshot {
    /// Trace id of the request.
    pub trace_id: String,
    /// Wall-clock total for the request in millis.
    pub total_ms: u64,
    /// Stage spans in execution order.
    pub events: Vec<TimelineEvent>,
}

/// Bounded ring of recent request timelines.
#[derive(Debug, Default)]
pub struct Profiler {
    ring: Mutex<VecDeque<TimelineSnapshot>>,
}

impl Profiler {
    /// Creates an empty profiler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed timeline, evicting the oldest past capacity.
    pub fn record(&self, snapshot: TimelineSnapshot) {
        if let Ok(mut ring) = self.ring.lock() {
            ring.push_back(snapshot);
            while ring.len() > PROFILER_RING_CAP {
                ring.pop_front();
            }
        }
    }

    /// Recent timelines, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<TimelineSnapshot> {
        self.ring
            .lock()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of retained timelines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Returns `true` when no timelines are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn millis_between(origin: Instant, at: Instant) -> u64 {
    u64::try_from(at.saturating_duration_since(origin).as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_recorded_in_order() {
        let mut timeline = Timeline::start("t1");
        let s1 = timeline.begin_span();
        timeline.finish_span("conductor", s1);
        let s2 = timeline.begin_span();
        timeline.finish_span("voice", s2);

        let events = timeline.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].advisor, "conductor");
        assert_eq!(events[0].order, 0);
        assert_eq!(events[1].advisor, "voice");
        assert_eq!(events[1].order, 1);
        assert!(events[0].start_ms <= events[1].start_ms);
    }

    #[test]
    fn test_duration_consistent() {
        let mut timeline = Timeline::start("t1");
        let s = timeline.begin_span();
        std::thread::sleep(std::time::Duration::from_millis(5));
        timeline.finish_span("judge", s);
        let event = &timeline.events()[0];
        assert_eq!(event.duration_ms, event.end_ms - event.start_ms);
        assert!(event.duration_ms >= 5);
    }

    #[test]
    fn test_snapshot_carries_trace_id() {
        let timeline = Timeline::start("trace-42");
        let snapshot = timeline.into_snapshot();
        assert_eq!(snapshot.trace_id, "trace-42");
        assert!(snapshot.events.is_empty());
    }

    #[test]
    fn test_profiler_ring_bounded() {
        let profiler = Profiler::new();
        for i in 0..(PROFILER_RING_CAP + 10) {
            profiler.record(TimelineSnapshot {
                trace_id: format!("t{i}"),
                total_ms: 1,
                events: Vec::new(),
            });
        }
        assert_eq!(profiler.len(), PROFILER_RING_CAP);
        let recent = profiler.recent();
        // Oldest entries evicted.
        assert_eq!(recent.first().map(|s| s.trace_id.clone()), Some("t10".to_string()));
    }
}
