//! Per-thread lifecycle reconstruction for filestore write operations.
//!
//! Each thread id in the log carries at most one operation in progress. A
//! start marker (re)opens it, write markers fill it in, and a finish marker
//! completes and retires it. Lines that do not fit the current state are
//! dropped: truncated and interleaved logs are normal input.

use crate::classify::{self, AggregateCounters, PartialHistogram, Verdict};
use crate::config::TraceConfig;
use crate::timestamp::seconds_between;
use crate::trace::marker::{LogLine, Marker, markers};
use crate::trace::partial::PartialWriteDescriptor;

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Delta labels, also used as the classifier keys.
pub const START_TO_WRITE: &str = "start-write";
pub const WRITE_START_TO_WRITE: &str = "write_start-write";
pub const WRITE_TO_FINISH: &str = "write-finish";

/// One timestamped lifecycle event and the raw line it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Phase {
    pub time: NaiveDateTime,
    pub line: String,
}

impl Phase {
    fn from_line(l: &LogLine<'_>) -> Self {
        Self {
            time: l.time,
            line: l.raw.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteSubmit {
    #[serde(flatten)]
    pub phase: Phase,
    pub extent: PartialWriteDescriptor,
}

/// Operation in progress on one thread.
#[derive(Debug, Clone)]
struct OperationRecord {
    start: Phase,
    write_submit: Option<WriteSubmit>,
    write_start: Option<Phase>,
}

/// The three phase durations of a completed operation, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OpDeltas {
    /// start -> write submit
    pub write: f64,
    /// write start -> write submit, 0 without a write-start marker
    pub write_start: f64,
    /// write submit -> finish
    pub finish: f64,
}

impl OpDeltas {
    fn labeled(&self) -> [(&'static str, f64); 3] {
        [
            (START_TO_WRITE, self.write),
            (WRITE_START_TO_WRITE, self.write_start),
            (WRITE_TO_FINISH, self.finish),
        ]
    }
}

/// Per-operation classification flags, rendered as four columns `WSFP`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Flags {
    /// Any phase exceeded the threshold.
    pub slow: bool,
    pub write: bool,
    pub write_start: bool,
    pub finish: bool,
    pub partial: bool,
}

impl Flags {
    fn new(verdict: &Verdict, partial: bool) -> Self {
        Self {
            slow: verdict.any_exceeded(),
            write: verdict.exceeded(START_TO_WRITE),
            write_start: verdict.exceeded(WRITE_START_TO_WRITE),
            finish: verdict.exceeded(WRITE_TO_FINISH),
            partial,
        }
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let col = |on: bool, c: char| if on { c } else { ' ' };
        write!(
            f,
            "{}{}{}{}",
            col(self.write, 'W'),
            col(self.write_start, 'S'),
            col(self.finish, 'F'),
            col(self.partial, 'P')
        )
    }
}

/// A fully observed operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedOp {
    pub thread: String,
    pub start: Phase,
    pub write: WriteSubmit,
    pub write_start: Option<Phase>,
    pub finish: Phase,
    pub deltas: OpDeltas,
    pub flags: Flags,
}

/// End-of-stream results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TraceSummary {
    pub counters: AggregateCounters,
    pub histogram: PartialHistogram,
    pub lines: u64,
    pub skipped_lines: u64,
    /// Operations still open at end of input (never finished).
    pub unfinished: usize,
}

/// Streaming correlator. Feed lines in log order, then call [`Correlator::finish`].
#[derive(Debug)]
pub struct Correlator {
    config: TraceConfig,
    threads: HashMap<String, OperationRecord>,
    counters: AggregateCounters,
    histogram: PartialHistogram,
    lines: u64,
    skipped_lines: u64,
}

impl Correlator {
    pub fn new(config: TraceConfig) -> Self {
        Self {
            config,
            threads: HashMap::new(),
            counters: AggregateCounters::default(),
            histogram: PartialHistogram::default(),
            lines: 0,
            skipped_lines: 0,
        }
    }

    /// Process one line. Returns the operation it completed, if any.
    pub fn feed(&mut self, raw: &str) -> Option<CompletedOp> {
        self.lines += 1;
        let Some(line) = LogLine::parse(raw) else {
            self.skipped_lines += 1;
            tracing::trace!(line = raw, "no timestamp, skipped");
            return None;
        };

        for marker in markers(raw) {
            match marker {
                Marker::Start => {
                    if let Some(prev) = self.threads.insert(
                        line.thread.to_string(),
                        OperationRecord {
                            start: Phase::from_line(&line),
                            write_submit: None,
                            write_start: None,
                        },
                    ) {
                        tracing::trace!(
                            thread = line.thread,
                            abandoned = %prev.start.line,
                            "start replaced an unfinished operation"
                        );
                    }
                }
                Marker::WriteSubmit => {
                    let Some(rec) = self.threads.get_mut(line.thread) else {
                        return None;
                    };
                    let Some((offset, length)) = line.write_extent() else {
                        tracing::debug!(line = raw, "write without offset~length, skipped");
                        return None;
                    };
                    let extent = PartialWriteDescriptor::new(offset, length, self.config.block_size);
                    self.histogram.observe(extent.start_partial);
                    self.histogram.observe(extent.end_partial);
                    rec.write_submit = Some(WriteSubmit {
                        phase: Phase::from_line(&line),
                        extent,
                    });
                }
                Marker::WriteStart => {
                    let Some(rec) = self.threads.get_mut(line.thread) else {
                        return None;
                    };
                    rec.write_start = Some(Phase::from_line(&line));
                }
                Marker::Finish => return self.complete(&line),
            }
        }
        None
    }

    /// Close the thread's operation if it has both a start and a write.
    fn complete(&mut self, line: &LogLine<'_>) -> Option<CompletedOp> {
        if !self
            .threads
            .get(line.thread)
            .is_some_and(|rec| rec.write_submit.is_some())
        {
            return None;
        }
        let rec = self.threads.remove(line.thread)?;
        let write = rec.write_submit?;
        let finish = Phase::from_line(line);

        let deltas = OpDeltas {
            write: seconds_between(rec.start.time, write.phase.time),
            write_start: rec
                .write_start
                .as_ref()
                .map_or(0.0, |ws| seconds_between(ws.time, write.phase.time)),
            finish: seconds_between(write.phase.time, finish.time),
        };

        let verdict = classify::classify(deltas.labeled(), self.config.threshold);
        let flags = Flags::new(&verdict, write.extent.is_partial());
        self.counters
            .record(flags.slow, flags.partial, deltas.write + deltas.finish);

        if deltas.write < 0.0 || deltas.finish < 0.0 {
            tracing::debug!(thread = line.thread, "negative delta, input out of order");
        }

        Some(CompletedOp {
            thread: line.thread.to_string(),
            start: rec.start,
            write,
            write_start: rec.write_start,
            finish,
            deltas,
            flags,
        })
    }

    pub fn finish(self) -> TraceSummary {
        TraceSummary {
            counters: self.counters,
            histogram: self.histogram,
            lines: self.lines,
            skipped_lines: self.skipped_lines,
            unfinished: self.threads.len(),
        }
    }
}

#[cfg(test)]
impl Correlator {
    fn counters(&self) -> &AggregateCounters {
        &self.counters
    }

    /// Number of threads with an operation in progress.
    fn open_operations(&self) -> usize {
        self.threads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn cfg(threshold: f64) -> TraceConfig {
        TraceConfig {
            threshold,
            block_size: 4096,
        }
    }

    fn start(t: &str, thread: &str) -> String {
        format!("2017-03-23 {} {} 10 osd.1 _do_op osd_op(client.1:7 [write]) start", t, thread)
    }

    fn submit(t: &str, thread: &str, extent: &str) -> String {
        format!(
            "2017-03-23 {} {} 10 filestore(/var/lib/ceph/osd/ceph-1) write 2.5_head/#2:a8d6:::obj:head# {} = 4096",
            t, thread, extent
        )
    }

    fn wstart(t: &str, thread: &str) -> String {
        format!(
            "2017-03-23 {} {} 15 filestore(/var/lib/ceph/osd/ceph-1) write 2.5_head/#2:a8d6:::obj:head# 0~4096",
            t, thread
        )
    }

    fn finish(t: &str, thread: &str) -> String {
        format!("2017-03-23 {} {} 10 osd.1 _do_op osd_op(client.1:7), finisher", t, thread)
    }

    #[test]
    fn slow_finish_end_to_end() {
        let mut c = Correlator::new(cfg(0.2));
        assert!(c.feed(&start("10:00:00.000000", "T1")).is_none());
        assert!(c.feed(&submit("10:00:00.050000", "T1", "0~4096")).is_none());
        let op = c.feed(&finish("10:00:00.350000", "T1")).unwrap();

        assert!((op.deltas.write - 0.05).abs() < 1e-9);
        assert!((op.deltas.finish - 0.30).abs() < 1e-9);
        assert_eq!(op.deltas.write_start, 0.0);
        assert_eq!(
            op.flags,
            Flags {
                slow: true,
                write: false,
                write_start: false,
                finish: true,
                partial: false
            }
        );
        assert_eq!(op.flags.to_string(), "  F ");

        let s = c.finish();
        assert_eq!(s.counters.total_ops, 1);
        assert_eq!(s.counters.slow_ops, 1);
        assert_eq!(s.counters.partial_ops, 0);
        assert_eq!(s.counters.slow_partial_ops, 0);
        assert!((s.counters.slow_ops_time - 0.35).abs() < 1e-9);
        assert_eq!(s.unfinished, 0);
    }

    #[test]
    fn write_start_delta_and_partial() {
        let mut c = Correlator::new(cfg(0.1));
        c.feed(&start("10:00:00.000000", "T1"));
        c.feed(&wstart("10:00:00.010000", "T1"));
        c.feed(&submit("10:00:00.210000", "T1", "100~4096"));
        let op = c.feed(&finish("10:00:00.220000", "T1")).unwrap();
        assert!((op.deltas.write_start - 0.2).abs() < 1e-9);
        assert_eq!(op.flags.to_string(), "WS P");
        assert_eq!(op.write.extent.start_partial, 100);
        assert_eq!(op.write.extent.end_partial, 100);

        let s = c.finish();
        assert_eq!(s.counters.slow_partial_ops, 1);
        assert_eq!(s.counters.partial_ops, 1);
        assert_eq!(s.histogram.0.get(&100), Some(&2));
    }

    #[test]
    fn slow_follows_the_classifier_verdict() {
        let verdict = classify::classify([(WRITE_TO_FINISH, 0.5), (START_TO_WRITE, 0.1)], 0.2);
        let flags = Flags::new(&verdict, false);
        assert!(flags.slow);
        assert!(flags.finish && !flags.write);

        let flags = Flags::new(&Verdict::default(), true);
        assert!(!flags.slow);
        assert_eq!(flags.to_string(), "   P");
    }

    #[test]
    fn fast_ops_count_but_are_not_slow() {
        let mut c = Correlator::new(cfg(0.2));
        c.feed(&start("10:00:00.000000", "T1"));
        c.feed(&submit("10:00:00.010000", "T1", "0~8192"));
        let op = c.feed(&finish("10:00:00.020000", "T1")).unwrap();
        assert!(!op.flags.slow);
        assert_eq!(c.counters().total_ops, 1);
        assert_eq!(c.counters().slow_ops, 0);
    }

    #[test]
    fn finish_without_write_is_dropped() {
        let mut c = Correlator::new(cfg(0.2));
        c.feed(&start("10:00:00.000000", "T1"));
        assert!(c.feed(&finish("10:00:01.000000", "T1")).is_none());
        assert_eq!(c.counters().total_ops, 0);
        assert_eq!(c.open_operations(), 1);
    }

    #[test]
    fn write_without_start_is_dropped() {
        let mut c = Correlator::new(cfg(0.2));
        c.feed(&submit("10:00:00.010000", "T1", "0~4096"));
        assert!(c.feed(&finish("10:00:01.000000", "T1")).is_none());
        assert_eq!(c.open_operations(), 0);
        assert!(c.finish().histogram.is_empty());
    }

    #[test]
    fn new_start_abandons_previous_write() {
        let mut c = Correlator::new(cfg(0.2));
        c.feed(&start("10:00:00.000000", "T1"));
        c.feed(&submit("10:00:00.010000", "T1", "0~4096"));
        c.feed(&start("10:00:00.020000", "T1"));
        assert!(c.feed(&finish("10:00:01.000000", "T1")).is_none());
        assert_eq!(c.counters().total_ops, 0);
    }

    #[test]
    fn threads_are_independent() {
        let mut c = Correlator::new(cfg(0.2));
        c.feed(&start("10:00:00.000000", "A"));
        c.feed(&start("10:00:00.001000", "B"));
        c.feed(&submit("10:00:00.002000", "B", "0~4096"));
        c.feed(&submit("10:00:00.500000", "A", "512~512"));
        let b = c.feed(&finish("10:00:00.003000", "B")).unwrap();
        let a = c.feed(&finish("10:00:00.600000", "A")).unwrap();
        assert_eq!(b.thread, "B");
        assert!(!b.flags.slow);
        assert_eq!(a.flags.to_string(), "W  P");
        assert_eq!(c.counters().total_ops, 2);
    }

    #[test]
    fn finish_retires_the_operation() {
        let mut c = Correlator::new(cfg(0.2));
        c.feed(&start("10:00:00.000000", "T1"));
        c.feed(&submit("10:00:00.010000", "T1", "0~4096"));
        assert!(c.feed(&finish("10:00:00.020000", "T1")).is_some());
        assert!(c.feed(&finish("10:00:00.030000", "T1")).is_none());
        assert_eq!(c.counters().total_ops, 1);
    }

    #[test]
    fn negative_deltas_pass_through() {
        let mut c = Correlator::new(cfg(0.2));
        c.feed(&start("10:00:01.000000", "T1"));
        c.feed(&submit("10:00:00.500000", "T1", "0~4096"));
        let op = c.feed(&finish("10:00:00.600000", "T1")).unwrap();
        assert!((op.deltas.write + 0.5).abs() < 1e-9);
        assert!(!op.flags.slow);
    }

    #[test]
    fn malformed_extent_skips_write() {
        let mut c = Correlator::new(cfg(0.2));
        c.feed(&start("10:00:00.000000", "T1"));
        c.feed(&submit("10:00:00.010000", "T1", "bogus"));
        assert!(c.feed(&finish("10:00:00.020000", "T1")).is_none());
    }

    #[test]
    fn thresholds_are_configurable() {
        for (threshold, slow) in [(0.1, true), (0.2, true), (0.3, false)] {
            let mut c = Correlator::new(cfg(threshold));
            c.feed(&start("10:00:00.000000", "T1"));
            c.feed(&submit("10:00:00.250000", "T1", "0~4096"));
            let op = c.feed(&finish("10:00:00.260000", "T1")).unwrap();
            assert_eq!(op.flags.slow, slow, "threshold {}", threshold);
        }
    }

    proptest! {
        #[test]
        fn lines_without_timestamp_change_nothing(junk in "[a-z _,~0-9]{0,60}") {
            let mut c = Correlator::new(cfg(0.2));
            c.feed(&start("10:00:00.000000", "T1"));
            c.feed(&submit("10:00:00.010000", "T1", "0~4096"));
            let before_open = c.open_operations();
            let before = c.counters().clone();

            let line = format!("xx {} _do_op osd_op(x), finisher", junk);
            prop_assert!(c.feed(&line).is_none());
            prop_assert_eq!(c.open_operations(), before_open);
            prop_assert_eq!(c.counters(), &before);
        }

        #[test]
        fn monotonic_input_gives_non_negative_deltas(a in 0u32..500_000, b in 0u32..500_000) {
            let mut c = Correlator::new(cfg(0.2));
            let t0 = 0u32;
            let t1 = t0 + a;
            let t2 = t1 + b;
            let ts = |us: u32| format!("10:00:{:02}.{:06}", us / 1_000_000, us % 1_000_000);
            c.feed(&start(&ts(t0), "T"));
            c.feed(&submit(&ts(t1), "T", "0~4096"));
            let op = c.feed(&finish(&ts(t2), "T")).unwrap();
            prop_assert!(op.deltas.write >= 0.0);
            prop_assert!(op.deltas.finish >= 0.0);
        }
    }
}
