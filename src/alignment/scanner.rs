//! Per-thread collection of object ops between `dequeue_op ... prio` and
//! `dequeue_op ... finish`, with their alignment against configured units.

use crate::alignment::grammar::{
    Blob, Envelope, Extent, Grammar, Message, ObjectId, ObjectOpKind, SmallWriteKind,
};

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    /// Start and end on a unit boundary.
    Full,
    StartOnly,
    /// Misaligned start, but a whole number of units long.
    LengthOnly,
    Unaligned,
}

impl Alignment {
    pub fn of(extent: Extent, unit: u64) -> Self {
        let end = extent.offset.saturating_add(extent.len);
        if extent.offset % unit == 0 {
            if end % unit == 0 {
                Alignment::Full
            } else {
                Alignment::StartOnly
            }
        } else if extent.len % unit == 0 {
            Alignment::LengthOnly
        } else {
            Alignment::Unaligned
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoWrite {
    #[serde(flatten)]
    pub extent: Extent,
    pub have: u64,
    pub fadvise_flags: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmallWrite {
    #[serde(flatten)]
    pub extent: Extent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tail: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<SmallWriteKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Extent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoRead {
    #[serde(flatten)]
    pub extent: Extent,
    pub object_size: u64,
}

/// A blob consulted by a read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobRead {
    pub need: Extent,
    pub cache_has: Vec<Extent>,
    /// None when the blob dump did not decode.
    pub blob: Option<Blob>,
}

/// One `_write` or `read` request against an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectOp {
    pub kind: ObjectOpKind,
    pub pg: String,
    #[serde(flatten)]
    pub object: ObjectId,
    #[serde(flatten)]
    pub extent: Extent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len_completed: Option<u64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub has_subop: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub do_write: Option<DoWrite>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub small_writes: Vec<SmallWrite>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reads: Vec<DoRead>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blobs: Vec<BlobRead>,
    /// Unit size in bytes -> alignment class.
    pub alignment: BTreeMap<u64, Alignment>,
}

/// Everything one thread did for one dequeued op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DequeuedOp {
    pub thread: String,
    pub op_id: String,
    pub started: String,
    pub finished: String,
    pub ops: Vec<ObjectOp>,
    /// Raw lines of this thread from dequeue to finish.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<String>,
}

#[derive(Debug)]
struct ThreadState {
    op_id: String,
    started: String,
    ops: Vec<ObjectOp>,
    lines: Vec<String>,
}

/// Streaming scanner. One open [`ThreadState`] per thread id at most.
#[derive(Debug)]
pub struct Scanner {
    grammar: Grammar,
    units: Vec<u64>,
    record_lines: bool,
    threads: HashMap<String, ThreadState>,
}

impl Scanner {
    pub fn new(grammar: Grammar, units: Vec<u64>, record_lines: bool) -> Self {
        Self {
            grammar,
            units,
            record_lines,
            threads: HashMap::new(),
        }
    }

    /// Process one line; returns the dequeued op it closed, if any.
    pub fn feed(&mut self, line: &str) -> Option<DequeuedOp> {
        let Envelope {
            timestamp,
            thread,
            message,
        } = self.grammar.envelope(line)?;
        let msg = self.grammar.message(message);

        match msg {
            Some(Message::Dequeue {
                op_id,
                finish: false,
            }) => {
                let lines = if self.record_lines {
                    vec![line.to_string()]
                } else {
                    Vec::new()
                };
                self.threads.insert(
                    thread.to_string(),
                    ThreadState {
                        op_id,
                        started: timestamp.to_string(),
                        ops: Vec::new(),
                        lines,
                    },
                );
                None
            }
            Some(Message::Dequeue { finish: true, .. }) => {
                let mut state = self.threads.remove(thread)?;
                if self.record_lines {
                    state.lines.push(line.to_string());
                }
                Some(self.close(thread, timestamp, state))
            }
            msg => {
                let Some(state) = self.threads.get_mut(thread) else {
                    tracing::trace!(thread, "line outside a dequeued op, skipped");
                    return None;
                };
                if self.record_lines {
                    state.lines.push(line.to_string());
                }
                if let Some(msg) = msg {
                    apply(state, msg, line);
                }
                None
            }
        }
    }

    fn close(&self, thread: &str, finished: &str, state: ThreadState) -> DequeuedOp {
        let mut ops = state.ops;
        for op in &mut ops {
            op.alignment = self
                .units
                .iter()
                .map(|&unit| (unit, Alignment::of(op.extent, unit)))
                .collect();
        }
        DequeuedOp {
            thread: thread.to_string(),
            op_id: state.op_id,
            started: state.started,
            finished: finished.to_string(),
            ops,
            lines: state.lines,
        }
    }
}

/// Fold one non-dequeue message into the thread's open op.
fn apply(state: &mut ThreadState, msg: Message, line: &str) {
    match msg {
        Message::Dequeue { .. } => {}
        Message::ObjectOp {
            kind,
            pg,
            completed: Some(done),
            ..
        } => match state.ops.last_mut() {
            Some(last) => last.len_completed = Some(done),
            None => tracing::debug!(line, "{:?} result on {} without a request", kind, pg),
        },
        Message::ObjectOp {
            kind,
            pg,
            object,
            extent,
            completed: None,
        } => {
            if let Some(last) = state.ops.last_mut() {
                last.has_subop = true;
            }
            state.ops.push(ObjectOp {
                kind,
                pg,
                object,
                extent,
                len_completed: None,
                has_subop: false,
                do_write: None,
                small_writes: Vec::new(),
                reads: Vec::new(),
                blobs: Vec::new(),
                alignment: BTreeMap::new(),
            });
        }
        Message::DoWrite {
            extent,
            have,
            fadvise_flags,
        } => match state.ops.last_mut() {
            Some(last) if last.do_write.is_none() => {
                last.do_write = Some(DoWrite {
                    extent,
                    have,
                    fadvise_flags,
                });
            }
            Some(_) => tracing::warn!(line, "second _do_write for one request, ignored"),
            None => tracing::debug!(line, "_do_write without a request, skipped"),
        },
        Message::SmallWrite(extent) => match state.ops.last_mut() {
            Some(last) => last.small_writes.push(SmallWrite {
                extent,
                head: None,
                tail: None,
                placement: None,
                target: None,
            }),
            None => tracing::debug!(line, "_do_write_small without a request, skipped"),
        },
        Message::SmallWriteHeadTail { head, tail } => {
            if let Some(small) = last_small_write(state) {
                small.head = Some(head);
                small.tail = Some(tail);
            }
        }
        Message::SmallWritePlacement { kind, extent } => {
            if let Some(small) = last_small_write(state) {
                small.placement = Some(kind);
                small.target = Some(extent);
            }
        }
        Message::DoRead {
            extent,
            object_size,
        } => match state.ops.last_mut() {
            Some(last) => last.reads.push(DoRead {
                extent,
                object_size,
            }),
            None => tracing::debug!(line, "_do_read without a request, skipped"),
        },
        Message::ReadBlob {
            blob,
            need,
            cache_has,
        } => {
            if blob.is_none() {
                tracing::debug!(line, "blob dump not decoded");
            }
            match state.ops.last_mut() {
                Some(last) => last.blobs.push(BlobRead {
                    need,
                    cache_has,
                    blob,
                }),
                None => tracing::debug!(line, "blob read without a request, skipped"),
            }
        }
    }
}

fn last_small_write(state: &mut ThreadState) -> Option<&mut SmallWrite> {
    state.ops.last_mut()?.small_writes.last_mut()
}
