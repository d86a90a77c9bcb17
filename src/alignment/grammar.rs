//! Message grammar of bluestore debug logs.
//!
//! 2020-07-04 12:39:19.590177 7f92be2ac700 10 osd.160 771412 dequeue_op 0x55c7a60a12c0 prio 63 cost 4096 latency 0.001706 osd_op(...)
//! 2020-07-04 12:39:19.590301 7f92be2ac700 15 bluestore(/var/lib/ceph/osd/ceph-160) _write 17.5d5_head #17:aba88e4f:::rbd_data.5406.0000000000001818:head# 0x316200~200
//! 2020-07-04 12:39:19.590334 7f92be2ac700 20 bluestore(/var/lib/ceph/osd/ceph-160) _do_write_small 0x316200~200
//! 2020-07-04 12:39:19.590350 7f92be2ac700 20 bluestore(/var/lib/ceph/osd/ceph-160) _do_write_small  reading head 0x200 and tail 0x0
//!
//! 2020-07-04 12:39:19.590400 7f92be2ac700 20 bluestore(/var/lib/ceph/osd/ceph-160) _do_read  blob Blob(0x5634 blob([0x81eb46ec000~4000] csum crc32c/0x1000) use_tracker(0x1*0x4000 0x[4000]) SharedBlob(0x5635 sbid 0x0)) need 0x6000~200 cache has 0x[]
//!
//! Offsets and lengths are hex, with or without a `0x` prefix.

use crate::Result;

use regex::{Captures, Regex};
use serde::Serialize;

const HEX: &str = r"[0-9a-fx]+";

/// Timestamp, thread, level, logger and the message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub timestamp: &'a str,
    pub thread: &'a str,
    pub message: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectOpKind {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SmallWriteKind {
    WriteToUnused,
    DeferredWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Extent {
    pub offset: u64,
    pub len: u64,
}

/// Object identity as logged between `#` marks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectId {
    pub pool: u64,
    pub namespace: String,
    pub oid: String,
    pub snap: String,
    pub generation: String,
}

/// One entry of a blob's physical extent list. `offset` is None for an
/// unallocated (`!`) range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlobExtent {
    pub offset: Option<u64>,
    pub len: u64,
}

/// Allocation-unit usage of a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UseTracker {
    /// Single counter: `use_tracker(0x2000)`.
    Total(u64),
    /// Per-unit counters: `use_tracker(0x2*0x4000 0x[4000,2400])`.
    PerUnit { unit_size: u64, used: Vec<u64> },
}

/// Shared-blob reference count for one physical range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefEntry {
    pub offset: u64,
    pub len: u64,
    pub refs: u64,
}

/// Decoded `Blob(...)` dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Blob {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spanning: Option<u64>,
    pub extents: Vec<BlobExtent>,
    /// `+`-separated flags after `csum`, e.g. `shared` or `has_unused`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    pub csum_type: String,
    pub csum_chunk_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unused: Option<u64>,
    pub use_tracker: UseTracker,
    pub shared_blob: u64,
    pub sbid: u64,
    /// Present once the shared blob is loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_map: Option<Vec<RefEntry>>,
}

/// A recognized message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Dequeue {
        op_id: String,
        finish: bool,
    },
    /// `_write`/`read` request; `completed` is set on the `= n` result line.
    ObjectOp {
        kind: ObjectOpKind,
        pg: String,
        object: ObjectId,
        extent: Extent,
        completed: Option<u64>,
    },
    DoWrite {
        extent: Extent,
        have: u64,
        fadvise_flags: u64,
    },
    SmallWrite(Extent),
    SmallWriteHeadTail {
        head: u64,
        tail: u64,
    },
    SmallWritePlacement {
        kind: SmallWriteKind,
        extent: Extent,
    },
    DoRead {
        extent: Extent,
        object_size: u64,
    },
    /// `_do_read  blob ...`; `blob` is None when the dump does not decode.
    ReadBlob {
        blob: Option<Blob>,
        need: Extent,
        cache_has: Vec<Extent>,
    },
}

/// Compiled message patterns.
#[derive(Debug)]
pub struct Grammar {
    envelope: Regex,
    dequeue: Regex,
    object_op: Regex,
    do_write: Regex,
    small_write: Regex,
    small_head_tail: Regex,
    small_placement: Regex,
    do_read: Regex,
    read_blob: Regex,
    blob: Regex,
    tracker: Regex,
}

impl Grammar {
    pub fn new() -> Result<Self> {
        let oid = r"#(?P<pool>\d+):[0-9a-f]+:(?P<ns>[^:]*)::(?P<oid>[^:]+):(?P<snap>[^:]*)#(?P<gen>\S*)";
        let extent = format!(r"(?P<off>{HEX})~(?P<len>{HEX})");

        Ok(Self {
            envelope: Regex::new(
                r"^(?P<ts>\d{4}-\d{2}-\d{2}[ T][\d:.]+(?:[+-]\d{4})?) (?P<thread>[0-9A-Fa-f]+) \d+ \S+ (?P<msg>.*)$",
            )?,
            dequeue: Regex::new(r"^\d+ dequeue_op (?P<id>\S+) (?P<stage>finish|prio)")?,
            object_op: Regex::new(&format!(
                r"^(?P<kind>read|_write) (?P<pg>\S+) {oid} {extent}(?: = (?P<done>\d+))?"
            ))?,
            do_write: Regex::new(&format!(
                r"^_do_write {oid} {extent} - have (?P<have>{HEX}) \(\d+\) bytes fadvise_flags (?P<flags>{HEX})"
            ))?,
            small_write: Regex::new(&format!(r"^_do_write_small {extent}"))?,
            small_head_tail: Regex::new(&format!(
                r"^_do_write_small  reading head (?P<head>{HEX}) and tail (?P<tail>{HEX})"
            ))?,
            small_placement: Regex::new(&format!(
                r"^_do_write_small  (?P<kind>write to unused|deferred write) {extent}"
            ))?,
            do_read: Regex::new(&format!(r"^_do_read {extent} size (?P<size>{HEX}) \(\d+\)"))?,
            read_blob: Regex::new(&format!(
                r"^_do_read  blob Blob\((?P<blob>.*)\) need {extent} cache has 0x\[(?P<cache>[^\]]*)\]"
            ))?,
            blob: Regex::new(&format!(
                concat!(
                    r"^(?P<id>{HEX})(?: spanning (?P<span>\d+))? blob\(\[(?P<extents>[^\]]*)\] ",
                    r"csum(?:\+(?P<flags>\S+))? (?P<ctype>[^/\s]+)/(?P<chunk>{HEX})(?: unused=(?P<unused>{HEX}))?\) ",
                    r"use_tracker\((?P<tracker>[^)]*)\) SharedBlob\((?P<sb>{HEX}) ",
                    r"(?:loaded \(sbid (?P<lsbid>{HEX}) ref_map\((?P<refs>[^)]*)\)\)|sbid (?P<sbid>{HEX}))"
                ),
                HEX = HEX
            ))?,
            tracker: Regex::new(&format!(r"^(?P<n>{HEX})\*(?P<unit>{HEX}) 0x\[(?P<used>[0-9a-f,]*)\]$"))?,
        })
    }

    pub fn envelope<'a>(&self, line: &'a str) -> Option<Envelope<'a>> {
        let caps = self.envelope.captures(line)?;
        Some(Envelope {
            timestamp: caps.name("ts")?.as_str(),
            thread: caps.name("thread")?.as_str(),
            message: caps.name("msg")?.as_str(),
        })
    }

    /// Classify a message body. Unknown messages and malformed numbers give None.
    pub fn message(&self, msg: &str) -> Option<Message> {
        if let Some(c) = self.dequeue.captures(msg) {
            return Some(Message::Dequeue {
                op_id: c["id"].to_string(),
                finish: &c["stage"] == "finish",
            });
        }
        if let Some(c) = self.object_op.captures(msg) {
            let completed = match c.name("done") {
                Some(m) => Some(m.as_str().parse().ok()?),
                None => None,
            };
            return Some(Message::ObjectOp {
                kind: if &c["kind"] == "read" {
                    ObjectOpKind::Read
                } else {
                    ObjectOpKind::Write
                },
                pg: c["pg"].to_string(),
                object: ObjectId {
                    pool: c["pool"].parse().ok()?,
                    namespace: c["ns"].to_string(),
                    oid: c["oid"].to_string(),
                    snap: c["snap"].to_string(),
                    generation: c["gen"].to_string(),
                },
                extent: extent_of(&c)?,
                completed,
            });
        }
        if let Some(c) = self.do_write.captures(msg) {
            return Some(Message::DoWrite {
                extent: extent_of(&c)?,
                have: parse_hex(&c["have"])?,
                fadvise_flags: parse_hex(&c["flags"])?,
            });
        }
        if let Some(c) = self.small_write.captures(msg) {
            return Some(Message::SmallWrite(extent_of(&c)?));
        }
        if let Some(c) = self.small_head_tail.captures(msg) {
            return Some(Message::SmallWriteHeadTail {
                head: parse_hex(&c["head"])?,
                tail: parse_hex(&c["tail"])?,
            });
        }
        if let Some(c) = self.small_placement.captures(msg) {
            let kind = if &c["kind"] == "deferred write" {
                SmallWriteKind::DeferredWrite
            } else {
                SmallWriteKind::WriteToUnused
            };
            return Some(Message::SmallWritePlacement {
                kind,
                extent: extent_of(&c)?,
            });
        }
        if let Some(c) = self.do_read.captures(msg) {
            return Some(Message::DoRead {
                extent: extent_of(&c)?,
                object_size: parse_hex(&c["size"])?,
            });
        }
        if let Some(c) = self.read_blob.captures(msg) {
            return Some(Message::ReadBlob {
                blob: self.blob(&c["blob"]),
                need: extent_of(&c)?,
                cache_has: list(&c["cache"], parse_extent)?,
            });
        }
        None
    }

    /// Decode the inside of a `Blob(...)` dump.
    pub fn blob(&self, text: &str) -> Option<Blob> {
        let c = self.blob.captures(text)?;
        let (sbid, ref_map) = match c.name("lsbid") {
            Some(m) => (parse_hex(m.as_str())?, Some(list(&c["refs"], parse_ref)?)),
            None => (parse_hex(c.name("sbid")?.as_str())?, None),
        };
        Some(Blob {
            id: parse_hex(&c["id"])?,
            spanning: match c.name("span") {
                Some(m) => Some(m.as_str().parse().ok()?),
                None => None,
            },
            extents: list(&c["extents"], parse_blob_extent)?,
            flags: c
                .name("flags")
                .map(|m| m.as_str().split('+').map(str::to_string).collect())
                .unwrap_or_default(),
            csum_type: c["ctype"].to_string(),
            csum_chunk_size: parse_hex(&c["chunk"])?,
            unused: match c.name("unused") {
                Some(m) => Some(parse_hex(m.as_str())?),
                None => None,
            },
            use_tracker: self.use_tracker(&c["tracker"])?,
            shared_blob: parse_hex(&c["sb"])?,
            sbid,
            ref_map,
        })
    }

    fn use_tracker(&self, text: &str) -> Option<UseTracker> {
        let Some(c) = self.tracker.captures(text) else {
            return parse_hex(text).map(UseTracker::Total);
        };
        let used = list(&c["used"], parse_hex)?;
        if used.len() as u64 != parse_hex(&c["n"])? {
            return None;
        }
        Some(UseTracker::PerUnit {
            unit_size: parse_hex(&c["unit"])?,
            used,
        })
    }
}

/// Parse a comma-separated list; an empty string is an empty list.
fn list<T>(text: &str, item: impl Fn(&str) -> Option<T>) -> Option<Vec<T>> {
    if text.is_empty() {
        return Some(Vec::new());
    }
    text.split(',').map(item).collect()
}

fn parse_extent(s: &str) -> Option<Extent> {
    let (off, len) = s.split_once('~')?;
    Some(Extent {
        offset: parse_hex(off)?,
        len: parse_hex(len)?,
    })
}

fn parse_blob_extent(s: &str) -> Option<BlobExtent> {
    let (off, len) = s.split_once('~')?;
    let offset = if off == "!" { None } else { Some(parse_hex(off)?) };
    Some(BlobExtent {
        offset,
        len: parse_hex(len)?,
    })
}

/// `offset~len=refs`
fn parse_ref(s: &str) -> Option<RefEntry> {
    let (extent, refs) = s.split_once('=')?;
    let extent = parse_extent(extent)?;
    Some(RefEntry {
        offset: extent.offset,
        len: extent.len,
        refs: refs.parse().ok()?,
    })
}

fn extent_of(c: &Captures<'_>) -> Option<Extent> {
    Some(Extent {
        offset: parse_hex(&c["off"])?,
        len: parse_hex(&c["len"])?,
    })
}

/// Parse hex with an optional `0x` prefix.
pub fn parse_hex(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn g() -> Grammar {
        Grammar::new().unwrap()
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex("0x316200"), Some(0x316200));
        assert_eq!(parse_hex("200"), Some(0x200));
        assert_eq!(parse_hex("0x"), None);
        assert_eq!(parse_hex("xx"), None);
    }

    #[test]
    fn envelope_split() {
        let e = g()
            .envelope("2020-07-04 12:39:19.590177 7f92be2ac700 10 osd.160 771412 dequeue_op 0x55 prio 63")
            .unwrap();
        assert_eq!(e.timestamp, "2020-07-04 12:39:19.590177");
        assert_eq!(e.thread, "7f92be2ac700");
        assert_eq!(e.message, "771412 dequeue_op 0x55 prio 63");
        assert!(g().envelope("not a log line").is_none());
    }

    #[test]
    fn dequeue_messages() {
        assert_eq!(
            g().message("771412 dequeue_op 0x55c7a60a12c0 prio 63 cost 4096 latency 0.001706 osd_op(x)"),
            Some(Message::Dequeue {
                op_id: "0x55c7a60a12c0".into(),
                finish: false
            })
        );
        assert_eq!(
            g().message("771412 dequeue_op 0x55c7a60a12c0 finish"),
            Some(Message::Dequeue {
                op_id: "0x55c7a60a12c0".into(),
                finish: true
            })
        );
    }

    #[test]
    fn object_op_messages() {
        let m = g()
            .message("_write 17.5d5_head #17:aba88e4f:::rbd_data.5406.0000000000001818:head# 0x316200~200 = 512")
            .unwrap();
        assert_eq!(
            m,
            Message::ObjectOp {
                kind: ObjectOpKind::Write,
                pg: "17.5d5_head".into(),
                object: ObjectId {
                    pool: 17,
                    namespace: "".into(),
                    oid: "rbd_data.5406.0000000000001818".into(),
                    snap: "head".into(),
                    generation: "".into(),
                },
                extent: Extent {
                    offset: 0x316200,
                    len: 0x200
                },
                completed: Some(512),
            }
        );
        let m = g().message("read 17.5d5_head #17:aba88e4f:::obj:head# 0x0~1000").unwrap();
        assert!(matches!(
            m,
            Message::ObjectOp {
                kind: ObjectOpKind::Read,
                completed: None,
                ..
            }
        ));
    }

    #[test]
    fn write_path_messages() {
        assert_eq!(
            g().message("_do_write #17:d2244b5f:::rbd_data.194a.000000000000011d:head# 0x3c0400~4000 - have 0x400000 (4194304) bytes fadvise_flags 0x20"),
            Some(Message::DoWrite {
                extent: Extent { offset: 0x3c0400, len: 0x4000 },
                have: 0x400000,
                fadvise_flags: 0x20
            })
        );
        assert_eq!(
            g().message("_do_write_small 0x6576~9"),
            Some(Message::SmallWrite(Extent { offset: 0x6576, len: 9 }))
        );
        assert_eq!(
            g().message("_do_write_small  reading head 0x576 and tail 0x0"),
            Some(Message::SmallWriteHeadTail { head: 0x576, tail: 0 })
        );
        assert_eq!(
            g().message("_do_write_small  deferred write 0xf000~1000 of mutable Blob(0x5634 blob([!~c000] csum))"),
            Some(Message::SmallWritePlacement {
                kind: SmallWriteKind::DeferredWrite,
                extent: Extent { offset: 0xf000, len: 0x1000 }
            })
        );
        assert_eq!(
            g().message("_do_write_small  write to unused 0x4000~1000 pad 0x0 + 0x0 of mutable Blob(...)"),
            Some(Message::SmallWritePlacement {
                kind: SmallWriteKind::WriteToUnused,
                extent: Extent { offset: 0x4000, len: 0x1000 }
            })
        );
        assert_eq!(g().message("_do_write_small  lex 0x6576~9: 0x6576~9 Blob(...)"), None);
    }

    #[test]
    fn read_path_messages() {
        assert_eq!(
            g().message("_do_read 0x0~16 size 0x16 (22)"),
            Some(Message::DoRead {
                extent: Extent { offset: 0, len: 0x16 },
                object_size: 0x16
            })
        );
    }

    #[test]
    fn read_blob_message() {
        let m = g()
            .message("_do_read  blob Blob(0x56342362d250 blob([0x81eb46ec000~4000,0x5e743e14000~4000] csum crc32c/0x1000) use_tracker(0x2*0x4000 0x[4000,2400]) SharedBlob(0x56342362b5e0 sbid 0x0)) need 0x6000~200 cache has 0x[]")
            .unwrap();
        let Message::ReadBlob { blob, need, cache_has } = m else {
            panic!("not a blob read");
        };
        assert_eq!(need, Extent { offset: 0x6000, len: 0x200 });
        assert!(cache_has.is_empty());
        let blob = blob.unwrap();
        assert_eq!(blob.id, 0x56342362d250);
        assert_eq!(blob.spanning, None);
        assert_eq!(
            blob.extents,
            vec![
                BlobExtent { offset: Some(0x81eb46ec000), len: 0x4000 },
                BlobExtent { offset: Some(0x5e743e14000), len: 0x4000 },
            ]
        );
        assert_eq!(blob.csum_type, "crc32c");
        assert_eq!(blob.csum_chunk_size, 0x1000);
        assert_eq!(
            blob.use_tracker,
            UseTracker::PerUnit { unit_size: 0x4000, used: vec![0x4000, 0x2400] }
        );
        assert_eq!(blob.shared_blob, 0x56342362b5e0);
        assert_eq!(blob.sbid, 0);
        assert_eq!(blob.ref_map, None);

        let m = g()
            .message("_do_read  blob Blob(0x5633f0146b50 blob([0x87d3a9c8000~4000,0x87da9b84000~4000,0x87dac5c0000~4000,0x1bac79f8000~4000] csum crc32c/0x1000) use_tracker(0x4*0x4000 0x[4000,4000,4000,4000]) SharedBlob(0x5633cdd3a0d0 sbid 0x0)) need 0x6000~600 cache has 0x[6000~600]")
            .unwrap();
        assert!(matches!(
            m,
            Message::ReadBlob { ref cache_has, .. } if cache_has == &[Extent { offset: 0x6000, len: 0x600 }]
        ));
    }

    #[test]
    fn blob_variants() {
        let b = g()
            .blob("0x56339265e4d0 blob([!~8000,0x8c97ad84000~4000] csum crc32c/0x1000) use_tracker(0x3*0x4000 0x[0,0,4000]) SharedBlob(0x56339265f340 sbid 0x0)")
            .unwrap();
        assert_eq!(b.extents[0], BlobExtent { offset: None, len: 0x8000 });

        let b = g()
            .blob("0x56346f687ab0 spanning 0 blob([0x192343a0000~4000,0x5bd1d91c000~4000] csum crc32c/0x1000) use_tracker(0x2*0x4000 0x[253f,181a]) SharedBlob(0x5634ba40c460 sbid 0x0)")
            .unwrap();
        assert_eq!(b.spanning, Some(0));

        let b = g()
            .blob("0x5634799bbd50 blob([!~4000,0x74a208c000~4000] csum+has_unused crc32c/0x1000 unused=0xfff) use_tracker(0x2*0x4000 0x[0,2000]) SharedBlob(0x5634799bd790 sbid 0x0)")
            .unwrap();
        assert_eq!(b.flags, vec!["has_unused".to_string()]);
        assert_eq!(b.unused, Some(0xfff));

        let b = g()
            .blob("0x1 blob([0x30519e54000~10000] csum+shared crc32c/0x1000) use_tracker(0x10000) SharedBlob(0x2 loaded (sbid 0x8027a6 ref_map(0x30519e54000~10000=2,0x76452b98000~4000=1)))")
            .unwrap();
        assert_eq!(b.use_tracker, UseTracker::Total(0x10000));
        assert_eq!(b.sbid, 0x8027a6);
        assert_eq!(
            b.ref_map,
            Some(vec![
                RefEntry { offset: 0x30519e54000, len: 0x10000, refs: 2 },
                RefEntry { offset: 0x76452b98000, len: 0x4000, refs: 1 },
            ])
        );

        assert_eq!(g().blob("0x1 something else"), None);
    }
}
