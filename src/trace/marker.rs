//! Tokenization of filestore debug log lines and the lifecycle markers we
//! recognize in them.
//!
//! A line looks like:
//!
//! 2017-03-23 10:45:22.129218 7f3c8e7fc700 10 filestore(/var/lib/ceph/osd/ceph-1) write 2.5_head/#2:a8d66f37:::rbd_data.1:head# 1179648~4096 = 4096
//!
//! Tokens 0 and 1 are the timestamp, token 2 the thread id. Markers are
//! matched by plain substring search.

use crate::timestamp::parse_timestamp;

use chrono::NaiveDateTime;

/// Token index of the `offset~length` field on a write-submit line.
pub const WRITE_EXTENT_TOKEN: usize = 7;

/// A log line with its timestamp and thread id split off.
#[derive(Debug, Clone)]
pub struct LogLine<'a> {
    pub raw: &'a str,
    pub time: NaiveDateTime,
    pub thread: &'a str,
    tokens: Vec<&'a str>,
}

impl<'a> LogLine<'a> {
    /// Returns None when the line has no parseable leading timestamp or no
    /// thread token.
    pub fn parse(raw: &'a str) -> Option<Self> {
        let tokens: Vec<&str> = raw.split_whitespace().collect();
        if tokens.len() < 3 {
            return None;
        }
        let time = parse_timestamp(&format!("{} {}", tokens[0], tokens[1]))?;
        Some(Self {
            raw,
            time,
            thread: tokens[2],
            tokens,
        })
    }

    pub fn token(&self, idx: usize) -> Option<&'a str> {
        self.tokens.get(idx).copied()
    }

    /// The `offset~length` extent of a write-submit line.
    pub fn write_extent(&self) -> Option<(u64, u64)> {
        parse_extent(self.token(WRITE_EXTENT_TOKEN)?)
    }
}

/// Parse a decimal `offset~length` pair.
pub fn parse_extent(tok: &str) -> Option<(u64, u64)> {
    let (off, len) = tok.split_once('~')?;
    Some((off.parse().ok()?, len.parse().ok()?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Start,
    WriteSubmit,
    WriteStart,
    Finish,
}

/// Markers present in `line`, in processing order.
pub fn markers(line: &str) -> Vec<Marker> {
    let mut out = Vec::new();
    if is_start(line) {
        out.push(Marker::Start);
    }
    if is_write_submit(line) {
        out.push(Marker::WriteSubmit);
    }
    if is_write_start(line) {
        out.push(Marker::WriteStart);
    }
    if is_finish(line) {
        out.push(Marker::Finish);
    }
    out
}

/// `needle` occurs and `rest` occurs somewhere after it.
fn followed_by(line: &str, needle: &str, rest: &str) -> bool {
    match line.find(needle) {
        Some(idx) => line[idx + needle.len()..].contains(rest),
        None => false,
    }
}

/// Dispatch start: `" _do_op "` and the line ends with `" start"` after it.
pub fn is_start(line: &str) -> bool {
    const NEEDLE: &str = " _do_op ";
    match line.find(NEEDLE) {
        Some(idx) => line[idx + NEEDLE.len()..].ends_with(" start"),
        None => false,
    }
}

/// Level-10 filestore write: `" 10 filestore"` followed by `" write "`.
pub fn is_write_submit(line: &str) -> bool {
    followed_by(line, " 10 filestore", " write ")
}

/// Level-15 filestore write, logged on entry to the low-level write call:
/// `" 15 filestore"` followed by `" write "`.
pub fn is_write_start(line: &str) -> bool {
    followed_by(line, " 15 filestore", " write ")
}

/// Completion notification: `"_do_op "` followed by `", finisher"`.
pub fn is_finish(line: &str) -> bool {
    followed_by(line, "_do_op ", ", finisher")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const START: &str = "2017-03-23 10:45:22.000000 7f3c T1 osd.1 _do_op osd_op(client.1:5 rbd_data.1 [write 0~4096]) start";
    const SUBMIT: &str = "2017-03-23 10:45:22.050000 7f3c 10 filestore(/var/lib/ceph/osd/ceph-1) write 2.5_head/#2:a8d6:::rbd_data.1:head# 1179648~4096 = 4096";
    const WSTART: &str = "2017-03-23 10:45:22.040000 7f3c 15 filestore(/var/lib/ceph/osd/ceph-1) write 2.5_head/#2:a8d6:::rbd_data.1:head# 1179648~4096";
    const FINISH: &str = "2017-03-23 10:45:22.350000 7f3c osd.1 _do_op osd_op(client.1:5), finisher";

    #[test]
    fn tokenizes_timestamp_and_thread() {
        let l = LogLine::parse(SUBMIT).unwrap();
        assert_eq!(l.thread, "7f3c");
        assert_eq!(l.time.to_string(), "2017-03-23 10:45:22.050");
        assert_eq!(l.write_extent(), Some((1179648, 4096)));
    }

    #[test]
    fn rejects_lines_without_timestamp() {
        assert!(LogLine::parse("garbage line with words").is_none());
        assert!(LogLine::parse("2017-03-23 10:45:22.0").is_none());
        assert!(LogLine::parse("").is_none());
    }

    #[test]
    fn recognizes_each_marker() {
        assert_eq!(markers(START), vec![Marker::Start]);
        assert_eq!(markers(SUBMIT), vec![Marker::WriteSubmit]);
        assert_eq!(markers(WSTART), vec![Marker::WriteStart]);
        assert_eq!(markers(FINISH), vec![Marker::Finish]);
        assert!(markers("2017-03-23 10:45:22.0 t 20 osd.1 heartbeat").is_empty());
    }

    #[test]
    fn start_must_end_the_line() {
        assert!(!is_start("x _do_op osd_op(...) start then more"));
        assert!(!is_start("x _do_op start"));
        assert!(is_start("x _do_op a start"));
    }

    #[test]
    fn write_needs_write_after_filestore() {
        assert!(!is_write_submit("x write 10 filestore(/x) read 1~2"));
        assert!(is_write_submit("x 10 filestore write 1~2"));
        assert!(!is_write_submit("x 20 filestore(/x) write 1~2"));
    }

    #[test]
    fn extent_parsing() {
        assert_eq!(parse_extent("0~4096"), Some((0, 4096)));
        assert_eq!(parse_extent("0x10~4096"), None);
        assert_eq!(parse_extent("4096"), None);
        assert_eq!(parse_extent("1~"), None);
    }
}
