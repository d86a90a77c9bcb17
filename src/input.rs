//! Line sources: files (plain or gzip) or stdin. Gzip is detected by its
//! magic bytes (1F 8B 08), not the file name.

use crate::Result;
use crate::diagnostics;

use anyhow::Context;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::Path;

const GZIP_MAGIC: [u8; 3] = [0x1F, 0x8B, 0x08];

/// Open `path` for line reading, decompressing gzip content transparently.
pub fn open_lines(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| {
        diagnostics::error_message(format!("open input file {}", path.display()))
    })?;
    sniff_compression(file)
        .with_context(|| diagnostics::error_message(format!("read input file {}", path.display())))
}

/// Peek at the first bytes of `inner` and pick a plain or gzip reader. The
/// peeked bytes are chained back in front of the stream.
fn sniff_compression<R: Read + 'static>(mut inner: R) -> io::Result<Box<dyn BufRead>> {
    let mut head = [0u8; 3];
    let mut n = 0;
    while n < head.len() {
        match inner.read(&mut head[n..])? {
            0 => break,
            read => n += read,
        }
    }

    let chained = Cursor::new(head[..n].to_vec()).chain(inner);
    if n == head.len() && head == GZIP_MAGIC {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(chained))))
    } else {
        Ok(Box::new(BufReader::new(chained)))
    }
}

/// Feed every line of the given files, in order, to `sink`. Reads stdin when
/// `files` is empty. Line terminators are stripped and invalid UTF-8 is
/// replaced.
pub fn for_each_line<F>(files: &[String], mut sink: F) -> Result<()>
where
    F: FnMut(&str) -> Result<()>,
{
    if files.is_empty() {
        let stdin = io::stdin();
        let reader = sniff_compression(stdin.lock()).context("read stdin")?;
        return drain(reader, "<stdin>", &mut sink);
    }

    for path in files {
        tracing::info!(file = %path, "reading");
        let reader = open_lines(Path::new(path))?;
        drain(reader, path, &mut sink)?;
    }
    Ok(())
}

fn drain<F>(mut reader: Box<dyn BufRead>, name: &str, sink: &mut F) -> Result<()>
where
    F: FnMut(&str) -> Result<()>,
{
    let mut buf = Vec::new();
    let mut lineno = 0usize;
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).with_context(|| {
            diagnostics::error_message(format!("read {} after line {}", name, lineno))
        })?;
        if n == 0 {
            break;
        }
        lineno += 1;

        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(['\n', '\r']);
        sink(line)?;
    }
    tracing::debug!(input = name, lines = lineno, "finished input");
    Ok(())
}
