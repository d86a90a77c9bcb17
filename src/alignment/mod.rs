//! Alignment of object ops in bluestore debug logs.

pub mod grammar;
pub mod scanner;

pub use scanner::Scanner;

use crate::Result;
use crate::config::AlignmentConfig;
use crate::input;

use grammar::Grammar;
use std::io::Write;

/// Scan `files` (stdin when empty) and write each closed op as pretty JSON.
/// Returns how many ops were written.
pub fn run<W: Write>(files: &[String], config: &AlignmentConfig, out: &mut W) -> Result<usize> {
    let mut scanner = Scanner::new(Grammar::new()?, config.units.clone(), config.record_lines);
    let mut emitted = 0usize;

    input::for_each_line(files, |line| {
        if let Some(op) = scanner.feed(line) {
            serde_json::to_writer_pretty(&mut *out, &op)?;
            writeln!(out)?;
            emitted += 1;
        }
        Ok(())
    })?;

    tracing::info!(emitted, "alignment scan complete");
    Ok(emitted)
}
