//! Log helpers: tails for error messages and the `devhost logs` command.
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use tracing::debug;

/// Returns the last `lines` lines of `path`, or `None` if it is missing or empty.
pub fn tail_lines(path: &Path, lines: usize) -> Option<String> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            debug!("Unable to read log {}: {err}", path.display());
            return None;
        }
    };

    let reader = BufReader::new(file);
    let mut buffer: VecDeque<String> = VecDeque::with_capacity(lines);
    for line in reader.lines().map_while(Result::ok) {
        if buffer.len() == lines {
            buffer.pop_front();
        }
        buffer.push_back(line);
    }

    if buffer.iter().all(|line| line.trim().is_empty()) {
        return None;
    }

    Some(buffer.into_iter().collect::<Vec<_>>().join("\n"))
}

/// Whether a log tail looks like a failed bind on an occupied port.
pub fn indicates_port_conflict(tail: &str) -> bool {
    tail.lines().rev().any(|line| {
        let lower = line.to_ascii_lowercase();
        lower.contains("address already in use")
            || lower.contains("os error 48")
            || lower.contains("os error 98")
            || lower.contains("eaddrinuse")
    })
}

/// Tail of `path` with a port-conflict hint prepended when applicable.
pub fn failure_context(path: &Path, lines: usize) -> Option<String> {
    let tail = tail_lines(path, lines)?;
    if indicates_port_conflict(&tail) {
        Some(format!("(port already in use)\n{tail}"))
    } else {
        Some(tail)
    }
}

/// Prints the last `lines` lines of a log file to stdout.
pub fn show_log(path: &Path, lines: usize) -> io::Result<()> {
    if !path.exists() {
        eprintln!("Error: log file {} not found.", path.display());
        return Ok(());
    }

    if let Some(tail) = tail_lines(path, lines) {
        println!("{tail}");
    }

    Ok(())
}
