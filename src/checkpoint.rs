//! Checkpoint selection.
//!
//! The training tool emits periodic checkpoint files named
//! `<model>_<loss>_<iteration>_<total>.checkpoint`. Selection re-scans the
//! directory on every call, parses the embedded loss out of each name and
//! returns the checkpoint with the minimum loss. Files whose names do not
//! parse are excluded, never treated as zero-loss. Ties on loss are broken
//! by lexicographically smallest file name so selection is deterministic
//! regardless of directory enumeration order.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

/// A candidate checkpoint with its parsed loss.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Path of the checkpoint file.
    pub path: PathBuf,
    /// Loss value embedded in the file name (lower is better).
    pub loss: f64,
}

fn loss_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"_([0-9]+(?:\.[0-9]+)?)_\d+_\d+\.checkpoint$").expect("valid regex")
    })
}

/// Parses the loss metric out of a checkpoint file name.
///
/// Returns `None` for names that do not match the pattern or whose metric
/// is not a finite number.
pub fn parse_loss(file_name: &str) -> Option<f64> {
    let captures = loss_pattern().captures(file_name)?;
    let loss: f64 = captures.get(1)?.as_str().parse().ok()?;
    loss.is_finite().then_some(loss)
}

/// Scans `dir` for checkpoint files and returns the one with minimum loss.
///
/// Returns `Ok(None)` when no file name parses; zero candidates is a
/// reportable condition for the caller, not an error here.
///
/// # Errors
///
/// Returns an error only if the directory cannot be read.
pub fn select_best(dir: &Path) -> std::io::Result<Option<Checkpoint>> {
    let mut candidates: Vec<(String, Checkpoint)> = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(loss) = parse_loss(&name) {
            candidates.push((
                name,
                Checkpoint {
                    path: entry.path(),
                    loss,
                },
            ));
        }
    }

    debug!(dir = %dir.display(), candidates = candidates.len(), "Scanned checkpoints");

    // Lexicographic name order first, then strictly-smaller loss wins, so
    // equal-loss ties resolve to the smallest file name.
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    let mut best: Option<Checkpoint> = None;
    for (_, candidate) in candidates {
        match &best {
            Some(current) if candidate.loss >= current.loss => {}
            _ => best = Some(candidate),
        }
    }

    Ok(best)
}
