//! Upstream sample input.
//!
//! Samples arrive as a flat text source with one logical record per line.
//! Separator/header lines start with `=` and are filtered out; records are
//! normalized (full-width `￥` becomes `¥`, text is lowercased) before the
//! renderer and the ground-truth files see them, so the two always agree.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::pool::Task;

/// Errors that can occur while loading samples.
#[derive(Debug, Error)]
pub enum SampleError {
    /// The sample source file does not exist.
    #[error("Sample file not found: {0}")]
    NotFound(PathBuf),

    /// No usable records after filtering.
    #[error("No usable samples in {0}")]
    Empty(PathBuf),

    /// IO error while reading the source.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Loads, filters and normalizes sample records.
///
/// `limit` caps the number of records when greater than zero.
///
/// # Errors
///
/// Returns `SampleError::Empty` when filtering leaves nothing: a pipeline
/// without samples cannot proceed.
pub fn load_samples(path: &Path, limit: usize) -> Result<Vec<String>, SampleError> {
    if !path.exists() {
        return Err(SampleError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)?;
    let mut samples: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('='))
        .map(|line| line.replace('￥', "¥").to_lowercase())
        .collect();

    if limit > 0 {
        samples.truncate(limit);
    }

    if samples.is_empty() {
        return Err(SampleError::Empty(path.to_path_buf()));
    }

    info!(count = samples.len(), path = %path.display(), "Loaded samples");
    Ok(samples)
}

/// Builds one render task per sample.
///
/// Output bases are `sample_<n>` (1-based) under `ground_truth_dir`; the
/// index makes every base unique, which is what keeps concurrent workers
/// from ever writing to the same files.
pub fn make_render_tasks(samples: Vec<String>, ground_truth_dir: &Path, font: &str) -> Vec<Task> {
    samples
        .into_iter()
        .enumerate()
        .map(|(i, text)| {
            let base = ground_truth_dir.join(format!("sample_{}", i + 1));
            Task::new(i, text, base).with_resource(font)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn write_samples(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("samples.txt");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_filters_and_normalizes() {
        let temp = TempDir::new().unwrap();
        let path = write_samples(
            temp.path(),
            "=== batch 1 ===\nTotal: ￥100.00\n\n  Item A  \n=== end ===\n",
        );

        let samples = load_samples(&path, 0).unwrap();
        assert_eq!(samples, vec!["total: ¥100.00", "item a"]);
    }

    #[test]
    fn test_load_applies_limit() {
        let temp = TempDir::new().unwrap();
        let path = write_samples(temp.path(), "a\nb\nc\nd\n");

        let samples = load_samples(&path, 2).unwrap();
        assert_eq!(samples, vec!["a", "b"]);

        // Zero means unlimited
        let samples = load_samples(&path, 0).unwrap();
        assert_eq!(samples.len(), 4);
    }

    #[test]
    fn test_load_empty_after_filtering_is_error() {
        let temp = TempDir::new().unwrap();
        let path = write_samples(temp.path(), "=== only headers ===\n\n====\n");

        assert!(matches!(
            load_samples(&path, 0),
            Err(SampleError::Empty(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.txt");

        assert!(matches!(
            load_samples(&missing, 0),
            Err(SampleError::NotFound(_))
        ));
    }

    #[test]
    fn test_render_tasks_have_unique_output_bases() {
        let temp = TempDir::new().unwrap();
        let samples = vec!["one".to_string(), "two".to_string(), "three".to_string()];

        let tasks = make_render_tasks(samples, temp.path(), "DejaVu Sans");
        assert_eq!(tasks.len(), 3);

        let bases: HashSet<_> = tasks.iter().map(|t| t.output_base.clone()).collect();
        assert_eq!(bases.len(), 3);

        assert_eq!(tasks[0].index, 0);
        assert!(tasks[0].output_base.ends_with("sample_1"));
        assert_eq!(tasks[0].resource.as_deref(), Some("DejaVu Sans"));
        assert_eq!(tasks[2].payload, "three");
    }
}
