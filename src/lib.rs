//! ocrforge: OCR training pipeline orchestrator.
//!
//! Drives the Tesseract training toolchain end to end: renders synthetic text
//! samples into images, converts them to the LSTM training format, runs the
//! trainer and packages the checkpoint with the lowest loss.

// Core modules
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod exec;
pub mod fonts;
pub mod logsink;
pub mod pipeline;
pub mod pool;
pub mod samples;

// Re-export commonly used types
pub use checkpoint::{select_best, Checkpoint};
pub use config::{PipelineConfig, ToolCommands};
pub use pipeline::{PipelineStage, StageError, TrainingPipeline};
pub use pool::{run_batch, Task, TaskResult};
