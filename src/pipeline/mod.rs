//! Pipeline orchestration for OCR model training.
//!
//! This module provides the stage sequencer that turns text samples into a
//! packaged OCR model by driving the external training toolchain.
//!
//! # Architecture
//!
//! - **Stage**: the ordered stage list with pre/postconditions
//! - **Orchestrator**: the sequencer driving the stages
//! - **Report**: per-run JSON record of stage outcomes
//!
//! # Pipeline Flow
//!
//! 1. **GenerateSamples**: render samples into image + ground-truth pairs
//!    (worker pool, per-task retry)
//! 2. **ConvertFormat**: produce `.lstmf` training files (worker pool)
//! 3. **BuildManifest**: list every training artifact, absolute paths
//! 4. **ExtractBaseModel**: pull the LSTM component out of the base model
//! 5. **Train**: single long-running invocation, output streamed into the
//!    log as it arrives
//! 6. **SelectCheckpoint**: minimum-loss checkpoint wins
//! 7. **Package**: produce the final `.traineddata`
//!
//! # Example
//!
//! ```rust,ignore
//! use ocrforge::config::PipelineConfig;
//! use ocrforge::pipeline::TrainingPipeline;
//!
//! let config = PipelineConfig::from_env()?
//!     .with_samples_file("samples.txt")
//!     .with_num_samples(100);
//!
//! let pipeline = TrainingPipeline::new(config)?;
//! let report = pipeline.run().await?;
//!
//! println!("packaged: {:?}", report.packaged_model);
//! ```

pub mod orchestrator;
pub mod report;
pub mod stage;

// Re-export main types for convenience
pub use orchestrator::{PipelineError, StageError, TrainingPipeline};
pub use report::{PipelineReport, StageReport, StageStatus};
pub use stage::PipelineStage;
