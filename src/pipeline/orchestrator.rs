//! Pipeline sequencer.
//!
//! Drives the ordered stage list, gating each stage on the previous stage's
//! success. The two batch stages fan out over the worker pool; everything
//! else is a single sequential invocation. A failed precondition halts the
//! pipeline at that stage and reports the last completed stage plus the
//! unmet requirement; it never skips ahead.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::checkpoint::{self, Checkpoint};
use crate::config::{ConfigError, PipelineConfig};
use crate::exec::{run_with_retry, ToolError, ToolInvoker};
use crate::fonts::{FontError, FontResolver};
use crate::logsink::{LogAggregator, LogSender};
use crate::pool::{run_batch, BatchSummary, Task, TaskResult};
use crate::samples::{load_samples, make_render_tasks, SampleError};

use super::report::PipelineReport;
use super::stage::PipelineStage;

/// Fixed rendering parameters handed to the rendering tool.
const RENDER_PTSIZE: &str = "40";
const RENDER_CHAR_SPACING: &str = "0.0";
const RENDER_EXPOSURE: &str = "0";

/// Page segmentation mode for the conversion tool.
const PAGE_SEG_MODE: &str = "6";

/// A stage that could not complete, with the reason it halted.
#[derive(Debug, Error)]
#[error("Stage '{stage}' failed: {reason}")]
pub struct StageError {
    /// The stage that halted the pipeline.
    pub stage: PipelineStage,
    /// What went wrong, including unmet preconditions.
    pub reason: String,
}

/// Errors that can occur while running the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// External tool error (spawn failure or missing commands).
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Font resolution error.
    #[error("Font error: {0}")]
    Font(#[from] FontError),

    /// Sample input error.
    #[error("Sample error: {0}")]
    Samples(#[from] SampleError),

    /// A stage halted the pipeline.
    #[error(transparent)]
    Stage(#[from] StageError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn stage_err(stage: PipelineStage, reason: impl Into<String>) -> PipelineError {
    PipelineError::Stage(StageError {
        stage,
        reason: reason.into(),
    })
}

/// The training pipeline sequencer.
pub struct TrainingPipeline {
    config: PipelineConfig,
    invoker: ToolInvoker,
}

impl TrainingPipeline {
    /// Creates a new pipeline over a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if the configuration is invalid.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            invoker: ToolInvoker::new(),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the full stage sequence.
    ///
    /// The log aggregator starts before any worker is spawned and is
    /// drained after every worker has terminated, even when a stage fails.
    /// The run report is saved to the output directory either way.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that halted the pipeline. Per-task batch
    /// failures are not fatal unless they empty a downstream input set or
    /// fall below the configured success threshold.
    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        self.config.ensure_dirs()?;

        // Missing external commands are fatal before anything else runs
        self.invoker.check_required(&self.config.tools.required())?;

        let (log, aggregator) = LogAggregator::spawn(&self.config.log_file).await?;
        let mut report = PipelineReport::new();
        log.info("main", format!("pipeline run {} started", report.run_id))
            .await;

        let outcome = self.run_stages(&log, &mut report).await;

        match &outcome {
            Ok(()) => {
                log.info("main", "pipeline completed").await;
            }
            Err(e) => {
                let last = report
                    .last_completed()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "none".to_string());
                log.error(
                    "main",
                    format!("pipeline halted: {} (last completed stage: {})", e, last),
                )
                .await;
            }
        }

        report.finish();
        let report_path = self.config.output_dir.join("report.json");
        if let Err(e) = report.save(&report_path) {
            warn!(error = %e, path = %report_path.display(), "Failed to save run report");
        }

        // All workers have terminated; drain trailing events
        aggregator.shutdown(log).await?;

        outcome?;
        Ok(report)
    }

    /// Executes the stage sequence in order.
    async fn run_stages(
        &self,
        log: &LogSender,
        report: &mut PipelineReport,
    ) -> Result<(), PipelineError> {
        self.timed(
            PipelineStage::GenerateSamples,
            report,
            self.generate_samples(log),
        )
        .await?;

        self.timed(PipelineStage::ConvertFormat, report, self.convert_format(log))
            .await?;

        self.timed(PipelineStage::BuildManifest, report, self.build_manifest(log))
            .await?;

        self.timed(
            PipelineStage::ExtractBaseModel,
            report,
            self.extract_base_model(log),
        )
        .await?;

        self.timed(PipelineStage::Train, report, self.train(log)).await?;

        let best = self
            .timed(
                PipelineStage::SelectCheckpoint,
                report,
                self.select_checkpoint(log),
            )
            .await?;
        report.best_checkpoint = Some(best.path.clone());
        report.best_loss = Some(best.loss);

        let packaged = self
            .timed(PipelineStage::Package, report, self.package(&best, log))
            .await?;
        report.packaged_model = Some(packaged);

        if !self.config.keep_intermediates {
            self.clean_intermediates(log).await;
        }

        Ok(())
    }

    /// Times a stage and records its outcome in the report.
    async fn timed<T, Fut>(
        &self,
        stage: PipelineStage,
        report: &mut PipelineReport,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<(T, Option<BatchSummary>), PipelineError>>,
    {
        let start = Instant::now();
        match fut.await {
            Ok((value, batch)) => {
                report.record_completed(stage, start.elapsed(), batch);
                Ok(value)
            }
            Err(e) => {
                report.record_failed(stage, start.elapsed(), &e.to_string());
                Err(e)
            }
        }
    }

    /// Stage 1: render every sample into an image + ground-truth pair.
    async fn generate_samples(
        &self,
        log: &LogSender,
    ) -> Result<((), Option<BatchSummary>), PipelineError> {
        let stage = PipelineStage::GenerateSamples;

        let resolver = FontResolver::new(&self.invoker, &self.config.tools);
        resolver.refresh_cache().await?;
        let fonts = resolver.resolve_all(&self.config.fonts).await?;
        let font = &fonts[0];

        let samples = load_samples(&self.config.samples_file, self.config.num_samples)?;
        log.info(
            "main",
            format!("rendering {} samples with font '{}'", samples.len(), font),
        )
        .await;

        let tasks = make_render_tasks(samples, &self.config.ground_truth_dir, font);
        let results = run_batch(tasks, self.config.max_parallel, |task| {
            self.render_task(task, log)
        })
        .await;

        let summary = BatchSummary::from_results(&results);
        if !summary.meets_threshold(self.config.min_success_ratio) {
            return Err(stage_err(
                stage,
                format!(
                    "only {} of {} samples rendered (required ratio {})",
                    summary.succeeded, summary.total, self.config.min_success_ratio
                ),
            ));
        }

        log.info(
            "main",
            format!("rendered {} of {} samples", summary.succeeded, summary.total),
        )
        .await;
        Ok(((), Some(summary)))
    }

    /// Renders one sample. Per-task failures are recoverable.
    async fn render_task(&self, task: Task, log: &LogSender) -> TaskResult {
        let source = format!("render-{}", task.index);
        let font = task.resource.as_deref().unwrap_or_default();
        let text_path = task.output_base.with_extension("txt");
        let tif_path = task.output_base.with_extension("tif");
        let gt_path = task.output_base.with_extension("gt.txt");

        if let Err(e) = tokio::fs::write(&text_path, &task.payload).await {
            return TaskResult::failure(task.index, format!("failed to write text file: {}", e));
        }

        let args = vec![
            "--font".to_string(),
            font.to_string(),
            "--outputbase".to_string(),
            task.output_base.to_string_lossy().to_string(),
            "--text".to_string(),
            text_path.to_string_lossy().to_string(),
            "--fonts_dir".to_string(),
            self.config.fonts_dir.to_string_lossy().to_string(),
            "--ptsize".to_string(),
            RENDER_PTSIZE.to_string(),
            "--char_spacing".to_string(),
            RENDER_CHAR_SPACING.to_string(),
            "--exposure".to_string(),
            RENDER_EXPOSURE.to_string(),
        ];

        let args_ref = &args;
        let source_ref = &source;
        let attempted = run_with_retry(self.config.render_retry, |attempt| async move {
            log.debug(
                source_ref,
                format!(
                    "invoking {} (attempt {})",
                    self.config.tools.text2image, attempt
                ),
            )
            .await;
            self.invoker.run(&self.config.tools.text2image, args_ref).await
        })
        .await;

        // The temp text file is only an input to the renderer
        let _ = tokio::fs::remove_file(&text_path).await;

        let attempted = match attempted {
            Ok(attempted) => attempted,
            Err(e) => {
                log.error(&source, format!("render spawn failed: {}", e)).await;
                return TaskResult::failure(task.index, e.to_string());
            }
        };

        if !attempted.is_success() {
            let detail = format!(
                "rendering failed after {} attempts: {}",
                attempted.attempts,
                attempted.output.stderr.trim()
            );
            log.error(&source, &detail).await;
            return TaskResult::failure(task.index, detail);
        }

        if let Err(e) = tokio::fs::write(&gt_path, &task.payload).await {
            let detail = format!("failed to write ground-truth file: {}", e);
            log.error(&source, &detail).await;
            return TaskResult::failure(task.index, detail);
        }

        if !tif_path.exists() {
            let detail = format!(
                "renderer exited successfully but {} is missing",
                tif_path.display()
            );
            log.error(&source, &detail).await;
            return TaskResult::failure(task.index, detail);
        }

        log.info(&source, format!("rendered {}", tif_path.display()))
            .await;
        TaskResult::success(task.index, vec![tif_path, gt_path])
    }

    /// Stage 2: convert every rendered image into a training-format file.
    async fn convert_format(
        &self,
        log: &LogSender,
    ) -> Result<((), Option<BatchSummary>), PipelineError> {
        let stage = PipelineStage::ConvertFormat;

        // Deterministic re-scan rather than relying on batch arrival order
        let tifs = list_sorted(&self.config.ground_truth_dir, "tif")?;
        if tifs.is_empty() {
            return Err(stage_err(stage, "no rendered images found"));
        }
        log.info("main", format!("converting {} images", tifs.len()))
            .await;

        let tasks: Vec<Task> = tifs
            .iter()
            .enumerate()
            .map(|(i, tif)| Task::new(i, tif.to_string_lossy(), tif.with_extension("")))
            .collect();

        let results = run_batch(tasks, self.config.max_parallel, |task| {
            self.convert_task(task, log)
        })
        .await;

        let summary = BatchSummary::from_results(&results);
        if !summary.meets_threshold(self.config.min_success_ratio) {
            return Err(stage_err(
                stage,
                format!(
                    "only {} of {} images converted (required ratio {})",
                    summary.succeeded, summary.total, self.config.min_success_ratio
                ),
            ));
        }

        log.info(
            "main",
            format!("converted {} of {} images", summary.succeeded, summary.total),
        )
        .await;
        Ok(((), Some(summary)))
    }

    /// Converts one image. Missing ground truth is a non-retryable skip.
    async fn convert_task(&self, task: Task, log: &LogSender) -> TaskResult {
        let source = format!("convert-{}", task.index);
        let tif_path = PathBuf::from(&task.payload);
        let gt_path = task.output_base.with_extension("gt.txt");
        let lstmf_path = task.output_base.with_extension("lstmf");

        // Precondition failure: report immediately, never invoke the tool
        if !gt_path.exists() {
            let detail = format!("missing ground-truth file {}", gt_path.display());
            log.error(&source, &detail).await;
            return TaskResult::failure(task.index, detail);
        }

        let args = vec![
            tif_path.to_string_lossy().to_string(),
            task.output_base.to_string_lossy().to_string(),
            "-l".to_string(),
            self.config.lang.clone(),
            "--psm".to_string(),
            PAGE_SEG_MODE.to_string(),
            "--tessdata-dir".to_string(),
            self.config.tessdata_dir.to_string_lossy().to_string(),
            "lstm.train".to_string(),
        ];

        let args_ref = &args;
        let source_ref = &source;
        let attempted = run_with_retry(self.config.convert_retry, |attempt| async move {
            log.debug(
                source_ref,
                format!(
                    "invoking {} (attempt {})",
                    self.config.tools.tesseract, attempt
                ),
            )
            .await;
            self.invoker.run(&self.config.tools.tesseract, args_ref).await
        })
        .await;

        let attempted = match attempted {
            Ok(attempted) => attempted,
            Err(e) => {
                log.error(&source, format!("conversion spawn failed: {}", e))
                    .await;
                return TaskResult::failure(task.index, e.to_string());
            }
        };

        if !attempted.is_success() {
            let detail = format!(
                "conversion failed after {} attempts: {}",
                attempted.attempts,
                attempted.output.stderr.trim()
            );
            log.error(&source, &detail).await;
            return TaskResult::failure(task.index, detail);
        }

        if !lstmf_path.exists() {
            let detail = format!(
                "converter exited successfully but {} is missing",
                lstmf_path.display()
            );
            log.error(&source, &detail).await;
            return TaskResult::failure(task.index, detail);
        }

        log.info(&source, format!("produced {}", lstmf_path.display()))
            .await;
        TaskResult::success(task.index, vec![lstmf_path])
    }

    /// Stage 3: write the manifest of training artifacts.
    async fn build_manifest(
        &self,
        log: &LogSender,
    ) -> Result<(usize, Option<BatchSummary>), PipelineError> {
        let stage = PipelineStage::BuildManifest;

        let artifacts = list_sorted(&self.config.ground_truth_dir, "lstmf")?;
        if artifacts.is_empty() {
            // Never write an empty manifest
            return Err(stage_err(
                stage,
                "no training artifacts produced by the conversion stage",
            ));
        }

        let mut lines = String::new();
        for artifact in &artifacts {
            let absolute = std::fs::canonicalize(artifact)?;
            lines.push_str(&absolute.to_string_lossy());
            lines.push('\n');
        }

        let manifest = self.config.manifest_path();
        tokio::fs::write(&manifest, lines).await?;

        log.info(
            "main",
            format!(
                "wrote manifest {} with {} entries",
                manifest.display(),
                artifacts.len()
            ),
        )
        .await;
        Ok((artifacts.len(), None))
    }

    /// Stage 4: extract the LSTM component from the base model.
    async fn extract_base_model(
        &self,
        log: &LogSender,
    ) -> Result<((), Option<BatchSummary>), PipelineError> {
        let stage = PipelineStage::ExtractBaseModel;

        let base_model = self.config.base_model_path();
        if !base_model.exists() {
            return Err(stage_err(
                stage,
                format!("base model not found: {}", base_model.display()),
            ));
        }

        let lstm = self.config.lstm_path();
        let args = vec![
            "-e".to_string(),
            base_model.to_string_lossy().to_string(),
            lstm.to_string_lossy().to_string(),
        ];

        let args_ref = &args;
        let attempted = run_with_retry(self.config.extract_retry, |attempt| async move {
            log.debug(
                "main",
                format!(
                    "invoking {} (attempt {})",
                    self.config.tools.combine_tessdata, attempt
                ),
            )
            .await;
            self.invoker
                .run(&self.config.tools.combine_tessdata, args_ref)
                .await
        })
        .await?;

        if !attempted.is_success() {
            return Err(stage_err(
                stage,
                format!(
                    "extraction failed after {} attempts: {}",
                    attempted.attempts,
                    attempted.output.stderr.trim()
                ),
            ));
        }

        if !lstm.exists() {
            return Err(stage_err(
                stage,
                format!("extraction succeeded but {} is missing", lstm.display()),
            ));
        }

        log.info("main", format!("extracted {}", lstm.display())).await;
        Ok(((), None))
    }

    /// Stage 5: run the long-running training invocation, streaming its
    /// output line-by-line into the log as it arrives.
    async fn train(&self, log: &LogSender) -> Result<((), Option<BatchSummary>), PipelineError> {
        let stage = PipelineStage::Train;

        let lstm = self.config.lstm_path();
        if !lstm.exists() {
            return Err(stage_err(
                stage,
                format!("LSTM model not found: {}", lstm.display()),
            ));
        }
        let manifest = self.config.manifest_path();
        if !manifest.exists() {
            return Err(stage_err(
                stage,
                format!("manifest not found: {}", manifest.display()),
            ));
        }

        let args = vec![
            "--model_output".to_string(),
            self.config.checkpoint_prefix().to_string_lossy().to_string(),
            "--continue_from".to_string(),
            lstm.to_string_lossy().to_string(),
            "--traineddata".to_string(),
            self.config.base_model_path().to_string_lossy().to_string(),
            "--train_listfile".to_string(),
            manifest.to_string_lossy().to_string(),
            "--max_iterations".to_string(),
            self.config.max_iterations.to_string(),
        ];

        log.info(
            "main",
            format!(
                "training started ({} iterations max)",
                self.config.max_iterations
            ),
        )
        .await;

        let mut child = self
            .invoker
            .spawn_streaming(&self.config.tools.lstmtraining, &args)?;

        // Both streams funnel through one channel so the output log stays
        // a single-writer file, same as the main run log.
        let (line_tx, mut line_rx) = mpsc::channel::<String>(256);
        let mut forwarders = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let tx = line_tx.clone();
            forwarders.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            }));
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = line_tx.clone();
            forwarders.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(line_tx);

        let train_log_path = self.config.train_output_log();
        let mut train_log = tokio::fs::File::create(&train_log_path).await?;

        while let Some(line) = line_rx.recv().await {
            // Normalized for our logs only; the checkpoints on disk are the
            // canonical training output and stay untouched
            let line = line.to_lowercase();
            train_log.write_all(line.as_bytes()).await?;
            train_log.write_all(b"\n").await?;
            log.debug("train", line.trim()).await;
        }
        train_log.flush().await?;

        for forwarder in forwarders {
            let _ = forwarder.await;
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(stage_err(
                stage,
                format!(
                    "training tool exited with code {}, see {}",
                    status.code().unwrap_or(-1),
                    train_log_path.display()
                ),
            ));
        }

        log.info("main", "training completed").await;
        Ok(((), None))
    }

    /// Stage 6: pick the checkpoint with the lowest loss.
    async fn select_checkpoint(
        &self,
        log: &LogSender,
    ) -> Result<(Checkpoint, Option<BatchSummary>), PipelineError> {
        let stage = PipelineStage::SelectCheckpoint;

        match checkpoint::select_best(&self.config.model_dir)? {
            Some(best) => {
                log.info(
                    "main",
                    format!("best checkpoint {} (loss {})", best.path.display(), best.loss),
                )
                .await;
                Ok((best, None))
            }
            None => Err(stage_err(
                stage,
                format!(
                    "no parseable checkpoint files in {}",
                    self.config.model_dir.display()
                ),
            )),
        }
    }

    /// Stage 7: package the best checkpoint into the final model.
    async fn package(
        &self,
        best: &Checkpoint,
        log: &LogSender,
    ) -> Result<(PathBuf, Option<BatchSummary>), PipelineError> {
        let stage = PipelineStage::Package;

        let packaged = self.config.packaged_model_path();
        let args = vec![
            "--stop_training".to_string(),
            "--continue_from".to_string(),
            best.path.to_string_lossy().to_string(),
            "--traineddata".to_string(),
            self.config.base_model_path().to_string_lossy().to_string(),
            "--model_output".to_string(),
            packaged.to_string_lossy().to_string(),
        ];

        let output = self
            .invoker
            .run(&self.config.tools.lstmtraining, &args)
            .await?;
        if !output.is_success() {
            return Err(stage_err(
                stage,
                format!("packaging failed: {}", output.stderr.trim()),
            ));
        }

        if !packaged.exists() {
            return Err(stage_err(
                stage,
                format!("packaging succeeded but {} is missing", packaged.display()),
            ));
        }

        log.info("main", format!("packaged model {}", packaged.display()))
            .await;
        Ok((packaged, None))
    }

    /// Deletes intermediate artifacts after a successful run. Best effort.
    async fn clean_intermediates(&self, log: &LogSender) {
        const INTERMEDIATE_SUFFIXES: [&str; 5] = [".tif", ".gt.txt", ".box", ".tr", ".lstmf"];

        let Ok(entries) = std::fs::read_dir(&self.config.ground_truth_dir) else {
            return;
        };

        let mut removed = 0usize;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if INTERMEDIATE_SUFFIXES.iter().any(|s| name.ends_with(s))
                && std::fs::remove_file(entry.path()).is_ok()
            {
                removed += 1;
            }
        }

        log.info("main", format!("removed {} intermediate files", removed))
            .await;
    }
}

/// Lists files in `dir` with the given extension, sorted by path.
///
/// Batch completion order is unconstrained, so aggregation steps re-scan
/// the filesystem deterministically instead.
fn list_sorted(dir: &Path, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == extension))
        .collect();
    files.sort();
    Ok(files)
}
