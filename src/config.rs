//! Pipeline configuration for the orchestrator.
//!
//! All paths, tool names, retry policies and concurrency limits live in an
//! explicit [`PipelineConfig`] constructed once and passed by reference to
//! every component. No component reads ambient global state.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::exec::RetryPolicy;
use crate::pool;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while preparing configured directories.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Names of the external commands the pipeline drives.
///
/// Overridable so tests can point every stage at stub executables.
#[derive(Debug, Clone)]
pub struct ToolCommands {
    /// Renders a text file into a training image (`text2image`).
    pub text2image: String,
    /// Produces `.lstmf` training files from images (`tesseract`).
    pub tesseract: String,
    /// Trains and packages LSTM models (`lstmtraining`).
    pub lstmtraining: String,
    /// Extracts the LSTM component from a traineddata file.
    pub combine_tessdata: String,
    /// Refreshes the font cache.
    pub fc_cache: String,
    /// Lists installed font families.
    pub fc_list: String,
    /// Matches a requested font to an installed one.
    pub fc_match: String,
}

impl Default for ToolCommands {
    fn default() -> Self {
        Self {
            text2image: "text2image".to_string(),
            tesseract: "tesseract".to_string(),
            lstmtraining: "lstmtraining".to_string(),
            combine_tessdata: "combine_tessdata".to_string(),
            fc_cache: "fc-cache".to_string(),
            fc_list: "fc-list".to_string(),
            fc_match: "fc-match".to_string(),
        }
    }
}

impl ToolCommands {
    /// Returns every command the pipeline requires, for the dependency check.
    pub fn required(&self) -> Vec<&str> {
        vec![
            &self.text2image,
            &self.tesseract,
            &self.lstmtraining,
            &self.combine_tessdata,
            &self.fc_cache,
            &self.fc_list,
            &self.fc_match,
        ]
    }
}

/// Configuration for the training pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Input settings
    /// Flat text file with one sample record per line.
    pub samples_file: PathBuf,
    /// Maximum number of samples to use (0 = unlimited).
    pub num_samples: usize,
    /// Fonts to render with; the first usable one is chosen.
    pub fonts: Vec<String>,
    /// Tesseract language code for conversion and training.
    pub lang: String,

    // Path settings
    /// Directory searched by the rendering tool for font files.
    pub fonts_dir: PathBuf,
    /// Directory holding `<lang>.traineddata`.
    pub tessdata_dir: PathBuf,
    /// Directory for rendered images, ground-truth files and the manifest.
    pub ground_truth_dir: PathBuf,
    /// Directory for the extracted base model and training checkpoints.
    pub model_dir: PathBuf,
    /// Directory for the final packaged model.
    pub output_dir: PathBuf,
    /// Append-only run log written by the log aggregator.
    pub log_file: PathBuf,

    // Training settings
    /// Name of the model being trained; prefixes checkpoint files.
    pub model_name: String,
    /// Iteration cap handed to the training tool.
    pub max_iterations: u32,

    // Execution settings
    /// Maximum number of concurrently running batch tasks.
    pub max_parallel: usize,
    /// Fraction of batch tasks that must succeed for a stage to advance
    /// (0.0 accepts any non-empty success set).
    pub min_success_ratio: f64,
    /// Keep intermediate artifacts after packaging.
    pub keep_intermediates: bool,

    // Retry settings
    /// Retry policy for sample rendering.
    pub render_retry: RetryPolicy,
    /// Retry policy for format conversion.
    pub convert_retry: RetryPolicy,
    /// Retry policy for base-model extraction.
    pub extract_retry: RetryPolicy,

    /// External command names.
    pub tools: ToolCommands,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            samples_file: PathBuf::from("samples.txt"),
            num_samples: 100,
            fonts: vec!["Microsoft YaHei".to_string()],
            lang: "chi_sim".to_string(),

            fonts_dir: PathBuf::from("/usr/share/fonts"),
            tessdata_dir: PathBuf::from("./tessdata"),
            ground_truth_dir: PathBuf::from("./data/ground-truth"),
            model_dir: PathBuf::from("./data/model"),
            output_dir: PathBuf::from("./data/output"),
            log_file: PathBuf::from("training.log"),

            model_name: "my_model".to_string(),
            max_iterations: 4000,

            max_parallel: pool::default_parallelism(),
            min_success_ratio: 0.0,
            keep_intermediates: true,

            render_retry: RetryPolicy::new(3, Duration::from_secs(2)),
            convert_retry: RetryPolicy::new(3, Duration::from_secs(2)),
            extract_retry: RetryPolicy::new(3, Duration::from_secs(5)),

            tools: ToolCommands::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `OCRFORGE_SAMPLES_FILE`: sample text source (default: samples.txt)
    /// - `OCRFORGE_NUM_SAMPLES`: sample cap, 0 = unlimited (default: 100)
    /// - `OCRFORGE_FONTS`: comma-separated font names
    /// - `OCRFORGE_LANG`: language code (default: chi_sim)
    /// - `OCRFORGE_FONTS_DIR`: font search directory
    /// - `OCRFORGE_TESSDATA_DIR`: directory with `<lang>.traineddata`
    /// - `OCRFORGE_GROUND_TRUTH_DIR`: rendered sample directory
    /// - `OCRFORGE_MODEL_DIR`: checkpoint directory
    /// - `OCRFORGE_OUTPUT_DIR`: packaged model directory
    /// - `OCRFORGE_LOG_FILE`: run log path
    /// - `OCRFORGE_MODEL_NAME`: output model name (default: my_model)
    /// - `OCRFORGE_MAX_ITERATIONS`: training iteration cap (default: 4000)
    /// - `OCRFORGE_MAX_PARALLEL`: worker cap (default: min(2 x cores, 32))
    /// - `OCRFORGE_MIN_SUCCESS_RATIO`: batch partial-success threshold
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("OCRFORGE_SAMPLES_FILE") {
            config.samples_file = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("OCRFORGE_NUM_SAMPLES") {
            config.num_samples = parse_env_value(&val, "OCRFORGE_NUM_SAMPLES")?;
        }
        if let Ok(val) = std::env::var("OCRFORGE_FONTS") {
            config.fonts = val.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(val) = std::env::var("OCRFORGE_LANG") {
            config.lang = val;
        }
        if let Ok(val) = std::env::var("OCRFORGE_FONTS_DIR") {
            config.fonts_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("OCRFORGE_TESSDATA_DIR") {
            config.tessdata_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("OCRFORGE_GROUND_TRUTH_DIR") {
            config.ground_truth_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("OCRFORGE_MODEL_DIR") {
            config.model_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("OCRFORGE_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("OCRFORGE_LOG_FILE") {
            config.log_file = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("OCRFORGE_MODEL_NAME") {
            config.model_name = val;
        }
        if let Ok(val) = std::env::var("OCRFORGE_MAX_ITERATIONS") {
            config.max_iterations = parse_env_value(&val, "OCRFORGE_MAX_ITERATIONS")?;
        }
        if let Ok(val) = std::env::var("OCRFORGE_MAX_PARALLEL") {
            config.max_parallel = parse_env_value(&val, "OCRFORGE_MAX_PARALLEL")?;
        }
        if let Ok(val) = std::env::var("OCRFORGE_MIN_SUCCESS_RATIO") {
            config.min_success_ratio = parse_env_value(&val, "OCRFORGE_MIN_SUCCESS_RATIO")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the sample source file.
    pub fn with_samples_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.samples_file = path.into();
        self
    }

    /// Sets the sample cap.
    pub fn with_num_samples(mut self, n: usize) -> Self {
        self.num_samples = n;
        self
    }

    /// Sets the font list.
    pub fn with_fonts(mut self, fonts: Vec<String>) -> Self {
        self.fonts = fonts;
        self
    }

    /// Sets the language code.
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    /// Sets the worker cap.
    pub fn with_max_parallel(mut self, n: usize) -> Self {
        self.max_parallel = n;
        self
    }

    /// Sets the partial-success threshold for batch stages.
    pub fn with_min_success_ratio(mut self, ratio: f64) -> Self {
        self.min_success_ratio = ratio;
        self
    }

    /// Sets the tool command names.
    pub fn with_tools(mut self, tools: ToolCommands) -> Self {
        self.tools = tools;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fonts.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "at least one font must be configured".to_string(),
            ));
        }
        if self.lang.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "language code must not be empty".to_string(),
            ));
        }
        if self.max_parallel == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_success_ratio) {
            return Err(ConfigError::ValidationFailed(format!(
                "min_success_ratio must be within [0.0, 1.0], got {}",
                self.min_success_ratio
            )));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Creates every directory the pipeline writes into.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.ground_truth_dir)?;
        std::fs::create_dir_all(&self.model_dir)?;
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }

    /// Path of the pretrained base model (`<lang>.traineddata`).
    pub fn base_model_path(&self) -> PathBuf {
        self.tessdata_dir.join(format!("{}.traineddata", self.lang))
    }

    /// Path of the extracted LSTM component.
    pub fn lstm_path(&self) -> PathBuf {
        self.model_dir.join(format!("{}.lstm", self.lang))
    }

    /// Path of the training manifest (one absolute `.lstmf` path per line).
    pub fn manifest_path(&self) -> PathBuf {
        self.ground_truth_dir.join("lstmf.training_list")
    }

    /// Checkpoint output prefix handed to the training tool.
    pub fn checkpoint_prefix(&self) -> PathBuf {
        self.model_dir.join(&self.model_name)
    }

    /// Path of the final packaged model.
    pub fn packaged_model_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.traineddata", self.model_name))
    }

    /// Path of the raw training-tool output log.
    pub fn train_output_log(&self) -> PathBuf {
        self.model_dir.join("lstmtraining_output.log")
    }
}

/// Parses an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();

        assert_eq!(config.num_samples, 100);
        assert_eq!(config.lang, "chi_sim");
        assert_eq!(config.max_iterations, 4000);
        assert!(config.max_parallel >= 1);
        assert!(config.max_parallel <= 32);
        assert_eq!(config.render_retry.max_attempts, 3);
        assert_eq!(config.render_retry.backoff, Duration::from_secs(2));
        assert_eq!(config.extract_retry.backoff, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = PipelineConfig::new()
            .with_samples_file("/tmp/input.txt")
            .with_num_samples(5)
            .with_fonts(vec!["DejaVu Sans".to_string()])
            .with_lang("eng")
            .with_max_parallel(2)
            .with_min_success_ratio(0.5);

        assert_eq!(config.samples_file, PathBuf::from("/tmp/input.txt"));
        assert_eq!(config.num_samples, 5);
        assert_eq!(config.fonts, vec!["DejaVu Sans".to_string()]);
        assert_eq!(config.lang, "eng");
        assert_eq!(config.max_parallel, 2);
        assert!((config.min_success_ratio - 0.5).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_fonts() {
        let config = PipelineConfig::new().with_fonts(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let config = PipelineConfig::new().with_min_success_ratio(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let config = PipelineConfig::new().with_max_parallel(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_paths() {
        let config = PipelineConfig::new().with_lang("eng");

        assert!(config
            .base_model_path()
            .to_string_lossy()
            .ends_with("eng.traineddata"));
        assert!(config.lstm_path().to_string_lossy().ends_with("eng.lstm"));
        assert!(config
            .manifest_path()
            .to_string_lossy()
            .ends_with("lstmf.training_list"));
        assert!(config
            .packaged_model_path()
            .to_string_lossy()
            .ends_with("my_model.traineddata"));
    }

    #[test]
    fn test_required_tools() {
        let tools = ToolCommands::default();
        let required = tools.required();

        assert_eq!(required.len(), 7);
        assert!(required.contains(&"text2image"));
        assert!(required.contains(&"lstmtraining"));
        assert!(required.contains(&"fc-match"));
    }
}
