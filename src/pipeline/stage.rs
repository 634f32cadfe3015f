//! Pipeline stage definitions.

use serde::{Deserialize, Serialize};

/// One ordered phase of the training pipeline.
///
/// Transitions are strictly sequential: each stage's preconditions are
/// validated before execution, and a failure halts the pipeline at that
/// stage. There is no branching and no looping back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Render text samples into image + ground-truth pairs (batch).
    GenerateSamples,
    /// Convert rendered images into `.lstmf` training files (batch).
    ConvertFormat,
    /// Write the manifest listing every training artifact.
    BuildManifest,
    /// Extract the LSTM component from the pretrained base model.
    ExtractBaseModel,
    /// Run the long-running training invocation.
    Train,
    /// Pick the checkpoint with the lowest loss.
    SelectCheckpoint,
    /// Package the best checkpoint into the final model.
    Package,
}

impl PipelineStage {
    /// All stages in execution order.
    pub const SEQUENCE: [PipelineStage; 7] = [
        PipelineStage::GenerateSamples,
        PipelineStage::ConvertFormat,
        PipelineStage::BuildManifest,
        PipelineStage::ExtractBaseModel,
        PipelineStage::Train,
        PipelineStage::SelectCheckpoint,
        PipelineStage::Package,
    ];
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::GenerateSamples => write!(f, "generate_samples"),
            PipelineStage::ConvertFormat => write!(f, "convert_format"),
            PipelineStage::BuildManifest => write!(f, "build_manifest"),
            PipelineStage::ExtractBaseModel => write!(f, "extract_base_model"),
            PipelineStage::Train => write!(f, "train"),
            PipelineStage::SelectCheckpoint => write!(f, "select_checkpoint"),
            PipelineStage::Package => write!(f, "package"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_order() {
        assert_eq!(PipelineStage::SEQUENCE.len(), 7);
        assert_eq!(PipelineStage::SEQUENCE[0], PipelineStage::GenerateSamples);
        assert_eq!(PipelineStage::SEQUENCE[6], PipelineStage::Package);
    }

    #[test]
    fn test_display() {
        assert_eq!(PipelineStage::GenerateSamples.to_string(), "generate_samples");
        assert_eq!(PipelineStage::Train.to_string(), "train");
    }

    #[test]
    fn test_serde_round_trip() {
        let json = serde_json::to_string(&PipelineStage::SelectCheckpoint).unwrap();
        assert_eq!(json, "\"select_checkpoint\"");
        let stage: PipelineStage = serde_json::from_str(&json).unwrap();
        assert_eq!(stage, PipelineStage::SelectCheckpoint);
    }
}
