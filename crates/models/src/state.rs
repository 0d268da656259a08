/// DocumentState tracks a document through the OCR and LLM pipeline stages.
/// Forward progress is monotone except for retries, which reset to the
/// subordinate processing state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    Uploaded,
    OcrProcessing,
    OcrCompleted,
    OcrFailed,
    LlmProcessing,
    LlmCompleted,
    LlmFailed,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Uploaded => "uploaded",
            DocumentState::OcrProcessing => "ocr_processing",
            DocumentState::OcrCompleted => "ocr_completed",
            DocumentState::OcrFailed => "ocr_failed",
            DocumentState::LlmProcessing => "llm_processing",
            DocumentState::LlmCompleted => "llm_completed",
            DocumentState::LlmFailed => "llm_failed",
        }
    }

    /// Rank of the state along the forward pipeline. Failure states rank at
    /// their processing stage, so a failed document is not "past" that stage.
    fn rank(&self) -> u8 {
        match self {
            DocumentState::Uploaded => 0,
            DocumentState::OcrProcessing | DocumentState::OcrFailed => 1,
            DocumentState::OcrCompleted => 2,
            DocumentState::LlmProcessing | DocumentState::LlmFailed => 3,
            DocumentState::LlmCompleted => 4,
        }
    }

    /// True when this state has progressed at least as far as `other`.
    pub fn at_least(&self, other: DocumentState) -> bool {
        self.rank() >= other.rank()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DocumentState::OcrFailed | DocumentState::LlmFailed)
    }
}

impl std::fmt::Display for DocumentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown document state {0:?}")]
pub struct UnknownState(pub String);

impl std::str::FromStr for DocumentState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "uploaded" => DocumentState::Uploaded,
            "ocr_processing" => DocumentState::OcrProcessing,
            "ocr_completed" => DocumentState::OcrCompleted,
            "ocr_failed" => DocumentState::OcrFailed,
            "llm_processing" => DocumentState::LlmProcessing,
            "llm_completed" => DocumentState::LlmCompleted,
            "llm_failed" => DocumentState::LlmFailed,
            other => return Err(UnknownState(other.to_string())),
        })
    }
}

#[cfg(test)]
mod test {
    use super::DocumentState;

    #[test]
    fn test_state_string_round_trip() {
        for state in [
            DocumentState::Uploaded,
            DocumentState::OcrProcessing,
            DocumentState::OcrCompleted,
            DocumentState::OcrFailed,
            DocumentState::LlmProcessing,
            DocumentState::LlmCompleted,
            DocumentState::LlmFailed,
        ] {
            assert_eq!(state.as_str().parse::<DocumentState>().unwrap(), state);
        }
        assert!("bogus".parse::<DocumentState>().is_err());
    }

    #[test]
    fn test_pipeline_ordering() {
        use DocumentState::*;

        assert!(OcrCompleted.at_least(OcrProcessing));
        assert!(LlmCompleted.at_least(OcrCompleted));
        assert!(!Uploaded.at_least(OcrCompleted));

        // A failed OCR document has not reached ocr_completed.
        assert!(!OcrFailed.at_least(OcrCompleted));
        // But it is at least as far along as ocr_processing.
        assert!(OcrFailed.at_least(OcrProcessing));
        // An LLM retry resets to llm_processing, which is still >= ocr_completed.
        assert!(LlmProcessing.at_least(OcrCompleted));
    }
}
