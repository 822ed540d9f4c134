use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced to callers of the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Initialization failed: {message}")]
    Initialization {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Pipeline not initialized (call initialize() first, or it was disposed)")]
    NotInitialized,

    #[error("Analysis failed in stage '{stage}'")]
    Analysis {
        stage: &'static str,
        #[source]
        source: BoxError,
    },
}

impl PipelineError {
    pub fn initialization<S: Into<String>>(message: S) -> Self {
        Self::Initialization {
            message: message.into(),
            source: None,
        }
    }

    pub fn initialization_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: Into<BoxError>,
    {
        Self::Initialization {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn analysis<E: Into<BoxError>>(stage: &'static str, source: E) -> Self {
        Self::Analysis {
            stage,
            source: source.into(),
        }
    }

    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Self::Analysis { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

/// Raw model output that does not match the shape a decoder expects.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelOutputError {
    #[error("{model}: expected {expected}, got shape {got:?}")]
    Shape {
        model: &'static str,
        expected: &'static str,
        got: Vec<usize>,
    },

    #[error("{model}: output lengths disagree (boxes={boxes}, scores={scores}, classes={classes})")]
    LengthMismatch {
        model: &'static str,
        boxes: usize,
        scores: usize,
        classes: usize,
    },

    #[error("{model}: missing output #{index} (model returned {available})")]
    MissingOutput {
        model: &'static str,
        index: usize,
        available: usize,
    },
}

/// Returned by a branch that stopped because a sibling already failed or the
/// caller went away.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("branch cancelled")]
pub struct Cancelled;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn analysis_error_keeps_the_cause() {
        let cause = anyhow::anyhow!("session run failed");
        let err = PipelineError::analysis("skin_analysis", cause);
        assert_eq!(err.stage(), Some("skin_analysis"));
        let source = err.source().expect("source attached");
        assert_eq!(source.to_string(), "session run failed");
    }

    #[test]
    fn shape_error_names_the_model() {
        let err = ModelOutputError::Shape {
            model: "skin_classifier",
            expected: "[6] or [1,6]",
            got: vec![1, 5],
        };
        assert!(err.to_string().starts_with("skin_classifier: expected [6] or [1,6]"));
    }
}
