use crate::error::PipelineError;
use crate::models::{
    FeatureExtractorModel, LandmarkDetector, ModelProvider, ModelSummary, ObjectDetectionModel,
    SkinClassifierModel,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// A loaded model, shared with the blocking branch that runs it. The mutex
/// keeps runtime access single-threaded per model.
pub type SharedModel<T> = Arc<Mutex<Box<T>>>;

fn share<T: ?Sized>(model: Box<T>) -> SharedModel<T> {
    Arc::new(Mutex::new(model))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStatus {
    pub initialized: bool,
    pub backend: Option<String>,
    pub object_detector: bool,
    pub skin_classifier: bool,
    pub feature_extractor: bool,
    pub landmarks: bool,
}

/// Which models made it through loading. Any of them may be absent.
#[derive(Default)]
pub struct ModelRegistry {
    initialized: bool,
    backend: Option<String>,
    object_detector: Option<SharedModel<dyn ObjectDetectionModel>>,
    skin_classifier: Option<SharedModel<dyn SkinClassifierModel>>,
    feature_extractor: Option<SharedModel<dyn FeatureExtractorModel>>,
    landmarks: Option<SharedModel<dyn LandmarkDetector>>,
}

fn load_optional<T: ?Sized>(what: &str, loaded: anyhow::Result<Box<T>>) -> Option<SharedModel<T>> {
    match loaded {
        Ok(model) => Some(share(model)),
        Err(err) => {
            warn!(model = what, "model unavailable: {err:#}");
            None
        }
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Selects the backend and loads every model. Calling it again once it
    /// succeeded is a no-op. Only a backend failure is fatal.
    pub fn initialize(&mut self, provider: &dyn ModelProvider) -> Result<(), PipelineError> {
        if self.initialized {
            return Ok(());
        }
        let backend = provider
            .select_backend()
            .map_err(|err| PipelineError::initialization_with_source("backend selection failed", err))?;

        self.object_detector = load_optional("object_detector", provider.load_object_detector());
        self.skin_classifier = load_optional("skin_classifier", provider.load_skin_classifier());
        self.feature_extractor =
            load_optional("feature_extractor", provider.load_feature_extractor());
        self.landmarks = load_optional("landmarks", provider.load_landmark_detector());
        self.backend = Some(backend);
        self.initialized = true;

        let status = self.status();
        info!(
            backend = status.backend.as_deref().unwrap_or("-"),
            object_detector = status.object_detector,
            skin_classifier = status.skin_classifier,
            feature_extractor = status.feature_extractor,
            landmarks = status.landmarks,
            "model registry initialized"
        );
        Ok(())
    }

    pub fn object_detector(&self) -> Option<SharedModel<dyn ObjectDetectionModel>> {
        self.object_detector.clone()
    }

    pub fn skin_classifier(&self) -> Option<SharedModel<dyn SkinClassifierModel>> {
        self.skin_classifier.clone()
    }

    pub fn feature_extractor(&self) -> Option<SharedModel<dyn FeatureExtractorModel>> {
        self.feature_extractor.clone()
    }

    pub fn landmarks(&self) -> Option<SharedModel<dyn LandmarkDetector>> {
        self.landmarks.clone()
    }

    pub fn status(&self) -> RegistryStatus {
        RegistryStatus {
            initialized: self.initialized,
            backend: self.backend.clone(),
            object_detector: self.object_detector.is_some(),
            skin_classifier: self.skin_classifier.is_some(),
            feature_extractor: self.feature_extractor.is_some(),
            landmarks: self.landmarks.is_some(),
        }
    }

    /// Waits on each model's lock, so a branch still running keeps its model
    /// until it finishes.
    pub fn model_summaries(&self) -> Vec<ModelSummary> {
        let mut out = Vec::new();
        if let Some(m) = &self.object_detector {
            out.push(m.lock().summary());
        }
        if let Some(m) = &self.skin_classifier {
            out.push(m.lock().summary());
        }
        if let Some(m) = &self.feature_extractor {
            out.push(m.lock().summary());
        }
        if let Some(m) = &self.landmarks {
            out.push(m.lock().summary());
        }
        out
    }

    /// Releases every model handle and returns to the uninitialized state.
    pub fn dispose(&mut self) {
        *self = Self::default();
    }
}
