//! Seams between the pipeline and the inference runtime.
//!
//! Each capability is a trait so the registry can hold whatever was loaded
//! (ONNX sessions in production, stubs in tests) and treat every one of them
//! as optional.

use crate::preprocess::InputSpec;
use crate::resources::ResourcePool;
use crate::types::FaceLandmarks;
use anyhow::Result;
use image::RgbImage;
use ndarray::{ArrayD, ArrayView4};

/// Loose outputs of a detection model, decoded later by
/// [`crate::detector::decode_detections`].
#[derive(Debug, Clone)]
pub struct RawDetections {
    /// `[N,4]` or `[1,N,4]`, `[ymin, xmin, ymax, xmax]` in 0..1.
    pub boxes: ArrayD<f32>,
    /// `[N]` or `[1,N]`.
    pub scores: ArrayD<f32>,
    /// `[N]` or `[1,N]`, class index into the label taxonomy.
    pub classes: ArrayD<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSummary {
    pub name: &'static str,
    pub path: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

pub trait ObjectDetectionModel: Send {
    fn input_spec(&self) -> InputSpec;
    fn detect(&mut self, input: ArrayView4<'_, f32>) -> Result<RawDetections>;
    fn summary(&self) -> ModelSummary;
}

pub trait SkinClassifierModel: Send {
    fn input_spec(&self) -> InputSpec;
    /// One severity score per [`crate::types::SkinConditionKind`], in order.
    fn predict(&mut self, input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>>;
    fn summary(&self) -> ModelSummary;
}

/// Loaded for availability only; the frame flow does not run it.
pub trait FeatureExtractorModel: Send {
    fn summary(&self) -> ModelSummary;
}

pub trait LandmarkDetector: Send {
    /// Best face in the frame, `None` when there is none.
    fn detect_face(&mut self, rgb: &RgbImage, pool: &ResourcePool) -> Result<Option<FaceLandmarks>>;
    fn summary(&self) -> ModelSummary;
}

/// Builds the runtime backend and the individual models.
///
/// `select_backend` failing is fatal to initialization; a failing `load_*`
/// only leaves that capability absent.
pub trait ModelProvider: Send + Sync {
    fn select_backend(&self) -> Result<String>;
    fn load_object_detector(&self) -> Result<Box<dyn ObjectDetectionModel>>;
    fn load_skin_classifier(&self) -> Result<Box<dyn SkinClassifierModel>>;
    fn load_feature_extractor(&self) -> Result<Box<dyn FeatureExtractorModel>>;
    fn load_landmark_detector(&self) -> Result<Box<dyn LandmarkDetector>>;
}
