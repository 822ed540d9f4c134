//! Frame analysis core: concurrent object detection, skin condition scoring
//! and face landmark fusion over ONNX models, with cross-frame object
//! tracking.

pub mod config;
pub mod detector;
pub mod error;
pub mod features;
pub mod feedback;
pub mod fusion;
pub mod metrics;
pub mod models;
pub mod onnx;
pub mod overlay;
pub mod pipeline;
pub mod preprocess;
pub mod registry;
pub mod resize;
pub mod resources;
pub mod skin;
pub mod tracker;
pub mod types;

pub use config::{DeviceMode, ModelPaths, PipelineConfig, ResizeMode};
pub use error::{Cancelled, ModelOutputError, PipelineError};
pub use feedback::FeedbackSample;
pub use models::{
    FeatureExtractorModel, LandmarkDetector, ModelProvider, ModelSummary, ObjectDetectionModel,
    RawDetections, SkinClassifierModel,
};
pub use onnx::OnnxModelProvider;
pub use pipeline::{AnalysisPipeline, CancelFlag, Clock, ManualClock, MonotonicClock};
pub use registry::RegistryStatus;
pub use resources::{BufferLedger, Pooled, ResourcePool};
pub use types::{
    AnalysisResult, BoundingBox, ConditionLocation, DetectedObject, FaceLandmarks, Frame,
    ObjectFeatures, PerformanceMetrics, PositionSample, ShapeClass, SkinCondition,
    SkinConditionKind, TrackingRecord, Trend, Velocity,
};
