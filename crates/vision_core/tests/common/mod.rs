#![allow(dead_code)]

use anyhow::{anyhow, Result};
use image::RgbImage;
use ndarray::{arr1, arr2, ArrayD, ArrayView4};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vision_core::preprocess::{ChannelOrder, InputSpec, Normalization, TensorLayout};
use vision_core::{
    AnalysisPipeline, BoundingBox, FaceLandmarks, FeatureExtractorModel, Frame, LandmarkDetector,
    ManualClock, ModelProvider, ModelSummary, ObjectDetectionModel, PipelineConfig, RawDetections,
    ResourcePool, SkinClassifierModel,
};

pub const STUB_SPEC: InputSpec = InputSpec {
    width: 32,
    height: 32,
    layout: TensorLayout::Nhwc,
    channels: ChannelOrder::Rgb,
    normalization: Normalization::UnitRange,
};

fn summary(name: &'static str) -> ModelSummary {
    ModelSummary {
        name,
        path: format!("mem://{name}"),
        inputs: vec!["input: f32".into()],
        outputs: vec!["output: f32".into()],
    }
}

pub type Detection = (f32, f32, [f32; 4]);

fn raw_detections(dets: &[Detection]) -> RawDetections {
    let boxes: Vec<[f32; 4]> = dets.iter().map(|d| d.2).collect();
    let boxes = if boxes.is_empty() {
        ArrayD::zeros(vec![0, 4])
    } else {
        arr2(&boxes).into_dyn()
    };
    RawDetections {
        boxes,
        scores: arr1(&dets.iter().map(|d| d.1).collect::<Vec<_>>()).into_dyn(),
        classes: arr1(&dets.iter().map(|d| d.0).collect::<Vec<_>>()).into_dyn(),
    }
}

/// Returns the queued outputs one call at a time, then `raw` forever.
pub struct StubDetector {
    pub raw: Result<RawDetections, String>,
    pub queued: VecDeque<RawDetections>,
}

impl StubDetector {
    /// One detection per `(class, score, [ymin, xmin, ymax, xmax])`.
    pub fn with(dets: &[Detection]) -> Self {
        Self {
            raw: Ok(raw_detections(dets)),
            queued: VecDeque::new(),
        }
    }

    /// Each slice is one frame's output; the last one repeats.
    pub fn frames(frames: &[&[Detection]]) -> Self {
        let mut queued: VecDeque<_> = frames.iter().map(|f| raw_detections(f)).collect();
        let last = queued.pop_back().unwrap_or_else(|| raw_detections(&[]));
        Self {
            raw: Ok(last),
            queued,
        }
    }

    pub fn failing(msg: &str) -> Self {
        Self {
            raw: Err(msg.to_string()),
            queued: VecDeque::new(),
        }
    }

    pub fn malformed() -> Self {
        Self {
            raw: Ok(RawDetections {
                boxes: arr2(&[[0.0, 0.0, 1.0]]).into_dyn(),
                scores: arr1(&[0.9]).into_dyn(),
                classes: arr1(&[0.0]).into_dyn(),
            }),
            queued: VecDeque::new(),
        }
    }
}

impl ObjectDetectionModel for StubDetector {
    fn input_spec(&self) -> InputSpec {
        STUB_SPEC
    }

    fn detect(&mut self, input: ArrayView4<'_, f32>) -> Result<RawDetections> {
        assert_eq!(input.shape(), &[1, 32, 32, 3]);
        if let Some(next) = self.queued.pop_front() {
            return Ok(next);
        }
        self.raw.clone().map_err(|msg| anyhow!(msg))
    }

    fn summary(&self) -> ModelSummary {
        summary("stub detector")
    }
}

pub struct StubClassifier {
    pub scores: Vec<f32>,
    /// Sleep inside `predict`.
    pub delay: Duration,
    /// Sleep before the input is prepared, ahead of the cancel check.
    pub warmup: Duration,
    /// Number of `predict` calls, shared with the test.
    pub calls: Arc<AtomicUsize>,
}

impl StubClassifier {
    pub fn with(scores: &[f32]) -> Self {
        Self {
            scores: scores.to_vec(),
            delay: Duration::ZERO,
            warmup: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SkinClassifierModel for StubClassifier {
    fn input_spec(&self) -> InputSpec {
        std::thread::sleep(self.warmup);
        STUB_SPEC
    }

    fn predict(&mut self, _input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(ArrayD::from_shape_vec(vec![1, self.scores.len()], self.scores.clone())?)
    }

    fn summary(&self) -> ModelSummary {
        summary("stub classifier")
    }
}

pub struct StubFeatureExtractor;

impl FeatureExtractorModel for StubFeatureExtractor {
    fn summary(&self) -> ModelSummary {
        summary("stub features")
    }
}

pub enum LandmarkBehavior {
    Face(FaceLandmarks),
    NoFace,
    Fail,
    /// Holds a leased buffer for the given time, then finds nothing.
    Slow(Duration),
}

pub struct StubLandmarks {
    pub behavior: LandmarkBehavior,
}

impl LandmarkDetector for StubLandmarks {
    fn detect_face(&mut self, _rgb: &RgbImage, pool: &ResourcePool) -> Result<Option<FaceLandmarks>> {
        let _scratch = pool.zeros_dyn(&[1, 16]);
        match &self.behavior {
            LandmarkBehavior::Face(face) => Ok(Some(face.clone())),
            LandmarkBehavior::NoFace => Ok(None),
            LandmarkBehavior::Fail => Err(anyhow!("landmark session crashed")),
            LandmarkBehavior::Slow(delay) => {
                std::thread::sleep(*delay);
                Ok(None)
            }
        }
    }

    fn summary(&self) -> ModelSummary {
        summary("stub landmarks")
    }
}

pub fn face() -> FaceLandmarks {
    FaceLandmarks {
        points: vec![[20.0, 20.0], [40.0, 20.0], [30.0, 30.0], [22.0, 40.0], [38.0, 40.0]],
        bounding_box: BoundingBox::pixels(10.0, 10.0, 40.0, 40.0),
        score: 0.95,
    }
}

/// Hands out each configured model once.
#[derive(Default)]
pub struct StubProvider {
    pub backend_fails: bool,
    pub detector: Mutex<Option<Box<dyn ObjectDetectionModel>>>,
    pub classifier: Mutex<Option<Box<dyn SkinClassifierModel>>>,
    pub features: Mutex<Option<Box<dyn FeatureExtractorModel>>>,
    pub landmarks: Mutex<Option<Box<dyn LandmarkDetector>>>,
}

impl StubProvider {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn detector(self, model: StubDetector) -> Self {
        *self.detector.lock() = Some(Box::new(model));
        self
    }

    pub fn classifier(self, model: StubClassifier) -> Self {
        *self.classifier.lock() = Some(Box::new(model));
        self
    }

    pub fn features(self) -> Self {
        *self.features.lock() = Some(Box::new(StubFeatureExtractor));
        self
    }

    pub fn landmarks(self, behavior: LandmarkBehavior) -> Self {
        *self.landmarks.lock() = Some(Box::new(StubLandmarks { behavior }));
        self
    }
}

fn take<T: ?Sized>(slot: &Mutex<Option<Box<T>>>, what: &str) -> Result<Box<T>> {
    slot.lock().take().ok_or_else(|| anyhow!("{what} not configured"))
}

impl ModelProvider for StubProvider {
    fn select_backend(&self) -> Result<String> {
        if self.backend_fails {
            Err(anyhow!("no compute backend"))
        } else {
            Ok("stub".into())
        }
    }

    fn load_object_detector(&self) -> Result<Box<dyn ObjectDetectionModel>> {
        take(&self.detector, "object detector")
    }

    fn load_skin_classifier(&self) -> Result<Box<dyn SkinClassifierModel>> {
        take(&self.classifier, "skin classifier")
    }

    fn load_feature_extractor(&self) -> Result<Box<dyn FeatureExtractorModel>> {
        take(&self.features, "feature extractor")
    }

    fn load_landmark_detector(&self) -> Result<Box<dyn LandmarkDetector>> {
        take(&self.landmarks, "landmark detector")
    }
}

pub fn pipeline(provider: StubProvider) -> (AnalysisPipeline, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(0));
    let pipeline = AnalysisPipeline::with_clock(PipelineConfig::default(), Box::new(provider), clock.clone());
    pipeline.initialize().expect("stub backend initializes");
    (pipeline, clock)
}

pub fn frame(id: u64) -> Frame {
    Frame::new(id, RgbImage::from_pixel(64, 48, image::Rgb([180, 120, 100])))
}
