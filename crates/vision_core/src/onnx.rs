//! ONNX Runtime implementations of the model traits.

use crate::config::{DeviceMode, PipelineConfig, ResizeMode};
use crate::error::ModelOutputError;
use crate::models::{
    FeatureExtractorModel, LandmarkDetector, ModelProvider, ModelSummary, ObjectDetectionModel,
    RawDetections, SkinClassifierModel,
};
use crate::preprocess::{ChannelOrder, InputSpec, Normalization, Preprocessor, TensorLayout};
use crate::resources::ResourcePool;
use crate::types::{BoundingBox, FaceLandmarks};
use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use ndarray::{Array2, ArrayD, ArrayView4, Axis, Ix2};
use ort::execution_providers::{CPUExecutionProvider, DirectMLExecutionProvider};
use ort::session::Session;
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

// ---------------------------------------------------------
// BACKEND
// ---------------------------------------------------------

static ORT_ENV: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Commits the ONNX Runtime environment once per process.
pub fn init_runtime() -> Result<()> {
    ORT_ENV
        .get_or_init(|| {
            ort::init()
                .with_name("skin-scan")
                .commit()
                .map(|_| ())
                .map_err(|err| err.to_string())
        })
        .clone()
        .map_err(|err| anyhow!("onnxruntime environment: {err}"))
}

fn build_session(path: &Path, device_mode: DeviceMode) -> Result<Session> {
    if !path.exists() {
        return Err(anyhow!("model file {} not found", path.display()));
    }
    match device_mode {
        DeviceMode::Gpu => {
            let ep = DirectMLExecutionProvider::default().build();
            let builder = Session::builder()?.with_execution_providers([ep])?;
            match builder.commit_from_file(path) {
                Ok(session) => Ok(session),
                Err(err) => {
                    warn!(path = %path.display(), "GPU session failed ({err}), falling back to CPU");
                    let cpu = CPUExecutionProvider::default().build();
                    Ok(Session::builder()?
                        .with_execution_providers([cpu])?
                        .commit_from_file(path)?)
                }
            }
        }
        DeviceMode::Cpu => {
            let cpu = CPUExecutionProvider::default().build();
            Ok(Session::builder()?
                .with_execution_providers([cpu])?
                .commit_from_file(path)?)
        }
    }
}

fn build_summary(name: &'static str, path: &Path, session: &Session) -> ModelSummary {
    let inputs = session
        .inputs
        .iter()
        .map(|input| format!("{}: {:?}", input.name, input.input_type))
        .collect();
    let outputs = session
        .outputs
        .iter()
        .map(|output| format!("{}: {:?}", output.name, output.output_type))
        .collect();
    ModelSummary {
        name,
        path: path.display().to_string(),
        inputs,
        outputs,
    }
}

fn extract_dyn(value: &ort::value::Value) -> Result<ArrayD<f32>> {
    Ok(value.try_extract_array::<f32>()?.to_owned())
}

fn extract_2d(value: &ort::value::Value) -> Result<Array2<f32>> {
    let arr = value.try_extract_array::<f32>()?;
    match arr.ndim() {
        2 => Ok(arr.into_dimensionality::<Ix2>()?.to_owned()),
        3 if arr.shape()[0] == 1 => Ok(arr
            .index_axis(Axis(0), 0)
            .into_dimensionality::<Ix2>()?
            .to_owned()),
        _ => Err(ModelOutputError::Shape {
            model: "landmarks",
            expected: "[N,C] or [1,N,C]",
            got: arr.shape().to_vec(),
        }
        .into()),
    }
}

// ---------------------------------------------------------
// DETECTOR DE OBJETOS
// ---------------------------------------------------------

pub struct OnnxObjectDetector {
    session: Session,
    path: PathBuf,
    spec: InputSpec,
}

impl ObjectDetectionModel for OnnxObjectDetector {
    fn input_spec(&self) -> InputSpec {
        self.spec
    }

    fn detect(&mut self, input: ArrayView4<'_, f32>) -> Result<RawDetections> {
        let input = Tensor::from_array(input.to_owned())?;
        let outputs = self.session.run(ort::inputs![input])?;
        if outputs.len() < 3 {
            return Err(ModelOutputError::MissingOutput {
                model: "object_detector",
                index: outputs.len(),
                available: outputs.len(),
            }
            .into());
        }
        Ok(RawDetections {
            boxes: extract_dyn(&outputs[0])?,
            scores: extract_dyn(&outputs[1])?,
            classes: extract_dyn(&outputs[2])?,
        })
    }

    fn summary(&self) -> ModelSummary {
        build_summary("Object detector", &self.path, &self.session)
    }
}

// ---------------------------------------------------------
// CLASIFICADOR DE PIEL
// ---------------------------------------------------------

pub struct OnnxSkinClassifier {
    session: Session,
    path: PathBuf,
    spec: InputSpec,
}

impl SkinClassifierModel for OnnxSkinClassifier {
    fn input_spec(&self) -> InputSpec {
        self.spec
    }

    fn predict(&mut self, input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>> {
        let input = Tensor::from_array(input.to_owned())?;
        let outputs = self.session.run(ort::inputs![input])?;
        if outputs.len() == 0 {
            return Err(ModelOutputError::MissingOutput {
                model: "skin_classifier",
                index: 0,
                available: 0,
            }
            .into());
        }
        extract_dyn(&outputs[0])
    }

    fn summary(&self) -> ModelSummary {
        build_summary("Skin classifier", &self.path, &self.session)
    }
}

pub struct OnnxFeatureExtractor {
    session: Session,
    path: PathBuf,
}

impl FeatureExtractorModel for OnnxFeatureExtractor {
    fn summary(&self) -> ModelSummary {
        build_summary("Feature extractor", &self.path, &self.session)
    }
}

// ---------------------------------------------------------
// YUNET — CARA + 5 LANDMARKS
// ---------------------------------------------------------

pub const YUNET_INPUT_W: u32 = 640;
pub const YUNET_INPUT_H: u32 = 640;
pub const YUNET_SCORE_THR: f32 = 0.6;
pub const YUNET_IOU_THR: f32 = 0.45;
pub const YUNET_TOPK: usize = 200;

#[derive(Clone, Copy, Debug)]
struct FaceDet {
    bbox: [f32; 4],
    score: f32,
    kps: [[f32; 2]; 5],
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;

    if union <= 0.0 { 0.0 } else { inter / union }
}

fn nms(mut dets: Vec<FaceDet>, iou_thr: f32) -> Vec<FaceDet> {
    // ascending, so pop() yields the best remaining score
    dets.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
    let mut keep: Vec<FaceDet> = Vec::new();
    while let Some(det) = dets.pop() {
        if keep.iter().all(|k| iou(&det.bbox, &k.bbox) <= iou_thr) {
            keep.push(det);
        }
    }
    keep
}

pub struct YuNetLandmarkDetector {
    session: Session,
    path: PathBuf,
    preprocessor: Preprocessor,
    score_thr: f32,
}

impl YuNetLandmarkDetector {
    const SPEC: InputSpec = InputSpec {
        width: YUNET_INPUT_W,
        height: YUNET_INPUT_H,
        layout: TensorLayout::Nchw,
        // YuNet se entreno con BGR, no RGB.
        channels: ChannelOrder::Bgr,
        normalization: Normalization::None,
    };
}

impl LandmarkDetector for YuNetLandmarkDetector {
    fn detect_face(&mut self, rgb: &RgbImage, pool: &ResourcePool) -> Result<Option<FaceLandmarks>> {
        let input_buf = self.preprocessor.to_tensor(rgb, &Self::SPEC, pool)?;
        let input = Tensor::from_array((*input_buf).clone())?;
        let outputs = self.session.run(ort::inputs![input])?;
        if outputs.len() < 12 {
            return Err(ModelOutputError::MissingOutput {
                model: "landmarks",
                index: 11,
                available: outputs.len(),
            }
            .into());
        }

        let strides = [8u32, 16u32, 32u32];
        let mut dets = Vec::new();
        for (level, stride) in strides.iter().copied().enumerate() {
            let scores = pool.adopt(extract_2d(&outputs[level])?);
            let obj = pool.adopt(extract_2d(&outputs[level + 3])?);
            let boxes = pool.adopt(extract_2d(&outputs[level + 6])?);
            let kps = pool.adopt(extract_2d(&outputs[level + 9])?);

            if scores.ncols() < 1 || obj.ncols() < 1 || boxes.ncols() < 4 || kps.ncols() < 10 {
                return Err(anyhow!(
                    "YuNet output invalido: scores cols={}, obj cols={}, boxes cols={}, kps cols={}",
                    scores.ncols(),
                    obj.ncols(),
                    boxes.ncols(),
                    kps.ncols()
                ));
            }

            let feat_w = (YUNET_INPUT_W / stride) as usize;
            let feat_h = (YUNET_INPUT_H / stride) as usize;
            let count = scores.nrows().min(obj.nrows()).min(boxes.nrows()).min(kps.nrows());
            if count != feat_w * feat_h {
                return Err(anyhow!(
                    "YuNet output invalido: esperado {} priors, got {}",
                    feat_w * feat_h,
                    count
                ));
            }

            let s = stride as f32;
            let mut level_dets = Vec::new();
            for i in 0..count {
                let score = scores[[i, 0]] * obj[[i, 0]];
                if score < self.score_thr {
                    continue;
                }
                let cx = (i % feat_w) as f32 * s;
                let cy = (i / feat_w) as f32 * s;
                let bx = boxes[[i, 0]] * s + cx;
                let by = boxes[[i, 1]] * s + cy;
                let bw = boxes[[i, 2]].exp() * s;
                let bh = boxes[[i, 3]].exp() * s;

                let mut points = [[0.0f32; 2]; 5];
                for (p, point) in points.iter_mut().enumerate() {
                    *point = [kps[[i, p * 2]] * s + cx, kps[[i, p * 2 + 1]] * s + cy];
                }
                level_dets.push(FaceDet {
                    bbox: [bx - bw * 0.5, by - bh * 0.5, bx + bw * 0.5, by + bh * 0.5],
                    score,
                    kps: points,
                });
            }
            if level_dets.len() > YUNET_TOPK {
                level_dets.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
                level_dets.truncate(YUNET_TOPK);
            }
            dets.extend(level_dets);
        }

        let best = nms(dets, YUNET_IOU_THR).into_iter().next();
        let Some(best) = best else {
            return Ok(None);
        };

        let scale_x = rgb.width() as f32 / YUNET_INPUT_W as f32;
        let scale_y = rgb.height() as f32 / YUNET_INPUT_H as f32;
        let x1 = (best.bbox[0] * scale_x).max(0.0);
        let y1 = (best.bbox[1] * scale_y).max(0.0);
        let x2 = (best.bbox[2] * scale_x).max(0.0);
        let y2 = (best.bbox[3] * scale_y).max(0.0);
        let points = best
            .kps
            .iter()
            .map(|p| [p[0] * scale_x, p[1] * scale_y])
            .collect();
        Ok(Some(FaceLandmarks {
            points,
            bounding_box: BoundingBox::pixels(x1, y1, (x2 - x1).max(1.0), (y2 - y1).max(1.0)),
            score: best.score,
        }))
    }

    fn summary(&self) -> ModelSummary {
        build_summary("YuNet landmarks", &self.path, &self.session)
    }
}

// ---------------------------------------------------------
// PROVIDER
// ---------------------------------------------------------

/// Loads every model named in a [`PipelineConfig`] through ONNX Runtime.
pub struct OnnxModelProvider {
    config: PipelineConfig,
}

impl OnnxModelProvider {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    fn session_for(&self, what: &str, path: Option<&PathBuf>) -> Result<(Session, PathBuf)> {
        let path = path.ok_or_else(|| anyhow!("no path configured for {what}"))?;
        let session = build_session(path, self.config.device)
            .with_context(|| format!("loading {what} from {}", path.display()))?;
        info!(model = what, path = %path.display(), "model loaded");
        Ok((session, path.clone()))
    }
}

impl ModelProvider for OnnxModelProvider {
    fn select_backend(&self) -> Result<String> {
        init_runtime()?;
        let backend = match self.config.device {
            DeviceMode::Cpu => "onnxruntime/cpu",
            DeviceMode::Gpu => "onnxruntime/directml",
        };
        debug!(backend, "runtime backend selected");
        Ok(backend.to_string())
    }

    fn load_object_detector(&self) -> Result<Box<dyn ObjectDetectionModel>> {
        let (session, path) =
            self.session_for("object_detector", self.config.models.object_detector.as_ref())?;
        Ok(Box::new(OnnxObjectDetector {
            session,
            path,
            spec: InputSpec {
                width: self.config.detector_input,
                height: self.config.detector_input,
                layout: TensorLayout::Nhwc,
                channels: ChannelOrder::Rgb,
                normalization: Normalization::UnitRange,
            },
        }))
    }

    fn load_skin_classifier(&self) -> Result<Box<dyn SkinClassifierModel>> {
        let (session, path) =
            self.session_for("skin_classifier", self.config.models.skin_classifier.as_ref())?;
        Ok(Box::new(OnnxSkinClassifier {
            session,
            path,
            spec: InputSpec {
                width: self.config.classifier_input,
                height: self.config.classifier_input,
                layout: TensorLayout::Nhwc,
                channels: ChannelOrder::Rgb,
                normalization: Normalization::UnitRange,
            },
        }))
    }

    fn load_feature_extractor(&self) -> Result<Box<dyn FeatureExtractorModel>> {
        let (session, path) =
            self.session_for("feature_extractor", self.config.models.feature_extractor.as_ref())?;
        Ok(Box::new(OnnxFeatureExtractor { session, path }))
    }

    fn load_landmark_detector(&self) -> Result<Box<dyn LandmarkDetector>> {
        let (session, path) = self.session_for("landmarks", self.config.models.landmarks.as_ref())?;
        Ok(Box::new(YuNetLandmarkDetector {
            session,
            path,
            preprocessor: Preprocessor::new(ResizeMode::Balanced),
            score_thr: YUNET_SCORE_THR,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], score: f32) -> FaceDet {
        FaceDet {
            bbox,
            score,
            kps: [[0.0; 2]; 5],
        }
    }

    #[test]
    fn nms_keeps_best_of_overlapping_faces() {
        let kept = nms(
            vec![
                det([0.0, 0.0, 10.0, 10.0], 0.7),
                det([1.0, 1.0, 11.0, 11.0], 0.9),
                det([50.0, 50.0, 60.0, 60.0], 0.8),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.8);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(iou(&[0.0, 0.0, 1.0, 1.0], &[2.0, 2.0, 3.0, 3.0]), 0.0);
        assert!((iou(&[0.0, 0.0, 2.0, 2.0], &[0.0, 0.0, 2.0, 2.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn missing_model_path_fails_that_model_only() {
        let mut config = PipelineConfig::default();
        config.models.skin_classifier = None;
        config.models.object_detector = Some(PathBuf::from("/definitely/not/here.onnx"));
        let provider = OnnxModelProvider::new(config);
        assert!(provider.load_skin_classifier().is_err());
        assert!(provider.load_object_detector().is_err());
    }
}
