use crate::error::{Cancelled, ModelOutputError};
use crate::features::extract_features;
use crate::models::{ObjectDetectionModel, RawDetections};
use crate::preprocess::Preprocessor;
use crate::resources::ResourcePool;
use crate::types::{BoundingBox, DetectedObject};
use crate::CancelFlag;
use anyhow::Result;
use image::RgbImage;
use ndarray::{ArrayD, ArrayView1, ArrayView2, Axis, Ix1, Ix2};
use tracing::debug;
use uuid::Uuid;

/// Candidates below this confidence never leave the adapter.
pub const DETECTION_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// COCO labels, indexed by the class id the detection model emits.
pub const LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// One decoded, not yet filtered, model proposal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub class_id: usize,
    pub score: f32,
    /// `[ymin, xmin, ymax, xmax]`, clamped to 0..1.
    pub bbox: [f32; 4],
}

impl Candidate {
    pub fn bounding_box(&self) -> BoundingBox {
        let [y0, x0, y1, x1] = self.bbox;
        BoundingBox::normalized(x0, y0, (x1 - x0).max(0.0), (y1 - y0).max(0.0))
    }
}

fn squeeze_1d<'a>(arr: &'a ArrayD<f32>, expected: &'static str) -> Result<ArrayView1<'a, f32>, ModelOutputError> {
    let shape_err = || ModelOutputError::Shape {
        model: "object_detector",
        expected,
        got: arr.shape().to_vec(),
    };
    match arr.ndim() {
        1 => arr.view().into_dimensionality::<Ix1>().map_err(|_| shape_err()),
        2 if arr.shape()[0] == 1 => arr
            .index_axis(Axis(0), 0)
            .into_dimensionality::<Ix1>()
            .map_err(|_| shape_err()),
        _ => Err(shape_err()),
    }
}

fn squeeze_boxes(arr: &ArrayD<f32>) -> Result<ArrayView2<'_, f32>, ModelOutputError> {
    let shape_err = || ModelOutputError::Shape {
        model: "object_detector",
        expected: "boxes [N,4] or [1,N,4]",
        got: arr.shape().to_vec(),
    };
    let view = match arr.ndim() {
        2 => arr.view().into_dimensionality::<Ix2>().map_err(|_| shape_err())?,
        3 if arr.shape()[0] == 1 => arr
            .index_axis(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .map_err(|_| shape_err())?,
        _ => return Err(shape_err()),
    };
    if view.ncols() != 4 {
        return Err(shape_err());
    }
    Ok(view)
}

/// Checks the raw output shapes and turns them into candidates. No threshold
/// is applied here; class ids outside [`LABELS`] are dropped.
pub fn decode_detections(raw: &RawDetections) -> Result<Vec<Candidate>, ModelOutputError> {
    let boxes = squeeze_boxes(&raw.boxes)?;
    let scores = squeeze_1d(&raw.scores, "scores [N] or [1,N]")?;
    let classes = squeeze_1d(&raw.classes, "classes [N] or [1,N]")?;
    if boxes.nrows() != scores.len() || scores.len() != classes.len() {
        return Err(ModelOutputError::LengthMismatch {
            model: "object_detector",
            boxes: boxes.nrows(),
            scores: scores.len(),
            classes: classes.len(),
        });
    }

    let mut out = Vec::with_capacity(scores.len());
    for (i, row) in boxes.outer_iter().enumerate() {
        let class = classes[i];
        if !class.is_finite() || class < 0.0 || class as usize >= LABELS.len() {
            debug!(class, "dropping candidate with unknown class id");
            continue;
        }
        let score = scores[i];
        if !score.is_finite() {
            continue;
        }
        if row.iter().any(|v| !v.is_finite()) {
            debug!(index = i, "dropping candidate with non-finite box");
            continue;
        }
        out.push(Candidate {
            class_id: class as usize,
            score,
            bbox: [
                row[0].clamp(0.0, 1.0),
                row[1].clamp(0.0, 1.0),
                row[2].clamp(0.0, 1.0),
                row[3].clamp(0.0, 1.0),
            ],
        });
    }
    Ok(out)
}

/// Runs the detector on one frame and returns the objects at or above
/// [`DETECTION_CONFIDENCE_THRESHOLD`], each with its region features.
///
/// Tracking is left empty; the orchestrator fills it in.
pub fn detect_objects(
    model: &mut dyn ObjectDetectionModel,
    preprocessor: &mut Preprocessor,
    rgb: &RgbImage,
    pool: &ResourcePool,
    cancel: &CancelFlag,
) -> Result<Vec<DetectedObject>> {
    let spec = model.input_spec();
    let input = preprocessor.to_tensor(rgb, &spec, pool)?;
    if cancel.is_cancelled() {
        return Err(Cancelled.into());
    }

    let raw = model.detect(input.view())?;
    drop(input);
    let raw = pool.adopt(raw);
    let candidates = decode_detections(&raw)?;
    drop(raw);

    let total = candidates.len();
    let objects: Vec<DetectedObject> = candidates
        .into_iter()
        .filter(|c| c.score >= DETECTION_CONFIDENCE_THRESHOLD)
        .map(|c| {
            let bounding_box = c.bounding_box();
            DetectedObject {
                id: Uuid::new_v4().to_string(),
                label: LABELS[c.class_id].to_string(),
                confidence: c.score.min(1.0),
                bounding_box,
                features: extract_features(rgb, &bounding_box, pool),
                tracking: None,
            }
        })
        .collect();
    debug!(candidates = total, kept = objects.len(), "object detection decoded");
    Ok(objects)
}
