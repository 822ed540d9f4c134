use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Frame handed to the pipeline. The pixel data is shared so the concurrent
/// branches can read it without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: u64,
    pub image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(id: u64, image: RgbImage) -> Self {
        Self {
            id,
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Rectangle `[x, y, width, height]`. `normalized` says whether the values are
/// fractions of the frame (0..1) or pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub normalized: bool,
}

impl BoundingBox {
    pub fn normalized(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            normalized: true,
        }
    }

    pub fn pixels(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            normalized: false,
        }
    }

    pub fn whole_frame() -> Self {
        Self::normalized(0.0, 0.0, 1.0, 1.0)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Pixel-space copy of this box for a frame of `dims`.
    pub fn to_pixels(&self, dims: (u32, u32)) -> Self {
        if !self.normalized {
            return *self;
        }
        let (w, h) = (dims.0 as f32, dims.1 as f32);
        Self::pixels(self.x * w, self.y * h, self.width * w, self.height * h)
    }

    /// Normalized copy of this box for a frame of `dims`.
    pub fn to_normalized(&self, dims: (u32, u32)) -> Self {
        if self.normalized {
            return *self;
        }
        let w = (dims.0 as f32).max(1.0);
        let h = (dims.1 as f32).max(1.0);
        Self::normalized(self.x / w, self.y / h, self.width / w, self.height / h)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeClass {
    Square,
    Horizontal,
    Vertical,
    Irregular,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectFeatures {
    pub average_color: [u8; 3],
    /// 0..100, higher is smoother.
    pub texture_score: f32,
    /// Box area over frame area, 0..1.
    pub relative_size: f32,
    pub shape: ShapeClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub x: f32,
    pub y: f32,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

impl Velocity {
    pub fn speed(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub id: String,
    pub label: String,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    /// Oldest first, never empty.
    pub positions: Vec<PositionSample>,
    pub velocity: Velocity,
    pub stable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub id: String,
    pub label: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
    pub features: ObjectFeatures,
    pub tracking: Option<TrackingRecord>,
}

/// Classifier output order is the declaration order of this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkinConditionKind {
    Acne,
    Wrinkle,
    DarkSpot,
    Redness,
    Texture,
    Pore,
}

impl SkinConditionKind {
    pub const ALL: [SkinConditionKind; 6] = [
        SkinConditionKind::Acne,
        SkinConditionKind::Wrinkle,
        SkinConditionKind::DarkSpot,
        SkinConditionKind::Redness,
        SkinConditionKind::Texture,
        SkinConditionKind::Pore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SkinConditionKind::Acne => "acne",
            SkinConditionKind::Wrinkle => "wrinkle",
            SkinConditionKind::DarkSpot => "dark_spot",
            SkinConditionKind::Redness => "redness",
            SkinConditionKind::Texture => "texture",
            SkinConditionKind::Pore => "pore",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Worsening,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionLocation {
    pub region: String,
    pub landmark_indices: Vec<usize>,
    pub bounding_box: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkinCondition {
    pub kind: SkinConditionKind,
    /// 0..100.
    pub severity: f32,
    pub location: ConditionLocation,
    pub confidence: f32,
    /// Filled in by callers that keep history; the pipeline leaves it empty.
    pub trend: Option<Trend>,
    pub recommendations: Vec<String>,
}

/// Face found by the landmark detector, in pixel coordinates of the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    pub points: Vec<[f32; 2]>,
    pub bounding_box: BoundingBox,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub frame_id: u64,
    pub objects: Vec<DetectedObject>,
    pub skin_conditions: Vec<SkinCondition>,
    pub confidence: f32,
    pub processing_time_ms: f64,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub avg_processing_time_ms: f64,
    pub fps: f64,
    pub total_processed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_conversions_keep_the_flag_honest() {
        let norm = BoundingBox::normalized(0.25, 0.5, 0.5, 0.25);
        let px = norm.to_pixels((200, 100));
        assert!(!px.normalized);
        assert_eq!((px.x, px.y, px.width, px.height), (50.0, 50.0, 100.0, 25.0));
        let back = px.to_normalized((200, 100));
        assert!(back.normalized);
        assert_eq!(back, norm);
    }

    #[test]
    fn condition_kinds_serialize_like_their_names() {
        for kind in SkinConditionKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
