//! Per-frame orchestration.
//!
//! One call to [`AnalysisPipeline::analyze_frame`] fans out to three blocking
//! branches (objects, skin, face landmarks), waits for all of them, and then
//! fuses, tracks and aggregates. Every numeric buffer a call touches is leased
//! from a pool created for that call.

use crate::config::PipelineConfig;
use crate::detector::detect_objects;
use crate::error::{Cancelled, PipelineError};
use crate::feedback::{FeedbackBuffer, FeedbackEntry, FeedbackSample};
use crate::fusion::fuse_landmarks;
use crate::metrics::PerformanceMonitor;
use crate::models::{ModelProvider, ModelSummary};
use crate::preprocess::{ChannelOrder, InputSpec, Normalization, Preprocessor, TensorLayout};
use crate::registry::{ModelRegistry, RegistryStatus, SharedModel};
use crate::resources::{BufferLedger, ResourcePool};
use crate::skin::analyze_skin;
use crate::tracker::Tracker;
use crate::types::{AnalysisResult, DetectedObject, Frame, PerformanceMetrics, SkinCondition, TrackingRecord};
use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

// ---------------------------------------------------------
// RELOJ
// ---------------------------------------------------------

/// Source of the millisecond timestamps used for tracking and results.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Milliseconds since the clock was created.
#[derive(Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------
// CANCELACION
// ---------------------------------------------------------

/// Shared stop signal for the branches of one frame. Branches poll it between
/// stages and bail out with [`Cancelled`].
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Trips the flag if `analyze_frame` is dropped before it finishes.
struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

// ---------------------------------------------------------
// RAMAS
// ---------------------------------------------------------

const STAGE_OBJECTS: &str = "object_detection";
const STAGE_SKIN: &str = "skin_analysis";
const STAGE_LANDMARKS: &str = "landmark_detection";
const STAGE_FEEDBACK: &str = "feedback";

struct BranchContext {
    rgb: Arc<RgbImage>,
    pool: ResourcePool,
    cancel: CancelFlag,
}

/// Runs `run` against `model` on the blocking pool. An absent model yields
/// `Ok(None)`. When `fatal`, a failure trips the shared cancel flag.
fn spawn_branch<M, T, F>(
    stage: &'static str,
    model: Option<SharedModel<M>>,
    ctx: &BranchContext,
    fatal: bool,
    run: F,
) -> JoinHandle<anyhow::Result<Option<T>>>
where
    M: ?Sized + Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut M, &RgbImage, &ResourcePool, &CancelFlag) -> anyhow::Result<T> + Send + 'static,
{
    let rgb = Arc::clone(&ctx.rgb);
    let pool = ctx.pool.clone();
    let cancel = ctx.cancel.clone();
    tokio::task::spawn_blocking(move || {
        let Some(model) = model else {
            debug!(stage, "model not loaded, branch skipped");
            return Ok(None);
        };
        if cancel.is_cancelled() {
            return Err(Cancelled.into());
        }
        let mut guard = model.lock();
        let out = run(&mut **guard, &rgb, &pool, &cancel);
        drop(guard);
        if fatal && out.is_err() {
            cancel.cancel();
        }
        out.map(Some)
    })
}

fn joined<T>(res: Result<anyhow::Result<T>, JoinError>) -> anyhow::Result<T> {
    match res {
        Ok(inner) => inner,
        Err(err) => Err(err.into()),
    }
}

/// Picks the error to report when one or both fatal branches failed. A
/// branch that only stopped because of its sibling is not the cause.
fn fatal_failure<A, B>(
    objects: anyhow::Result<A>,
    skin: anyhow::Result<B>,
) -> Result<(A, B), PipelineError> {
    match (objects, skin) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        (Err(e), Ok(_)) => Err(PipelineError::analysis(STAGE_OBJECTS, e)),
        (Ok(_), Err(e)) => Err(PipelineError::analysis(STAGE_SKIN, e)),
        (Err(oe), Err(se)) => {
            if oe.is::<Cancelled>() && !se.is::<Cancelled>() {
                Err(PipelineError::analysis(STAGE_SKIN, se))
            } else {
                Err(PipelineError::analysis(STAGE_OBJECTS, oe))
            }
        }
    }
}

/// Mean of the per-group means over the groups that are not empty.
pub fn aggregate_confidence(objects: &[DetectedObject], conditions: &[SkinCondition]) -> f32 {
    let mut groups = Vec::with_capacity(2);
    if !objects.is_empty() {
        groups.push(objects.iter().map(|o| o.confidence).sum::<f32>() / objects.len() as f32);
    }
    if !conditions.is_empty() {
        groups.push(conditions.iter().map(|c| c.confidence).sum::<f32>() / conditions.len() as f32);
    }
    if groups.is_empty() {
        0.0
    } else {
        groups.iter().sum::<f32>() / groups.len() as f32
    }
}

// ---------------------------------------------------------
// PIPELINE
// ---------------------------------------------------------

/// Real-time skin and object analysis over a stream of frames.
///
/// Built once by the application and shared by reference; every method takes
/// `&self`.
pub struct AnalysisPipeline {
    config: PipelineConfig,
    provider: Box<dyn ModelProvider>,
    registry: RwLock<ModelRegistry>,
    tracker: Mutex<Tracker>,
    monitor: Mutex<PerformanceMonitor>,
    feedback: Mutex<FeedbackBuffer>,
    ledger: BufferLedger,
    feedback_pool: ResourcePool,
    clock: Arc<dyn Clock>,
    /// Bumped by `dispose`; work started under an older value is discarded.
    generation: AtomicU64,
}

impl AnalysisPipeline {
    pub fn new(config: PipelineConfig, provider: Box<dyn ModelProvider>) -> Self {
        Self::with_clock(config, provider, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(
        config: PipelineConfig,
        provider: Box<dyn ModelProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = BufferLedger::new();
        let feedback_pool = ResourcePool::new(&ledger, "feedback");
        Self {
            config,
            provider,
            registry: RwLock::new(ModelRegistry::new()),
            tracker: Mutex::new(Tracker::new()),
            monitor: Mutex::new(PerformanceMonitor::new()),
            feedback: Mutex::new(FeedbackBuffer::new()),
            ledger,
            feedback_pool,
            clock,
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn initialize(&self) -> Result<(), PipelineError> {
        self.registry.write().initialize(self.provider.as_ref())
    }

    pub async fn analyze_frame(&self, frame: &Frame) -> Result<AnalysisResult, PipelineError> {
        let started = Instant::now();
        let (generation, detector, classifier, landmarks) = {
            let registry = self.registry.read();
            if !registry.is_initialized() {
                return Err(PipelineError::NotInitialized);
            }
            (
                self.generation.load(Ordering::SeqCst),
                registry.object_detector(),
                registry.skin_classifier(),
                registry.landmarks(),
            )
        };

        let ctx = BranchContext {
            rgb: Arc::clone(&frame.image),
            pool: ResourcePool::new(&self.ledger, format!("frame-{}", frame.id)),
            cancel: CancelFlag::new(),
        };
        let _cancel_on_drop = CancelOnDrop(ctx.cancel.clone());
        let resize = self.config.resize;

        let objects_task = spawn_branch(STAGE_OBJECTS, detector, &ctx, true, move |model, rgb, pool, cancel| {
            detect_objects(model, &mut Preprocessor::new(resize), rgb, pool, cancel)
        });
        let skin_task = spawn_branch(STAGE_SKIN, classifier, &ctx, true, move |model, rgb, pool, cancel| {
            analyze_skin(model, &mut Preprocessor::new(resize), rgb, pool, cancel)
        });
        let face_task = spawn_branch(STAGE_LANDMARKS, landmarks, &ctx, false, |model, rgb, pool, cancel| {
            if cancel.is_cancelled() {
                return Err(Cancelled.into());
            }
            model.detect_face(rgb, pool)
        });

        // all three are awaited, so every lease is back before we return
        let (objects, skin, face) = tokio::join!(objects_task, skin_task, face_task);

        let face = match joined(face) {
            Ok(face) => face.flatten(),
            Err(err) => {
                if !err.is::<Cancelled>() {
                    warn!(frame_id = frame.id, "landmark detection failed, continuing without landmarks: {err:#}");
                }
                None
            }
        };
        let outcome = fatal_failure(joined(objects), joined(skin));

        let leaked = ctx.pool.live();
        if leaked > 0 {
            warn!(frame_id = frame.id, leaked, "buffers still leased after frame");
        }

        let (objects, conditions) = match outcome {
            Ok(pair) => pair,
            Err(err) => {
                warn!(frame_id = frame.id, stage = err.stage().unwrap_or("-"), "frame analysis failed: {err}");
                return Err(err);
            }
        };

        let skin_conditions = fuse_landmarks(conditions.unwrap_or_default(), face.as_ref());
        let mut objects = objects.unwrap_or_default();
        let timestamp_ms = self.clock.now_ms();
        let confidence;
        let processing_time_ms;
        {
            // dispose clears the tracker under this lock after bumping the
            // generation, so checking here keeps a disposed pipeline empty
            let mut tracker = self.tracker.lock();
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(frame_id = frame.id, "pipeline disposed while frame was in flight");
                return Err(PipelineError::NotInitialized);
            }
            tracker.update(&mut objects, timestamp_ms);
            confidence = aggregate_confidence(&objects, &skin_conditions);
            processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
            self.monitor.lock().update(processing_time_ms);
        }

        debug!(
            frame_id = frame.id,
            objects = objects.len(),
            conditions = skin_conditions.len(),
            face = face.is_some(),
            confidence,
            processing_time_ms,
            "frame analyzed"
        );

        Ok(AnalysisResult {
            frame_id: frame.id,
            objects,
            skin_conditions,
            confidence,
            processing_time_ms,
            timestamp_ms,
        })
    }

    /// Stores the frame, in skin-classifier input layout, with its label.
    /// `confidence` is clamped to 0..1; NaN or infinite values are rejected.
    pub fn learn_from_feedback(
        &self,
        frame: &Frame,
        label: &str,
        confidence: f32,
    ) -> Result<(), PipelineError> {
        if !confidence.is_finite() {
            return Err(PipelineError::analysis(
                STAGE_FEEDBACK,
                anyhow::anyhow!("feedback confidence {confidence} is not a number"),
            ));
        }
        let confidence = confidence.clamp(0.0, 1.0);
        let generation = {
            let registry = self.registry.read();
            if !registry.is_initialized() {
                return Err(PipelineError::NotInitialized);
            }
            self.generation.load(Ordering::SeqCst)
        };
        let spec = InputSpec {
            width: self.config.classifier_input,
            height: self.config.classifier_input,
            layout: TensorLayout::Nhwc,
            channels: ChannelOrder::Rgb,
            normalization: Normalization::UnitRange,
        };
        let tensor = Preprocessor::new(self.config.resize)
            .to_tensor(&frame.image, &spec, &self.feedback_pool)
            .map_err(|err| PipelineError::analysis(STAGE_FEEDBACK, err))?;
        let mut feedback = self.feedback.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(PipelineError::NotInitialized);
        }
        feedback.record(FeedbackEntry {
            frame_id: frame.id,
            label: label.to_string(),
            confidence,
            recorded_at_ms: self.clock.now_ms(),
            tensor,
        });
        Ok(())
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.monitor.lock().snapshot()
    }

    /// Live tracking records, after evicting the stale ones.
    pub fn tracked_objects(&self) -> HashMap<String, TrackingRecord> {
        let now = self.clock.now_ms();
        let mut tracker = self.tracker.lock();
        tracker.evict_stale(now);
        tracker.snapshot()
    }

    /// Drops models, feedback and tracking state. Analysis fails with
    /// [`PipelineError::NotInitialized`] until `initialize` runs again.
    pub fn dispose(&self) {
        {
            let mut registry = self.registry.write();
            registry.dispose();
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.feedback.lock().clear();
        self.tracker.lock().clear();
        self.monitor.lock().reset();
        debug!(live_buffers = self.ledger.live(), "pipeline disposed");
    }

    pub fn status(&self) -> RegistryStatus {
        self.registry.read().status()
    }

    pub fn model_summaries(&self) -> Vec<ModelSummary> {
        self.registry.read().model_summaries()
    }

    /// Buffers currently leased anywhere in the pipeline, feedback included.
    pub fn live_buffers(&self) -> usize {
        self.ledger.live()
    }

    pub fn feedback_samples(&self) -> Vec<FeedbackSample> {
        self.feedback.lock().samples()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, ConditionLocation, ObjectFeatures, ShapeClass, SkinConditionKind};

    fn obj(confidence: f32) -> DetectedObject {
        DetectedObject {
            id: "o".into(),
            label: "cup".into(),
            confidence,
            bounding_box: BoundingBox::whole_frame(),
            features: ObjectFeatures {
                average_color: [0; 3],
                texture_score: 0.0,
                relative_size: 1.0,
                shape: ShapeClass::Square,
            },
            tracking: None,
        }
    }

    fn cond(confidence: f32) -> SkinCondition {
        SkinCondition {
            kind: SkinConditionKind::Acne,
            severity: 50.0,
            location: ConditionLocation {
                region: "whole_frame".into(),
                landmark_indices: vec![],
                bounding_box: BoundingBox::whole_frame(),
            },
            confidence,
            trend: None,
            recommendations: vec![],
        }
    }

    #[test]
    fn confidence_averages_group_means() {
        assert_eq!(aggregate_confidence(&[], &[]), 0.0);
        assert!((aggregate_confidence(&[obj(0.6), obj(1.0)], &[]) - 0.8).abs() < 1e-6);
        assert!((aggregate_confidence(&[], &[cond(0.85)]) - 0.85).abs() < 1e-6);
        let both = aggregate_confidence(&[obj(0.6), obj(1.0)], &[cond(0.85), cond(0.85)]);
        assert!((both - 0.825).abs() < 1e-6);
    }

    #[test]
    fn sibling_cancellation_is_not_reported_as_the_cause() {
        let err = fatal_failure::<(), ()>(
            Err(Cancelled.into()),
            Err(anyhow::anyhow!("classifier blew up")),
        )
        .unwrap_err();
        assert_eq!(err.stage(), Some(STAGE_SKIN));
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(10);
        assert_eq!(clock.now_ms(), 10);
        clock.advance(5);
        assert_eq!(clock.now_ms(), 15);
        clock.set(3);
        assert_eq!(clock.now_ms(), 3);
    }

    #[test]
    fn cancel_on_drop_trips_the_flag() {
        let flag = CancelFlag::new();
        {
            let _guard = CancelOnDrop(flag.clone());
            assert!(!flag.is_cancelled());
        }
        assert!(flag.is_cancelled());
    }
}
