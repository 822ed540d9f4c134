use crate::error::{Cancelled, ModelOutputError};
use crate::models::SkinClassifierModel;
use crate::preprocess::Preprocessor;
use crate::resources::ResourcePool;
use crate::types::{BoundingBox, ConditionLocation, SkinCondition, SkinConditionKind};
use crate::CancelFlag;
use anyhow::Result;
use image::RgbImage;
use ndarray::{ArrayD, Axis};
use tracing::debug;

/// A condition is reported only when its severity is strictly above this.
pub const SKIN_SEVERITY_THRESHOLD: f32 = 20.0;

/// The classifier reports no per-class certainty, so every reported
/// condition carries this constant.
pub const SKIN_CONDITION_CONFIDENCE: f32 = 0.85;

pub const WHOLE_FRAME_REGION: &str = "whole_frame";

const RECOMMENDATIONS: [(SkinConditionKind, &[&str]); 6] = [
    (
        SkinConditionKind::Acne,
        &[
            "Cleanse twice daily with a gentle, non-comedogenic cleanser",
            "Consider a salicylic acid or benzoyl peroxide spot treatment",
        ],
    ),
    (
        SkinConditionKind::Wrinkle,
        &[
            "Apply broad-spectrum SPF 30+ every morning",
            "Introduce a retinoid serum at night",
        ],
    ),
    (
        SkinConditionKind::DarkSpot,
        &[
            "Use a vitamin C serum in the morning",
            "Reapply sunscreen every two hours outdoors",
        ],
    ),
    (
        SkinConditionKind::Redness,
        &[
            "Prefer fragrance-free, soothing products",
            "Avoid hot water and harsh exfoliants",
        ],
    ),
    (
        SkinConditionKind::Texture,
        &[
            "Exfoliate gently with AHA once or twice a week",
            "Keep skin hydrated with a ceramide moisturizer",
        ],
    ),
    (
        SkinConditionKind::Pore,
        &[
            "Use a niacinamide serum to refine pores",
            "Try a clay mask once a week",
        ],
    ),
];

pub fn recommendations_for(kind: SkinConditionKind) -> Vec<String> {
    RECOMMENDATIONS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, recs)| recs.iter().map(|r| r.to_string()).collect())
        .unwrap_or_default()
}

/// Checks the classifier output shape and scales scores (0..1) to 0..100.
pub fn decode_severities(raw: &ArrayD<f32>) -> Result<[f32; 6], ModelOutputError> {
    let n = SkinConditionKind::ALL.len();
    let shape_err = || ModelOutputError::Shape {
        model: "skin_classifier",
        expected: "[6] or [1,6]",
        got: raw.shape().to_vec(),
    };
    let row = match raw.ndim() {
        1 if raw.len() == n => raw.view(),
        2 if raw.shape() == [1, n] => raw.index_axis(Axis(0), 0),
        _ => return Err(shape_err()),
    };
    let mut out = [0.0f32; 6];
    for (slot, v) in out.iter_mut().zip(row.iter()) {
        *slot = if v.is_finite() { (v * 100.0).clamp(0.0, 100.0) } else { 0.0 };
    }
    Ok(out)
}

/// Builds the reported conditions from decoded severities. Locations start as
/// the whole frame; the landmark fuser narrows them down.
pub fn conditions_from_severities(severities: &[f32; 6]) -> Vec<SkinCondition> {
    SkinConditionKind::ALL
        .iter()
        .zip(severities.iter())
        .filter(|(_, severity)| **severity > SKIN_SEVERITY_THRESHOLD)
        .map(|(kind, severity)| SkinCondition {
            kind: *kind,
            severity: *severity,
            location: ConditionLocation {
                region: WHOLE_FRAME_REGION.to_string(),
                landmark_indices: Vec::new(),
                bounding_box: BoundingBox::whole_frame(),
            },
            confidence: SKIN_CONDITION_CONFIDENCE,
            trend: None,
            recommendations: recommendations_for(*kind),
        })
        .collect()
}

/// Runs the classifier once over the whole frame.
pub fn analyze_skin(
    model: &mut dyn SkinClassifierModel,
    preprocessor: &mut Preprocessor,
    rgb: &RgbImage,
    pool: &ResourcePool,
    cancel: &CancelFlag,
) -> Result<Vec<SkinCondition>> {
    let spec = model.input_spec();
    let input = preprocessor.to_tensor(rgb, &spec, pool)?;
    if cancel.is_cancelled() {
        return Err(Cancelled.into());
    }
    let raw = pool.adopt(model.predict(input.view())?);
    drop(input);
    let severities = decode_severities(&raw)?;
    let conditions = conditions_from_severities(&severities);
    debug!(reported = conditions.len(), "skin analysis decoded");
    Ok(conditions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn threshold_is_strict() {
        let severities = [20.0, 20.5, 0.0, 100.0, 19.9, 55.0];
        let conds = conditions_from_severities(&severities);
        let kinds: Vec<_> = conds.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SkinConditionKind::Wrinkle,
                SkinConditionKind::Redness,
                SkinConditionKind::Pore
            ]
        );
        assert!(conds.iter().all(|c| c.confidence == SKIN_CONDITION_CONFIDENCE));
        assert!(conds.iter().all(|c| c.trend.is_none()));
        assert!(conds.iter().all(|c| c.location.bounding_box == BoundingBox::whole_frame()));
    }

    #[test]
    fn decode_accepts_flat_and_batched_vectors() {
        let flat = decode_severities(&arr1(&[0.1, 0.2, 0.3, 0.4, 0.5, 2.0]).into_dyn()).unwrap();
        assert!((flat[0] - 10.0).abs() < 1e-4);
        assert_eq!(flat[5], 100.0);
        let batched = decode_severities(&arr2(&[[0.0, 0.0, 0.0, 0.0, 0.0, 0.25]]).into_dyn()).unwrap();
        assert!((batched[5] - 25.0).abs() < 1e-4);
    }

    #[test]
    fn decode_rejects_wrong_class_count() {
        let err = decode_severities(&arr2(&[[0.1, 0.2, 0.3]]).into_dyn()).unwrap_err();
        assert!(matches!(err, ModelOutputError::Shape { got, .. } if got == vec![1, 3]));
    }

    #[test]
    fn every_kind_has_recommendations() {
        for kind in SkinConditionKind::ALL {
            assert!(!recommendations_for(kind).is_empty(), "{kind:?}");
        }
    }
}
