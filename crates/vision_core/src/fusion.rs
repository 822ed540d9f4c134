use crate::types::{FaceLandmarks, SkinCondition, SkinConditionKind};

/// Coarse facial region, named by the indices of the five-point landmark
/// layout: 0 right eye, 1 left eye, 2 nose tip, 3 right mouth corner,
/// 4 left mouth corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacialRegion {
    pub name: &'static str,
    pub landmark_indices: &'static [usize],
}

pub const FOREHEAD: FacialRegion = FacialRegion {
    name: "forehead",
    landmark_indices: &[0, 1],
};

pub const CHEEKS: FacialRegion = FacialRegion {
    name: "cheeks",
    landmark_indices: &[0, 1, 3, 4],
};

pub const NOSE: FacialRegion = FacialRegion {
    name: "nose",
    landmark_indices: &[2],
};

pub const WHOLE_FACE: FacialRegion = FacialRegion {
    name: "whole_face",
    landmark_indices: &[0, 1, 2, 3, 4],
};

/// Kinds without an entry map to [`WHOLE_FACE`].
pub const REGION_TABLE: &[(SkinConditionKind, FacialRegion)] = &[
    (SkinConditionKind::Wrinkle, FOREHEAD),
    (SkinConditionKind::DarkSpot, CHEEKS),
    (SkinConditionKind::Pore, NOSE),
];

pub fn region_for(kind: SkinConditionKind) -> FacialRegion {
    REGION_TABLE
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, region)| *region)
        .unwrap_or(WHOLE_FACE)
}

/// Moves each condition onto its facial region. Without a face the
/// conditions come back untouched.
pub fn fuse_landmarks(
    mut conditions: Vec<SkinCondition>,
    face: Option<&FaceLandmarks>,
) -> Vec<SkinCondition> {
    let Some(face) = face else {
        return conditions;
    };
    for condition in &mut conditions {
        let region = region_for(condition.kind);
        condition.location.region = region.name.to_string();
        condition.location.landmark_indices = region
            .landmark_indices
            .iter()
            .copied()
            .filter(|i| *i < face.points.len())
            .collect();
        condition.location.bounding_box = face.bounding_box;
    }
    conditions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skin::{conditions_from_severities, WHOLE_FRAME_REGION};
    use crate::types::BoundingBox;

    fn face(points: usize) -> FaceLandmarks {
        FaceLandmarks {
            points: vec![[10.0, 10.0]; points],
            bounding_box: BoundingBox::pixels(5.0, 5.0, 40.0, 50.0),
            score: 0.9,
        }
    }

    #[test]
    fn table_lookup() {
        assert_eq!(region_for(SkinConditionKind::Wrinkle).name, "forehead");
        assert_eq!(region_for(SkinConditionKind::DarkSpot).name, "cheeks");
        assert_eq!(region_for(SkinConditionKind::Pore).name, "nose");
        assert_eq!(region_for(SkinConditionKind::Acne), WHOLE_FACE);
        assert_eq!(region_for(SkinConditionKind::Redness), WHOLE_FACE);
        assert_eq!(region_for(SkinConditionKind::Texture), WHOLE_FACE);
    }

    #[test]
    fn no_face_leaves_conditions_alone() {
        let conds = conditions_from_severities(&[50.0; 6]);
        let fused = fuse_landmarks(conds.clone(), None);
        assert_eq!(fused, conds);
        assert!(fused.iter().all(|c| c.location.region == WHOLE_FRAME_REGION));
    }

    #[test]
    fn face_box_and_region_indices_replace_the_frame_box() {
        let conds = conditions_from_severities(&[0.0, 50.0, 0.0, 0.0, 0.0, 50.0]);
        let f = face(5);
        let fused = fuse_landmarks(conds, Some(&f));
        assert_eq!(fused[0].location.region, "forehead");
        assert_eq!(fused[0].location.landmark_indices, vec![0, 1]);
        assert_eq!(fused[1].location.region, "nose");
        assert_eq!(fused[1].location.landmark_indices, vec![2]);
        assert!(fused.iter().all(|c| c.location.bounding_box == f.bounding_box));
    }

    #[test]
    fn indices_the_detector_did_not_return_are_dropped() {
        let conds = conditions_from_severities(&[50.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let fused = fuse_landmarks(conds, Some(&face(3)));
        assert_eq!(fused[0].location.landmark_indices, vec![0, 1, 2]);
    }
}
