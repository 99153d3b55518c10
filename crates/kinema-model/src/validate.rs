//! Structural validation for incoming landmark batches.
//!
//! Validation is sampled, not exhaustive: only a bounded prefix of frames
//! and points is inspected ([`FRAME_SAMPLE_LIMIT`] / [`POINT_SAMPLE_LIMIT`]),
//! keeping the per-batch cost fixed regardless of recording length. Elements
//! beyond the prefix are persisted as-is. This is a known approximation
//! carried over from the capture side's own checks.

use serde_json::Value;
use thiserror::Error;

/// Frames inspected per batch.
pub const FRAME_SAMPLE_LIMIT: usize = 5;

/// Points inspected per frame.
pub const POINT_SAMPLE_LIMIT: usize = 5;

/// Minimum points per frame for a full pose skeleton.
pub const FULL_SKELETON_MIN_POINTS: usize = 25;

/// Coordinate fields every landmark point must carry. Extra channels
/// (visibility, confidence) pass through untouched.
const REQUIRED_FIELDS: [&str; 3] = ["x", "y", "z"];

/// How strictly frame shape is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SkeletonMode {
    /// Frames only need at least one point.
    #[default]
    AnyPose,
    /// Frames must carry at least [`FULL_SKELETON_MIN_POINTS`] points.
    FullSkeleton,
}

/// A structural defect in an incoming batch, naming the first offending
/// frame, point, and field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The payload is not a non-empty array of frames.
    #[error("landmarks must be a non-empty array of frames")]
    EmptyBatch,

    /// A frame is not an array of points.
    #[error("frame {frame} must be an array of points")]
    FrameNotArray { frame: usize },

    /// A frame carries no points.
    #[error("frame {frame} must contain at least one point")]
    EmptyFrame { frame: usize },

    /// A frame is too short for a full pose skeleton.
    #[error("frame {frame} has {count} points, a full skeleton requires at least {required}")]
    IncompleteSkeleton {
        frame: usize,
        count: usize,
        required: usize,
    },

    /// A point is not an object.
    #[error("frame {frame}, point {point} must be an object")]
    PointNotObject { frame: usize, point: usize },

    /// A point is missing a coordinate, or carries a non-numeric one.
    #[error("frame {frame}, point {point}: field `{field}` must be a finite number")]
    BadCoordinate {
        frame: usize,
        point: usize,
        field: &'static str,
    },
}

impl ValidationError {
    /// Path of the offending element, for boundary error bodies.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::EmptyBatch => "landmarks".to_string(),
            Self::FrameNotArray { frame }
            | Self::EmptyFrame { frame }
            | Self::IncompleteSkeleton { frame, .. } => format!("landmarks[{frame}]"),
            Self::PointNotObject { frame, point } => format!("landmarks[{frame}][{point}]"),
            Self::BadCoordinate {
                frame,
                point,
                field,
            } => format!("landmarks[{frame}][{point}].{field}"),
        }
    }
}

/// Check the structural shape of a frames payload.
///
/// Returns the batch frame count on success.
///
/// # Errors
///
/// Returns the first [`ValidationError`] encountered while walking the
/// sampled prefix.
pub fn validate_batch(landmarks: &Value, mode: SkeletonMode) -> Result<u32, ValidationError> {
    let frames = landmarks.as_array().ok_or(ValidationError::EmptyBatch)?;
    if frames.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }

    for (frame_idx, frame) in frames.iter().take(FRAME_SAMPLE_LIMIT).enumerate() {
        let points = frame
            .as_array()
            .ok_or(ValidationError::FrameNotArray { frame: frame_idx })?;

        if points.is_empty() {
            return Err(ValidationError::EmptyFrame { frame: frame_idx });
        }
        if mode == SkeletonMode::FullSkeleton && points.len() < FULL_SKELETON_MIN_POINTS {
            return Err(ValidationError::IncompleteSkeleton {
                frame: frame_idx,
                count: points.len(),
                required: FULL_SKELETON_MIN_POINTS,
            });
        }

        for (point_idx, point) in points.iter().take(POINT_SAMPLE_LIMIT).enumerate() {
            let fields = point.as_object().ok_or(ValidationError::PointNotObject {
                frame: frame_idx,
                point: point_idx,
            })?;

            for field in REQUIRED_FIELDS {
                let valid = fields
                    .get(field)
                    .and_then(Value::as_f64)
                    .is_some_and(f64::is_finite);
                if !valid {
                    return Err(ValidationError::BadCoordinate {
                        frame: frame_idx,
                        point: point_idx,
                        field,
                    });
                }
            }
        }
    }

    Ok(frames.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point() -> Value {
        json!({"x": 0.5, "y": 0.5, "z": 0.0, "visibility": 0.99})
    }

    fn frame(points: usize) -> Value {
        Value::Array(vec![point(); points])
    }

    fn batch(frames: usize, points: usize) -> Value {
        Value::Array(vec![frame(points); frames])
    }

    #[test]
    fn test_valid_batch_returns_frame_count() {
        assert_eq!(validate_batch(&batch(3, 33), SkeletonMode::AnyPose), Ok(3));
        assert_eq!(
            validate_batch(&batch(3, 33), SkeletonMode::FullSkeleton),
            Ok(3)
        );
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert_eq!(
            validate_batch(&json!([]), SkeletonMode::AnyPose),
            Err(ValidationError::EmptyBatch)
        );
        assert_eq!(
            validate_batch(&json!({"frames": []}), SkeletonMode::AnyPose),
            Err(ValidationError::EmptyBatch)
        );
    }

    #[test]
    fn test_missing_coordinate_names_frame_point_and_field() {
        let mut payload = batch(3, 3);
        payload[1][2] = json!({"x": 0.5, "y": 0.5});

        let err = validate_batch(&payload, SkeletonMode::AnyPose).unwrap_err();
        assert_eq!(
            err,
            ValidationError::BadCoordinate {
                frame: 1,
                point: 2,
                field: "z"
            }
        );
        assert_eq!(err.path(), "landmarks[1][2].z");
    }

    #[test]
    fn test_non_numeric_coordinate_rejected() {
        let mut payload = batch(1, 2);
        payload[0][0] = json!({"x": "wide", "y": 0.1, "z": 0.2});

        let err = validate_batch(&payload, SkeletonMode::AnyPose).unwrap_err();
        assert_eq!(
            err,
            ValidationError::BadCoordinate {
                frame: 0,
                point: 0,
                field: "x"
            }
        );
    }

    #[test]
    fn test_point_must_be_object() {
        let mut payload = batch(1, 2);
        payload[0][1] = json!([0.1, 0.2, 0.3]);

        let err = validate_batch(&payload, SkeletonMode::AnyPose).unwrap_err();
        assert_eq!(err, ValidationError::PointNotObject { frame: 0, point: 1 });
        assert_eq!(err.path(), "landmarks[0][1]");
    }

    #[test]
    fn test_full_skeleton_minimum() {
        let payload = batch(2, 10);
        assert!(validate_batch(&payload, SkeletonMode::AnyPose).is_ok());
        assert_eq!(
            validate_batch(&payload, SkeletonMode::FullSkeleton),
            Err(ValidationError::IncompleteSkeleton {
                frame: 0,
                count: 10,
                required: FULL_SKELETON_MIN_POINTS
            })
        );
    }

    #[test]
    fn test_defects_beyond_sample_prefix_pass() {
        // Sampling is a documented trade-off: the sixth frame and sixth
        // point are never inspected.
        let mut payload = batch(8, 8);
        payload[FRAME_SAMPLE_LIMIT] = json!("not a frame");
        payload[0][POINT_SAMPLE_LIMIT] = json!({"x": 0.0});

        assert_eq!(validate_batch(&payload, SkeletonMode::AnyPose), Ok(8));
    }

    #[test]
    fn test_extra_channels_pass_through() {
        let payload = json!([[{"x": 0.1, "y": 0.2, "z": 0.3, "visibility": 0.8, "w": 1.0}]]);
        assert_eq!(validate_batch(&payload, SkeletonMode::AnyPose), Ok(1));
    }
}
