//! Fragment scheduling.
//!
//! Splits a video's frame range into fixed-length fragments and assigns each
//! fragment a key from the job's sequence, wrapping cyclically.

use mghost_models::{
    JobWarning, KeySequence, SequencePolicy, VideoFragment, WarningKind,
};

use crate::error::{MediaError, MediaResult};

/// Fragments for one job plus any scheduling diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentPlan {
    pub fragments: Vec<VideoFragment>,
    /// Frames per fragment (the last fragment may be shorter)
    pub span: u64,
    pub warnings: Vec<JobWarning>,
}

impl FragmentPlan {
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Frames per fragment: `round(fragment_length_secs * fps)`, at least 1.
pub fn fragment_span(fps: f64, fragment_length_secs: f64) -> MediaResult<u64> {
    if !fps.is_finite() || fps <= 0.0 {
        return Err(MediaError::invalid(format!("fps must be positive, got {}", fps)));
    }
    if !fragment_length_secs.is_finite() || fragment_length_secs <= 0.0 {
        return Err(MediaError::invalid(format!(
            "fragment length must be positive, got {}",
            fragment_length_secs
        )));
    }
    Ok(((fragment_length_secs * fps).round() as u64).max(1))
}

/// Half-open frame ranges covering `0..frame_count` in steps of `span`.
pub fn partition_frames(frame_count: u64, span: u64) -> Vec<(u64, u64)> {
    let span = span.max(1);
    (0..frame_count.div_ceil(span))
        .map(|i| {
            let start = i * span;
            (start, (start + span).min(frame_count))
        })
        .collect()
}

/// Plan embedding fragments. Pure; performs no I/O.
pub fn plan_fragments(
    frame_count: u64,
    fps: f64,
    fragment_length_secs: f64,
    keys: &[i64],
    sequence: &KeySequence,
    policy: SequencePolicy,
) -> MediaResult<FragmentPlan> {
    let span = fragment_span(fps, fragment_length_secs)?;
    let resolved = sequence.resolve(keys)?;
    let ranges = partition_frames(frame_count, span);

    let mut warnings = Vec::new();
    if !ranges.is_empty() && resolved.len() != ranges.len() {
        let message = format!(
            "sequence has {} entries but the video has {} fragments",
            resolved.len(),
            ranges.len()
        );
        match policy {
            SequencePolicy::Exact => return Err(MediaError::invalid(message)),
            SequencePolicy::Cyclic => warnings.push(JobWarning::new(
                WarningKind::SequenceLengthMismatch,
                format!("{}; sequence applied cyclically", message),
            )),
        }
    }

    let fragments = ranges
        .into_iter()
        .enumerate()
        .map(|(index, (start_frame, end_frame))| {
            let (key_index, assigned_key) = resolved[index % resolved.len()];
            VideoFragment {
                index,
                start_frame,
                end_frame,
                key_index,
                assigned_key,
            }
        })
        .collect();

    Ok(FragmentPlan {
        fragments,
        span,
        warnings,
    })
}

/// Plan extraction fragments. The key assignment is unknown, so every
/// fragment carries the first key as a neutral placeholder.
pub fn plan_extraction(
    frame_count: u64,
    fps: f64,
    fragment_length_secs: f64,
    keys: &[i64],
) -> MediaResult<Vec<VideoFragment>> {
    let first = *keys
        .first()
        .ok_or_else(|| MediaError::invalid("keys list cannot be empty"))?;
    let span = fragment_span(fps, fragment_length_secs)?;

    Ok(partition_frames(frame_count, span)
        .into_iter()
        .enumerate()
        .map(|(index, (start_frame, end_frame))| VideoFragment {
            index,
            start_frame,
            end_frame,
            key_index: 0,
            assigned_key: first,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> Vec<i64> {
        vec![10, 11, 12, 13]
    }

    #[test]
    fn test_partition_is_complete_and_disjoint() {
        for (count, span) in [(100u64, 20u64), (101, 20), (7, 3), (1, 5), (5, 1)] {
            let ranges = partition_frames(count, span);
            assert_eq!(ranges.len() as u64, count.div_ceil(span));
            let mut next = 0;
            for (start, end) in &ranges {
                assert_eq!(*start, next);
                assert!(end > start);
                next = *end;
            }
            assert_eq!(next, count);
        }
    }

    #[test]
    fn test_cyclic_assignment() {
        let plan = plan_fragments(
            100,
            20.0,
            1.0,
            &keys(),
            &KeySequence::from_indices([0, 2, 3, 1]),
            SequencePolicy::Cyclic,
        )
        .unwrap();

        assert_eq!(plan.span, 20);
        let indices: Vec<usize> = plan.fragments.iter().map(|f| f.key_index).collect();
        assert_eq!(indices, vec![0, 2, 3, 1, 0]);
        let assigned: Vec<i64> = plan.fragments.iter().map(|f| f.assigned_key).collect();
        assert_eq!(assigned, vec![10, 12, 13, 11, 10]);

        assert_eq!(plan.warnings.len(), 1);
        assert_eq!(plan.warnings[0].kind, WarningKind::SequenceLengthMismatch);
    }

    #[test]
    fn test_exact_policy_rejects_mismatch() {
        let result = plan_fragments(
            100,
            20.0,
            1.0,
            &keys(),
            &KeySequence::from_indices([0, 2, 3, 1]),
            SequencePolicy::Exact,
        );
        assert!(matches!(result, Err(MediaError::InvalidParameter(_))));

        let plan = plan_fragments(
            80,
            20.0,
            1.0,
            &keys(),
            &KeySequence::from_indices([0, 2, 3, 1]),
            SequencePolicy::Exact,
        )
        .unwrap();
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_span_rounds_and_has_floor() {
        assert_eq!(fragment_span(29.97, 1.0).unwrap(), 30);
        assert_eq!(fragment_span(10.0, 0.01).unwrap(), 1);
        assert!(fragment_span(0.0, 1.0).is_err());
        assert!(fragment_span(30.0, -1.0).is_err());
        assert!(fragment_span(30.0, f64::NAN).is_err());
    }

    #[test]
    fn test_explicit_key_selectors() {
        let sequence: KeySequence = r#"[{"key": 13}, 0]"#.parse().unwrap();
        let plan =
            plan_fragments(40, 20.0, 1.0, &keys(), &sequence, SequencePolicy::Cyclic).unwrap();
        let assigned: Vec<i64> = plan.fragments.iter().map(|f| f.assigned_key).collect();
        assert_eq!(assigned, vec![13, 10]);
    }

    #[test]
    fn test_invalid_inputs() {
        let seq = KeySequence::from_indices([0]);
        assert!(plan_fragments(10, 20.0, 1.0, &[], &seq, SequencePolicy::Cyclic).is_err());
        assert!(plan_fragments(
            10,
            20.0,
            1.0,
            &keys(),
            &KeySequence(Vec::new()),
            SequencePolicy::Cyclic
        )
        .is_err());
        assert!(plan_fragments(
            10,
            20.0,
            1.0,
            &keys(),
            &KeySequence::from_indices([4]),
            SequencePolicy::Cyclic
        )
        .is_err());
    }

    #[test]
    fn test_zero_frames_yield_empty_plan() {
        let plan = plan_fragments(
            0,
            20.0,
            1.0,
            &keys(),
            &KeySequence::from_indices([0, 1]),
            SequencePolicy::Exact,
        )
        .unwrap();
        assert!(plan.is_empty());
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_plan_extraction() {
        let fragments = plan_extraction(45, 20.0, 1.0, &keys()).unwrap();
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[2].frame_count(), 5);
        assert!(plan_extraction(45, 20.0, 1.0, &[]).is_err());
    }
}
