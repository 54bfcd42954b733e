//! Timed Crossfade Merger
//!
//! Folds an ordered sequence of stems into one buffer. Each adjacent pair is
//! joined by overlapping the tail of the accumulated audio with the head of
//! the next stem under a complementary cosine fade, with an optional run of
//! silence after the overlap. Samples outside the overlap are copied
//! bit-for-bit; nothing is resampled, normalized or clipped.

use std::borrow::Borrow;

use serde::Serialize;

use crate::engine::buffer::{AudioBuffer, StemFormat};
use crate::error::{Result, StemError};
use crate::merge::fade::{apply_tail_fade, cosine_fade};
use crate::merge::guard::assert_compatible;
use crate::merge::source::{Stem, StemSource};
use crate::merge::timing::{TimingTable, TransitionTiming};

/// What happened at one transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionReport {
    pub from: String,
    pub to: String,
    pub gap_ms: f64,
    pub crossfade_ms: f64,
    /// Silence actually inserted, in frames
    pub gap_samples: usize,
    /// Overlap actually applied, in frames, after clamping
    pub crossfade_samples: usize,
    /// True when the table had no entry and the default timing was used
    pub used_default: bool,
}

/// Result of a merge, before any finishing step
#[derive(Debug, Clone)]
pub struct MergedAudio {
    pub buffer: AudioBuffer,
    /// Format of the first stem; the output is written in it
    pub format: StemFormat,
    pub stem_ids: Vec<String>,
    pub transitions: Vec<TransitionReport>,
}

impl MergedAudio {
    /// Apply the end-of-message safety fade and return the finished audio
    pub fn finish(mut self, tail_fade_ms: f64) -> Self {
        self.buffer = apply_tail_fade(self.buffer, tail_fade_ms);
        self
    }

    /// Number of frames in the merged buffer
    pub fn frames(&self) -> usize {
        self.buffer.len()
    }
}

/// Joins stems according to a timing table
#[derive(Debug, Clone)]
pub struct StemMerger<'a> {
    timing: &'a TimingTable,
    default_timing: TransitionTiming,
}

impl<'a> StemMerger<'a> {
    /// Create a merger that falls back to `default_timing` for transitions
    /// missing from `timing`
    pub fn new(timing: &'a TimingTable, default_timing: TransitionTiming) -> Self {
        Self {
            timing,
            default_timing,
        }
    }

    /// Merge already-decoded stems
    pub fn merge<S: Borrow<Stem>>(&self, stems: &[S]) -> Result<MergedAudio> {
        self.merge_iter(stems.iter().map(|s| Ok::<&Stem, StemError>(s.borrow())))
    }

    /// Merge stems pulled lazily from a source, in `ids` order
    ///
    /// Each stem is read when the fold reaches it, so a format mismatch or
    /// missing file stops the merge before any later stem is touched.
    pub fn merge_from<S, I>(&self, source: &S, ids: I) -> Result<MergedAudio>
    where
        S: StemSource + ?Sized,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let stems = ids.into_iter().map(|id| {
            let id = id.as_ref();
            source.read_stem(id).map(|stem| (stem, source.label(id)))
        });
        self.fold(stems)
    }

    /// Merge a lazily evaluated sequence of stems
    pub fn merge_iter<I, S>(&self, stems: I) -> Result<MergedAudio>
    where
        I: IntoIterator<Item = Result<S>>,
        S: Borrow<Stem>,
    {
        self.fold(stems.into_iter().map(|stem| {
            stem.map(|s| {
                let label = Borrow::<Stem>::borrow(&s).id.clone();
                (s, label)
            })
        }))
    }

    fn fold<I, S>(&self, stems: I) -> Result<MergedAudio>
    where
        I: IntoIterator<Item = Result<(S, String)>>,
        S: Borrow<Stem>,
    {
        let mut stems = stems.into_iter();
        let (first, first_label) = stems.next().ok_or(StemError::EmptyInput)??;
        let first: &Stem = first.borrow();

        let base = first.format;
        tracing::info!("Base format: {} ({})", base, first_label);
        check_buffer(first, &base, &first_label)?;

        let mut merged = first.buffer.clone();
        let mut prev_id = first.id.clone();
        let mut stem_ids = vec![prev_id.clone()];
        let mut transitions = Vec::new();

        for next in stems {
            let (next, label) = next?;
            let next: &Stem = next.borrow();
            assert_compatible(&base, &next.format, &label)?;
            check_buffer(next, &base, &label)?;

            let (timing, used_default) = self.resolve(&prev_id, &next.id);
            if let Err(err) = timing.validate() {
                tracing::error!("Rejected timing for {} -> {}", prev_id, next.id);
                return Err(err);
            }
            let n_gap = timing.gap_samples(base.sample_rate);
            if merged.len().checked_add(n_gap).is_none() {
                return Err(StemError::InvalidTiming {
                    reason: format!("gap of {} frames after {} is too long", n_gap, prev_id),
                });
            }
            let n_xf = timing
                .crossfade_samples(base.sample_rate)
                .min(merged.len())
                .min(next.buffer.len());

            tracing::debug!(
                "Merge {}: {} -> {} (gap {:.1} ms = {} frames, xfade {:.1} ms = {} frames{})",
                transitions.len() + 1,
                prev_id,
                next.id,
                timing.gap_ms,
                n_gap,
                timing.crossfade_ms,
                n_xf,
                if used_default { ", default timing" } else { "" }
            );

            merged = crossfade_with_gap(merged, &next.buffer, n_gap, n_xf);

            transitions.push(TransitionReport {
                from: prev_id.clone(),
                to: next.id.clone(),
                gap_ms: timing.gap_ms,
                crossfade_ms: timing.crossfade_ms,
                gap_samples: n_gap,
                crossfade_samples: n_xf,
                used_default,
            });
            prev_id = next.id.clone();
            stem_ids.push(prev_id.clone());
        }

        Ok(MergedAudio {
            buffer: merged,
            format: base,
            stem_ids,
            transitions,
        })
    }

    /// Timing for `from -> to`, and whether the default was used
    fn resolve(&self, from: &str, to: &str) -> (TransitionTiming, bool) {
        match self.timing.get(from, to) {
            Some(timing) => (*timing, false),
            None => {
                if self.timing.is_empty() {
                    tracing::debug!("No timing table, default timing for {} -> {}", from, to);
                } else {
                    tracing::warn!(
                        "No timing entry for {} -> {}, using default (gap {} ms, xfade {} ms)",
                        from,
                        to,
                        self.default_timing.gap_ms,
                        self.default_timing.crossfade_ms
                    );
                }
                (self.default_timing, true)
            }
        }
    }
}

/// Join `b` onto the end of `a`
///
/// With `n_xf == 0` this is plain concatenation with `n_gap` frames of
/// silence in between. Otherwise the last `n_xf` frames of `a` and the first
/// `n_xf` of `b` are blended, followed by the silence and the rest of `b`.
/// `n_xf` is clamped to the shorter buffer. Callers check `b`'s channel
/// count and bound `n_gap` first.
pub(crate) fn crossfade_with_gap(mut a: AudioBuffer, b: &AudioBuffer, n_gap: usize, n_xf: usize) -> AudioBuffer {
    let n_xf = n_xf.min(a.len()).min(b.len());

    if n_xf > 0 {
        let (fade_out, fade_in) = cosine_fade(n_xf);
        let start = a.len() - n_xf;
        for (dst, src) in a.samples.iter_mut().zip(&b.samples) {
            for (t, sample) in dst[start..].iter_mut().enumerate() {
                *sample = *sample * fade_out[t] + src[t] * fade_in[t];
            }
        }
    }

    a.push_silence(n_gap);
    a.extend_from(b, n_xf);
    a
}

/// Decoded buffer must agree with its declared format
fn check_buffer(stem: &Stem, base: &StemFormat, label: &str) -> Result<()> {
    if stem.buffer.channels() != base.channels as usize {
        return Err(StemError::InvalidAudio {
            reason: format!(
                "{} decoded to {} channels but declares {}",
                label,
                stem.buffer.channels(),
                base.channels
            ),
            source: None,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::SampleSubtype;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    const SR: u32 = 1000;

    fn stem(id: &str, samples: Vec<f32>) -> Stem {
        Stem::new(
            id,
            AudioBuffer::mono(samples, SR),
            StemFormat::new(SR, 1, SampleSubtype::Float32),
        )
    }

    fn no_fade() -> TransitionTiming {
        TransitionTiming::new(0.0, 0.0)
    }

    #[test]
    fn test_empty_input() {
        let table = TimingTable::new();
        let merger = StemMerger::new(&table, TransitionTiming::default());
        let stems: Vec<Stem> = Vec::new();

        assert!(matches!(merger.merge(&stems), Err(StemError::EmptyInput)));
    }

    #[test]
    fn test_single_stem_passes_through() {
        let table = TimingTable::new();
        let merger = StemMerger::new(&table, TransitionTiming::default());
        let only = stem("only", vec![0.1, 0.2, 0.3]);

        let merged = merger.merge(&[only.clone()]).unwrap();

        assert_eq!(merged.buffer, only.buffer);
        assert!(merged.transitions.is_empty());
    }

    #[test]
    fn test_plain_concatenation() {
        let table = TimingTable::new();
        let merger = StemMerger::new(&table, no_fade());

        let merged = merger
            .merge(&[stem("a", vec![1.0, 2.0]), stem("b", vec![3.0, 4.0])])
            .unwrap();

        assert_eq!(merged.buffer.channel(0), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_gap_without_crossfade() {
        let table = TimingTable::from_pairs([(("a", "b"), TransitionTiming::new(3.0, 0.0))]);
        let merger = StemMerger::new(&table, no_fade());

        let merged = merger
            .merge(&[stem("a", vec![1.0, 2.0]), stem("b", vec![3.0, 4.0])])
            .unwrap();

        assert_eq!(merged.buffer.channel(0), &[1.0, 2.0, 0.0, 0.0, 0.0, 3.0, 4.0]);
        assert!(!merged.transitions[0].used_default);
    }

    #[test]
    fn test_crossfade_then_gap() {
        // 3 frames of overlap, then 2 frames of silence.
        let table = TimingTable::from_pairs([(("a", "b"), TransitionTiming::new(2.0, 3.0))]);
        let merger = StemMerger::new(&table, no_fade());
        let a = stem("a", vec![9.0, 1.0, 1.0, 1.0]);
        let b = stem("b", vec![0.0, 0.0, 0.0, 7.0]);

        let merged = merger.merge(&[a, b]).unwrap();
        let out = merged.buffer.channel(0);

        assert_eq!(out.len(), 4 + 4 - 3 + 2);
        assert_eq!(out[0], 9.0);
        // fade_out over 3 frames is [1, 0.5, 0]
        assert_relative_eq!(out[1], 1.0);
        assert_relative_eq!(out[2], 0.5, epsilon = 1e-6);
        assert_relative_eq!(out[3], 0.0, epsilon = 1e-6);
        assert_eq!(&out[4..], &[0.0, 0.0, 7.0]);
        assert_eq!(merged.transitions[0].crossfade_samples, 3);
        assert_eq!(merged.transitions[0].gap_samples, 2);
    }

    #[test]
    fn test_crossfade_of_constant_signal_is_flat() {
        let table = TimingTable::new();
        let merger = StemMerger::new(&table, TransitionTiming::new(0.0, 5.0));

        let merged = merger
            .merge(&[stem("a", vec![0.5; 10]), stem("b", vec![0.5; 10])])
            .unwrap();

        assert_eq!(merged.frames(), 15);
        for &s in merged.buffer.channel(0) {
            assert_relative_eq!(s, 0.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_crossfade_clamped_to_shorter_stem() {
        let table = TimingTable::new();
        let merger = StemMerger::new(&table, TransitionTiming::new(0.0, 500.0));

        let merged = merger
            .merge(&[stem("a", vec![1.0; 10]), stem("b", vec![1.0; 4])])
            .unwrap();

        assert_eq!(merged.transitions[0].crossfade_samples, 4);
        assert_eq!(merged.frames(), 10);
    }

    #[test]
    fn test_empty_neighbor_disables_crossfade() {
        let table = TimingTable::new();
        let merger = StemMerger::new(&table, TransitionTiming::new(2.0, 5.0));

        let merged = merger
            .merge(&[stem("a", vec![1.0, 2.0]), stem("b", vec![])])
            .unwrap();

        assert_eq!(merged.buffer.channel(0), &[1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_fallback_is_flagged() {
        let table = TimingTable::from_pairs([(("a", "b"), no_fade())]);
        let merger = StemMerger::new(&table, TransitionTiming::new(1.0, 0.0));

        let merged = merger
            .merge(&[stem("a", vec![1.0]), stem("b", vec![2.0]), stem("c", vec![3.0])])
            .unwrap();

        assert_eq!(merged.buffer.channel(0), &[1.0, 2.0, 0.0, 3.0]);
        assert!(!merged.transitions[0].used_default);
        assert!(merged.transitions[1].used_default);
        assert_eq!(merged.stem_ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_timing_keyed_by_previous_stem_id() {
        // The accumulated buffer carries the id of the last stem folded in.
        let table = TimingTable::from_pairs([(("b", "c"), TransitionTiming::new(2.0, 0.0))]);
        let merger = StemMerger::new(&table, no_fade());

        let merged = merger
            .merge(&[stem("a", vec![1.0]), stem("b", vec![2.0]), stem("c", vec![3.0])])
            .unwrap();

        assert_eq!(merged.buffer.channel(0), &[1.0, 2.0, 0.0, 0.0, 3.0]);
    }

    #[test]
    fn test_huge_gap_is_an_error() {
        let table = TimingTable::from_pairs([(("a", "b"), TransitionTiming::new(1e300, 0.0))]);
        let merger = StemMerger::new(&table, no_fade());

        let err = merger
            .merge(&[stem("a", vec![1.0]), stem("b", vec![2.0])])
            .unwrap_err();

        assert_eq!(err.error_code(), "INVALID_TIMING");
    }

    #[test]
    fn test_non_finite_default_timing_is_an_error() {
        let table = TimingTable::new();
        let merger = StemMerger::new(&table, TransitionTiming::new(0.0, f64::INFINITY));

        let err = merger
            .merge(&[stem("a", vec![1.0]), stem("b", vec![2.0])])
            .unwrap_err();

        assert_eq!(err.error_code(), "INVALID_TIMING");
    }

    #[test]
    fn test_crossfade_with_gap_clamps_overlap() {
        let a = AudioBuffer::mono(vec![1.0, 1.0, 1.0], SR);
        let b = AudioBuffer::mono(vec![1.0, 1.0], SR);

        let joined = crossfade_with_gap(a, &b, 1, 50);

        // Overlap clamped to the 2-frame neighbor.
        assert_eq!(joined.len(), 4);
        assert_relative_eq!(joined.channel(0)[1], 1.0, epsilon = 1e-6);
        assert_relative_eq!(joined.channel(0)[2], 1.0, epsilon = 1e-6);
        assert_eq!(joined.channel(0)[3], 0.0);
    }

    #[test]
    fn test_mismatch_discards_work() {
        let table = TimingTable::new();
        let merger = StemMerger::new(&table, no_fade());
        let stereo = Stem::new(
            "b",
            AudioBuffer::silence(4, 2, SR),
            StemFormat::new(SR, 2, SampleSubtype::Float32),
        );

        let err = merger.merge(&[stem("a", vec![1.0; 4]), stereo]).unwrap_err();
        assert_eq!(err.error_code(), "FORMAT_MISMATCH");
    }

    #[test]
    fn test_inputs_are_not_mutated() {
        let table = TimingTable::new();
        let merger = StemMerger::new(&table, TransitionTiming::new(0.0, 3.0));
        let stems = vec![stem("a", vec![1.0; 5]), stem("b", vec![-1.0; 5])];
        let before = stems.clone();

        let _ = merger.merge(&stems).unwrap().finish(2.0);

        assert_eq!(stems, before);
    }

    #[test]
    fn test_finish_applies_tail_fade() {
        let table = TimingTable::new();
        let merger = StemMerger::new(&table, no_fade());

        let merged = merger.merge(&[stem("a", vec![1.0; 6])]).unwrap().finish(3.0);

        assert_eq!(merged.buffer.channel(0), &[1.0, 1.0, 1.0, 1.0, 0.5, 0.0]);
    }
}
