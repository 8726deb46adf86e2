//! Prediction decoding.
//!
//! Turns the per-position class distributions produced by the model into the
//! final digit string plus per-position diagnostics.
//!
//! Two strategies are available and never mixed:
//! - [`decode_prediction`]: confidence-gated greedy decode with a bounded
//!   run of identical digits and a near-tie alternative lookup.
//! - [`collapse_repeats`]: plain argmax with adjacent duplicates dropped and
//!   out-of-range classes skipped.

use serde::{Deserialize, Serialize};

use crate::inference::ProbabilityGrid;

/// Characters for class indices 0..10.
pub const DIGITS: [char; 10] = ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];

/// Row length the confidence-gated decoder accepts.
pub const DIGIT_CLASSES: usize = DIGITS.len();

/// Default minimum top probability for a position to emit.
pub const CONFIDENCE_THRESHOLD: f32 = 0.6;
/// Default repeats of one digit allowed after its first occurrence.
pub const MAX_CONSECUTIVE_REPEATS: u32 = 2;
/// Default distance from the top probability for a substitute digit.
pub const ALTERNATIVE_MARGIN: f32 = 0.1;
/// Default number of ranked candidates kept per position.
pub const CANDIDATES_PER_POSITION: usize = 3;

/// Which decoding strategy to run over the model output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStrategy {
    #[default]
    ConfidenceGated,
    CollapseRepeats,
}

/// Tunables for the confidence-gated decoder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderSettings {
    /// Positions whose best probability is below this emit nothing.
    pub confidence_threshold: f32,
    /// Identical digits allowed back to back after the first one.
    pub max_consecutive_repeats: u32,
    /// Max distance from the top probability for an alternative digit.
    pub alternative_margin: f32,
    /// Ranked candidates kept per position.
    pub candidates_per_position: usize,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: CONFIDENCE_THRESHOLD,
            max_consecutive_repeats: MAX_CONSECUTIVE_REPEATS,
            alternative_margin: ALTERNATIVE_MARGIN,
            candidates_per_position: CANDIDATES_PER_POSITION,
        }
    }
}

/// One ranked option for a single position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub digit: char,
    pub probability: f32,
}

/// Confidence of one emitted character.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PositionConfidence {
    /// 1-based position in the model output.
    pub position: usize,
    pub digit: char,
    pub probability: f32,
}

/// Output of a decode call.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DecodeResult {
    pub text: String,
    /// 1-based positions skipped for low confidence.
    pub low_confidence_positions: Vec<usize>,
    pub confidences: Vec<PositionConfidence>,
}

/// Normalizes one position so its values sum to 1.
///
/// Non-negative input is divided by its sum. Input containing negative
/// values is treated as logits and goes through softmax. NaN entries get
/// zero mass. `+inf` entries share all of the mass. An all-zero row becomes
/// uniform.
pub fn normalize_probabilities(row: &[f32]) -> Vec<f32> {
    if row.is_empty() {
        return Vec::new();
    }

    let infinite = row.iter().filter(|v| **v == f32::INFINITY).count();
    if infinite > 0 {
        let share = 1.0 / infinite as f32;
        return row
            .iter()
            .map(|v| if *v == f32::INFINITY { share } else { 0.0 })
            .collect();
    }

    if row.iter().any(|v| *v < 0.0) {
        return softmax(row);
    }

    let sum: f32 = row.iter().filter(|v| !v.is_nan()).sum();
    if sum > 0.0 && sum.is_finite() {
        row.iter()
            .map(|v| if v.is_nan() { 0.0 } else { v / sum })
            .collect()
    } else if sum == 0.0 {
        vec![1.0 / row.len() as f32; row.len()]
    } else {
        softmax(row)
    }
}

/// Softmax over the finite entries; `-inf` and NaN get zero mass.
fn softmax(row: &[f32]) -> Vec<f32> {
    let finite_max = row
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !finite_max.is_finite() {
        return vec![1.0 / row.len() as f32; row.len()];
    }

    let exps: Vec<f32> = row
        .iter()
        .map(|&v| if v.is_finite() { (v - finite_max).exp() } else { 0.0 })
        .collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Ranks a normalized digit row and returns the best `k` candidates.
///
/// Equal probabilities keep ascending class order.
pub fn rank_candidates(probabilities: &[f32], k: usize) -> Vec<Candidate> {
    let mut order: Vec<usize> = (0..probabilities.len().min(DIGIT_CLASSES)).collect();
    order.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));
    order
        .into_iter()
        .take(k)
        .map(|i| Candidate {
            digit: DIGITS[i],
            probability: probabilities[i],
        })
        .collect()
}

/// Confidence-gated greedy decode.
///
/// # Panics
///
/// Panics if a row of `grid` does not have exactly [`DIGIT_CLASSES`] values.
/// Callers validate model output before getting here.
pub fn decode_prediction(grid: &ProbabilityGrid, settings: &DecoderSettings) -> DecodeResult {
    assert_eq!(
        grid.classes(),
        DIGIT_CLASSES,
        "probability rows must have one value per digit"
    );

    let k = settings.candidates_per_position.max(1);
    let mut result = DecodeResult::default();
    let mut last_char: Option<char> = None;
    let mut repeat_count: u32 = 0;

    for (index, row) in grid.rows().enumerate() {
        let position = index + 1;
        let probabilities = normalize_probabilities(row);
        let candidates = rank_candidates(&probabilities, k);
        let top = candidates[0];

        if top.probability < settings.confidence_threshold {
            result.low_confidence_positions.push(position);
            continue;
        }

        let mut chosen = top;
        if Some(chosen.digit) == last_char && repeat_count >= settings.max_consecutive_repeats {
            if let Some(alternative) = candidates[1..].iter().find(|c| {
                Some(c.digit) != last_char
                    && top.probability - c.probability <= settings.alternative_margin
            }) {
                chosen = *alternative;
            }
        }

        if Some(chosen.digit) == last_char {
            repeat_count += 1;
            if repeat_count > settings.max_consecutive_repeats {
                continue;
            }
        } else {
            repeat_count = 1;
        }

        result.text.push(chosen.digit);
        last_char = Some(chosen.digit);
        result.confidences.push(PositionConfidence {
            position,
            digit: chosen.digit,
            probability: chosen.probability,
        });
    }

    result
}

/// Offsets of the class indices that survive collapsing.
///
/// Adjacent duplicates and indices outside `0..10` are dropped. A skipped
/// out-of-range index does not reset the duplicate check.
pub fn collapse_indices(indices: &[usize]) -> Vec<usize> {
    let mut kept = Vec::new();
    let mut last: Option<usize> = None;
    for (offset, &index) in indices.iter().enumerate() {
        if index >= DIGIT_CLASSES || Some(index) == last {
            continue;
        }
        kept.push(offset);
        last = Some(index);
    }
    kept
}

/// Argmax decode with adjacent duplicates collapsed.
///
/// Rows may carry extra classes (e.g. a blank); those never emit.
pub fn collapse_repeats(grid: &ProbabilityGrid) -> DecodeResult {
    let normalized: Vec<Vec<f32>> = grid.rows().map(normalize_probabilities).collect();
    // Rows are never empty, so argmax always has a value
    let best: Vec<usize> = normalized
        .iter()
        .map(|p| argmax(p).unwrap_or(DIGIT_CLASSES))
        .collect();

    let mut result = DecodeResult::default();
    for offset in collapse_indices(&best) {
        let digit = DIGITS[best[offset]];
        result.text.push(digit);
        result.confidences.push(PositionConfidence {
            position: offset + 1,
            digit,
            probability: normalized[offset][best[offset]],
        });
    }

    result
}

/// Index of the largest value; the first one wins on ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Runs the selected strategy.
pub fn decode_with(
    strategy: DecodeStrategy,
    grid: &ProbabilityGrid,
    settings: &DecoderSettings,
) -> DecodeResult {
    match strategy {
        DecodeStrategy::ConfidenceGated => decode_prediction(grid, settings),
        DecodeStrategy::CollapseRepeats => collapse_repeats(grid),
    }
}
