//! Reduction of a pixel stack's surviving samples to one output sample.

use crate::config::Combination;
use crate::consts::EPSILON;
use crate::reject::StackItem;
use crate::stats;

/// Combine the surviving samples of a stack.
///
/// `weights` maps frame index to the current channel's weight. Sample
/// values are expected to be in the output normalization already. A
/// degenerate stack (the rejection algorithm could not run, or nothing
/// survived) collapses to the plain median of all samples.
pub fn combine_stack(
    stack: &[StackItem],
    combination: Combination,
    weights: &[f64],
    degenerate: bool,
) -> f64 {
    if stack.is_empty() {
        return 0.0;
    }
    if degenerate {
        let mut values: Vec<f64> = stack.iter().map(|s| s.value as f64).collect();
        return stats::median(&mut values);
    }

    match combination {
        Combination::Mean => {
            let mut sum = 0.0f64;
            let mut wsum = 0.0f64;
            let mut count = 0usize;
            let mut plain = 0.0f64;
            for s in stack.iter().filter(|s| !s.is_rejected()) {
                let w = weights.get(s.index()).copied().unwrap_or(1.0);
                sum += w * s.value as f64;
                wsum += w;
                plain += s.value as f64;
                count += 1;
            }
            if wsum > EPSILON {
                sum / wsum
            } else if count > 0 {
                plain / count as f64
            } else {
                0.0
            }
        }
        Combination::Median => weighted_median(stack, weights),
        Combination::Minimum => stack
            .iter()
            .filter(|s| !s.is_rejected())
            .map(|s| s.value as f64)
            .fold(f64::INFINITY, f64::min),
        Combination::Maximum => stack
            .iter()
            .filter(|s| !s.is_rejected())
            .map(|s| s.value as f64)
            .fold(f64::NEG_INFINITY, f64::max),
    }
}

/// Weighted median over survivors: the smallest value whose cumulative
/// weight reaches half the total. Equal values resolve to the lowest frame
/// index.
fn weighted_median(stack: &[StackItem], weights: &[f64]) -> f64 {
    let mut survivors: Vec<(f64, f64, usize)> = stack
        .iter()
        .filter(|s| !s.is_rejected())
        .map(|s| {
            (
                s.value as f64,
                weights.get(s.index()).copied().unwrap_or(1.0),
                s.index(),
            )
        })
        .collect();
    if survivors.is_empty() {
        return 0.0;
    }
    survivors.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.2.cmp(&b.2))
    });
    let total: f64 = survivors.iter().map(|&(_, w, _)| w).sum();
    if total < EPSILON {
        // All weights floored to nothing; plain median of survivors.
        let mut values: Vec<f64> = survivors.iter().map(|&(v, _, _)| v).collect();
        return stats::median(&mut values);
    }
    let half = 0.5 * total;
    let mut cumulative = 0.0;
    for &(v, w, _) in &survivors {
        cumulative += w;
        if cumulative >= half {
            return v;
        }
    }
    survivors[survivors.len() - 1].0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack_of(values: &[f32]) -> Vec<StackItem> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| StackItem::new(v, v, i))
            .collect()
    }

    #[test]
    fn weighted_mean_uses_weights() {
        let stack = stack_of(&[0.0, 1.0]);
        let v = combine_stack(&stack, Combination::Mean, &[3.0, 1.0], false);
        assert!((v - 0.25).abs() < 1e-12);
    }

    #[test]
    fn weighted_median_picks_heavier_side() {
        let stack = stack_of(&[0.1, 0.2, 0.9]);
        let v = combine_stack(&stack, Combination::Median, &[1.0, 1.0, 5.0], false);
        assert_eq!(v, 0.9);
    }

    #[test]
    fn degenerate_falls_back_to_median() {
        let stack = stack_of(&[0.1, 0.5, 0.9]);
        let v = combine_stack(&stack, Combination::Mean, &[1.0; 3], true);
        assert_eq!(v, 0.5);
    }

    #[test]
    fn rejected_samples_are_excluded() {
        let mut stack = stack_of(&[0.1, 0.2, 0.9]);
        stack[2].set_reject_high();
        let v = combine_stack(&stack, Combination::Maximum, &[1.0; 3], false);
        assert!((v - 0.2).abs() < 1e-12);
    }
}
