//! Variant selection.
//!
//! [`select`] is a pure function of the definition and one draw from a
//! [`RandomSource`], so a fixed source gives reproducible assignments.

use rand::Rng;

use super::ExperimentDefinition;

/// Source of uniform draws in `[0, 1)`.
pub trait RandomSource: Send {
    fn next_unit(&mut self) -> f64;
}

/// Thread-local RNG backed source used for live traffic.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_unit(&mut self) -> f64 {
        rand::thread_rng().r#gen::<f64>()
    }
}

/// Always yields the same value.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn next_unit(&mut self) -> f64 {
        self.0
    }
}

/// Cycles through a fixed list of values.
#[derive(Debug, Clone)]
pub struct SequenceRandom {
    values: Vec<f64>,
    position: usize,
}

impl SequenceRandom {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            position: 0,
        }
    }
}

impl RandomSource for SequenceRandom {
    fn next_unit(&mut self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let value = self.values[self.position % self.values.len()];
        self.position = self.position.wrapping_add(1);
        value
    }
}

/// Pick one variant of `definition`.
///
/// Without weights every variant has probability `1/n`. With weights, the
/// first variant whose cumulative weight exceeds the draw wins; if rounding
/// leaves the draw past the final cumulative value, the last variant wins.
pub fn select<'a, R>(definition: &'a ExperimentDefinition, random: &mut R) -> &'a str
where
    R: RandomSource + ?Sized,
{
    let variants = &definition.variants;
    let Some(last) = variants.last() else {
        return "";
    };

    let u = random.next_unit().clamp(0.0, 1.0);

    match &definition.weight {
        None => {
            let index = ((u * variants.len() as f64) as usize).min(variants.len() - 1);
            &variants[index]
        }
        Some(weights) => {
            let mut cumulative = 0.0;
            for (variant, weight) in variants.iter().zip(weights) {
                cumulative += weight;
                if cumulative > u {
                    return variant;
                }
            }
            last
        }
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashMap;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    struct Seeded(StdRng);

    impl RandomSource for Seeded {
        fn next_unit(&mut self) -> f64 {
            self.0.r#gen::<f64>()
        }
    }

    fn frequencies(def: &ExperimentDefinition, draws: usize) -> HashMap<String, f64> {
        let mut random = Seeded(StdRng::seed_from_u64(42));
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..draws {
            *counts.entry(select(def, &mut random).to_string()).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(k, v)| (k, v as f64 / draws as f64))
            .collect()
    }

    #[test]
    fn even_weights_split_at_half() {
        let def = ExperimentDefinition::new("hero", ["control", "alt"]).with_weights(vec![0.5, 0.5]);
        assert_eq!(select(&def, &mut FixedRandom(0.3)), "control");
        assert_eq!(select(&def, &mut FixedRandom(0.7)), "alt");
    }

    #[test]
    fn boundary_draw_goes_to_next_bucket() {
        let def = ExperimentDefinition::new("hero", ["control", "alt"]).with_weights(vec![0.5, 0.5]);
        assert_eq!(select(&def, &mut FixedRandom(0.5)), "alt");
        assert_eq!(select(&def, &mut FixedRandom(0.0)), "control");
    }

    #[test]
    fn rounding_shortfall_falls_back_to_last_variant() {
        // Cumulative sum is just under 1, so a draw near 1 selects nothing
        // in the loop.
        let def = ExperimentDefinition::new("hero", ["a", "b", "c"])
            .with_weights(vec![0.3, 0.3, 0.4 - 1e-7]);
        assert_eq!(select(&def, &mut FixedRandom(0.999_999_99)), "c");
    }

    #[test]
    fn zero_weight_variant_is_never_chosen() {
        let def = ExperimentDefinition::new("hero", ["a", "b", "c"]).with_weights(vec![0.5, 0.0, 0.5]);
        for u in [0.0, 0.25, 0.4999, 0.5, 0.75, 0.9999] {
            assert_ne!(select(&def, &mut FixedRandom(u)), "b");
        }
    }

    #[test]
    fn uniform_maps_draw_to_index() {
        let def = ExperimentDefinition::new("hero", ["a", "b", "c"]);
        assert_eq!(select(&def, &mut FixedRandom(0.0)), "a");
        assert_eq!(select(&def, &mut FixedRandom(0.34)), "b");
        assert_eq!(select(&def, &mut FixedRandom(0.99)), "c");
        // Out-of-range draws are clamped rather than indexing past the end.
        assert_eq!(select(&def, &mut FixedRandom(1.0)), "c");
        assert_eq!(select(&def, &mut FixedRandom(-3.0)), "a");
    }

    #[test]
    fn weighted_distribution_converges() {
        let def = ExperimentDefinition::new("hero", ["control", "one", "two"])
            .with_weights(vec![0.8, 0.1, 0.1]);
        let freq = frequencies(&def, 10_000);

        assert!((freq["control"] - 0.8).abs() < 0.02, "{freq:?}");
        assert!((freq["one"] - 0.1).abs() < 0.02, "{freq:?}");
        assert!((freq["two"] - 0.1).abs() < 0.02, "{freq:?}");
    }

    #[test]
    fn uniform_distribution_converges() {
        let def = ExperimentDefinition::new("hero", ["control", "one", "two"]);
        let freq = frequencies(&def, 10_000);
        for variant in ["control", "one", "two"] {
            assert!((freq[variant] - 1.0 / 3.0).abs() < 0.02, "{freq:?}");
        }
    }

    #[test]
    fn sequence_random_cycles() {
        let mut random = SequenceRandom::new(vec![0.1, 0.9]);
        assert_eq!(random.next_unit(), 0.1);
        assert_eq!(random.next_unit(), 0.9);
        assert_eq!(random.next_unit(), 0.1);
        assert_eq!(SequenceRandom::new(vec![]).next_unit(), 0.0);
    }

    #[test]
    fn thread_random_stays_in_unit_interval() {
        let mut random = ThreadRandom;
        for _ in 0..1_000 {
            let u = random.next_unit();
            assert!((0.0..1.0).contains(&u));
        }
    }
}
