//! Synthetic conjoint surveys with known part-worths.
//!
//! The preset design mirrors a streaming-service study: each alternative is a
//! (brand, ad, price) profile, brands are Netflix, Prime and Hulu (Hulu is the
//! omitted baseline), ads are present or absent, and monthly prices run from 8
//! to 32 in steps of 4. Respondents pick the alternative with the highest
//! utility `x'beta + e`, where `e` is standard Gumbel noise, which is exactly
//! the multinomial logit data-generating process.

use nalgebra::DVector;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gumbel};
use serde::{Deserialize, Serialize};

use crate::data::ChoiceRecord;
use crate::error::{MnlError, Result};

/// Column names of [`ConjointProfile::encode`].
pub const STREAMING_ATTRIBUTES: [&str; 4] = ["brand_netflix", "brand_prime", "ad_yes", "price"];

/// Streaming brands offered in the survey.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Brand {
    /// Coded by the `brand_netflix` dummy.
    Netflix,
    /// Coded by the `brand_prime` dummy.
    Prime,
    /// Baseline brand; both brand dummies are zero.
    Hulu,
}

impl Brand {
    /// All brands, baseline last.
    pub const ALL: [Brand; 3] = [Brand::Netflix, Brand::Prime, Brand::Hulu];
}

/// One product profile shown to a respondent.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConjointProfile {
    /// Streaming brand.
    pub brand: Brand,
    /// Whether the plan shows ads.
    pub ad: bool,
    /// Monthly price.
    pub price: f64,
}

impl ConjointProfile {
    /// Dummy-codes the profile as `[netflix, prime, ad_yes, price]`.
    pub fn encode(&self) -> Vec<f64> {
        vec![
            f64::from(u8::from(self.brand == Brand::Netflix)),
            f64::from(u8::from(self.brand == Brand::Prime)),
            f64::from(u8::from(self.ad)),
            self.price,
        ]
    }
}

/// Shape of a simulated survey and the part-worths that generate its choices.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationDesign {
    /// Number of respondents.
    pub respondents: usize,
    /// Choice tasks per respondent.
    pub tasks: usize,
    /// Alternatives per task.
    pub alternatives: usize,
    /// True utility weights, aligned with [`STREAMING_ATTRIBUTES`].
    pub part_worths: DVector<f64>,
    /// Price levels drawn uniformly for each profile.
    pub price_levels: Vec<f64>,
}

impl SimulationDesign {
    /// 100 respondents × 10 tasks × 3 alternatives with
    /// `beta = (1.0, 0.5, -0.8, -0.1)`.
    pub fn streaming_conjoint() -> Self {
        Self {
            respondents: 100,
            tasks: 10,
            alternatives: 3,
            part_worths: DVector::from_vec(vec![1.0, 0.5, -0.8, -0.1]),
            price_levels: (0..7).map(|step| 8.0 + 4.0 * step as f64).collect(),
        }
    }

    /// Overrides the number of respondents.
    pub fn with_respondents(mut self, respondents: usize) -> Self {
        self.respondents = respondents;
        self
    }

    /// Overrides the number of tasks per respondent.
    pub fn with_tasks(mut self, tasks: usize) -> Self {
        self.tasks = tasks;
        self
    }

    /// Overrides the true part-worths.
    pub fn with_part_worths(mut self, part_worths: DVector<f64>) -> Self {
        self.part_worths = part_worths;
        self
    }

    /// Number of choice sets the design produces.
    pub fn set_count(&self) -> usize {
        self.respondents * self.tasks
    }

    fn validate(&self) -> Result<()> {
        if self.part_worths.len() != STREAMING_ATTRIBUTES.len() {
            return Err(MnlError::dimension_mismatch(
                "part-worths",
                STREAMING_ATTRIBUTES.len(),
                self.part_worths.len(),
            ));
        }
        if self.alternatives < 2 {
            return Err(MnlError::invalid_configuration(
                "simulation design",
                "at least two alternatives per task are required",
            ));
        }
        if self.respondents == 0 || self.tasks == 0 {
            return Err(MnlError::invalid_configuration(
                "simulation design",
                "respondents and tasks must be positive",
            ));
        }
        if self.price_levels.is_empty() || self.price_levels.iter().any(|p| !p.is_finite()) {
            return Err(MnlError::invalid_configuration(
                "simulation design",
                "price levels must be a non-empty list of finite values",
            ));
        }
        Ok(())
    }
}

/// Draws a random profile.
pub fn random_profile<R: Rng + ?Sized>(price_levels: &[f64], rng: &mut R) -> ConjointProfile {
    let brand = *Brand::ALL.choose(rng).unwrap_or(&Brand::Hulu);
    let price = price_levels.choose(rng).copied().unwrap_or_default();
    ConjointProfile {
        brand,
        ad: rng.gen_bool(0.5),
        price,
    }
}

/// Simulates flat survey records, `alternatives` per (respondent, task).
///
/// Respondent and task ids start at 1. Exactly one alternative per task is
/// marked chosen: the one with the highest noisy utility.
pub fn simulate<R: Rng + ?Sized>(
    design: &SimulationDesign,
    rng: &mut R,
) -> Result<Vec<ChoiceRecord>> {
    design.validate()?;
    let noise = Gumbel::new(0.0_f64, 1.0).map_err(|_| MnlError::NumericalError {
        context: "gumbel noise",
    })?;

    let mut records = Vec::with_capacity(design.set_count() * design.alternatives);
    let mut utilities = Vec::with_capacity(design.alternatives);

    for respondent in 1..=design.respondents as u64 {
        for task in 1..=design.tasks as u64 {
            let first = records.len();
            utilities.clear();
            for _ in 0..design.alternatives {
                let attributes = random_profile(&design.price_levels, rng).encode();
                let systematic: f64 = attributes
                    .iter()
                    .zip(design.part_worths.iter())
                    .map(|(x, b)| x * b)
                    .sum();
                let e: f64 = noise.sample(rng);
                utilities.push(systematic + e);
                records.push(ChoiceRecord::new(respondent, task, attributes, false));
            }

            let mut best = 0usize;
            for (offset, utility) in utilities.iter().enumerate() {
                if *utility > utilities[best] {
                    best = offset;
                }
            }
            records[first + best].chosen = true;
        }
    }

    Ok(records)
}

/// [`simulate`] with a fresh `SmallRng` seeded from `seed`.
pub fn simulate_seeded(design: &SimulationDesign, seed: u64) -> Result<Vec<ChoiceRecord>> {
    let mut rng = SmallRng::seed_from_u64(seed);
    simulate(design, &mut rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ChoiceDatasetBuilder;

    #[test]
    fn preset_generates_expected_shapes() {
        let design = SimulationDesign::streaming_conjoint().with_respondents(20);
        let records = simulate_seeded(&design, 7).unwrap();
        assert_eq!(records.len(), 20 * 10 * 3);
        assert_eq!(design.price_levels, vec![8.0, 12.0, 16.0, 20.0, 24.0, 28.0, 32.0]);

        let data = ChoiceDatasetBuilder::new(records)
            .attribute_names(STREAMING_ATTRIBUTES)
            .build()
            .unwrap();
        assert_eq!(data.set_count(), 200);
        assert_eq!(data.respondent_count(), 20);
        assert_eq!(data.dimension(), 4);
    }

    #[test]
    fn encoding_uses_hulu_as_baseline() {
        let hulu = ConjointProfile {
            brand: Brand::Hulu,
            ad: true,
            price: 12.0,
        };
        assert_eq!(hulu.encode(), vec![0.0, 0.0, 1.0, 12.0]);
        let prime = ConjointProfile {
            brand: Brand::Prime,
            ad: false,
            price: 8.0,
        };
        assert_eq!(prime.encode(), vec![0.0, 1.0, 0.0, 8.0]);
    }

    #[test]
    fn seeds_are_reproducible() {
        let design = SimulationDesign::streaming_conjoint().with_respondents(5);
        assert_eq!(
            simulate_seeded(&design, 1).unwrap(),
            simulate_seeded(&design, 1).unwrap()
        );
        assert_ne!(
            simulate_seeded(&design, 1).unwrap(),
            simulate_seeded(&design, 2).unwrap()
        );
    }

    #[test]
    fn strong_price_effect_favors_cheap_profiles() {
        let design = SimulationDesign::streaming_conjoint()
            .with_respondents(200)
            .with_part_worths(DVector::from_vec(vec![0.0, 0.0, 0.0, -1.0]));
        let records = simulate_seeded(&design, 3).unwrap();
        let chosen: Vec<f64> = records
            .iter()
            .filter(|r| r.chosen)
            .map(|r| r.attributes[3])
            .collect();
        let mean_chosen = chosen.iter().sum::<f64>() / chosen.len() as f64;
        assert!(mean_chosen < 16.0, "mean chosen price {mean_chosen}");
    }

    #[test]
    fn rejects_invalid_designs() {
        let design = SimulationDesign::streaming_conjoint().with_part_worths(DVector::zeros(3));
        assert!(matches!(
            simulate_seeded(&design, 1),
            Err(MnlError::DimensionMismatch { .. })
        ));
        let design = SimulationDesign::streaming_conjoint().with_tasks(0);
        assert!(simulate_seeded(&design, 1).is_err());
    }
}
