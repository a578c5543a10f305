//! Heterogeneous per-agent parameters.
//!
//! Every numeric trait of a cell is described by a [`Parameter`]
//! distribution. A value is drawn exactly once, when the cell is
//! constructed, and the drawn value becomes the mean of the distribution
//! handed to any daughter, so heritable traits drift generation to
//! generation. Biophysical constants (binding affinities, contact fraction)
//! are carried with zero heterogeneity and therefore do not drift.

use rand::Rng;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// A population-level distribution for one heritable parameter.
///
/// Draws are normal around `mu` with standard deviation
/// `heterogeneity * mu`, truncated at zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Parameter {
    pub mu: f64,
    pub heterogeneity: f64,
}

impl Parameter {
    /// A distribution centered on `mu` with relative spread `heterogeneity`.
    #[must_use]
    pub const fn new(mu: f64, heterogeneity: f64) -> Self {
        Self { mu, heterogeneity }
    }

    /// A degenerate distribution that always yields `mu`.
    #[must_use]
    pub const fn constant(mu: f64) -> Self {
        Self {
            mu,
            heterogeneity: 0.0,
        }
    }

    /// Draw one value from the distribution.
    pub fn draw(&self, rng: &mut SmallRng) -> f64 {
        let sigma = self.heterogeneity * self.mu.abs();
        if sigma <= 0.0 {
            return self.mu;
        }
        match Normal::new(self.mu, sigma) {
            Ok(normal) => normal.sample(rng).max(0.0),
            Err(_) => self.mu,
        }
    }

    /// Draw one value rounded to the nearest non-negative integer.
    pub fn draw_int(&self, rng: &mut SmallRng) -> u32 {
        self.draw(rng).round().max(0.0) as u32
    }

    /// The distribution recentered on a drawn value, for daughter cells.
    #[must_use]
    pub fn update(&self, mu: f64) -> Self {
        Self {
            mu,
            heterogeneity: self.heterogeneity,
        }
    }
}

/// Uniform integer range for initial cell ages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgeRange {
    pub min: u32,
    pub max: u32,
}

impl AgeRange {
    /// Draw an initial age in minutes.
    pub fn draw(&self, rng: &mut SmallRng) -> u32 {
        if self.max <= self.min {
            return self.min;
        }
        rng.random_range(self.min..=self.max)
    }
}

/// The heritable parameter distributions carried by one T-cell.
///
/// A cell holds the recentered set; daughters draw from it. The receptor
/// biophysics block at the bottom is intentionally all-constant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParamSet {
    /// Fraction of senescent transitions that stay senescent (vs apoptose).
    pub senes_frac: Parameter,
    /// Fraction of exhausted transitions that stay exhausted.
    pub exhau_frac: Parameter,
    /// Fraction of anergic transitions that stay anergic.
    pub anerg_frac: Parameter,
    /// Fraction of undecided, never-activated cells that proliferate.
    pub proli_frac: Parameter,
    /// Energy floor below which the cell apoptoses.
    pub energy_threshold: Parameter,
    /// Weight of nutrient signal vs noise in location scoring.
    pub accuracy: Parameter,
    /// Mean death age in minutes.
    pub death_age: Parameter,
    /// Number of divisions available to a fresh cell.
    pub divisions: Parameter,
    /// Number of neighbor candidates examined per binding query.
    pub search_ability: Parameter,
    /// Lifetime antigen-binding count beyond which the cell exhausts.
    pub max_antigen_binding: Parameter,
    /// Engineered receptor count.
    pub cars: Parameter,
    /// Inhibitory self receptor count.
    pub self_receptors: Parameter,
    /// Glycolysis-vs-oxphos preference and its bonuses.
    pub meta_pref: Parameter,
    pub meta_pref_il2: Parameter,
    pub meta_pref_active: Parameter,
    /// Glucose uptake rate and its bonuses.
    pub gluc_uptake_rate: Parameter,
    pub gluc_uptake_rate_il2: Parameter,
    pub gluc_uptake_rate_active: Parameter,

    // Receptor biophysics: identical in every daughter, never recentered.
    pub car_affinity: Parameter,
    pub car_alpha: Parameter,
    pub car_beta: Parameter,
    pub self_affinity: Parameter,
    pub self_alpha: Parameter,
    pub self_beta: Parameter,
    pub contact_frac: Parameter,
}

impl Default for ParamSet {
    fn default() -> Self {
        Self {
            senes_frac: Parameter::new(0.5, 0.05),
            exhau_frac: Parameter::new(0.5, 0.05),
            anerg_frac: Parameter::new(0.5, 0.05),
            proli_frac: Parameter::new(0.3, 0.05),
            energy_threshold: Parameter::new(-1000.0, 0.0),
            accuracy: Parameter::new(0.8, 0.05),
            death_age: Parameter::new(120_960.0, 0.05),
            divisions: Parameter::new(10.0, 0.1),
            search_ability: Parameter::constant(4.0),
            max_antigen_binding: Parameter::new(10.0, 0.1),
            cars: Parameter::new(50_000.0, 0.05),
            self_receptors: Parameter::new(150.0, 0.1),
            meta_pref: Parameter::new(0.3, 0.05),
            meta_pref_il2: Parameter::new(0.05, 0.05),
            meta_pref_active: Parameter::new(0.25, 0.05),
            gluc_uptake_rate: Parameter::new(1.12, 0.05),
            gluc_uptake_rate_il2: Parameter::new(0.56, 0.05),
            gluc_uptake_rate_active: Parameter::new(2.24, 0.05),
            car_affinity: Parameter::constant(6.0e-10),
            car_alpha: Parameter::constant(3.0),
            car_beta: Parameter::constant(0.01),
            self_affinity: Parameter::constant(7.8e-6),
            self_alpha: Parameter::constant(3.0),
            self_beta: Parameter::constant(0.02),
            contact_frac: Parameter::constant(0.2),
        }
    }
}

impl ParamSet {
    /// Clamp any negative heterogeneity from config input to zero.
    pub fn sanitized(mut self) -> Self {
        for param in [
            &mut self.senes_frac,
            &mut self.exhau_frac,
            &mut self.anerg_frac,
            &mut self.proli_frac,
            &mut self.energy_threshold,
            &mut self.accuracy,
            &mut self.death_age,
            &mut self.divisions,
            &mut self.search_ability,
            &mut self.max_antigen_binding,
            &mut self.cars,
            &mut self.self_receptors,
            &mut self.meta_pref,
            &mut self.meta_pref_il2,
            &mut self.meta_pref_active,
            &mut self.gluc_uptake_rate,
            &mut self.gluc_uptake_rate_il2,
            &mut self.gluc_uptake_rate_active,
            &mut self.car_affinity,
            &mut self.car_alpha,
            &mut self.car_beta,
            &mut self.self_affinity,
            &mut self.self_alpha,
            &mut self.self_beta,
            &mut self.contact_frac,
        ] {
            param.heterogeneity = param.heterogeneity.max(0.0);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn constant_parameter_never_drifts() {
        let mut rng = SmallRng::seed_from_u64(1);
        let param = Parameter::constant(0.2);
        for _ in 0..16 {
            assert_eq!(param.draw(&mut rng), 0.2);
        }
    }

    #[test]
    fn update_recenters_on_drawn_value() {
        let mut rng = SmallRng::seed_from_u64(7);
        let param = Parameter::new(100.0, 0.1);
        let drawn = param.draw(&mut rng);
        let daughter = param.update(drawn);
        assert_eq!(daughter.mu, drawn);
        assert_eq!(daughter.heterogeneity, param.heterogeneity);
    }

    #[test]
    fn draws_are_truncated_at_zero() {
        let mut rng = SmallRng::seed_from_u64(11);
        let param = Parameter::new(0.01, 50.0);
        for _ in 0..64 {
            assert!(param.draw(&mut rng) >= 0.0);
        }
    }

    #[test]
    fn age_range_draws_within_bounds() {
        let mut rng = SmallRng::seed_from_u64(3);
        let range = AgeRange { min: 10, max: 20 };
        for _ in 0..32 {
            let age = range.draw(&mut rng);
            assert!((10..=20).contains(&age));
        }
    }
}
