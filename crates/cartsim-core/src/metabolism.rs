//! Cell mass and energy balance.
//!
//! Glucose is taken up across the cell surface against the local gradient
//! and split between glycolysis and oxidative phosphorylation according to
//! an adjustable preference. Oxidative phosphorylation consumes the
//! internal pyruvate pool, capped by available oxygen; glycolysis covers
//! the remainder and backfills any oxidative shortfall that would drive net
//! energy negative. Activation and delayed IL-2 exposure shift both the
//! preference and the uptake rate. Mass grows toward a doubling target
//! while proliferating (or back toward the critical mass floor) and shrinks
//! by a fixed salvage rate when energy-starved or oversized; the two
//! branches are mutually exclusive within a tick.

use crate::signaling::Signaling;
use serde::{Deserialize, Serialize};

/// Pyruvate produced per glucose through glycolysis.
const PYRU_PER_GLUC: f64 = 2.0;
/// Oxygen consumed per pyruvate through oxidative phosphorylation.
const OXY_PER_PYRU: f64 = 3.0;
/// ATP yield per glucose through glycolysis.
const ENERGY_FROM_GLYC: f64 = 2.0;
/// ATP yield per pyruvate through oxidative phosphorylation.
const ENERGY_FROM_OXPHOS: f64 = 15.0;
/// Cell density [ng/um^3].
const CELL_DENSITY: f64 = 1.35e-3;
/// Glucose equivalent of one unit of biomass [fmol/ng].
const MASS_TO_GLUC: f64 = 694.0;
/// Values below this are numerical noise and snap to zero.
const NOISE_FLOOR: f64 = 1e-10;

/// Population-level metabolic constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MetabolismRates {
    /// Basal ATP demand per unit volume [fmol/um^3/min].
    pub basal_energy: f64,
    /// Additional demand multiplier while proliferating.
    pub proli_energy_mult: f64,
    /// Additional demand multiplier while migrating.
    pub migra_energy_mult: f64,
    /// Fraction of internal nutrients diverted to mass per tick.
    pub frac_mass: f64,
    /// Increase in that fraction while activated.
    pub frac_mass_active: f64,
    /// Preference for glucose over pyruvate when building mass.
    pub ratio_gluc_to_pyru: f64,
    /// Fraction of pyruvate lost to lactate per tick.
    pub lactate_rate: f64,
    /// Mass salvaged per tick when shrinking [ng].
    pub autophagy_rate: f64,
    /// Minimum viable mass as a fraction of critical mass.
    pub min_mass_frac: f64,
    /// Delay before IL-2/activation shifts take effect, in ticks.
    pub meta_switch_delay: usize,
}

impl Default for MetabolismRates {
    fn default() -> Self {
        Self {
            basal_energy: 8.7e-3,
            proli_energy_mult: 2.0,
            migra_energy_mult: 1.5,
            frac_mass: 0.25,
            frac_mass_active: 0.22,
            ratio_gluc_to_pyru: 0.8,
            lactate_rate: 0.1,
            autophagy_rate: 1e-4,
            min_mass_frac: 0.5,
            meta_switch_delay: 30,
        }
    }
}

/// Per-cell drawn metabolic parameters (heritable).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MetabolismTraits {
    pub meta_pref: f64,
    pub meta_pref_il2: f64,
    pub meta_pref_active: f64,
    pub gluc_uptake_rate: f64,
    pub gluc_uptake_rate_il2: f64,
    pub gluc_uptake_rate_active: f64,
}

/// Environment inputs for one metabolism step.
#[derive(Debug, Clone, Copy)]
pub struct MetabolismEnv {
    /// Locally averaged glucose, as total fmol in the location.
    pub glucose_ext: f64,
    /// Locally averaged oxygen, as total fmol in the location.
    pub oxygen_ext: f64,
    /// Location volume [um^3].
    pub location_volume: f64,
    /// Location cross-sectional area [um^2].
    pub location_area: f64,
    /// Fraction of the location's area available to this cell.
    pub area_fraction: f64,
}

/// Cell status read by the metabolism step.
#[derive(Debug, Clone, Copy)]
pub struct MetabolismStatus {
    pub activated: bool,
    pub proliferating: bool,
    pub migrating: bool,
}

/// Result of one metabolism step, applied by the caller.
#[derive(Debug, Clone, Copy)]
pub struct MetabolismOutput {
    /// Updated cell energy [fmol ATP].
    pub energy: f64,
    /// Glucose drawn from the location this tick [fmol].
    pub glucose_uptake: f64,
    /// Oxygen drawn from the location this tick [fmol].
    pub oxygen_uptake: f64,
    /// Whether mass has reached twice the critical mass.
    pub doubled: bool,
}

/// One cell's metabolic state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metabolism {
    glucose: f64,
    pyruvate: f64,
    mass: f64,
    volume: f64,
    crit_mass: f64,
    traits: MetabolismTraits,
    rates: MetabolismRates,
}

impl Metabolism {
    /// Fresh metabolic state for a cell of the given volume.
    ///
    /// Internal pools start in equilibrium with the provided external
    /// glucose amount.
    #[must_use]
    pub fn new(
        volume: f64,
        glucose_ext: f64,
        traits: MetabolismTraits,
        rates: MetabolismRates,
    ) -> Self {
        let mass = volume * CELL_DENSITY;
        Self {
            glucose: glucose_ext,
            pyruvate: glucose_ext * PYRU_PER_GLUC,
            mass,
            volume,
            crit_mass: mass,
            traits,
            rates,
        }
    }

    /// Current cell volume [um^3].
    #[must_use]
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Current cell mass [ng].
    #[must_use]
    pub fn mass(&self) -> f64 {
        self.mass
    }

    /// Mass the cell works to maintain [ng].
    #[must_use]
    pub fn crit_mass(&self) -> f64 {
        self.crit_mass
    }

    /// Volume corresponding to the critical mass [um^3].
    #[must_use]
    pub fn crit_volume(&self) -> f64 {
        self.crit_mass / CELL_DENSITY
    }

    /// Internal glucose pool [fmol].
    #[must_use]
    pub fn glucose(&self) -> f64 {
        self.glucose
    }

    /// Internal pyruvate pool [fmol].
    #[must_use]
    pub fn pyruvate(&self) -> f64 {
        self.pyruvate
    }

    /// Heritable metabolic traits drawn for this cell.
    #[must_use]
    pub fn traits(&self) -> &MetabolismTraits {
        &self.traits
    }

    /// Advance the balance by one tick.
    pub fn step(
        &mut self,
        energy: f64,
        status: MetabolismStatus,
        signaling: &Signaling,
        env: MetabolismEnv,
    ) -> MetabolismOutput {
        let delay = self.rates.meta_switch_delay;
        let prior_il2 = signaling.bound_delayed(delay);
        let receptor_total = signaling.receptor_count();
        let il2_fraction = prior_il2 / receptor_total;

        // Preference and uptake: baseline plus delayed-IL-2 bonus plus a
        // flat activation bonus once the switch delay has elapsed.
        let mut meta_pref = self.traits.meta_pref + self.traits.meta_pref_il2 * il2_fraction;
        let mut uptake_rate =
            self.traits.gluc_uptake_rate + self.traits.gluc_uptake_rate_il2 * il2_fraction;
        let mut frac_mass = self.rates.frac_mass;
        if status.activated && signaling.active_ticker() as usize >= delay {
            meta_pref += self.traits.meta_pref_active;
            uptake_rate += self.traits.gluc_uptake_rate_active;
            frac_mass += self.rates.frac_mass_active;
        }
        let meta_pref = meta_pref.min(1.0);

        // Glucose uptake scales with exposed surface area and the
        // concentration gradient across the membrane.
        let area = env.location_area * env.area_fraction;
        let perimeter = 2.0 * (area * std::f64::consts::PI).sqrt() * env.area_fraction;
        let surface_area = area * 2.0 + (self.volume / area) * perimeter;
        let mut gradient = env.glucose_ext / env.location_volume - self.glucose / self.volume;
        if gradient < NOISE_FLOOR {
            gradient = 0.0;
        }
        let glucose_uptake = uptake_rate * surface_area * gradient;
        self.glucose += glucose_uptake;

        // Energy demand in glucose equivalents, partitioned by preference.
        let mut energy_cons = self.rates.basal_energy * self.volume;
        if status.proliferating {
            energy_cons *= self.rates.proli_energy_mult;
        } else if status.migrating {
            energy_cons *= self.rates.migra_energy_mult;
        }
        let mut gluc_req = meta_pref * energy_cons / ENERGY_FROM_GLYC;
        let pyru_req = (1.0 - meta_pref) * energy_cons / ENERGY_FROM_OXPHOS;

        // Oxidative phosphorylation first, capped by available oxygen.
        let oxy_req = pyru_req * OXY_PER_PYRU;
        let mut oxy_uptake = env.oxygen_ext.min(oxy_req);
        if oxy_uptake < NOISE_FLOOR {
            oxy_uptake = 0.0;
        }
        let mut oxphos_energy = 0.0;
        let oxy_uptake_in_pyru = oxy_uptake / OXY_PER_PYRU;
        if self.pyruvate > oxy_uptake_in_pyru {
            oxphos_energy += oxy_uptake_in_pyru * ENERGY_FROM_OXPHOS;
            self.pyruvate -= oxy_uptake_in_pyru;
        } else {
            oxphos_energy += self.pyruvate * ENERGY_FROM_OXPHOS;
            oxy_uptake = self.pyruvate * OXY_PER_PYRU;
            self.pyruvate = 0.0;
        }

        // Divert extra glucose through glycolysis if the oxidative yield
        // alone would leave net energy negative.
        if energy <= 0.0 && self.glucose > 0.0 {
            let gluc_needed = -(energy - energy_cons + oxphos_energy) / ENERGY_FROM_GLYC;
            gluc_req = gluc_req.max(gluc_needed);
        }

        // Glycolysis: glucose becomes pyruvate plus energy.
        let mut glyc_energy = 0.0;
        if self.glucose > gluc_req {
            glyc_energy += gluc_req * ENERGY_FROM_GLYC;
            self.pyruvate += gluc_req * PYRU_PER_GLUC;
            self.glucose -= gluc_req;
        } else {
            glyc_energy += self.glucose * ENERGY_FROM_GLYC;
            self.pyruvate += self.glucose * PYRU_PER_GLUC;
            self.glucose = 0.0;
        }

        let mut energy = energy + oxphos_energy + glyc_energy - energy_cons;
        if energy.abs() < NOISE_FLOOR {
            energy = 0.0;
        }

        // Grow toward doubling (or back to the maintenance floor), else
        // shrink by autophagy; never both in one tick.
        let ratio = self.rates.ratio_gluc_to_pyru;
        let grow = (energy >= 0.0 && status.proliferating && self.mass < 2.0 * self.crit_mass)
            || (energy >= 0.0 && self.mass < 0.99 * self.crit_mass);
        let shrink = (energy < 0.0 && self.mass > self.rates.min_mass_frac * self.crit_mass)
            || (energy >= 0.0 && self.mass > 1.01 * self.crit_mass && !status.proliferating);
        if grow {
            self.mass += frac_mass
                * (ratio * self.glucose + (1.0 - ratio) * self.pyruvate / PYRU_PER_GLUC)
                / MASS_TO_GLUC;
            self.glucose *= 1.0 - frac_mass * ratio;
            self.pyruvate *= 1.0 - frac_mass * (1.0 - ratio);
        } else if shrink {
            self.mass -= self.rates.autophagy_rate;
            self.glucose += self.rates.autophagy_rate * MASS_TO_GLUC;
        }

        let doubled = self.mass >= 2.0 * self.crit_mass;
        self.volume = self.mass / CELL_DENSITY;

        // Pyruvate drains to lactate.
        self.pyruvate -= self.rates.lactate_rate * self.pyruvate;

        MetabolismOutput {
            energy,
            glucose_uptake,
            oxygen_uptake: oxy_uptake,
            doubled,
        }
    }

    /// Split pools and mass between parent and daughter on division.
    ///
    /// The daughter keeps the mass and volume it was constructed with; the
    /// parent retains the complement of every split pool. Energy is split by
    /// the caller, which owns it.
    pub fn split(&mut self, f: f64) -> (f64, f64) {
        let daughter_glucose = self.glucose * f;
        let daughter_pyruvate = self.pyruvate * f;
        self.glucose *= 1.0 - f;
        self.pyruvate *= 1.0 - f;
        self.mass *= 1.0 - f;
        self.volume *= 1.0 - f;
        (daughter_glucose, daughter_pyruvate)
    }

    /// Install pools split off a parent (daughter side of a division).
    pub fn inherit(&mut self, glucose: f64, pyruvate: f64) {
        self.glucose = glucose;
        self.pyruvate = pyruvate;
    }
}
