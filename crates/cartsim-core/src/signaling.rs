//! Intracellular IL-2 signaling network.
//!
//! An 8-species reaction system: free external IL-2 reversibly binds the
//! two-chain and three-chain receptor complexes with distinct on-rates and a
//! shared off-rate, while two-chain complexes slowly convert to three-chain
//! complexes at a rate proportional to total ligand-bound complex, with a
//! slow reverse recycling rate. The network is integrated every simulated
//! minute with classical fixed-step RK4 over a 60 second window.
//!
//! Production reads a fixed-lag circular history of bound IL-2, never the
//! instantaneous value: the cytotoxic variant accumulates granzyme, the
//! stimulatory variant secretes IL-2 back into the local environment.

use serde::{Deserialize, Serialize};

/// Number of species in the signaling network.
pub const NUM_SPECIES: usize = 8;

/// Total IL-2 bound to the cell.
pub const IL2_BOUND_TOTAL: usize = 0;
/// Free IL-2 available in the cell's sensing shell.
pub const IL2_EXT: usize = 1;
/// Unbound receptors, both complex forms.
pub const RECEPTOR_TOTAL: usize = 2;
/// Two-chain receptor complex.
pub const TWO_CHAIN: usize = 3;
/// Three-chain receptor complex.
pub const THREE_CHAIN: usize = 4;
/// IL-2 bound to a two-chain complex.
pub const BOUND_TWO_CHAIN: usize = 5;
/// IL-2 bound to a three-chain complex.
pub const BOUND_THREE_CHAIN: usize = 6;
/// Internal granzyme pool (cytotoxic variant only).
pub const GRANZYME: usize = 7;

/// Length of the bound-IL-2 history ring, in ticks (minutes).
pub const HISTORY_LEN: usize = 180;

/// Internal sub-steps per second of integration.
const STEP_DIVIDER: f64 = 3.0;
/// Integration window per agent tick, in module seconds.
const WINDOW: f64 = 60.0;
/// Integration step size, in module seconds.
const STEP_SIZE: f64 = 1.0 / STEP_DIVIDER;
/// Two-chain to three-chain conversion rate, per second per sub-step.
const K_CONVERT: f64 = 1e-3 / STEP_DIVIDER;
/// Complex recycling rate back to two-chain form, per second per sub-step.
const K_REC: f64 = 1e-5 / STEP_DIVIDER;
/// Moles of granzyme produced per mole of delayed bound IL-2.
const GRANZ_PER_IL2: f64 = 0.005;

/// Population-level signaling rates shared by both variants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SignalingRates {
    /// Sensing shell thickness beyond the cell radius, in micrometers.
    pub shell_thickness: f64,
    /// Total receptor count at construction.
    pub il2_receptors: f64,
    /// IL-2 on-rate for the two-chain complex [um^3/molecule/min].
    pub on_rate_two_chain: f64,
    /// IL-2 on-rate for the three-chain complex [um^3/molecule/min].
    pub on_rate_three_chain: f64,
    /// Shared IL-2 off-rate [/min].
    pub off_rate: f64,
}

impl Default for SignalingRates {
    fn default() -> Self {
        Self {
            shell_thickness: 2.0,
            il2_receptors: 2000.0,
            on_rate_two_chain: 3.8193e-2,
            on_rate_three_chain: 3.155,
            off_rate: 0.015,
        }
    }
}

/// Subtype specialization of the production rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum SignalingKind {
    /// CD8: granzyme accumulation gated by the synthesis delay.
    Cytotoxic { synthesis_delay: usize },
    /// CD4: IL-2 secretion with a bound-IL-2 baseline and an activation term.
    Stimulatory {
        synthesis_delay: usize,
        prod_rate_il2: f64,
        prod_rate_active: f64,
    },
}

/// Environment inputs for one signaling step.
#[derive(Debug, Clone, Copy)]
pub struct SignalingEnv {
    /// Cell volume in cubic micrometers.
    pub volume: f64,
    /// Location volume in cubic micrometers.
    pub location_volume: f64,
    /// Locally averaged IL-2 field value [molecules/cm^3].
    pub il2_field: f64,
}

/// Result of one signaling step.
#[derive(Debug, Clone, Copy)]
pub struct SignalingOutput {
    /// New IL-2 field value to write back at the cell's location.
    pub il2_field: f64,
}

/// One cell's signaling state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signaling {
    amounts: [f64; NUM_SPECIES],
    #[serde(with = "serde_arrays")]
    bound_history: [f64; HISTORY_LEN],
    ticker: usize,
    active_ticker: u32,
    rates: SignalingRates,
    kind: SignalingKind,
}

// Serde does not derive for arrays past 32 without help; the history ring is
// fixed-length, so a thin shim keeps the derive.
mod serde_arrays {
    use super::HISTORY_LEN;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        array: &[f64; HISTORY_LEN],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        array.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[f64; HISTORY_LEN], D::Error> {
        let values = Vec::<f64>::deserialize(deserializer)?;
        let mut array = [0.0; HISTORY_LEN];
        for (slot, value) in array.iter_mut().zip(values) {
            *slot = value;
        }
        Ok(array)
    }
}

impl Signaling {
    /// Fresh signaling state: all receptors in the unbound two-chain form,
    /// the cytotoxic variant primed with one unit of granzyme.
    #[must_use]
    pub fn new(rates: SignalingRates, kind: SignalingKind) -> Self {
        let mut amounts = [0.0; NUM_SPECIES];
        amounts[RECEPTOR_TOTAL] = rates.il2_receptors;
        amounts[TWO_CHAIN] = rates.il2_receptors;
        if matches!(kind, SignalingKind::Cytotoxic { .. }) {
            amounts[GRANZYME] = 1.0;
        }
        Self {
            amounts,
            bound_history: [0.0; HISTORY_LEN],
            ticker: 0,
            active_ticker: 0,
            rates,
            kind,
        }
    }

    /// Current species amounts.
    #[must_use]
    pub fn amounts(&self) -> &[f64; NUM_SPECIES] {
        &self.amounts
    }

    /// Total receptor count the network conserves.
    #[must_use]
    pub fn receptor_count(&self) -> f64 {
        self.rates.il2_receptors
    }

    /// Internal granzyme pool.
    #[must_use]
    pub fn granzyme(&self) -> f64 {
        self.amounts[GRANZYME]
    }

    /// Consume one unit of granzyme after a kill.
    pub fn consume_granzyme(&mut self) {
        self.amounts[GRANZYME] -= 1.0;
    }

    /// Ticks since the owning cell became activated.
    #[must_use]
    pub fn active_ticker(&self) -> u32 {
        self.active_ticker
    }

    /// Bound IL-2 recorded `delay` ticks ago, read from the history ring.
    #[must_use]
    pub fn bound_delayed(&self, delay: usize) -> f64 {
        let len = self.bound_history.len();
        let index = (self.ticker % len + len - delay % len) % len;
        self.bound_history[index]
    }

    /// Volume fraction of the cell's sensing shell relative to the location.
    fn shell_fraction(&self, volume: f64, location_volume: f64) -> f64 {
        let rad_cell = (0.75 * volume / std::f64::consts::PI).cbrt();
        let rad_shell = rad_cell + self.rates.shell_thickness;
        let shell_volume = volume * ((rad_shell.powi(3) / rad_cell.powi(3)) - 1.0);
        shell_volume / location_volume
    }

    /// Advance the network by one agent tick.
    pub fn step(&mut self, active: bool, env: SignalingEnv) -> SignalingOutput {
        let f = self.shell_fraction(env.volume, env.location_volume);
        // Convert from molecules/cm^3 to molecules in the location.
        let ext_il2 = env.il2_field * env.location_volume / 1e12;

        if active {
            self.active_ticker += 1;
        } else {
            self.active_ticker = 0;
        }

        // The cell sees the fraction of local IL-2 its shell occupies.
        self.amounts[IL2_EXT] = ext_il2 * f;

        let kon_two = self.rates.on_rate_two_chain / env.location_volume / 60.0 / STEP_DIVIDER;
        let kon_three = self.rates.on_rate_three_chain / env.location_volume / 60.0 / STEP_DIVIDER;
        let koff = self.rates.off_rate / 60.0 / STEP_DIVIDER;

        self.amounts = rk4(self.amounts, WINDOW, STEP_SIZE, |y| {
            let bound_total = y[BOUND_TWO_CHAIN] + y[BOUND_THREE_CHAIN];
            let convert = K_CONVERT * bound_total * y[TWO_CHAIN];
            let bind_two = kon_two * y[TWO_CHAIN] * y[IL2_EXT];
            let bind_three = kon_three * y[THREE_CHAIN] * y[IL2_EXT];
            let unbind_two = koff * y[BOUND_TWO_CHAIN];
            let unbind_three = koff * y[BOUND_THREE_CHAIN];
            let shift = K_CONVERT * bound_total * y[BOUND_TWO_CHAIN];

            let mut dydt = [0.0; NUM_SPECIES];
            dydt[IL2_EXT] = unbind_two + unbind_three - bind_two - bind_three;
            dydt[TWO_CHAIN] = unbind_two - bind_two - convert
                + K_REC * (bound_total + y[THREE_CHAIN]);
            dydt[THREE_CHAIN] = unbind_three - bind_three + convert - K_REC * y[THREE_CHAIN];
            dydt[BOUND_TWO_CHAIN] = bind_two - unbind_two - shift - K_REC * y[BOUND_TWO_CHAIN];
            dydt[BOUND_THREE_CHAIN] =
                bind_three - unbind_three + shift - K_REC * y[BOUND_THREE_CHAIN];
            dydt[IL2_BOUND_TOTAL] = dydt[BOUND_TWO_CHAIN] + dydt[BOUND_THREE_CHAIN];
            dydt[RECEPTOR_TOTAL] = dydt[TWO_CHAIN] + dydt[THREE_CHAIN];
            dydt
        });

        let output = self.produce(active, ext_il2, f, env.location_volume);

        self.bound_history[self.ticker % HISTORY_LEN] = self.amounts[IL2_BOUND_TOTAL];
        self.ticker += 1;

        output
    }

    /// Apply the subtype production rule and compute the field write-back.
    fn produce(&mut self, active: bool, ext_il2: f64, f: f64, location_volume: f64) -> SignalingOutput {
        // Free IL-2 the cell returns to the location: what it did not keep.
        let returned = ext_il2 - (ext_il2 * f - self.amounts[IL2_EXT]);
        match self.kind {
            SignalingKind::Cytotoxic { synthesis_delay } => {
                let prior = self.bound_delayed(synthesis_delay);
                if active && self.active_ticker as usize > synthesis_delay {
                    self.amounts[GRANZYME] +=
                        GRANZ_PER_IL2 * (prior / self.rates.il2_receptors);
                }
                SignalingOutput {
                    il2_field: returned * 1e12 / location_volume,
                }
            }
            SignalingKind::Stimulatory {
                synthesis_delay,
                prod_rate_il2,
                prod_rate_active,
            } => {
                let prior = self.bound_delayed(synthesis_delay);
                let mut prod_rate = prod_rate_il2 * (prior / self.rates.il2_receptors);
                if active && self.active_ticker as usize >= synthesis_delay {
                    prod_rate += prod_rate_active;
                }
                // Rate is already per minute, i.e. per tick.
                SignalingOutput {
                    il2_field: (returned + prod_rate) * 1e12 / location_volume,
                }
            }
        }
    }

    /// Split the network between parent and daughter on division.
    ///
    /// Per-cell content splits multiplicatively by the volume fraction `f`;
    /// the two-chain pool and the derived totals are recomputed from
    /// receptor conservation rather than copied.
    pub fn split(&mut self, f: f64) -> Signaling {
        let receptors = self.rates.il2_receptors;
        let mut daughter = self.clone();
        daughter.ticker = 0;
        daughter.active_ticker = 0;

        daughter.amounts[THREE_CHAIN] = self.amounts[THREE_CHAIN] * f;
        daughter.amounts[BOUND_TWO_CHAIN] = self.amounts[BOUND_TWO_CHAIN] * f;
        daughter.amounts[BOUND_THREE_CHAIN] = self.amounts[BOUND_THREE_CHAIN] * f;
        daughter.amounts[TWO_CHAIN] = receptors
            - daughter.amounts[THREE_CHAIN]
            - daughter.amounts[BOUND_TWO_CHAIN]
            - daughter.amounts[BOUND_THREE_CHAIN];
        daughter.amounts[IL2_BOUND_TOTAL] =
            daughter.amounts[BOUND_TWO_CHAIN] + daughter.amounts[BOUND_THREE_CHAIN];
        daughter.amounts[RECEPTOR_TOTAL] =
            daughter.amounts[TWO_CHAIN] + daughter.amounts[THREE_CHAIN];
        if matches!(self.kind, SignalingKind::Cytotoxic { .. }) {
            daughter.amounts[GRANZYME] = self.amounts[GRANZYME] * f;
        }

        self.amounts[THREE_CHAIN] *= 1.0 - f;
        self.amounts[BOUND_TWO_CHAIN] *= 1.0 - f;
        self.amounts[BOUND_THREE_CHAIN] *= 1.0 - f;
        self.amounts[TWO_CHAIN] = receptors
            - self.amounts[THREE_CHAIN]
            - self.amounts[BOUND_TWO_CHAIN]
            - self.amounts[BOUND_THREE_CHAIN];
        self.amounts[IL2_BOUND_TOTAL] =
            self.amounts[BOUND_TWO_CHAIN] + self.amounts[BOUND_THREE_CHAIN];
        self.amounts[RECEPTOR_TOTAL] = self.amounts[TWO_CHAIN] + self.amounts[THREE_CHAIN];
        if matches!(self.kind, SignalingKind::Cytotoxic { .. }) {
            self.amounts[GRANZYME] *= 1.0 - f;
        }

        daughter
    }
}

/// Classical fixed-step 4th-order Runge-Kutta over an autonomous system.
fn rk4<const N: usize>(
    mut y: [f64; N],
    window: f64,
    dt: f64,
    deriv: impl Fn(&[f64; N]) -> [f64; N],
) -> [f64; N] {
    let steps = (window / dt).round() as usize;
    for _ in 0..steps {
        let k1 = deriv(&y);
        let k2 = deriv(&offset(&y, &k1, dt / 2.0));
        let k3 = deriv(&offset(&y, &k2, dt / 2.0));
        let k4 = deriv(&offset(&y, &k3, dt));
        for i in 0..N {
            y[i] += dt / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
        }
    }
    y
}

fn offset<const N: usize>(y: &[f64; N], k: &[f64; N], scale: f64) -> [f64; N] {
    let mut out = *y;
    for i in 0..N {
        out[i] += k[i] * scale;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cd8() -> Signaling {
        Signaling::new(
            SignalingRates::default(),
            SignalingKind::Cytotoxic { synthesis_delay: 30 },
        )
    }

    fn conserved(signaling: &Signaling) -> f64 {
        let amounts = signaling.amounts();
        amounts[TWO_CHAIN]
            + amounts[THREE_CHAIN]
            + amounts[BOUND_TWO_CHAIN]
            + amounts[BOUND_THREE_CHAIN]
    }

    fn env(il2_field: f64) -> SignalingEnv {
        SignalingEnv {
            volume: 175.0,
            location_volume: 6.7e3,
            il2_field,
        }
    }

    #[test]
    fn receptors_are_conserved_through_integration() {
        let mut signaling = cd8();
        for tick in 0..20 {
            signaling.step(false, env(1e10));
            let total = conserved(&signaling);
            assert!(
                (total - signaling.receptor_count()).abs() < 1e-6,
                "conservation broken at tick {tick}: {total}"
            );
        }
    }

    #[test]
    fn binding_accumulates_with_external_il2() {
        let mut signaling = cd8();
        for _ in 0..10 {
            signaling.step(false, env(1e10));
        }
        assert!(signaling.amounts()[IL2_BOUND_TOTAL] > 0.0);
        let mut starved = cd8();
        for _ in 0..10 {
            starved.step(false, env(0.0));
        }
        assert_eq!(starved.amounts()[IL2_BOUND_TOTAL], 0.0);
    }

    #[test]
    fn delayed_lookup_reads_past_not_present() {
        let mut signaling = cd8();
        signaling.step(false, env(1e10));
        // One tick recorded; a 1-tick delay sees it, a 2-tick delay sees the
        // still-zero slot behind it.
        let now = signaling.amounts()[IL2_BOUND_TOTAL];
        assert_eq!(signaling.bound_delayed(1), now);
        assert_eq!(signaling.bound_delayed(2), 0.0);
    }

    #[test]
    fn granzyme_needs_sustained_activation() {
        let mut signaling = Signaling::new(
            SignalingRates::default(),
            SignalingKind::Cytotoxic { synthesis_delay: 3 },
        );
        for _ in 0..3 {
            signaling.step(true, env(1e10));
        }
        assert_eq!(signaling.granzyme(), 1.0);
        for _ in 0..6 {
            signaling.step(true, env(1e10));
        }
        assert!(signaling.granzyme() > 1.0);
    }

    #[test]
    fn stimulatory_variant_feeds_il2_back() {
        let mut signaling = Signaling::new(
            SignalingRates::default(),
            SignalingKind::Stimulatory {
                synthesis_delay: 2,
                prod_rate_il2: 1e3,
                prod_rate_active: 1e4,
            },
        );
        let quiet = signaling.step(false, env(0.0));
        assert_eq!(quiet.il2_field, 0.0);
        for _ in 0..4 {
            signaling.step(true, env(0.0));
        }
        let active = signaling.step(true, env(0.0));
        assert!(active.il2_field > 0.0);
    }

    #[test]
    fn split_conserves_every_species_pair() {
        let mut parent = cd8();
        for _ in 0..12 {
            parent.step(true, env(1e10));
        }
        let before = *parent.amounts();
        let daughter = parent.split(0.47);

        for species in [THREE_CHAIN, BOUND_TWO_CHAIN, BOUND_THREE_CHAIN, GRANZYME] {
            let total = parent.amounts()[species] + daughter.amounts()[species];
            assert!(
                (total - before[species]).abs() < 1e-9,
                "species {species} not conserved"
            );
        }
        assert!((conserved(&parent) - parent.receptor_count()).abs() < 1e-9);
        assert!((conserved(&daughter) - daughter.receptor_count()).abs() < 1e-9);
    }
}
