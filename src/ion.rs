use crate::config::{ConfigError, DigitizationParameters, Positive};
use nalgebra::Vector3;
use rand::Rng;
use rand_distr::{Distribution, Exp, Normal, Poisson};
use std::f64::consts::PI;
use std::fmt;
use uom::si::f64::{Length, Time, Velocity};
use uom::si::length::millimeter;
use uom::si::time::{nanosecond, second};

/// Gas gain fluctuation model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GainStatistics {
    /// Exponential distribution of the avalanche size.
    Furry { mean: Positive<f64> },
    /// Gaussian with sigma `mean / sqrt(gain0)`.
    Gaussian {
        mean: Positive<f64>,
        gain0: Positive<f64>,
    },
}

impl fmt::Display for GainStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GainStatistics::Furry { mean } => write!(f, "Furry (mean {})", mean.inner()),
            GainStatistics::Gaussian { mean, gain0 } => {
                write!(f, "Gaussian (mean {}, gain0 {})", mean.inner(), gain0.inner())
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum GainDistribution {
    Furry(Exp<f64>),
    Gaussian(Normal<f64>),
}

impl GainDistribution {
    fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        match self {
            GainDistribution::Furry(d) => d.sample(rng),
            GainDistribution::Gaussian(d) => d.sample(rng),
        }
    }
}

/// A single ionization cluster, projected on the readout plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IonPoint {
    /// Position in the chamber frame (mm).
    pub x: f64,
    pub y: f64,
    /// Charge after gas gain; never negative.
    pub charge: f64,
    /// Drift time to the readout plane (ns).
    pub drift_time: f64,
    /// Radius of the integration area: diffusion sigma times the avalanche
    /// range (mm).
    pub snorm: f64,
    /// `snorm^2`
    pub r2: f64,
    /// `charge / (pi r2)`: mean charge per unit area.
    pub ggnorm: f64,
}

/// The ions of one hit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Ionization {
    ions: Vec<IonPoint>,
    total_charge: f64,
    drift_time: f64,
    max_sigma: f64,
}

impl Ionization {
    pub fn ions(&self) -> &[IonPoint] {
        &self.ions
    }

    pub fn n_ions(&self) -> usize {
        self.ions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ions.is_empty()
    }

    pub fn total_charge(&self) -> f64 {
        self.total_charge
    }

    /// Shortest drift time among the ions (ns), 0 without ions.
    pub fn drift_time(&self) -> f64 {
        self.drift_time
    }

    /// Largest diffusion sigma among the ions (mm), not scaled by the
    /// avalanche range.
    pub fn max_sigma(&self) -> f64 {
        self.max_sigma
    }

    fn clear(&mut self) {
        self.ions.clear();
        self.total_charge = 0.0;
        self.drift_time = 0.0;
        self.max_sigma = 0.0;
    }
}

/// Turns an energy deposit along a segment into discrete ionization
/// clusters.
#[derive(Clone, Debug)]
pub struct IonModel {
    ionization_energy: f64,
    diffusion: f64,
    drift_velocity: Velocity,
    entrance_ref: f64,
    readout_distance: f64,
    n_sigma: f64,
    max_ions: usize,
    lateral: Normal<f64>,
    gain: GainDistribution,
    ionization: Ionization,
}

impl IonModel {
    pub fn new(params: &DigitizationParameters) -> Result<Self, ConfigError> {
        let lateral = Normal::new(0.0, params.lateral_uncertainty)
            .map_err(|_| ConfigError::Distribution("lateral uncertainty"))?;
        let gain = match params.gain_statistics {
            GainStatistics::Furry { mean } => GainDistribution::Furry(
                Exp::new(1.0 / mean.inner())
                    .map_err(|_| ConfigError::Distribution("Furry gain"))?,
            ),
            GainStatistics::Gaussian { mean, gain0 } => GainDistribution::Gaussian(
                Normal::new(*mean.inner(), mean.inner() / gain0.inner().sqrt())
                    .map_err(|_| ConfigError::Distribution("Gaussian gain"))?,
            ),
        };

        Ok(Self {
            ionization_energy: *params.ionization_energy.inner(),
            diffusion: params.diffusion,
            drift_velocity: params.drift_velocity,
            entrance_ref: params.entrance_ref,
            readout_distance: params.readout_distance,
            n_sigma: *params.avalanche_range.inner(),
            max_ions: params.max_ions,
            lateral,
            gain,
            ionization: Ionization {
                ions: Vec::with_capacity(params.max_ions),
                ..Ionization::default()
            },
        })
    }

    /// Result of the last call to [`IonModel::generate`].
    pub fn ionization(&self) -> &Ionization {
        &self.ionization
    }

    /// Generate the ions for a deposit of `energy` eV between `entry` and
    /// `exit` (chamber frame, mm).
    ///
    /// The number of ions is Poisson distributed with mean
    /// `energy / ionization_energy` and clamped to the configured maximum.
    /// An empty [`Ionization`] is returned when no ion is produced.
    pub fn generate<R: Rng>(
        &mut self,
        entry: &Vector3<f64>,
        exit: &Vector3<f64>,
        energy: f64,
        rng: &mut R,
    ) -> &Ionization {
        self.ionization.clear();

        let mean = energy / self.ionization_energy;
        if !(mean > 0.0) {
            return &self.ionization;
        }
        let n_ions = match Poisson::new(mean) {
            Ok(poisson) => poisson.sample(rng) as usize,
            Err(e) => {
                log::warn!("cannot sample ion count for {energy} eV: {e}");
                return &self.ionization;
            }
        };
        if n_ions == 0 {
            return &self.ionization;
        }
        let n_ions = if n_ions > self.max_ions {
            log::debug!("too many primary ions {n_ions}, limit to {}", self.max_ions);
            self.max_ions
        } else {
            n_ions
        };

        let segment = exit - entry;
        // Distance from the entrance to the first drift gap; non-zero only
        // for particles produced inside the gas.
        let gap_offset = (entry.z - self.entrance_ref).abs();
        let mut min_drift = f64::INFINITY;

        for _ in 0..n_ions {
            let fraction: f64 = rng.random();

            let x = segment.x * fraction + entry.x + self.lateral.sample(rng);
            let y = segment.y * fraction + entry.y + self.lateral.sample(rng);

            let path = (self.readout_distance - gap_offset - segment.z * fraction).abs();
            let drift: Time = Length::new::<millimeter>(path) / self.drift_velocity;
            min_drift = min_drift.min(drift.get::<nanosecond>());

            let sigma = (2.0 * self.diffusion * drift.get::<second>()).sqrt();
            self.ionization.max_sigma = self.ionization.max_sigma.max(sigma);

            let charge = self.gain.sample(rng).max(0.0);
            self.ionization.total_charge += charge;

            let snorm = sigma * self.n_sigma;
            let r2 = snorm * snorm;
            self.ionization.ions.push(IonPoint {
                x,
                y,
                charge,
                drift_time: drift.get::<nanosecond>(),
                snorm,
                r2,
                ggnorm: charge / (PI * r2),
            });
        }
        self.ionization.drift_time = min_drift;

        &self.ionization
    }
}
