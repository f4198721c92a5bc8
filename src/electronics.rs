use crate::config::Positive;
use num_traits::ToPrimitive;

/// Analog response of the front-end shaper to a charge `C` arriving at t = 0.
///
/// With two time constants the response is bi-exponential,
/// `C / (tau0 - tau1) * (exp(-t/tau0) - exp(-t/tau1))`. A negative `tau1`
/// selects the single time-constant CR-RC shape `C t / tau0^2 exp(-t/tau0)`.
/// Both integrate to `C`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PulseShape {
    tau0: f64,
    tau1: f64,
}

impl PulseShape {
    pub fn new(tau0: Positive<f64>, tau1: f64) -> Self {
        Self {
            tau0: tau0.into_inner(),
            tau1,
        }
    }

    pub fn tau0(&self) -> f64 {
        self.tau0
    }

    pub fn tau1(&self) -> f64 {
        self.tau1
    }

    /// Amplitude at time `t` (ns) after the charge arrival.
    pub fn amplitude(&self, t: f64, charge: f64) -> f64 {
        if t < 0.0 {
            return 0.0;
        }
        let (tau0, tau1) = (self.tau0, self.tau1);

        let v = if tau1 < 0.0 {
            charge * t / (tau0 * tau0) * (-t / tau0).exp()
        } else if (tau0 - tau1).abs() <= f64::EPSILON * tau0 {
            // Equal time constants: limit of the bi-exponential.
            charge * t / (tau0 * tau0) * (-t / tau0).exp()
        } else if tau1 == 0.0 {
            charge / tau0 * (-t / tau0).exp()
        } else {
            charge / (tau0 - tau1) * ((-t / tau0).exp() - (-t / tau1).exp())
        };

        v.max(0.0)
    }
}

/// Linear ADC: `floor((v - offset) / gain)` clipped to `[0, 2^bits - 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdcConverter {
    offset: f64,
    gain: f64,
    bits: u32,
}

impl AdcConverter {
    pub fn new(offset: f64, gain: Positive<f64>, bits: u32) -> Self {
        Self {
            offset,
            gain: gain.into_inner(),
            bits,
        }
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Largest code the ADC can produce.
    pub fn max_code(&self) -> u16 {
        ((1u32 << self.bits) - 1).to_u16().unwrap_or(u16::MAX)
    }

    pub fn convert(&self, value: f64) -> u16 {
        let code = ((value.max(0.0) - self.offset) / self.gain).floor();
        let max = self.max_code();
        if code.is_nan() || code <= 0.0 {
            0
        } else {
            code.to_u16().map_or(max, |c| c.min(max))
        }
    }
}
