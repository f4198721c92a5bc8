use crate::avalanche::AvalancheKernel;
use crate::database::{Database, ParseError};
use crate::electronics::{AdcConverter, PulseShape};
use crate::ion::GainStatistics;
use crate::plane::CrossTalk;
use num_traits::Zero;
use std::fmt;
use uom::si::f64::Velocity;
use uom::si::velocity::millimeter_per_second;

/// Largest supported ADC resolution.
pub const MAX_ADC_BITS: u32 = 16;
/// Largest number of electronics samples per strip.
pub const MAX_SAMPLES: usize = 10;

/// A strictly positive value.
///
/// # Examples
///
/// ```
/// use gemdig::config::Positive;
///
/// assert!(Positive::new(1.5).is_some());
/// assert!(Positive::new(0.0).is_none());
/// assert!(Positive::new(-3).is_none());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Positive<T>(T);

impl<T: Zero + PartialOrd> Positive<T> {
    /// Returns `None` unless `value > 0`.
    pub fn new(value: T) -> Option<Self> {
        if value > T::zero() {
            Some(Self(value))
        } else {
            None
        }
    }
}

impl<T> Positive<T> {
    pub fn inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

/// The error type returned when a parameter set cannot be built.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse database:\n{0}")]
    Parse(#[from] ParseError),
    #[error("missing required parameter `{0}`")]
    Missing(String),
    #[error("parameter `{key}` expects a single value, found {found}")]
    NotScalar { key: String, found: usize },
    #[error("invalid value {value} for parameter `{key}`: {reason}")]
    Invalid {
        key: String,
        value: f64,
        reason: &'static str,
    },
    #[error("invalid parameter adcbits = {0} (allowed 1..={MAX_ADC_BITS})")]
    AdcBits(f64),
    #[error("trigger offset table has {found} entries but the geometry has {expected} chamber layers")]
    TriggerOffsets { expected: usize, found: usize },
    #[error("invalid distribution parameter for {0}")]
    Distribution(&'static str),
}

/// Which strips end up in the strip records of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StripSelection {
    /// Every strip of every plane, including empty ones (full readout).
    All,
    /// Only strips whose cumulative ADC is above the plane threshold.
    OverThreshold,
}

/// Complete parameter set of the digitization.
///
/// Lengths are in mm, times in ns, energies in eV unless noted otherwise.
#[derive(Clone, Debug)]
pub struct DigitizationParameters {
    /// Mean energy to create one ion pair.
    pub ionization_energy: Positive<f64>,
    /// Diffusion coefficient in mm^2/s.
    pub diffusion: f64,
    pub drift_velocity: Velocity,
    /// Number of sigma of the band around the avalanche in the readout plane.
    pub fiducial_band: f64,
    pub gain_statistics: GainStatistics,
    pub max_ions: usize,
    pub lateral_uncertainty: f64,
    /// z of the layer just before the first drift gap, relative to the chamber.
    pub entrance_ref: f64,
    /// Distance from the hit entrance to the readout plane.
    pub readout_distance: f64,
    /// Radius of the numerical integration, in units of the diffusion sigma.
    pub avalanche_range: Positive<f64>,
    pub kernel: AvalancheKernel,
    pub avalanche_gain: f64,
    pub x_steps_per_pitch: Positive<u32>,
    pub y_steps_per_pitch: Positive<u32>,
    /// Indexed by chamber layer.
    pub trigger_offsets: Vec<f64>,
    pub trigger_jitter: f64,
    pub sampling_points: usize,
    pub sampling_period: Positive<f64>,
    pub pedestal_noise_sigma: f64,
    pub adc: AdcConverter,
    pub adc_saturation: u32,
    pub gate_width: f64,
    pub pulse_shape: PulseShape,
    /// Hits whose entry and exit differ by more than this in x or y are dropped.
    pub max_hit_span: f64,
    pub cross_talk: Option<CrossTalk>,
    pub strip_selection: StripSelection,
}

fn positive<T: Zero + PartialOrd + Into<f64> + Copy>(
    key: &str,
    value: T,
) -> Result<Positive<T>, ConfigError> {
    Positive::new(value).ok_or_else(|| ConfigError::Invalid {
        key: key.to_string(),
        value: value.into(),
        reason: "must be positive",
    })
}

fn non_negative(key: &str, value: f64) -> Result<f64, ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key: key.to_string(),
            value,
            reason: "must be finite and non-negative",
        })
    }
}

fn count(key: &str, value: f64) -> Result<u32, ConfigError> {
    if value.fract() == 0.0 && value >= 0.0 && value <= f64::from(u32::MAX) {
        Ok(value as u32)
    } else {
        Err(ConfigError::Invalid {
            key: key.to_string(),
            value,
            reason: "must be a non-negative integer",
        })
    }
}

impl DigitizationParameters {
    /// Build the parameter set from a parsed database. Keys are looked up
    /// with `prefix.` first, then bare.
    pub fn from_database(db: &Database, prefix: &str) -> Result<Self, ConfigError> {
        let get = |key: &str| db.scalar(prefix, key);

        let gain_mean = positive("gainmean", get("gainmean")?)?;
        let gain_statistics = match get("avalanchechargestatistics")? {
            s if s == 0.0 => GainStatistics::Furry { mean: gain_mean },
            s if s == 1.0 => GainStatistics::Gaussian {
                mean: gain_mean,
                gain0: positive("gain0", get("gain0")?)?,
            },
            s => {
                return Err(ConfigError::Invalid {
                    key: "avalanchechargestatistics".to_string(),
                    value: s,
                    reason: "expected 0 (Furry) or 1 (Gaussian)",
                })
            }
        };

        let model = get("ava_model")?;
        let kernel = AvalancheKernel::from_code(model).ok_or_else(|| ConfigError::Invalid {
            key: "ava_model".to_string(),
            value: model,
            reason: "expected 0 (step), 1 (Gaussian) or 2 (Cauchy-Lorentz)",
        })?;

        let bits = get("adcbits")?;
        if bits.fract() != 0.0 || bits < 1.0 || bits > f64::from(MAX_ADC_BITS) {
            return Err(ConfigError::AdcBits(bits));
        }
        let adc = AdcConverter::new(
            get("adcoffset")?,
            positive("adcgain", get("adcgain")?)?,
            bits as u32,
        );

        let mut sampling_points = get("elesamplingpoints")?;
        if !(1.0..=MAX_SAMPLES as f64).contains(&sampling_points) {
            log::warn!(
                "elesamplingpoints = {sampling_points} out of range, using {MAX_SAMPLES}"
            );
            sampling_points = MAX_SAMPLES as f64;
        }

        let cross_talk = if get("do_crosstalk")? != 0.0 {
            Some(CrossTalk {
                strip_offset: count("crosstalk_strip_apart", get("crosstalk_strip_apart")?)?
                    as usize,
                mean: get("crosstalk_mean")?,
                sigma: non_negative("crosstalk_sigma", get("crosstalk_sigma")?)?,
            })
        } else {
            None
        };

        let strip_selection = match db.optional_scalar(prefix, "record_all_strips")? {
            Some(v) if v == 0.0 => StripSelection::OverThreshold,
            _ => StripSelection::All,
        };

        let drift_velocity = positive("gasdriftvelocity", get("gasdriftvelocity")?)?;

        Ok(Self {
            ionization_energy: positive("gasionwidth", get("gasionwidth")?)?,
            diffusion: non_negative("gasdiffusion", get("gasdiffusion")?)?,
            drift_velocity: Velocity::new::<millimeter_per_second>(drift_velocity.into_inner()),
            fiducial_band: get("avalanchefiducialband")?.abs(),
            gain_statistics,
            max_ions: count("max_ion", get("max_ion")?)? as usize,
            lateral_uncertainty: non_negative(
                "avalateraluncertainty",
                get("avalateraluncertainty")?,
            )?,
            entrance_ref: get("entrance_ref")?,
            readout_distance: get("zrout")?,
            avalanche_range: positive("avalanche_range", get("avalanche_range")?)?,
            kernel,
            avalanche_gain: get("ava_gain")?,
            x_steps_per_pitch: positive(
                "x_integral_step_per_pitch",
                count("x_integral_step_per_pitch", get("x_integral_step_per_pitch")?)?,
            )?,
            y_steps_per_pitch: positive(
                "y_integral_step_per_pitch",
                count("y_integral_step_per_pitch", get("y_integral_step_per_pitch")?)?,
            )?,
            trigger_offsets: db.vector(prefix, "triggeroffset")?.to_vec(),
            trigger_jitter: non_negative("triggerjitter", get("triggerjitter")?)?,
            sampling_points: sampling_points as usize,
            sampling_period: positive("elesamplingperiod", get("elesamplingperiod")?)?,
            pedestal_noise_sigma: non_negative("pulsenoisesigma", get("pulsenoisesigma")?)?,
            adc,
            adc_saturation: match db.optional_scalar(prefix, "adc_saturation")? {
                Some(v) => count("adc_saturation", v)?,
                None => 4000,
            },
            gate_width: non_negative("gatewidth", get("gatewidth")?)?,
            pulse_shape: PulseShape::new(
                positive("pulseshapetau0", get("pulseshapetau0")?)?,
                get("pulseshapetau1")?,
            ),
            max_hit_span: match db.optional_scalar(prefix, "max_hit_span")? {
                Some(v) => positive("max_hit_span", v)?.into_inner(),
                None => 50.0,
            },
            cross_talk,
            strip_selection,
        })
    }
}

impl std::str::FromStr for DigitizationParameters {
    type Err = ConfigError;

    /// Parse the database text and build the parameters from unprefixed (or
    /// `ratedig.`-prefixed) keys.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let db = Database::from_str(input)?;
        Self::from_database(&db, "ratedig")
    }
}

impl fmt::Display for DigitizationParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GEM digitization:")?;
        writeln!(f, "  Gas parameters:")?;
        writeln!(f, "    Gas ion width: {}", self.ionization_energy.inner())?;
        writeln!(f, "    Gas diffusion: {}", self.diffusion)?;
        writeln!(
            f,
            "    Gas drift velocity: {}",
            self.drift_velocity.get::<millimeter_per_second>()
        )?;
        writeln!(f, "    Avalanche fiducial band: {}", self.fiducial_band)?;
        writeln!(f, "    Avalanche charge statistics: {}", self.gain_statistics)?;
        writeln!(f, "    Avalanche kernel: {:?}", self.kernel)?;
        writeln!(f, "  Electronics parameters:")?;
        let offsets = self
            .trigger_offsets
            .iter()
            .map(|o| o.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(f, "    Trigger offsets: {offsets}")?;
        writeln!(f, "    Trigger jitter: {}", self.trigger_jitter)?;
        writeln!(f, "    Sampling Period: {}", self.sampling_period.inner())?;
        writeln!(f, "    Sampling Points: {}", self.sampling_points)?;
        writeln!(f, "    Pulse Noise width: {}", self.pedestal_noise_sigma)?;
        writeln!(f, "    ADC offset: {}", self.adc.offset())?;
        writeln!(f, "    ADC gain: {}", self.adc.gain())?;
        writeln!(f, "    ADC bits: {}", self.adc.bits())?;
        writeln!(f, "    Gate width: {}", self.gate_width)?;
        writeln!(f, "  Pulse shaping parameters:")?;
        writeln!(f, "    Pulse shape tau0: {}", self.pulse_shape.tau0())?;
        write!(f, "    Pulse shape tau1: {}", self.pulse_shape.tau1())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::str::FromStr;

    pub(crate) const DATABASE: &str = "\
# gas
ratedig.gasionwidth = 26
ratedig.gasdiffusion = 4.1e4
ratedig.gasdriftvelocity = 5.5e7
ratedig.avalanchefiducialband = 10
ratedig.avalanchechargestatistics = 0
ratedig.gainmean = 8000
ratedig.gain0 = 20
ratedig.entrance_ref = 0
ratedig.zrout = 9.185
ratedig.avalateraluncertainty = 0.1
ratedig.max_ion = 200
# avalanche
ratedig.avalanche_range = 10
ratedig.ava_model = 2
ratedig.ava_gain = 20
ratedig.x_integral_step_per_pitch = 4
ratedig.y_integral_step_per_pitch = 4
# electronics
ratedig.triggeroffset = 0 0
ratedig.triggerjitter = 0
ratedig.elesamplingpoints = 10
ratedig.elesamplingperiod = 25
ratedig.pulsenoisesigma = 0
ratedig.adcoffset = 0
ratedig.adcgain = 10
ratedig.adcbits = 12
ratedig.gatewidth = 400
ratedig.pulseshapetau0 = 50
ratedig.pulseshapetau1 = 20
ratedig.do_crosstalk = 0
ratedig.crosstalk_mean = 0.1
ratedig.crosstalk_sigma = 0.01
ratedig.crosstalk_strip_apart = 32
";

    pub(crate) fn parameters() -> DigitizationParameters {
        DigitizationParameters::from_str(DATABASE).unwrap()
    }

    fn replace(key: &str, value: &str) -> String {
        DATABASE
            .lines()
            .map(|line| {
                if line.starts_with(&format!("ratedig.{key} ")) {
                    format!("ratedig.{key} = {value}")
                } else {
                    line.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn positive_new() {
        assert_eq!(Positive::new(2).map(Positive::into_inner), Some(2));
        assert!(Positive::new(0).is_none());
        assert!(Positive::new(-1.0).is_none());
        assert!(Positive::new(f64::NAN).is_none());
    }

    #[test]
    fn parameters_from_database() {
        let p = parameters();
        assert_eq!(*p.ionization_energy.inner(), 26.0);
        assert_eq!(p.kernel, AvalancheKernel::CauchyLorentz);
        assert_eq!(p.trigger_offsets, vec![0.0, 0.0]);
        assert_eq!(p.sampling_points, 10);
        assert_eq!(p.adc.bits(), 12);
        assert_eq!(p.max_hit_span, 50.0);
        assert_eq!(p.adc_saturation, 4000);
        assert_eq!(p.strip_selection, StripSelection::All);
        assert!(p.cross_talk.is_none());
        assert!(matches!(p.gain_statistics, GainStatistics::Furry { .. }));
    }

    #[test]
    fn parameters_missing_key() {
        let input = DATABASE
            .lines()
            .filter(|l| !l.starts_with("ratedig.gatewidth"))
            .collect::<Vec<_>>()
            .join("\n");
        let err = DigitizationParameters::from_str(&input).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(key) if key == "gatewidth"));
    }

    #[test]
    fn parameters_invalid_adc_bits() {
        for bits in ["0", "17", "2.5"] {
            let err = DigitizationParameters::from_str(&replace("adcbits", bits)).unwrap_err();
            assert!(matches!(err, ConfigError::AdcBits(_)));
        }
    }

    #[test]
    fn parameters_sampling_points_clamped() {
        let p = DigitizationParameters::from_str(&replace("elesamplingpoints", "40")).unwrap();
        assert_eq!(p.sampling_points, MAX_SAMPLES);
    }

    #[test]
    fn parameters_negative_band_is_absolute() {
        let p = DigitizationParameters::from_str(&replace("avalanchefiducialband", "-3")).unwrap();
        assert_eq!(p.fiducial_band, 3.0);
    }

    #[test]
    fn parameters_scalar_given_as_array() {
        let err = DigitizationParameters::from_str(&replace("gainmean", "1 2")).unwrap_err();
        assert!(matches!(err, ConfigError::NotScalar { found: 2, .. }));
    }

    #[test]
    fn parameters_unknown_models() {
        let err = DigitizationParameters::from_str(&replace("ava_model", "5")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "ava_model"));
        let err = DigitizationParameters::from_str(&replace("avalanchechargestatistics", "3"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn parameters_cross_talk() {
        let p = DigitizationParameters::from_str(&replace("do_crosstalk", "1")).unwrap();
        let ct = p.cross_talk.unwrap();
        assert_eq!(ct.strip_offset, 32);
        assert_eq!(ct.mean, 0.1);
    }

    #[test]
    fn parameters_display() {
        let text = parameters().to_string();
        assert!(text.starts_with("GEM digitization:"));
        assert!(text.contains("Trigger offsets: 0 0"));
        assert!(text.contains("ADC bits: 12"));
    }
}
