use crate::avalanche::{AvalancheModel, VirtualStrips};
use crate::config::{ConfigError, DigitizationParameters, StripSelection};
use crate::event::{ClusterProjection, DigiStrip, GemCluster, SimEvent};
use crate::hit::{HitSegment, ParticleType, SimHitData};
use crate::ion::IonModel;
use crate::plane::{DigitizedPlane, StripType};
use crate::readout::{Chamber, Geometry, StripPlane};
use bon::bon;
use nalgebra::Point3;
use rand::Rng;
use rand_distr::StandardNormal;
use std::fmt;

/// Charge spreading over the strips and signal digitization.
pub mod avalanche;
/// Digitization parameters.
pub mod config;
/// Plain-text parameter database.
pub mod database;
/// Pulse shaping and ADC.
pub mod electronics;
/// Truth and strip records of an event.
pub mod event;
/// Detector box placement and frame transforms.
pub mod geometry;
/// Simulated hits, the input of the digitization.
pub mod hit;
/// Primary ionization along a hit.
pub mod ion;
/// Per-plane strip signal accumulator.
pub mod plane;
/// Readout geometry: strip planes, chambers and the spectrometer.
pub mod readout;

/// What happened to the hits of one digitization pass.
///
/// Hits that are skipped are not errors; they just do not contribute any
/// signal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Hits recorded in the event (with or without strip signal).
    pub recorded: usize,
    /// Hits in a chamber the geometry does not know about.
    pub bad_chamber: usize,
    /// Hits whose entry and exit are too far apart.
    pub too_long: usize,
    /// Hits that produced no ion.
    pub no_ions: usize,
    /// Readout planes that the avalanche of a hit missed.
    pub rejected_planes: usize,
}

/// Digitizes the hits of the chambers of a [`Geometry`].
///
/// Per event: [`Digitizer::digitize`] the signal, then
/// [`Digitizer::additive_digitize`] every background sample on top of it,
/// then read the accumulated planes or [`Digitizer::finish_event`].
pub struct Digitizer<'g, G, R> {
    parameters: DigitizationParameters,
    geometry: &'g G,
    ion_model: IonModel,
    avalanche: AvalancheModel,
    // [chamber][plane]
    planes: Vec<Vec<DigitizedPlane>>,
    event: SimEvent,
    rng: R,
    strips_filled: bool,
}

#[bon]
impl<'g, G: Geometry, R: Rng> Digitizer<'g, G, R> {
    /// Fails if the random distributions cannot be built from `parameters`
    /// or if the trigger offset table does not cover every chamber layer.
    #[builder]
    pub fn new(
        parameters: DigitizationParameters,
        geometry: &'g G,
        rng: R,
    ) -> Result<Self, ConfigError> {
        let n_layers = geometry.n_layers();
        if parameters.trigger_offsets.len() < n_layers {
            return Err(ConfigError::TriggerOffsets {
                expected: n_layers,
                found: parameters.trigger_offsets.len(),
            });
        }

        let planes: Vec<Vec<DigitizedPlane>> = geometry
            .chambers()
            .iter()
            .map(|chamber| {
                chamber
                    .planes()
                    .iter()
                    .map(|plane| {
                        DigitizedPlane::new(
                            plane.n_strips(),
                            parameters.sampling_points,
                            0,
                            parameters.cross_talk,
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        Ok(Self {
            ion_model: IonModel::new(&parameters)?,
            avalanche: AvalancheModel::new(&parameters),
            parameters,
            geometry,
            planes,
            event: SimEvent::default(),
            rng,
            strips_filled: false,
        })
    }
}

impl<'g, G: Geometry, R: Rng> Digitizer<'g, G, R> {
    pub fn parameters(&self) -> &DigitizationParameters {
        &self.parameters
    }

    pub fn geometry(&self) -> &'g G {
        self.geometry
    }

    pub fn n_chambers(&self) -> usize {
        self.planes.len()
    }

    /// # Panics
    ///
    /// Panics if `chamber` is out of range.
    pub fn planes(&self, chamber: usize) -> &[DigitizedPlane] {
        &self.planes[chamber]
    }

    /// # Panics
    ///
    /// Panics if `chamber` or `plane` is out of range.
    pub fn plane(&self, chamber: usize, plane: usize) -> &DigitizedPlane {
        &self.planes[chamber][plane]
    }

    /// The event records as of the last pass. Strip records are only
    /// up to date after [`Digitizer::finish_event`].
    pub fn event(&self) -> &SimEvent {
        &self.event
    }

    pub fn rng_mut(&mut self) -> &mut R {
        &mut self.rng
    }

    /// Apply a new threshold to every plane.
    pub fn set_threshold(&mut self, threshold: u32) {
        for plane in self.planes.iter_mut().flatten() {
            plane.threshold(threshold);
        }
        self.strips_filled = false;
    }

    /// Forget all accumulated signals and records.
    pub fn clear(&mut self) {
        self.event.clear();
        for plane in self.planes.iter_mut().flatten() {
            plane.clear();
        }
        self.strips_filled = false;
    }

    /// Digitize a fresh event.
    pub fn digitize(&mut self, data: &SimHitData) -> PassSummary {
        self.clear();
        self.event.run = data.run;
        self.event.event = data.event;
        self.event.weight = data.weight;
        self.additive_digitize(data)
    }

    /// Digitize `data` on top of whatever is already accumulated.
    ///
    /// Signal hits (source 0) keep their time; background hits are given a
    /// random time within the gate. The trigger jitter is drawn once per
    /// call.
    pub fn additive_digitize(&mut self, data: &SimHitData) -> PassSummary {
        let mut summary = PassSummary::default();
        if data.hits.is_empty() {
            return summary;
        }

        let jitter = if self.parameters.trigger_jitter > 0.0 {
            let z: f64 = self.rng.sample(StandardNormal);
            self.parameters.trigger_jitter * z
        } else {
            0.0
        };
        let period = *self.parameters.sampling_period.inner();
        let background_window = (-self.parameters.gate_width + 2.0 * period)..(8.0 * period);
        let geometry = self.geometry;

        for hit in &data.hits {
            let Some(chamber) = geometry.chambers().get(hit.chamber) else {
                log::warn!(
                    "hit in chamber {} out of range ({} chambers), skipped",
                    hit.chamber,
                    self.planes.len()
                );
                summary.bad_chamber += 1;
                continue;
            };

            let span = hit.exit - hit.entry;
            if span.x.abs() > self.parameters.max_hit_span
                || span.y.abs() > self.parameters.max_hit_span
            {
                log::debug!(
                    "hit in chamber {} spans ({}, {}) mm, skipped",
                    hit.chamber,
                    span.x,
                    span.y
                );
                summary.too_long += 1;
                continue;
            }

            let ionization = self
                .ion_model
                .generate(&hit.entry, &hit.exit, hit.energy, &mut self.rng);

            let event_time = if data.is_background() {
                self.rng.random_range(background_window.clone())
            } else {
                hit.time
            };
            let t0 = event_time - self.parameters.trigger_offsets[chamber.layer()]
                + ionization.drift_time()
                - jitter;

            let virtual_planes = if ionization.is_empty() {
                summary.no_ions += 1;
                Vec::new()
            } else {
                self.avalanche
                    .spread(chamber, ionization, &hit.entry, &hit.exit, t0)
            };

            let id = self
                .event
                .push_cluster(cluster_record(hit, data.source, chamber, &virtual_planes, t0));
            summary.recorded += 1;

            let strip_type = match hit.particle_type {
                ParticleType::Primary => StripType::PRIMARY,
                ParticleType::Secondary => StripType::SECONDARY,
            };
            for (plane, strips) in self.planes[hit.chamber].iter_mut().zip(&virtual_planes) {
                match strips {
                    Some(strips) => plane.cumulate(strips, strip_type, id, &mut self.rng),
                    None => summary.rejected_planes += 1,
                }
            }
        }

        self.strips_filled = false;
        summary
    }

    /// Record the hits without simulating any signal; every strip record is
    /// empty apart from pedestal noise.
    pub fn no_digitize(&mut self, data: &SimHitData) -> PassSummary {
        self.clear();
        self.event.run = data.run;
        self.event.event = data.event;
        self.event.weight = data.weight;

        let mut summary = PassSummary::default();
        let geometry = self.geometry;
        for hit in &data.hits {
            let Some(chamber) = geometry.chambers().get(hit.chamber) else {
                summary.bad_chamber += 1;
                continue;
            };
            self.event
                .push_cluster(cluster_record(hit, data.source, chamber, &[], 0.0));
            summary.recorded += 1;
        }

        self.fill_strips();
        summary
    }

    /// Rebuild the strip records of the event from the planes, adding
    /// pedestal noise.
    pub fn fill_strips(&mut self) {
        self.event.strips.clear();
        let sigma = self.parameters.pedestal_noise_sigma;
        let saturation = f64::from(self.parameters.adc_saturation);

        for (ic, (chamber, planes)) in self
            .geometry
            .chambers()
            .iter()
            .zip(&self.planes)
            .enumerate()
        {
            for (ip, plane) in planes.iter().enumerate() {
                let selected: Vec<usize> = match self.parameters.strip_selection {
                    StripSelection::All => (0..plane.n_strips()).collect(),
                    StripSelection::OverThreshold => plane.over_threshold().to_vec(),
                };
                for strip in selected {
                    let samples = (0..plane.n_samples())
                        .map(|s| {
                            let z: f64 = self.rng.sample(StandardNormal);
                            let adc = f64::from(plane.adc(strip, s)) + sigma * z;
                            adc.round().clamp(0.0, saturation) as u32
                        })
                        .collect();
                    self.event.strips.push(DigiStrip {
                        chamber: ic,
                        layer: chamber.layer(),
                        plane: ip,
                        strip,
                        strip_type: plane.strip_type(strip),
                        charge: plane.charge(strip),
                        time: plane.time(strip),
                        samples,
                        cluster_adc: (0..plane.n_samples())
                            .map(|s| plane.strip_cluster_adc(strip, s).to_vec())
                            .collect(),
                        clusters: plane.strip_clusters(strip).to_vec(),
                        weights: plane.strip_weights(strip).to_vec(),
                    });
                }
            }
        }

        self.strips_filled = true;
    }

    /// The complete event, filling the strip records if the planes changed
    /// since they were last filled.
    pub fn finish_event(&mut self) -> &SimEvent {
        if !self.strips_filled {
            self.fill_strips();
        }
        &self.event
    }

    /// Table of type, charge and time of every strip with signal.
    pub fn charges(&self) -> ChargeTable<'_> {
        ChargeTable {
            planes: &self.planes,
        }
    }

    /// Table of the ADC samples of every strip with signal.
    pub fn samples(&self) -> SampleTable<'_> {
        SampleTable {
            planes: &self.planes,
        }
    }
}

fn cluster_record<C: Chamber>(
    hit: &HitSegment,
    source: u32,
    chamber: &C,
    virtual_planes: &[Option<VirtualStrips>],
    t0: f64,
) -> GemCluster {
    let position = hit.midpoint();
    let detector_box = chamber.detector_box();

    let projections = chamber
        .planes()
        .iter()
        .enumerate()
        .map(|(i, plane)| {
            let strips = virtual_planes.get(i).and_then(Option::as_ref);
            ClusterProjection {
                size: strips.map_or(0, VirtualStrips::len),
                start: strips.and_then(|s| s.strips().first()).map(|s| s.index),
                position: plane.plane_to_strip(position.x, position.y).0,
            }
        })
        .collect();

    GemCluster {
        id: 0,
        chamber: hit.chamber,
        layer: chamber.layer(),
        source,
        particle_type: hit.particle_type,
        track_id: hit.track_id,
        pdg_id: hit.pdg_id,
        momentum: detector_box.spec_to_lab_vector(hit.momentum),
        entry: hit.entry,
        position,
        spec_position: detector_box.box_to_spec(Point3::from(position)),
        energy: hit.energy,
        time_offset: t0,
        projections,
        vertex: hit.vertex,
    }
}

fn signal_strips(plane: &DigitizedPlane) -> impl Iterator<Item = usize> + '_ {
    (0..plane.n_strips()).filter(|&s| !plane.strip_type(s).is_empty())
}

/// See [`Digitizer::charges`].
pub struct ChargeTable<'a> {
    planes: &'a [Vec<DigitizedPlane>],
}

impl fmt::Display for ChargeTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (ic, planes) in self.planes.iter().enumerate() {
            for (ip, plane) in planes.iter().enumerate() {
                writeln!(f, "Chamber {ic} plane {ip}:")?;
                for s in signal_strips(plane) {
                    writeln!(
                        f,
                        "  strip {s:5} type {} charge {:12.1} time {:8.2}",
                        plane.strip_type(s),
                        plane.charge(s),
                        plane.time(s)
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// See [`Digitizer::samples`].
pub struct SampleTable<'a> {
    planes: &'a [Vec<DigitizedPlane>],
}

impl fmt::Display for SampleTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (ic, planes) in self.planes.iter().enumerate() {
            for (ip, plane) in planes.iter().enumerate() {
                writeln!(f, "Chamber {ic} plane {ip}:")?;
                for s in signal_strips(plane) {
                    write!(f, "  strip {s:5}:")?;
                    for k in 0..plane.n_samples() {
                        write!(f, " {:5}", plane.adc(s, k))?;
                    }
                    writeln!(f)?;
                }
            }
        }
        Ok(())
    }
}
