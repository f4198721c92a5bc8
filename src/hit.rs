use nalgebra::Vector3;

/// Origin of the particle that produced a hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParticleType {
    /// The particle from the event generator.
    Primary,
    /// Anything produced in the shower/transport.
    Secondary,
}

/// One energy deposit crossing the drift gas of a chamber.
///
/// Positions are in the chamber frame (mm), energy in eV, time in ns,
/// momentum in MeV.
#[derive(Clone, Debug, PartialEq)]
pub struct HitSegment {
    /// Index into the geometry's chambers; the chamber also fixes the
    /// tracking layer.
    pub chamber: usize,
    pub particle_type: ParticleType,
    pub track_id: i32,
    pub pdg_id: i32,
    pub entry: Vector3<f64>,
    pub exit: Vector3<f64>,
    pub energy: f64,
    pub time: f64,
    pub vertex: Vector3<f64>,
    pub momentum: Vector3<f64>,
}

impl HitSegment {
    /// A primary hit with no truth information beyond its geometry.
    pub fn new(chamber: usize, entry: Vector3<f64>, exit: Vector3<f64>, energy: f64) -> Self {
        Self {
            chamber,
            particle_type: ParticleType::Primary,
            track_id: 1,
            pdg_id: 0,
            entry,
            exit,
            energy,
            time: 0.0,
            vertex: Vector3::zeros(),
            momentum: Vector3::zeros(),
        }
    }

    /// Center of the ionization segment; the best estimate of the true
    /// hit position.
    pub fn midpoint(&self) -> Vector3<f64> {
        (self.entry + self.exit) * 0.5
    }
}

/// All hits of one event from one input file.
///
/// `source` is 0 for the signal file and > 0 for background files.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimHitData {
    pub run: i32,
    pub event: i32,
    /// Generator weight of the event, copied to the event record.
    pub weight: f64,
    pub source: u32,
    pub hits: Vec<HitSegment>,
}

impl SimHitData {
    pub fn new(source: u32) -> Self {
        Self {
            source,
            ..Self::default()
        }
    }

    pub fn is_background(&self) -> bool {
        self.source != 0
    }

    pub fn n_hits(&self) -> usize {
        self.hits.len()
    }

    pub fn push(&mut self, hit: HitSegment) {
        self.hits.push(hit);
    }
}

impl FromIterator<HitSegment> for SimHitData {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = HitSegment>,
    {
        Self {
            hits: iter.into_iter().collect(),
            ..Self::default()
        }
    }
}
