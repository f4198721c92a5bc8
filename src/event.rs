use crate::hit::ParticleType;
use crate::plane::StripType;
use nalgebra::{Point3, Vector3};
use std::fmt;

/// Where a hit landed on one readout plane.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ClusterProjection {
    /// Number of strips with signal.
    pub size: usize,
    /// First strip with signal.
    pub start: Option<usize>,
    /// Hit position across the strips (strip frame, mm).
    pub position: f64,
}

/// Truth record of one processed hit.
#[derive(Clone, Debug, PartialEq)]
pub struct GemCluster {
    /// 1-based, in processing order within the event.
    pub id: u32,
    pub chamber: usize,
    pub layer: usize,
    /// 0 for signal, > 0 for background.
    pub source: u32,
    pub particle_type: ParticleType,
    pub track_id: i32,
    pub pdg_id: i32,
    /// Lab frame, MeV.
    pub momentum: Vector3<f64>,
    /// Chamber frame, mm.
    pub entry: Vector3<f64>,
    /// Center of the ionization segment, chamber frame.
    pub position: Vector3<f64>,
    /// Same point in the spectrometer frame.
    pub spec_position: Point3<f64>,
    /// Deposited energy (eV).
    pub energy: f64,
    /// Signal start time relative to the first sample (ns).
    pub time_offset: f64,
    /// One per readout plane of the chamber.
    pub projections: Vec<ClusterProjection>,
    pub vertex: Vector3<f64>,
}

impl GemCluster {
    pub fn is_signal(&self) -> bool {
        self.source == 0 && self.particle_type == ParticleType::Primary
    }
}

/// Digitized output of one strip.
#[derive(Clone, Debug, PartialEq)]
pub struct DigiStrip {
    pub chamber: usize,
    pub layer: usize,
    pub plane: usize,
    pub strip: usize,
    pub strip_type: StripType,
    pub charge: f64,
    pub time: f64,
    /// ADC samples including pedestal noise, within `[0, saturation]`.
    pub samples: Vec<u32>,
    /// Per sample, the ADC of each contributing cluster.
    pub cluster_adc: Vec<Vec<u16>>,
    pub clusters: Vec<u32>,
    pub weights: Vec<f64>,
}

/// Records of one event, refilled by every digitization pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimEvent {
    pub run: i32,
    pub event: i32,
    pub weight: f64,
    /// Number of primary hits from the signal source.
    pub n_signal: u32,
    pub clusters: Vec<GemCluster>,
    pub strips: Vec<DigiStrip>,
}

impl SimEvent {
    pub fn clear(&mut self) {
        self.run = 0;
        self.event = 0;
        self.weight = 0.0;
        self.n_signal = 0;
        self.clusters.clear();
        self.strips.clear();
    }

    /// Append a cluster record, assigning its id. Returns the id.
    pub fn push_cluster(&mut self, mut cluster: GemCluster) -> u32 {
        // Event sizes stay far below u32::MAX.
        cluster.id = self.clusters.len() as u32 + 1;
        if cluster.is_signal() {
            self.n_signal += 1;
        }
        let id = cluster.id;
        self.clusters.push(cluster);
        id
    }
}

impl fmt::Display for SimEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Event {}/{} (weight {}):", self.run, self.event, self.weight)?;
        writeln!(
            f,
            "  {} clusters ({} signal), {} strips",
            self.clusters.len(),
            self.n_signal,
            self.strips.len()
        )?;
        for c in &self.clusters {
            let sizes = c
                .projections
                .iter()
                .map(|p| p.size.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(
                f,
                "  cluster {}: chamber {} source {} track {} energy {:.1} eV t0 {:.2} ns strips [{sizes}]",
                c.id, c.chamber, c.source, c.track_id, c.energy, c.time_offset
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(source: u32, particle_type: ParticleType) -> GemCluster {
        GemCluster {
            id: 0,
            chamber: 1,
            layer: 1,
            source,
            particle_type,
            track_id: 1,
            pdg_id: 11,
            momentum: Vector3::new(0.0, 0.0, 1000.0),
            entry: Vector3::zeros(),
            position: Vector3::new(0.0, 0.0, 1.5),
            spec_position: Point3::new(0.0, 0.0, 1001.5),
            energy: 1000.0,
            time_offset: 150.0,
            projections: vec![ClusterProjection::default(); 2],
            vertex: Vector3::zeros(),
        }
    }

    #[test]
    fn event_cluster_ids() {
        let mut event = SimEvent::default();
        assert_eq!(event.push_cluster(cluster(0, ParticleType::Primary)), 1);
        assert_eq!(event.push_cluster(cluster(0, ParticleType::Secondary)), 2);
        assert_eq!(event.push_cluster(cluster(2, ParticleType::Primary)), 3);
        assert_eq!(event.n_signal, 1);
        assert_eq!(event.clusters[2].id, 3);

        event.clear();
        assert!(event.clusters.is_empty());
        assert_eq!(event.n_signal, 0);
        assert_eq!(event.push_cluster(cluster(0, ParticleType::Primary)), 1);
    }

    #[test]
    fn event_display() {
        let mut event = SimEvent {
            run: 3,
            event: 42,
            ..SimEvent::default()
        };
        event.push_cluster(cluster(0, ParticleType::Primary));
        let text = event.to_string();
        assert!(text.starts_with("Event 3/42"));
        assert!(text.contains("1 clusters (1 signal), 0 strips"));
        assert!(text.contains("cluster 1: chamber 1 source 0"));
    }
}
