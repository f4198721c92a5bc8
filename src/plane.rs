use crate::avalanche::VirtualStrips;
use rand::Rng;
use rand_distr::StandardNormal;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitmask of the kinds of signal a strip has seen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StripType(u8);

impl StripType {
    pub const NONE: Self = Self(0);
    pub const PRIMARY: Self = Self(1);
    pub const SECONDARY: Self = Self(2);
    /// Cross-talk from another strip.
    pub const INDUCED: Self = Self(4);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for StripType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for StripType {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for StripType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capacitive coupling between strips `strip_offset` channels apart.
///
/// Each accumulated signal is copied to the strips on one side (chosen at
/// random) scaled by a factor drawn from `N(mean, sigma)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrossTalk {
    pub strip_offset: usize,
    pub mean: f64,
    pub sigma: f64,
}

/// Signals of all hits accumulated on the strips of one readout plane.
#[derive(Clone, Debug)]
pub struct DigitizedPlane {
    n_strips: usize,
    n_samples: usize,
    threshold: u32,
    cross_talk: Option<CrossTalk>,
    strip_type: Vec<StripType>,
    charge: Vec<f64>,
    time: Vec<f64>,
    total_adc: Vec<u32>,
    // [strip * n_samples + sample]
    adc: Vec<u32>,
    cluster_adc: Vec<Vec<u16>>,
    clusters: Vec<Vec<u32>>,
    weights: Vec<Vec<f64>>,
    over_threshold: Vec<usize>,
}

impl DigitizedPlane {
    pub fn new(
        n_strips: usize,
        n_samples: usize,
        threshold: u32,
        cross_talk: Option<CrossTalk>,
    ) -> Self {
        Self {
            n_strips,
            n_samples,
            threshold,
            cross_talk,
            strip_type: vec![StripType::NONE; n_strips],
            charge: vec![0.0; n_strips],
            time: vec![f64::INFINITY; n_strips],
            total_adc: vec![0; n_strips],
            adc: vec![0; n_strips * n_samples],
            cluster_adc: vec![Vec::new(); n_strips * n_samples],
            clusters: vec![Vec::new(); n_strips],
            weights: vec![Vec::new(); n_strips],
            over_threshold: Vec::new(),
        }
    }

    /// Reset every strip; the time of an empty strip is `+inf`.
    pub fn clear(&mut self) {
        self.strip_type.fill(StripType::NONE);
        self.charge.fill(0.0);
        self.time.fill(f64::INFINITY);
        self.total_adc.fill(0);
        self.adc.fill(0);
        self.cluster_adc.iter_mut().for_each(Vec::clear);
        self.clusters.iter_mut().for_each(Vec::clear);
        self.weights.iter_mut().for_each(Vec::clear);
        self.over_threshold.clear();
    }

    /// Add the signal of one hit.
    ///
    /// A strip is appended to the over-threshold list when its total ADC goes
    /// from `<= threshold` to `> threshold`.
    ///
    /// # Panics
    ///
    /// Panics if a strip index is `>= n_strips` or a strip does not carry
    /// `n_samples` samples.
    pub fn cumulate<R: Rng>(
        &mut self,
        strips: &VirtualStrips,
        strip_type: StripType,
        cluster_id: u32,
        rng: &mut R,
    ) {
        let cluster_total = strips.total_adc();

        for strip in strips.strips() {
            let idx = strip.index;
            assert!(
                idx < self.n_strips,
                "strip {idx} out of range (plane has {} strips)",
                self.n_strips
            );
            assert_eq!(strip.adc.len(), self.n_samples, "sample count mismatch");

            self.strip_type[idx] |= strip_type;
            self.time[idx] = self.time[idx].min(strips.time());
            self.charge[idx] += strip.charge;

            let was_below = self.total_adc[idx] <= self.threshold;
            let mut strip_sum = 0;
            for (k, &a) in strip.adc.iter().enumerate() {
                let i = idx * self.n_samples + k;
                self.cluster_adc[i].push(a);
                self.adc[i] += u32::from(a);
                strip_sum += u32::from(a);
            }
            self.total_adc[idx] += strip_sum;
            if was_below && self.total_adc[idx] > self.threshold {
                self.over_threshold.push(idx);
            }

            let weight = if cluster_total > 0 {
                f64::from(strip_sum) / cluster_total as f64
            } else {
                0.0
            };
            self.weights[idx].push(weight);
            self.clusters[idx].push(cluster_id);
        }

        if let Some(cross_talk) = self.cross_talk {
            self.induce(strips, &cross_talk, rng);
        }
    }

    fn induce<R: Rng>(&mut self, strips: &VirtualStrips, cross_talk: &CrossTalk, rng: &mut R) {
        let left = rng.random_bool(0.5);
        let noise: f64 = rng.sample(StandardNormal);
        let factor = cross_talk.mean + cross_talk.sigma * noise;
        if factor <= 0.0 {
            return;
        }

        for strip in strips.strips() {
            let target = if left {
                strip.index.checked_sub(cross_talk.strip_offset)
            } else {
                strip
                    .index
                    .checked_add(cross_talk.strip_offset)
                    .filter(|&t| t < self.n_strips)
            };
            let Some(idx) = target else {
                continue;
            };

            self.strip_type[idx] |= StripType::INDUCED;
            self.time[idx] = self.time[idx].min(strips.time());
            self.charge[idx] += factor * strip.charge;

            let was_below = self.total_adc[idx] <= self.threshold;
            for (k, &a) in strip.adc.iter().enumerate() {
                let induced = (f64::from(a) * factor) as u32;
                self.adc[idx * self.n_samples + k] += induced;
                self.total_adc[idx] += induced;
            }
            if was_below && self.total_adc[idx] > self.threshold {
                self.over_threshold.push(idx);
            }
        }
    }

    /// Set a new threshold and rebuild the over-threshold list. Returns the
    /// number of strips over threshold.
    pub fn threshold(&mut self, threshold: u32) -> usize {
        self.threshold = threshold;
        self.over_threshold = self
            .total_adc
            .iter()
            .enumerate()
            .filter(|(_, &adc)| adc > threshold)
            .map(|(i, _)| i)
            .collect();
        self.over_threshold.len()
    }

    pub fn current_threshold(&self) -> u32 {
        self.threshold
    }

    pub fn n_strips(&self) -> usize {
        self.n_strips
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn strip_type(&self, strip: usize) -> StripType {
        self.strip_type[strip]
    }

    pub fn charge(&self, strip: usize) -> f64 {
        self.charge[strip]
    }

    /// Earliest signal time on the strip, `+inf` if none.
    pub fn time(&self, strip: usize) -> f64 {
        self.time[strip]
    }

    pub fn total_adc(&self, strip: usize) -> u32 {
        self.total_adc[strip]
    }

    /// # Panics
    ///
    /// Panics if `strip >= n_strips` or `sample >= n_samples`.
    pub fn adc(&self, strip: usize, sample: usize) -> u32 {
        assert!(sample < self.n_samples, "sample {sample} out of range");
        self.adc[strip * self.n_samples + sample]
    }

    /// ADC of `sample` contributed by each cluster on the strip, in the order
    /// the clusters were accumulated. Induced signals are not listed.
    pub fn strip_cluster_adc(&self, strip: usize, sample: usize) -> &[u16] {
        assert!(strip < self.n_strips, "strip {strip} out of range");
        assert!(sample < self.n_samples, "sample {sample} out of range");
        &self.cluster_adc[strip * self.n_samples + sample]
    }

    pub fn strip_clusters(&self, strip: usize) -> &[u32] {
        &self.clusters[strip]
    }

    /// Fraction of each cluster's ADC collected on the strip, parallel to
    /// [`DigitizedPlane::strip_clusters`].
    pub fn strip_weights(&self, strip: usize) -> &[f64] {
        &self.weights[strip]
    }

    /// Strips over threshold, in the order they crossed it.
    pub fn over_threshold(&self) -> &[usize] {
        &self.over_threshold
    }

    pub fn n_over_threshold(&self) -> usize {
        self.over_threshold.len()
    }

    /// Has anything been accumulated since the last [`DigitizedPlane::clear`]?
    pub fn is_empty(&self) -> bool {
        self.strip_type.iter().all(|t| t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avalanche::VirtualStrip;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn virtual_strips(time: f64, strips: &[(usize, f64, [u16; 3])]) -> VirtualStrips {
        let mut v = VirtualStrips::new(time, 100.0);
        for &(index, charge, adc) in strips {
            v.push(VirtualStrip {
                index,
                charge,
                adc: adc.to_vec(),
            });
        }
        v
    }

    #[test]
    fn plane_cumulate() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut plane = DigitizedPlane::new(10, 3, 0, None);
        assert!(plane.is_empty());

        let a = virtual_strips(20.0, &[(3, 5.0, [1, 2, 3]), (4, 15.0, [3, 6, 9])]);
        let b = virtual_strips(10.0, &[(4, 1.0, [1, 0, 1])]);
        plane.cumulate(&a, StripType::PRIMARY, 1, &mut rng);
        plane.cumulate(&b, StripType::SECONDARY, 2, &mut rng);

        assert_eq!(plane.strip_type(3), StripType::PRIMARY);
        assert_eq!(plane.strip_type(4), StripType::PRIMARY | StripType::SECONDARY);
        assert!(plane.strip_type(5).is_empty());
        assert_eq!(plane.time(3), 20.0);
        assert_eq!(plane.time(4), 10.0);
        assert_eq!(plane.time(5), f64::INFINITY);
        assert_eq!(plane.charge(4), 16.0);
        assert_eq!(plane.adc(4, 0), 4);
        assert_eq!(plane.adc(4, 2), 10);
        assert_eq!(plane.total_adc(4), 20);
        assert_eq!(plane.strip_clusters(4), &[1, 2]);
        assert_eq!(plane.strip_weights(3), &[6.0 / 24.0]);
        assert_eq!(plane.strip_weights(4), &[18.0 / 24.0, 1.0]);
        assert_eq!(plane.strip_cluster_adc(4, 1), &[6, 0]);
        assert_eq!(plane.over_threshold(), &[3, 4]);
        assert!(!plane.is_empty());
    }

    #[test]
    fn plane_threshold_crossed_once() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut plane = DigitizedPlane::new(10, 3, 10, None);
        let v = virtual_strips(0.0, &[(7, 1.0, [1, 2, 2])]);

        plane.cumulate(&v, StripType::PRIMARY, 1, &mut rng);
        assert_eq!(plane.n_over_threshold(), 0);
        plane.cumulate(&v, StripType::PRIMARY, 2, &mut rng);
        // Exactly at threshold is not over.
        assert_eq!(plane.total_adc(7), 10);
        assert_eq!(plane.n_over_threshold(), 0);
        plane.cumulate(&v, StripType::PRIMARY, 3, &mut rng);
        assert_eq!(plane.over_threshold(), &[7]);
        plane.cumulate(&v, StripType::PRIMARY, 4, &mut rng);
        assert_eq!(plane.over_threshold(), &[7]);
    }

    #[test]
    fn plane_threshold_rescan() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut plane = DigitizedPlane::new(10, 3, 0, None);
        let v = virtual_strips(0.0, &[(1, 1.0, [1, 0, 0]), (2, 1.0, [5, 5, 5]), (3, 1.0, [2, 2, 2])]);
        plane.cumulate(&v, StripType::PRIMARY, 1, &mut rng);
        assert_eq!(plane.n_over_threshold(), 3);

        assert_eq!(plane.threshold(5), 2);
        assert_eq!(plane.over_threshold(), &[2, 3]);
        assert_eq!(plane.current_threshold(), 5);
        assert_eq!(plane.threshold(100), 0);
        assert_eq!(plane.threshold(0), 3);
    }

    #[test]
    fn plane_clear() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut plane = DigitizedPlane::new(10, 3, 0, None);
        let v = virtual_strips(5.0, &[(0, 1.0, [1, 1, 1]), (9, 2.0, [4, 0, 0])]);

        plane.cumulate(&v, StripType::PRIMARY, 1, &mut rng);
        let fresh = DigitizedPlane::new(10, 3, 0, None);
        plane.clear();
        assert!(plane.is_empty());
        for strip in 0..10 {
            assert_eq!(plane.time(strip), f64::INFINITY);
            assert_eq!(plane.total_adc(strip), fresh.total_adc(strip));
            assert!(plane.strip_clusters(strip).is_empty());
            assert!(plane.strip_weights(strip).is_empty());
            assert!(plane.strip_cluster_adc(strip, 0).is_empty());
        }
        assert_eq!(plane.n_over_threshold(), 0);
    }

    #[test]
    fn plane_zero_adc_cluster_weight() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut plane = DigitizedPlane::new(10, 3, 0, None);
        let v = virtual_strips(0.0, &[(2, 0.5, [0, 0, 0])]);
        plane.cumulate(&v, StripType::PRIMARY, 1, &mut rng);
        assert_eq!(plane.strip_weights(2), &[0.0]);
        assert_eq!(plane.n_over_threshold(), 0);
    }

    #[test]
    fn plane_cross_talk() {
        let cross_talk = CrossTalk {
            strip_offset: 32,
            mean: 0.5,
            sigma: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(5);
        let v = virtual_strips(12.0, &[(100, 8.0, [3, 10, 7])]);

        for _ in 0..20 {
            let mut plane = DigitizedPlane::new(200, 3, 0, Some(cross_talk));
            plane.cumulate(&v, StripType::PRIMARY, 1, &mut rng);
            let induced = if plane.strip_type(68).is_empty() { 132 } else { 68 };

            assert_eq!(plane.strip_type(induced), StripType::INDUCED);
            assert!(plane.strip_type(200 - induced).is_empty());
            assert_eq!(plane.time(induced), 12.0);
            assert_eq!(plane.charge(induced), 4.0);
            assert_eq!(plane.adc(induced, 0), 1);
            assert_eq!(plane.adc(induced, 1), 5);
            assert_eq!(plane.adc(induced, 2), 3);
            assert!(plane.strip_clusters(induced).is_empty());
            assert_eq!(plane.over_threshold(), &[100, induced]);
        }
    }

    #[test]
    fn plane_cross_talk_out_of_range() {
        let cross_talk = CrossTalk {
            strip_offset: 32,
            mean: 0.5,
            sigma: 0.1,
        };
        let mut rng = StdRng::seed_from_u64(6);
        let v = virtual_strips(0.0, &[(5, 8.0, [3, 10, 7])]);

        for _ in 0..20 {
            let mut plane = DigitizedPlane::new(30, 3, 0, Some(cross_talk));
            plane.cumulate(&v, StripType::PRIMARY, 1, &mut rng);
            for strip in (0..30).filter(|&s| s != 5) {
                assert!(plane.strip_type(strip).is_empty());
                assert_eq!(plane.total_adc(strip), 0);
            }
        }
    }

    #[test]
    fn plane_cross_talk_suppressed() {
        let cross_talk = CrossTalk {
            strip_offset: 2,
            mean: -1.0,
            sigma: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let mut plane = DigitizedPlane::new(10, 3, 0, Some(cross_talk));
        plane.cumulate(&virtual_strips(0.0, &[(5, 8.0, [3, 10, 7])]), StripType::PRIMARY, 1, &mut rng);
        assert_eq!(plane.over_threshold(), &[5]);
        assert!(plane.strip_type(3).is_empty());
        assert!(plane.strip_type(7).is_empty());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn plane_strip_out_of_range() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut plane = DigitizedPlane::new(10, 3, 0, None);
        plane.cumulate(&virtual_strips(0.0, &[(10, 1.0, [1, 1, 1])]), StripType::PRIMARY, 1, &mut rng);
    }

    #[test]
    fn strip_type_bits() {
        let t = StripType::PRIMARY | StripType::INDUCED;
        assert_eq!(t.bits(), 5);
        assert!(t.contains(StripType::INDUCED));
        assert!(!t.contains(StripType::SECONDARY));
        assert_eq!(StripType::from_bits(5), t);
        assert_eq!(t.to_string(), "5");
    }
}
