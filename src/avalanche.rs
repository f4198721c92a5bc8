use crate::config::DigitizationParameters;
use crate::electronics::{AdcConverter, PulseShape};
use crate::ion::{IonPoint, Ionization};
use crate::readout::{Chamber, StripPlane};
use nalgebra::Vector3;
use std::f64::consts::PI;

/// Radial charge density deposited around each ion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AvalancheKernel {
    /// Flat density inside the integration radius.
    Heaviside,
    Gaussian,
    CauchyLorentz,
}

impl AvalancheKernel {
    /// Database code: 0 step, 1 Gaussian, 2 Cauchy-Lorentz.
    pub fn from_code(code: f64) -> Option<Self> {
        match code {
            c if c == 0.0 => Some(AvalancheKernel::Heaviside),
            c if c == 1.0 => Some(AvalancheKernel::Gaussian),
            c if c == 2.0 => Some(AvalancheKernel::CauchyLorentz),
            _ => None,
        }
    }
}

/// Signal induced by one hit on one strip.
#[derive(Clone, Debug, PartialEq)]
pub struct VirtualStrip {
    pub index: usize,
    pub charge: f64,
    /// One code per electronics sample.
    pub adc: Vec<u16>,
}

impl VirtualStrip {
    pub fn total_adc(&self) -> u32 {
        self.adc.iter().map(|&a| u32::from(a)).sum()
    }
}

/// Strips with a non-zero signal from one hit on one readout plane, in
/// increasing strip order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VirtualStrips {
    time: f64,
    hit_charge: f64,
    strips: Vec<VirtualStrip>,
}

impl VirtualStrips {
    pub fn new(time: f64, hit_charge: f64) -> Self {
        Self {
            time,
            hit_charge,
            strips: Vec::new(),
        }
    }

    pub fn push(&mut self, strip: VirtualStrip) {
        self.strips.push(strip);
    }

    /// Time offset of the hit (ns).
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Total ionization charge of the hit.
    pub fn hit_charge(&self) -> f64 {
        self.hit_charge
    }

    pub fn strips(&self) -> &[VirtualStrip] {
        &self.strips
    }

    pub fn len(&self) -> usize {
        self.strips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strips.is_empty()
    }

    pub fn total_adc(&self) -> u64 {
        self.strips.iter().map(|s| u64::from(s.total_adc())).sum()
    }

    pub fn total_charge(&self) -> f64 {
        self.strips.iter().map(|s| s.charge).sum()
    }
}

// Integration grid in the strip frame. Cell (jx, jy) is at `jx * ny + jy`.
#[derive(Clone, Copy, Debug)]
struct GridLayout {
    xl: f64,
    yb: f64,
    xbw: f64,
    ybw: f64,
    nx: usize,
    ny: usize,
}

fn bin_range(center: f64, half_width: f64, n: usize) -> (usize, usize) {
    let first = (center - half_width).max(0.0);
    let last = (center + half_width + 1.0).min(n as f64);
    if last <= first {
        (0, 0)
    } else {
        (first as usize, last as usize)
    }
}

/// Add each ion's density to the cells whose center lies within the ion's
/// integration radius. `density(ion, d2)` is evaluated at squared distance
/// `d2` from the ion.
fn fill_grid<P, F>(
    grid: &mut [f64],
    layout: &GridLayout,
    plane: &P,
    ions: &[IonPoint],
    density: F,
) where
    P: StripPlane,
    F: Fn(&IonPoint, f64) -> f64,
{
    for ion in ions {
        if !(ion.r2 > 0.0) {
            continue;
        }
        let (xs, ys) = plane.plane_to_strip(ion.x, ion.y);
        let ix = ((xs - layout.xl) / layout.xbw).floor();
        let iy = ((ys - layout.yb) / layout.ybw).floor();
        let dx = (ion.snorm / layout.xbw).floor() + 1.0;
        let dy = (ion.snorm / layout.ybw).floor() + 1.0;
        let (x_first, x_last) = bin_range(ix, dx, layout.nx);
        let (y_first, y_last) = bin_range(iy, dy, layout.ny);

        for jx in x_first..x_last {
            let xc = layout.xl + (jx as f64 + 0.5) * layout.xbw;
            let xd2 = (xs - xc).powi(2);
            let column = &mut grid[jx * layout.ny..(jx + 1) * layout.ny];
            for jy in y_first..y_last {
                let yc = layout.yb + (jy as f64 + 0.5) * layout.ybw;
                let d2 = xd2 + (ys - yc).powi(2);
                if d2 <= ion.r2 {
                    column[jy] += density(ion, d2);
                }
            }
        }
    }
}

/// Spreads the ionization of a hit over the strips of every readout plane
/// of a chamber and digitizes the resulting strip signals.
#[derive(Clone, Debug)]
pub struct AvalancheModel {
    fiducial_band: f64,
    n_sigma: f64,
    gain: f64,
    kernel: AvalancheKernel,
    x_steps: usize,
    y_steps: usize,
    sampling_points: usize,
    sampling_period: f64,
    pulse_shape: PulseShape,
    adc: AdcConverter,
    // Reused between hits.
    grid: Vec<f64>,
}

impl AvalancheModel {
    pub fn new(params: &DigitizationParameters) -> Self {
        Self {
            fiducial_band: params.fiducial_band,
            n_sigma: *params.avalanche_range.inner(),
            gain: params.avalanche_gain,
            kernel: params.kernel,
            x_steps: *params.x_steps_per_pitch.inner() as usize,
            y_steps: *params.y_steps_per_pitch.inner() as usize,
            sampling_points: params.sampling_points,
            sampling_period: *params.sampling_period.inner(),
            pulse_shape: params.pulse_shape,
            adc: params.adc,
            grid: Vec::new(),
        }
    }

    pub fn kernel(&self) -> AvalancheKernel {
        self.kernel
    }

    /// Spread `ionization` (the ions of the segment `entry`..`exit`, chamber
    /// frame in mm) over the planes of `chamber`, with the signals starting
    /// `t0` ns after the first sample.
    ///
    /// Returns one entry per plane, in plane order. A plane is `None` when the
    /// avalanche region misses all of its strips; every plane is `None` when
    /// the region misses the chamber window altogether.
    pub fn spread<C: Chamber>(
        &mut self,
        chamber: &C,
        ionization: &Ionization,
        entry: &Vector3<f64>,
        exit: &Vector3<f64>,
        t0: f64,
    ) -> Vec<Option<VirtualStrips>> {
        let planes = chamber.planes();
        let rejected = || -> Vec<Option<VirtualStrips>> { planes.iter().map(|_| None).collect() };
        if ionization.is_empty() {
            return rejected();
        }

        let band = self.fiducial_band * ionization.max_sigma();
        let mut x0 = entry.x.min(exit.x) - band;
        let mut x1 = entry.x.max(exit.x) + band;
        let mut y0 = entry.y.min(exit.y) - band;
        let mut y1 = entry.y.max(exit.y) + band;

        let half_width = chamber.detector_box().width() / 2.0;
        let half_height = chamber.detector_box().height() / 2.0;
        if x1 < -half_width || x0 > half_width || y1 < -half_height || y0 > half_height {
            log::debug!(
                "avalanche region ({x0}, {y0})-({x1}, {y1}) outside chamber window \
                 {half_width} x {half_height}"
            );
            return rejected();
        }
        x0 = x0.max(-half_width);
        x1 = x1.min(half_width);
        y0 = y0.max(-half_height);
        y1 = y1.min(half_height);

        planes
            .iter()
            .map(|plane| self.spread_plane(plane, ionization, [x0, y0, x1, y1], t0))
            .collect()
    }

    fn spread_plane<P: StripPlane>(
        &mut self,
        plane: &P,
        ionization: &Ionization,
        [x0, y0, x1, y1]: [f64; 4],
        t0: f64,
    ) -> Option<VirtualStrips> {
        let n_strips = plane.n_strips();
        if n_strips == 0 {
            return None;
        }

        // Region corners in the strip frame.
        let (mut xs_min, mut xs_max) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut ys_min, mut ys_max) = (f64::INFINITY, f64::NEG_INFINITY);
        for (x, y) in [(x0, y0), (x1, y0), (x0, y1), (x1, y1)] {
            let (xs, ys) = plane.plane_to_strip(x, y);
            xs_min = xs_min.min(xs);
            xs_max = xs_max.max(xs);
            ys_min = ys_min.min(ys);
            ys_max = ys_max.max(ys);
        }
        if xs_max < plane.strip_lower_edge(0) || xs_min >= plane.strip_upper_edge(n_strips - 1) {
            return None;
        }
        let first = plane.strip_in_range(xs_min);
        let last = plane.strip_in_range(xs_max);
        let strips = last - first + 1;

        let yq = plane.pitch() / self.y_steps as f64;
        let yb = yq * (ys_min / yq).floor();
        let mut yt = yq * (ys_max / yq).ceil();
        if yt <= yb {
            yt = yb + yq;
        }
        let nx = strips * self.x_steps;
        let ny = (((yt - yb) / yq).round() as usize).max(1);
        let xl = plane.strip_lower_edge(first);
        let xr = plane.strip_upper_edge(last);
        let layout = GridLayout {
            xl,
            yb,
            xbw: (xr - xl) / nx as f64,
            ybw: (yt - yb) / ny as f64,
            nx,
            ny,
        };

        self.grid.clear();
        self.grid.resize(nx * ny, 0.0);

        let ions = ionization.ions();
        let gain = self.gain;
        let n_sigma2 = self.n_sigma * self.n_sigma;
        match self.kernel {
            AvalancheKernel::Heaviside => {
                fill_grid(&mut self.grid, &layout, plane, ions, |ion, _| ion.ggnorm)
            }
            AvalancheKernel::Gaussian => {
                fill_grid(&mut self.grid, &layout, plane, ions, |ion, d2| {
                    let sigma2 = ion.r2 / n_sigma2;
                    gain * ion.ggnorm * (-d2 / (2.0 * sigma2)).exp()
                })
            }
            AvalancheKernel::CauchyLorentz => {
                fill_grid(&mut self.grid, &layout, plane, ions, |ion, d2| {
                    let sigma2 = ion.r2 / n_sigma2;
                    gain * ion.ggnorm * sigma2.sqrt() / PI / (d2 + sigma2)
                })
            }
        }

        let area = layout.xbw * layout.ybw;
        let cells_per_strip = self.x_steps * ny;
        let mut virtual_strips = VirtualStrips::new(t0, ionization.total_charge());
        for (j, cells) in self.grid.chunks_exact(cells_per_strip).enumerate() {
            let charge = cells.iter().sum::<f64>() * area;
            let adc: Vec<u16> = (0..self.sampling_points)
                .map(|b| {
                    let t = self.sampling_period * b as f64 - t0;
                    self.adc.convert(self.pulse_shape.amplitude(t, charge))
                })
                .collect();
            if adc.iter().any(|&a| a > 0) {
                virtual_strips.push(VirtualStrip {
                    index: first + j,
                    charge,
                    adc,
                });
            }
        }

        Some(virtual_strips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::parameters;
    use crate::geometry::DetectorBox;
    use crate::ion::IonModel;
    use crate::readout::tests::chamber;
    use crate::readout::{GemChamber, GemPlane};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::f64::consts::FRAC_PI_2;

    fn ionize(
        params: &DigitizationParameters,
        entry: &Vector3<f64>,
        exit: &Vector3<f64>,
        seed: u64,
    ) -> Ionization {
        let mut ions = IonModel::new(params).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        ions.generate(entry, exit, 1000.0, &mut rng).clone()
    }

    #[test]
    fn kernel_from_code() {
        assert_eq!(AvalancheKernel::from_code(0.0), Some(AvalancheKernel::Heaviside));
        assert_eq!(AvalancheKernel::from_code(1.0), Some(AvalancheKernel::Gaussian));
        assert_eq!(AvalancheKernel::from_code(2.0), Some(AvalancheKernel::CauchyLorentz));
        assert_eq!(AvalancheKernel::from_code(3.0), None);
        assert_eq!(AvalancheKernel::from_code(1.5), None);
    }

    #[test]
    fn spread_outside_chamber_window() {
        let params = parameters();
        let entry = Vector3::new(150.0, 0.0, 0.0);
        let exit = Vector3::new(150.5, 0.2, 3.0);
        let ionization = ionize(&params, &entry, &exit, 0);
        assert!(!ionization.is_empty());

        let mut ava = AvalancheModel::new(&params);
        let planes = ava.spread(&chamber(0), &ionization, &entry, &exit, 0.0);
        assert_eq!(planes.len(), 2);
        assert!(planes.iter().all(Option::is_none));
    }

    #[test]
    fn spread_without_ions() {
        let params = parameters();
        let mut ava = AvalancheModel::new(&params);
        let planes = ava.spread(
            &chamber(0),
            &Ionization::default(),
            &Vector3::zeros(),
            &Vector3::new(0.0, 0.0, 3.0),
            0.0,
        );
        assert!(planes.iter().all(Option::is_none));
    }

    #[test]
    fn spread_rejects_single_plane() {
        // The y strips only cover 50..90 mm.
        let chamber = GemChamber::builder()
            .detector_box(DetectorBox::builder().distance(0.0).width(200.0).height(200.0).build())
            .planes(vec![
                GemPlane::builder().n_strips(500).pitch(0.4).build(),
                GemPlane::builder()
                    .n_strips(100)
                    .pitch(0.4)
                    .angle(FRAC_PI_2)
                    .strip_begin(50.0)
                    .build(),
            ])
            .build();
        let params = parameters();
        let entry = Vector3::new(1.0, 0.0, 0.0);
        let exit = Vector3::new(1.2, 0.3, 3.0);
        let ionization = ionize(&params, &entry, &exit, 1);

        let mut ava = AvalancheModel::new(&params);
        let planes = ava.spread(&chamber, &ionization, &entry, &exit, 0.0);
        assert!(planes[0].as_ref().is_some_and(|p| !p.is_empty()));
        assert!(planes[1].is_none());
    }

    #[test]
    fn spread_footprint_near_hit() {
        let params = parameters();
        let entry = Vector3::new(10.0, -20.0, 0.0);
        let exit = Vector3::new(10.4, -19.8, 3.0);
        let ionization = ionize(&params, &entry, &exit, 2);
        let chamber = chamber(0);

        let mut ava = AvalancheModel::new(&params);
        let planes = ava.spread(&chamber, &ionization, &entry, &exit, 0.0);
        for (plane, strips) in chamber.planes().iter().zip(&planes) {
            let strips = strips.as_ref().unwrap();
            assert!(!strips.is_empty());
            assert_eq!(strips.time(), 0.0);
            assert_eq!(strips.hit_charge(), ionization.total_charge());

            let (lo, _) = plane.plane_to_strip(entry.x.min(exit.x), entry.y.min(exit.y));
            let (hi, _) = plane.plane_to_strip(entry.x.max(exit.x), entry.y.max(exit.y));
            let (lo, hi) = (lo.min(hi) - 3.0, lo.max(hi) + 3.0);
            for s in strips.strips() {
                assert!(plane.strip_upper_edge(s.index) > lo);
                assert!(plane.strip_lower_edge(s.index) < hi);
                assert_eq!(s.adc.len(), 10);
                assert!(s.total_adc() > 0);
            }
            assert!(strips.strips().windows(2).all(|w| w[0].index < w[1].index));
        }
    }

    #[test]
    fn spread_heaviside_conserves_charge() {
        let mut params = parameters();
        params.kernel = AvalancheKernel::Heaviside;
        params.lateral_uncertainty = 0.0;
        let entry = Vector3::new(-5.0, 5.0, 0.0);
        let exit = Vector3::new(-4.7, 5.1, 3.0);
        let ionization = ionize(&params, &entry, &exit, 3);

        let mut ava = AvalancheModel::new(&params);
        let planes = ava.spread(&chamber(0), &ionization, &entry, &exit, 0.0);
        for strips in planes {
            let strips = strips.unwrap();
            let ratio = strips.total_charge() / ionization.total_charge();
            assert!((0.9..1.1).contains(&ratio), "{ratio}");
        }
    }

    #[test]
    fn spread_gaussian_kernel() {
        let mut params = parameters();
        params.kernel = AvalancheKernel::Gaussian;
        let entry = Vector3::new(-5.0, 5.0, 0.0);
        let exit = Vector3::new(-4.7, 5.1, 3.0);
        let ionization = ionize(&params, &entry, &exit, 3);

        // gain * 2 / range^2 of the charge falls inside the integration disk.
        let expected = params.avalanche_gain * 2.0 / params.avalanche_range.inner().powi(2);
        assert!((expected - 0.4).abs() < 1e-12);

        let mut ava = AvalancheModel::new(&params);
        assert_eq!(ava.kernel(), AvalancheKernel::Gaussian);
        let planes = ava.spread(&chamber(0), &ionization, &entry, &exit, 0.0);
        for strips in planes {
            let strips = strips.unwrap();
            assert!(!strips.is_empty());
            let ratio = strips.total_charge() / ionization.total_charge();
            assert!((ratio - expected).abs() < 0.04, "{ratio}");
        }
    }

    #[test]
    fn spread_signal_follows_time_offset() {
        let params = parameters();
        let entry = Vector3::new(0.0, 0.0, 0.0);
        let exit = Vector3::new(0.2, 0.2, 3.0);
        let ionization = ionize(&params, &entry, &exit, 4);

        let mut ava = AvalancheModel::new(&params);
        let planes = ava.spread(&chamber(0), &ionization, &entry, &exit, 100.0);
        let strips = planes[0].as_ref().unwrap();
        assert_eq!(strips.time(), 100.0);
        // Samples at 0..=100 ns come before (or at) the charge arrival.
        for s in strips.strips() {
            assert!(s.adc[..=4].iter().all(|&a| a == 0));
        }
        assert!(strips.strips().iter().any(|s| s.adc[5..].iter().any(|&a| a > 0)));
    }

    #[test]
    fn spread_reuses_grid() {
        let params = parameters();
        let entry = Vector3::new(30.0, 30.0, 0.0);
        let exit = Vector3::new(30.1, 30.5, 3.0);
        let ionization = ionize(&params, &entry, &exit, 5);

        let mut ava = AvalancheModel::new(&params);
        let first = ava.spread(&chamber(0), &ionization, &entry, &exit, 20.0);
        let second = ava.spread(&chamber(0), &ionization, &entry, &exit, 20.0);
        assert_eq!(first, second);
    }
}
