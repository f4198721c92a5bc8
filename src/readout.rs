use crate::geometry::DetectorBox;
use bon::bon;

/// One readout coordinate of a chamber: a set of parallel strips.
///
/// The strip frame is the chamber (plane) frame rotated so that its x axis
/// runs across the strips. Strip `i` covers `[lower_edge(i), upper_edge(i))`
/// along that axis. Lengths are in mm.
pub trait StripPlane {
    fn n_strips(&self) -> usize;
    fn pitch(&self) -> f64;
    /// Strip angle: rotation from the plane frame to the strip frame.
    fn angle(&self) -> f64;
    /// Lower edge of strip 0 in the strip frame.
    fn strip_begin(&self) -> f64;

    fn strip_lower_edge(&self, strip: usize) -> f64 {
        self.strip_begin() + strip as f64 * self.pitch()
    }

    fn strip_upper_edge(&self, strip: usize) -> f64 {
        self.strip_lower_edge(strip) + self.pitch()
    }

    fn plane_to_strip(&self, x: f64, y: f64) -> (f64, f64) {
        let (sin, cos) = self.angle().sin_cos();
        (x * cos + y * sin, -x * sin + y * cos)
    }

    fn strip_to_plane(&self, x: f64, y: f64) -> (f64, f64) {
        let (sin, cos) = self.angle().sin_cos();
        (x * cos - y * sin, x * sin + y * cos)
    }

    /// Strip containing the strip-frame coordinate `xs`, if any.
    fn strip(&self, xs: f64) -> Option<usize> {
        let s = ((xs - self.strip_begin()) / self.pitch()).floor();
        if s >= 0.0 && s < self.n_strips() as f64 {
            Some(s as usize)
        } else {
            None
        }
    }

    /// Like [`StripPlane::strip`] but clamped to the first or last strip.
    fn strip_in_range(&self, xs: f64) -> usize {
        let s = ((xs - self.strip_begin()) / self.pitch()).floor();
        if s <= 0.0 || s.is_nan() {
            0
        } else {
            (s as usize).min(self.n_strips().saturating_sub(1))
        }
    }
}

/// A chamber with its readout planes.
pub trait Chamber {
    type Plane: StripPlane;

    fn planes(&self) -> &[Self::Plane];
    /// Index of the tracking layer this chamber belongs to.
    fn layer(&self) -> usize;
    fn detector_box(&self) -> &DetectorBox;
}

/// Source of chamber geometry for the digitizer.
pub trait Geometry {
    type Chamber: Chamber;

    fn chambers(&self) -> &[Self::Chamber];

    fn n_layers(&self) -> usize {
        self.chambers()
            .iter()
            .map(|c| c.layer() + 1)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GemPlane {
    n_strips: usize,
    pitch: f64,
    angle: f64,
    strip_begin: f64,
}

#[bon]
impl GemPlane {
    /// When `strip_begin` is not given the strips are centered on the
    /// chamber origin.
    ///
    /// # Examples
    ///
    /// ```
    /// use gemdig::readout::{GemPlane, StripPlane};
    ///
    /// let plane = GemPlane::builder().n_strips(100).pitch(0.4).build();
    /// assert_eq!(plane.strip(-20.0), Some(0));
    /// assert_eq!(plane.strip(0.1), Some(50));
    /// assert_eq!(plane.strip(25.0), None);
    /// ```
    #[builder]
    pub fn new(
        n_strips: usize,
        pitch: f64,
        #[builder(default)] angle: f64,
        strip_begin: Option<f64>,
    ) -> Self {
        Self {
            n_strips,
            pitch,
            angle,
            strip_begin: strip_begin.unwrap_or(-(n_strips as f64) * pitch / 2.0),
        }
    }
}

impl StripPlane for GemPlane {
    fn n_strips(&self) -> usize {
        self.n_strips
    }

    fn pitch(&self) -> f64 {
        self.pitch
    }

    fn angle(&self) -> f64 {
        self.angle
    }

    fn strip_begin(&self) -> f64 {
        self.strip_begin
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GemChamber {
    name: String,
    layer: usize,
    detector_box: DetectorBox,
    planes: Vec<GemPlane>,
}

#[bon]
impl GemChamber {
    #[builder]
    pub fn new(
        #[builder(into, default)] name: String,
        #[builder(default)] layer: usize,
        detector_box: DetectorBox,
        planes: Vec<GemPlane>,
    ) -> Self {
        Self {
            name,
            layer,
            detector_box,
            planes,
        }
    }
}

impl GemChamber {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Chamber for GemChamber {
    type Plane = GemPlane;

    fn planes(&self) -> &[GemPlane] {
        &self.planes
    }

    fn layer(&self) -> usize {
        self.layer
    }

    fn detector_box(&self) -> &DetectorBox {
        &self.detector_box
    }
}

/// A set of GEM chambers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Spectrometer {
    chambers: Vec<GemChamber>,
}

impl Spectrometer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chamber(&mut self, chamber: GemChamber) {
        self.chambers.push(chamber);
    }
}

impl FromIterator<GemChamber> for Spectrometer {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = GemChamber>,
    {
        Self {
            chambers: iter.into_iter().collect(),
        }
    }
}

impl Geometry for Spectrometer {
    type Chamber = GemChamber;

    fn chambers(&self) -> &[GemChamber] {
        &self.chambers
    }
}
