use bon::bon;
use nalgebra::{Point3, Rotation3, Vector3};
use std::f64::consts::FRAC_PI_2;

/// Placement of a rectangular detector box in the hall.
///
/// Four frames are involved, all with lengths in mm:
/// - hall center: origin at the target;
/// - lab: hall center shifted to the spectrometer magnet pivot;
/// - spectrometer: lab rotated by the pivot angle (about y), the bending
///   angle (about x) and the box rotation (about z);
/// - box: spectrometer frame translated to the box center.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorBox {
    magnet_distance: f64,
    distance: f64,
    x_offset: f64,
    width: f64,
    height: f64,
    pivot_angle: f64,
    bending_angle: f64,
    box_rotation: f64,
    // lab -> spectrometer
    rotation: Rotation3<f64>,
    origin: Point3<f64>,
}

#[bon]
impl DetectorBox {
    /// # Examples
    ///
    /// ```
    /// use gemdig::geometry::DetectorBox;
    ///
    /// let b = DetectorBox::builder()
    ///     .distance(1500.0)
    ///     .width(400.0)
    ///     .height(1500.0)
    ///     .build();
    /// assert!(b.contains(150.0, -700.0));
    /// assert!(!b.contains(250.0, 0.0));
    /// ```
    #[builder]
    pub fn new(
        #[builder(default)] magnet_distance: f64,
        distance: f64,
        #[builder(default)] x_offset: f64,
        width: f64,
        height: f64,
        #[builder(default)] pivot_angle: f64,
        #[builder(default)] bending_angle: f64,
        #[builder(default = FRAC_PI_2)] box_rotation: f64,
    ) -> Self {
        let mut b = Self {
            magnet_distance,
            distance,
            x_offset,
            width,
            height,
            pivot_angle,
            bending_angle,
            box_rotation,
            rotation: Rotation3::identity(),
            origin: Point3::origin(),
        };
        b.set_geometry(
            magnet_distance,
            distance,
            x_offset,
            width,
            height,
            pivot_angle,
            bending_angle,
            box_rotation,
        );
        b
    }
}

impl DetectorBox {
    /// Replace all placement parameters and recompute the cached rotation
    /// and box origin.
    #[allow(clippy::too_many_arguments)]
    pub fn set_geometry(
        &mut self,
        magnet_distance: f64,
        distance: f64,
        x_offset: f64,
        width: f64,
        height: f64,
        pivot_angle: f64,
        bending_angle: f64,
        box_rotation: f64,
    ) {
        self.magnet_distance = magnet_distance;
        self.distance = distance;
        self.x_offset = x_offset;
        self.width = width;
        self.height = height;
        self.pivot_angle = pivot_angle;
        self.bending_angle = bending_angle;
        self.box_rotation = box_rotation;

        let pivot = Rotation3::from_axis_angle(&Vector3::y_axis(), pivot_angle);
        let bending = Rotation3::from_axis_angle(&Vector3::x_axis(), bending_angle);
        let rotation = Rotation3::from_axis_angle(&Vector3::z_axis(), box_rotation);
        self.rotation = rotation * bending * pivot;

        self.origin = self.spec_to_hall_center(Point3::new(x_offset, 0.0, distance));
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn x_offset(&self) -> f64 {
        self.x_offset
    }

    /// Center of the box in the hall-center frame.
    pub fn origin(&self) -> Point3<f64> {
        self.origin
    }

    /// Is `(x, y)`, given in the box frame, inside the box window?
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x.abs() <= self.width / 2.0 && y.abs() <= self.height / 2.0
    }

    /// Is the lab-frame point inside the box window once projected onto the
    /// box plane?
    pub fn contains_lab(&self, x: f64, y: f64, z: f64) -> bool {
        let p = self.lab_to_box(Point3::new(x, y, z));
        self.contains(p.x, p.y)
    }

    pub fn hall_center_to_lab(&self, p: Point3<f64>) -> Point3<f64> {
        let (sin, cos) = self.pivot_angle.sin_cos();
        Point3::new(
            p.x + self.magnet_distance * sin,
            p.y,
            p.z - self.magnet_distance * cos,
        )
    }

    pub fn lab_to_hall_center(&self, p: Point3<f64>) -> Point3<f64> {
        let (sin, cos) = self.pivot_angle.sin_cos();
        Point3::new(
            p.x - self.magnet_distance * sin,
            p.y,
            p.z + self.magnet_distance * cos,
        )
    }

    pub fn lab_to_spec(&self, p: Point3<f64>) -> Point3<f64> {
        self.rotation * p
    }

    pub fn spec_to_lab(&self, p: Point3<f64>) -> Point3<f64> {
        self.rotation.inverse() * p
    }

    /// Rotate a direction (e.g. a momentum) from the spectrometer to the lab.
    pub fn spec_to_lab_vector(&self, v: Vector3<f64>) -> Vector3<f64> {
        self.rotation.inverse() * v
    }

    pub fn spec_to_box(&self, p: Point3<f64>) -> Point3<f64> {
        Point3::new(p.x - self.x_offset, p.y, p.z - self.distance)
    }

    pub fn box_to_spec(&self, p: Point3<f64>) -> Point3<f64> {
        Point3::new(p.x + self.x_offset, p.y, p.z + self.distance)
    }

    pub fn lab_to_box(&self, p: Point3<f64>) -> Point3<f64> {
        self.spec_to_box(self.lab_to_spec(p))
    }

    pub fn box_to_lab(&self, p: Point3<f64>) -> Point3<f64> {
        self.spec_to_lab(self.box_to_spec(p))
    }

    pub fn hall_center_to_spec(&self, p: Point3<f64>) -> Point3<f64> {
        self.lab_to_spec(self.hall_center_to_lab(p))
    }

    pub fn spec_to_hall_center(&self, p: Point3<f64>) -> Point3<f64> {
        self.lab_to_hall_center(self.spec_to_lab(p))
    }

    pub fn hall_center_to_box(&self, p: Point3<f64>) -> Point3<f64> {
        self.lab_to_box(self.hall_center_to_lab(p))
    }

    pub fn box_to_hall_center(&self, p: Point3<f64>) -> Point3<f64> {
        self.lab_to_hall_center(self.box_to_lab(p))
    }
}
