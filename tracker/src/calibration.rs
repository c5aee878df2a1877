//! Calibration plane for geometric Z focus.
//!
//! The operator focuses on the specimen at three stage positions; the plane
//! through those points predicts the in-focus Z for any XY position. The
//! tracker then drives Z toward the plane with a saturating approach curve.

use nalgebra::Vector3;
use tracing::{info, warn};

/// Stage position `(x, y, z)` in stage units.
pub type Point3 = Vector3<f64>;

/// Unit normal with non-negative z and offset `d0 = N . p0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Point3,
    pub d0: f64,
}

impl Plane {
    /// Fit the plane through three points. `None` if the points are not
    /// finite or are collinear.
    pub fn through(points: [Point3; 3]) -> Option<Plane> {
        if points.iter().any(|p| p.iter().any(|v| !v.is_finite())) {
            return None;
        }
        let n = (points[1] - points[0]).cross(&(points[1] - points[2]));
        let norm = n.norm();
        if !(norm > 0.0) || !norm.is_finite() {
            return None;
        }
        let mut normal = n / norm;
        if normal.z < 0.0 {
            normal = -normal;
        }
        Some(Plane {
            normal,
            d0: normal.dot(&points[0]),
        })
    }

    /// Signed distance of `p` from the plane along the normal.
    pub fn signed_distance(&self, p: Point3) -> f64 {
        self.normal.dot(&p) - self.d0
    }
}

/// Z velocity that pulls a point at signed distance `d` back onto the plane.
///
/// Magnitude `2 * vz_max * |d| / (1 + |d|)`, sign opposite to `d`, truncated
/// toward zero.
pub fn approach_velocity(d: f64, vz_max: f64) -> i32 {
    if d == 0.0 || !d.is_finite() {
        return 0;
    }
    let magnitude = 2.0 * vz_max * d.abs() / (1.0 + d.abs());
    (-d.signum() * magnitude) as i32
}

/// Three index-tagged calibration points and the plane derived from them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationPlane {
    points: [Option<Point3>; 3],
    plane: Option<Plane>,
}

impl CalibrationPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for an operator point index. Indices are 1-based and wrap, so
    /// 1, 2, 3 map to slots 0, 1, 2 and 0 or 4 alias 3 or 1.
    pub fn slot(index: i64) -> usize {
        (index - 1).rem_euclid(3) as usize
    }

    /// Store a point and refit once all three slots hold finite points.
    pub fn set_point(&mut self, index: i64, point: Point3) -> Option<Plane> {
        let slot = Self::slot(index);
        self.points[slot] = Some(point);
        info!(
            "calibration point {} -> slot {}: ({}, {}, {})",
            index, slot, point.x, point.y, point.z
        );

        if let [Some(p0), Some(p1), Some(p2)] = self.points {
            self.plane = Plane::through([p0, p1, p2]);
            match &self.plane {
                Some(plane) => info!(
                    "calibration plane normal ({}, {}, {}) intercept {}",
                    plane.normal.x, plane.normal.y, plane.normal.z, plane.d0
                ),
                None => warn!("calibration points are degenerate, plane undefined"),
            }
        }
        self.plane
    }

    pub fn point(&self, index: i64) -> Option<Point3> {
        self.points[Self::slot(index)]
    }

    pub fn plane(&self) -> Option<Plane> {
        self.plane
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Z velocity for the stage at `position`, with `offset_z` added to its z.
    /// An undefined plane yields zero.
    pub fn velocity(&self, position: Point3, offset_z: f64, vz_max: f64) -> i32 {
        match &self.plane {
            Some(plane) => {
                let p = Vector3::new(position.x, position.y, position.z + offset_z);
                approach_velocity(plane.signed_distance(p), vz_max)
            }
            None => 0,
        }
    }
}
