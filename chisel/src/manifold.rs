//! Fitted surface manifolds
//!
//! A [`Manifold`] is one fitted surface coming out of the external
//! random-sampling-consensus stage: an oriented plane, an infinite cylinder
//! axis with a radius, or a sphere.  Every manifold carries the subset of the
//! scan that supports it.  Manifolds are immutable once fitted and shared via
//! [`Arc`]; primitive assembly only ever clones-and-adjusts.
use crate::geometry::{plane_basis, PointCloud};
use nalgebra::{Vector2, Vector3};
use std::sync::Arc;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ManifoldKind {
    Plane,
    Cylinder,
    Sphere,
}

/// A fitted surface together with its supporting points
#[derive(Clone, Debug)]
pub struct Manifold {
    pub kind: ManifoldKind,

    /// A point on the surface (plane anchor, axis anchor, or sphere centre)
    pub p: Vector3<f64>,

    /// Unit normal (plane) or unit axis direction (cylinder); unused for
    /// spheres
    pub n: Vector3<f64>,

    /// Radius triple; only `r.x` is meaningful (cylinder / sphere radius)
    pub r: Vector3<f64>,

    /// The subset of the scan supporting this surface
    pub pc: PointCloud,
}

pub type ManifoldRef = Arc<Manifold>;
pub type ManifoldSet = Vec<ManifoldRef>;

impl Manifold {
    pub fn plane(p: Vector3<f64>, n: Vector3<f64>, pc: PointCloud) -> Self {
        Self {
            kind: ManifoldKind::Plane,
            p,
            n: n.normalize(),
            r: Vector3::zeros(),
            pc,
        }
    }

    pub fn cylinder(
        p: Vector3<f64>,
        axis: Vector3<f64>,
        radius: f64,
        pc: PointCloud,
    ) -> Self {
        Self {
            kind: ManifoldKind::Cylinder,
            p,
            n: axis.normalize(),
            r: Vector3::new(radius, 0.0, 0.0),
            pc,
        }
    }

    pub fn sphere(center: Vector3<f64>, radius: f64, pc: PointCloud) -> Self {
        Self {
            kind: ManifoldKind::Sphere,
            p: center,
            n: Vector3::zeros(),
            r: Vector3::new(radius, 0.0, 0.0),
            pc,
        }
    }

    pub fn radius(&self) -> f64 {
        self.r.x
    }

    /// Returns a copy with the orientation vector flipped
    pub fn flipped(&self) -> Self {
        let mut out = self.clone();
        out.n = -out.n;
        out
    }

    /// Projects a 3D point into the plane's 2D frame
    ///
    /// Only meaningful for planes; the frame is the right-handed orthonormal
    /// basis of [`plane_basis`].
    pub fn to_2d(&self, x: &Vector3<f64>) -> Vector2<f64> {
        let (u, v) = plane_basis(&self.n);
        let d = x - self.p;
        Vector2::new(d.dot(&u), d.dot(&v))
    }

    /// Lifts a 2D frame point back into 3D
    pub fn to_3d(&self, uv: &Vector2<f64>) -> Vector3<f64> {
        let (u, v) = plane_basis(&self.n);
        self.p + u * uv.x + v * uv.y
    }
}

/// Compares two manifolds up to a geometric tolerance
///
/// Positions must agree within `epsilon` and orientations must agree up to
/// sign (a plane fitted with an opposite normal is still the same plane).
pub fn manifolds_equal(a: &Manifold, b: &Manifold, epsilon: f64) -> bool {
    a.kind == b.kind
        && (a.p - b.p).norm() < epsilon
        && (a.n.dot(&b.n).abs() > 1.0 - epsilon
            || (a.n.norm() < epsilon && b.n.norm() < epsilon))
}
