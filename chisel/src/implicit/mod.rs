//! Signed-distance functions
//!
//! [`ImplicitFn`] is the small capability surface every scorer works
//! against: signed distance, signed distance with gradient, and a bounding
//! box.  It is a plain sum type; leaves are analytic solids and interior
//! variants are the boolean combinators, so a whole CSG tree evaluates by
//! structural recursion with no virtual dispatch.
//!
//! Sign convention: negative inside, positive outside, zero on the surface.
mod polytope;
pub use polytope::{HalfSpace, Polytope};

use crate::{geometry::Aabb, geometry::TriMesh, primitive::Primitive};
use nalgebra::{Isometry3, Vector2, Vector3};
use std::sync::Arc;

/// Step for the capped cylinder's finite-difference gradient
const GRADIENT_STEP: f64 = 1e-6;

/// A signed-distance field over ℝ³
#[derive(Clone, Debug)]
pub enum ImplicitFn {
    Sphere {
        center: Vector3<f64>,
        radius: f64,
    },

    /// A capped cylinder; `frame` maps the local frame (axis = local y,
    /// centred on the midpoint) into world space
    Cylinder {
        frame: Isometry3<f64>,
        radius: f64,
        height: f64,
    },

    /// An intersection of half-spaces
    Polytope(Polytope),

    Union(Box<ImplicitFn>, Box<ImplicitFn>),
    Intersection(Box<ImplicitFn>, Box<ImplicitFn>),

    /// `Difference(a, b)` is `a` minus `b`
    Difference(Box<ImplicitFn>, Box<ImplicitFn>),

    Complement(Box<ImplicitFn>),

    /// A primitive leaf, delegating to the primitive's own field
    Geometry(Arc<Primitive>),
}

impl ImplicitFn {
    pub fn signed_distance(&self, x: &Vector3<f64>) -> f64 {
        match self {
            ImplicitFn::Sphere { center, radius } => {
                (x - center).norm() - radius
            }
            ImplicitFn::Cylinder {
                frame,
                radius,
                height,
            } => {
                let local = frame.inverse_transform_point(&(*x).into());
                let d = Vector2::new(
                    Vector2::new(local.x, local.z).norm() - radius,
                    local.y.abs() - height / 2.0,
                );
                let outside =
                    Vector2::new(d.x.max(0.0), d.y.max(0.0)).norm();
                d.x.max(d.y).min(0.0) + outside
            }
            ImplicitFn::Polytope(p) => p.signed_distance(x),
            ImplicitFn::Union(a, b) => {
                a.signed_distance(x).min(b.signed_distance(x))
            }
            ImplicitFn::Intersection(a, b) => {
                a.signed_distance(x).max(b.signed_distance(x))
            }
            ImplicitFn::Difference(a, b) => {
                a.signed_distance(x).max(-b.signed_distance(x))
            }
            ImplicitFn::Complement(a) => -a.signed_distance(x),
            ImplicitFn::Geometry(p) => p.implicit.signed_distance(x),
        }
    }

    /// Evaluates the signed distance and its (unnormalised) gradient
    ///
    /// Boolean combinators propagate the gradient of whichever branch wins
    /// the min / max; the capped cylinder uses a central finite difference.
    pub fn signed_distance_and_gradient(
        &self,
        x: &Vector3<f64>,
    ) -> (f64, Vector3<f64>) {
        match self {
            ImplicitFn::Sphere { center, radius } => {
                let d = x - center;
                let norm = d.norm();
                if norm < f64::EPSILON {
                    (-radius, Vector3::y())
                } else {
                    (norm - radius, d / norm)
                }
            }
            ImplicitFn::Cylinder { .. } => {
                let d = self.signed_distance(x);
                let mut g = Vector3::zeros();
                for i in 0..3 {
                    let mut hi = *x;
                    let mut lo = *x;
                    hi[i] += GRADIENT_STEP;
                    lo[i] -= GRADIENT_STEP;
                    g[i] = (self.signed_distance(&hi)
                        - self.signed_distance(&lo))
                        / (2.0 * GRADIENT_STEP);
                }
                (d, g)
            }
            ImplicitFn::Polytope(p) => p.signed_distance_and_gradient(x),
            ImplicitFn::Union(a, b) => {
                let da = a.signed_distance_and_gradient(x);
                let db = b.signed_distance_and_gradient(x);
                if da.0 <= db.0 {
                    da
                } else {
                    db
                }
            }
            ImplicitFn::Intersection(a, b) => {
                let da = a.signed_distance_and_gradient(x);
                let db = b.signed_distance_and_gradient(x);
                if da.0 >= db.0 {
                    da
                } else {
                    db
                }
            }
            ImplicitFn::Difference(a, b) => {
                let da = a.signed_distance_and_gradient(x);
                let (db, gb) = b.signed_distance_and_gradient(x);
                if da.0 >= -db {
                    da
                } else {
                    (-db, -gb)
                }
            }
            ImplicitFn::Complement(a) => {
                let (d, g) = a.signed_distance_and_gradient(x);
                (-d, -g)
            }
            ImplicitFn::Geometry(p) => {
                p.implicit.signed_distance_and_gradient(x)
            }
        }
    }

    /// Bounding box, or `None` when unbounded or empty
    pub fn aabb(&self) -> Option<Aabb> {
        match self {
            ImplicitFn::Sphere { center, radius } => Some(Aabb::new(
                center - Vector3::repeat(*radius),
                center + Vector3::repeat(*radius),
            )),
            ImplicitFn::Cylinder {
                frame,
                radius,
                height,
            } => Aabb::from_points((0..8).map(|i| {
                let corner = Vector3::new(
                    if i & 1 == 0 { -radius } else { *radius },
                    if i & 2 == 0 { -height / 2.0 } else { height / 2.0 },
                    if i & 4 == 0 { -radius } else { *radius },
                );
                frame.transform_point(&corner.into()).coords
            })),
            ImplicitFn::Polytope(p) => p.aabb(),
            ImplicitFn::Union(a, b) => match (a.aabb(), b.aabb()) {
                (Some(a), Some(b)) => Some(a.union(&b)),
                _ => None,
            },
            ImplicitFn::Intersection(a, b) => match (a.aabb(), b.aabb()) {
                (Some(a), Some(b)) => a.intersection(&b),
                (Some(a), None) => Some(a),
                (None, b) => b,
            },
            ImplicitFn::Difference(a, _) => a.aabb(),
            ImplicitFn::Complement(_) => None,
            ImplicitFn::Geometry(p) => p.implicit.aabb(),
        }
    }

    /// Feeds the shape's structure into a hasher
    ///
    /// Floats are hashed by their bit patterns, so two shapes hash equal only
    /// if they were built from identical parameters.
    pub fn hash_shape<H: std::hash::Hasher>(&self, state: &mut H) {
        use std::hash::Hash;
        std::mem::discriminant(self).hash(state);
        match self {
            ImplicitFn::Sphere { center, radius } => {
                hash_f64s(center.as_slice(), state);
                radius.to_bits().hash(state);
            }
            ImplicitFn::Cylinder {
                frame,
                radius,
                height,
            } => {
                hash_f64s(frame.to_homogeneous().as_slice(), state);
                radius.to_bits().hash(state);
                height.to_bits().hash(state);
            }
            ImplicitFn::Polytope(p) => {
                for h in p.planes() {
                    hash_f64s(h.point.as_slice(), state);
                    hash_f64s(h.normal.as_slice(), state);
                }
            }
            ImplicitFn::Union(a, b)
            | ImplicitFn::Intersection(a, b)
            | ImplicitFn::Difference(a, b) => {
                a.hash_shape(state);
                b.hash_shape(state);
            }
            ImplicitFn::Complement(a) => a.hash_shape(state),
            ImplicitFn::Geometry(p) => p.hash(state),
        }
    }

    /// Tessellates a leaf solid for debug output
    ///
    /// Boolean variants return `None`; meshing a combined field is the
    /// external mesher's job.
    pub fn surface_mesh(&self) -> Option<TriMesh> {
        match self {
            ImplicitFn::Sphere { center, radius } => {
                Some(sphere_mesh(center, *radius, 16))
            }
            ImplicitFn::Cylinder {
                frame,
                radius,
                height,
            } => Some(cylinder_mesh(frame, *radius, *height, 32)),
            ImplicitFn::Polytope(p) => Some(p.mesh()),
            ImplicitFn::Geometry(p) => p.implicit.surface_mesh(),
            _ => None,
        }
    }
}

fn hash_f64s<H: std::hash::Hasher>(values: &[f64], state: &mut H) {
    use std::hash::Hash;
    for v in values {
        v.to_bits().hash(state);
    }
}

/// Longitude/latitude sphere shell
fn sphere_mesh(center: &Vector3<f64>, radius: f64, n: usize) -> TriMesh {
    let mut mesh = TriMesh::default();
    for i in 0..=n {
        let theta = std::f64::consts::PI * i as f64 / n as f64;
        for j in 0..n {
            let phi = 2.0 * std::f64::consts::PI * j as f64 / n as f64;
            mesh.vertices.push(
                center
                    + radius
                        * Vector3::new(
                            theta.sin() * phi.cos(),
                            theta.cos(),
                            theta.sin() * phi.sin(),
                        ),
            );
        }
    }
    for i in 0..n {
        for j in 0..n {
            let a = i * n + j;
            let b = i * n + (j + 1) % n;
            let c = (i + 1) * n + j;
            let d = (i + 1) * n + (j + 1) % n;
            mesh.triangles.push([a, b, c]);
            mesh.triangles.push([b, d, c]);
        }
    }
    mesh
}

/// Radial cylinder shell with two cap fans
fn cylinder_mesh(
    frame: &Isometry3<f64>,
    radius: f64,
    height: f64,
    n: usize,
) -> TriMesh {
    let mut mesh = TriMesh::default();
    let lift = |v: Vector3<f64>| frame.transform_point(&v.into()).coords;
    for j in 0..n {
        let phi = 2.0 * std::f64::consts::PI * j as f64 / n as f64;
        let (s, c) = phi.sin_cos();
        let rim = Vector3::new(radius * c, 0.0, radius * s);
        mesh.vertices
            .push(lift(rim + Vector3::new(0.0, -height / 2.0, 0.0)));
        mesh.vertices
            .push(lift(rim + Vector3::new(0.0, height / 2.0, 0.0)));
    }
    let bottom = mesh.vertices.len();
    mesh.vertices.push(lift(Vector3::new(0.0, -height / 2.0, 0.0)));
    let top = mesh.vertices.len();
    mesh.vertices.push(lift(Vector3::new(0.0, height / 2.0, 0.0)));
    for j in 0..n {
        let (a0, a1) = (2 * j, 2 * j + 1);
        let (b0, b1) = (2 * ((j + 1) % n), 2 * ((j + 1) % n) + 1);
        mesh.triangles.push([a0, b0, a1]);
        mesh.triangles.push([b0, b1, a1]);
        mesh.triangles.push([bottom, b0, a0]);
        mesh.triangles.push([top, a1, b1]);
    }
    mesh
}
