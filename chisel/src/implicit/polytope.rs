//! Convex polytopes as intersections of half-spaces
use crate::geometry::{plane_basis, Aabb, TriMesh};
use nalgebra::{Matrix3, Vector3};

/// Tolerance for the feasibility test in vertex enumeration
const FEASIBLE_EPSILON: f64 = 1e-7;

/// Minimum determinant for a plane triple to define a vertex
const SINGULAR_EPSILON: f64 = 1e-10;

/// One half-space `{x : n·(x − p) ≤ 0}`, with `n` a unit outward normal
#[derive(Copy, Clone, Debug)]
pub struct HalfSpace {
    pub point: Vector3<f64>,
    pub normal: Vector3<f64>,
}

impl HalfSpace {
    pub fn new(point: Vector3<f64>, normal: Vector3<f64>) -> Self {
        Self {
            point,
            normal: normal.normalize(),
        }
    }

    /// Signed distance to the bounding plane (positive outside)
    pub fn distance(&self, x: &Vector3<f64>) -> f64 {
        self.normal.dot(&(x - self.point))
    }
}

/// An intersection of half-spaces
///
/// Vertices are enumerated at construction time by solving every plane
/// triple and keeping the feasible solutions; a polytope with no feasible
/// vertex is *empty* and must be rejected by the caller (a degenerate
/// primitive).
#[derive(Clone, Debug)]
pub struct Polytope {
    planes: Vec<HalfSpace>,
    vertices: Vec<Vector3<f64>>,
}

impl Polytope {
    pub fn new(planes: Vec<HalfSpace>) -> Self {
        let vertices = enumerate_vertices(&planes);
        Self { planes, vertices }
    }

    /// The half-space intersection is degenerate (no feasible vertex)
    pub fn empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn planes(&self) -> &[HalfSpace] {
        &self.planes
    }

    pub fn vertices(&self) -> &[Vector3<f64>] {
        &self.vertices
    }

    pub fn aabb(&self) -> Option<Aabb> {
        Aabb::from_points(self.vertices.iter().copied())
    }

    /// Signed distance under the max-of-planes convention
    ///
    /// Exact inside and near faces; an upper-bound approximation out past
    /// edges and corners, which is all the scoring code needs.
    pub fn signed_distance(&self, x: &Vector3<f64>) -> f64 {
        self.planes
            .iter()
            .map(|h| h.distance(x))
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Signed distance and gradient
    ///
    /// The gradient is the outward normal of the most-active plane, which
    /// also covers the near-edge case where two planes are nearly tied.
    pub fn signed_distance_and_gradient(
        &self,
        x: &Vector3<f64>,
    ) -> (f64, Vector3<f64>) {
        let mut best = (f64::NEG_INFINITY, Vector3::z());
        for h in &self.planes {
            let d = h.distance(x);
            if d > best.0 {
                best = (d, h.normal);
            }
        }
        best
    }

    /// Builds a triangulated surface mesh by clipping
    ///
    /// Each bounding plane contributes one large rectangle, clipped against
    /// every other half-space and fan-triangulated.  A hexahedral box in
    /// general position produces exactly 12 triangles; any other count tells
    /// the caller that the polytope is degenerate.
    pub fn mesh(&self) -> TriMesh {
        let mut out = TriMesh::default();
        if self.empty() {
            return out;
        }
        let aabb = self.aabb().unwrap();
        let extent = aabb.diagonal().max(1.0) * 2.0;
        let center = aabb.center();

        for (i, h) in self.planes.iter().enumerate() {
            // Start from a large rectangle centred over the body
            let anchor = center - h.normal * h.distance(&center);
            let (u, v) = plane_basis(&h.normal);
            let mut poly = vec![
                anchor + (u + v) * extent,
                anchor + (v - u) * extent,
                anchor - (u + v) * extent,
                anchor + (u - v) * extent,
            ];
            for (j, other) in self.planes.iter().enumerate() {
                if i == j {
                    continue;
                }
                poly = clip_polygon(&poly, other);
                if poly.len() < 3 {
                    break;
                }
            }
            if poly.len() < 3 {
                continue;
            }
            let base = out.vertices.len();
            out.vertices.extend_from_slice(&poly);
            for k in 1..poly.len() - 1 {
                out.triangles.push([base, base + k, base + k + 1]);
            }
        }
        out
    }
}

/// Clips a convex polygon against a half-space (Sutherland-Hodgman)
fn clip_polygon(
    poly: &[Vector3<f64>],
    h: &HalfSpace,
) -> Vec<Vector3<f64>> {
    let mut out = vec![];
    for (i, a) in poly.iter().enumerate() {
        let b = &poly[(i + 1) % poly.len()];
        let da = h.distance(a);
        let db = h.distance(b);
        if da <= 0.0 {
            out.push(*a);
        }
        if (da < 0.0) != (db < 0.0) && (da - db).abs() > f64::EPSILON {
            let t = da / (da - db);
            out.push(a + (b - a) * t);
        }
    }
    out
}

/// Enumerates feasible vertices by intersecting every plane triple
fn enumerate_vertices(planes: &[HalfSpace]) -> Vec<Vector3<f64>> {
    let mut out: Vec<Vector3<f64>> = vec![];
    let n = planes.len();
    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                let m = Matrix3::from_rows(&[
                    planes[i].normal.transpose(),
                    planes[j].normal.transpose(),
                    planes[k].normal.transpose(),
                ]);
                if m.determinant().abs() < SINGULAR_EPSILON {
                    continue;
                }
                let b = Vector3::new(
                    planes[i].normal.dot(&planes[i].point),
                    planes[j].normal.dot(&planes[j].point),
                    planes[k].normal.dot(&planes[k].point),
                );
                let Some(v) = m.lu().solve(&b) else {
                    continue;
                };
                let scale = 1.0 + v.norm();
                if planes
                    .iter()
                    .all(|h| h.distance(&v) <= FEASIBLE_EPSILON * scale)
                    && !out.iter().any(|o| (o - v).norm() < 1e-9 * scale)
                {
                    out.push(v);
                }
            }
        }
    }
    out
}
