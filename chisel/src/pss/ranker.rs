//! Ranker for the primitive-set search
//!
//! Fitness is a weighted sum of three terms:
//!
//! - **area score**: how much of each box face's area is witnessed by
//!   supporting points, computed by rasterising the points that fall inside
//!   each face triangle onto a grid aligned with the triangle's edges;
//! - **geometry score**: the fraction of scan points lying on the surface of
//!   *some* primitive, with agreeing normals;
//! - **size score**: a penalty proportional to the set size (weight 0 in the
//!   baseline configuration).
//!
//! The ranker also remembers the best set seen across the whole run, which
//! may not be in the final population.
use crate::{
    evo::Ranker,
    geometry::{point_in_triangle, polygon_area, PointCloud},
    implicit::ImplicitFn,
    manifold::ManifoldRef,
    primitive::{Primitive, PrimitiveKind, PrimitiveSet},
};
use log::{debug, trace};
use nalgebra::{Rotation2, Vector2, Vector3};
use std::collections::HashMap;
use std::sync::Mutex;

/// Raster cell edge length for the area score
pub const RASTER_CELL_SIZE: f64 = 0.04;

/// A scan point counts as "on" a primitive below this distance
pub const DISTANCE_DELTA: f64 = 1e-4;

/// ... and when its normal agrees with the field gradient beyond this dot
/// product
pub const NORMAL_AGREEMENT: f64 = 0.9;

/// Weights of the three fitness terms
#[derive(Copy, Clone, Debug)]
pub struct ScoreWeights {
    pub area: f64,
    pub geometry: f64,
    pub size: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            area: 1.0,
            geometry: 1.0,
            size: 0.0,
        }
    }
}

/// Ranker over primitive sets
pub struct PrimitiveSetRanker {
    /// Scan points of the manifolds the creator works with
    pc: PointCloud,

    /// Primitives fixed outside the search, appended before scoring
    static_primitives: PrimitiveSet,

    distance_epsilon: f64,
    max_set_size: usize,
    weights: ScoreWeights,
    use_caching: bool,

    /// Best set seen so far, across every rank call
    best: Mutex<Option<(f64, PrimitiveSet)>>,

    /// Per-primitive `(point_area, surface_area)` memo, keyed by shape hash
    area_cache: Mutex<HashMap<u64, Option<(f64, f64)>>>,
}

impl PrimitiveSetRanker {
    pub fn new(
        pc: PointCloud,
        static_primitives: PrimitiveSet,
        max_set_size: usize,
        weights: ScoreWeights,
        use_caching: bool,
    ) -> Self {
        Self {
            pc,
            static_primitives,
            distance_epsilon: DISTANCE_DELTA,
            max_set_size,
            weights,
            use_caching,
            best: Mutex::new(None),
            area_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the on-surface distance threshold of the geometry term
    pub fn with_distance_epsilon(mut self, epsilon: f64) -> Self {
        self.distance_epsilon = epsilon;
        self
    }

    /// The best-ranked set seen so far
    pub fn best_set(&self) -> Option<PrimitiveSet> {
        self.best.lock().unwrap().as_ref().map(|(_, ps)| ps.clone())
    }

    /// Scores a set; `ignore_static` drops the static primitives from the
    /// geometry term (used when tuning their cutout flags individually)
    pub fn rank_set(&self, ps: &PrimitiveSet, ignore_static: bool) -> f64 {
        if ps.is_empty() {
            return f64::NEG_INFINITY;
        }

        let mut point_area = 0.0;
        let mut surface_area = 0.0;
        for p in ps {
            if let Some((pa, sa)) = self.primitive_area(p) {
                point_area += pa;
                surface_area += sa;
            }
        }
        let area_score = if surface_area > 0.0 {
            point_area / surface_area
        } else {
            0.0
        };

        let geo_score = self.geometry_score(ps, ignore_static);
        let size_score = ps.len() as f64 / self.max_set_size as f64;

        let rank = self.weights.area * area_score
            + self.weights.geometry * geo_score
            - self.weights.size * size_score;

        if !ignore_static {
            let mut best = self.best.lock().unwrap();
            if best.as_ref().map(|(r, _)| rank > *r).unwrap_or(true) {
                debug!(
                    "new best rank {rank}: geo {geo_score}, \
                     area {area_score}, size {size_score}"
                );
                *best = Some((rank, ps.clone()));
            }
        }
        rank
    }

    /// Fraction of scan points on the surface of some primitive, with
    /// agreeing normal
    fn geometry_score(&self, ps: &PrimitiveSet, ignore_static: bool) -> f64 {
        if self.pc.is_empty() {
            return 0.0;
        }
        let statics = if ignore_static {
            &[]
        } else {
            self.static_primitives.as_slice()
        };
        let mut valid = 0usize;
        for pt in self.pc.iter() {
            let mut min_d = f64::MAX;
            let mut min_grad = Vector3::zeros();
            for p in ps.iter().chain(statics) {
                let (d, g) =
                    p.implicit.signed_distance_and_gradient(&pt.pos);
                if d.abs() < min_d {
                    min_d = d.abs();
                    min_grad = g;
                }
            }
            let norm = min_grad.norm();
            if min_d < self.distance_epsilon
                && norm > 0.0
                && pt.normal.dot(&min_grad) / norm > NORMAL_AGREEMENT
            {
                valid += 1;
            }
        }
        valid as f64 / self.pc.len() as f64
    }

    /// Witnessed and total face area of a box primitive
    ///
    /// `None` for non-boxes and for boxes whose face mesh is degenerate
    /// (anything but 12 triangles); those simply don't contribute.
    fn primitive_area(&self, p: &Primitive) -> Option<(f64, f64)> {
        if p.kind != PrimitiveKind::Box || p.ms.len() != 6 {
            return None;
        }
        let key = p.shape_hash();
        if self.use_caching {
            if let Some(hit) = self.area_cache.lock().unwrap().get(&key) {
                return *hit;
            }
        }
        let out = box_area_scores(p);
        if self.use_caching {
            self.area_cache.lock().unwrap().insert(key, out);
        }
        out
    }
}

impl Ranker for PrimitiveSetRanker {
    type Creature = PrimitiveSet;

    fn rank(&self, ps: &PrimitiveSet) -> f64 {
        self.rank_set(ps, false)
    }
}

/// Computes `(point_area, surface_area)` for one box primitive
fn box_area_scores(p: &Primitive) -> Option<(f64, f64)> {
    let ImplicitFn::Polytope(poly) = &*p.implicit else {
        return None;
    };
    let mesh = poly.mesh();
    if mesh.triangles.len() != 12 {
        trace!(
            "skipping area score: {} has {} triangles",
            p.name,
            mesh.triangles.len()
        );
        return None;
    }

    let mut point_area = 0.0;
    let mut surface_area = 0.0;
    for t in &mesh.triangles {
        let triangle =
            [mesh.vertices[t[0]], mesh.vertices[t[1]], mesh.vertices[t[2]]];

        // The face plane is the one all three corners are closest to
        let plane = p
            .ms
            .iter()
            .min_by(|a, b| {
                let dist = |m: &ManifoldRef| {
                    triangle
                        .iter()
                        .map(|v| (v - m.p).dot(&m.n).abs())
                        .fold(0.0, f64::max)
                };
                dist(a).total_cmp(&dist(b))
            })
            .unwrap();

        let triangle_2d = triangle.map(|v| plane.to_2d(&v));
        let in_triangle: Vec<Vector2<f64>> = plane
            .pc
            .iter()
            .map(|pt| plane.to_2d(&pt.pos))
            .filter(|uv| {
                point_in_triangle(
                    uv,
                    &triangle_2d[0],
                    &triangle_2d[1],
                    &triangle_2d[2],
                )
            })
            .collect();

        point_area +=
            rasterized_area(RASTER_CELL_SIZE, &in_triangle, &triangle_2d);
        surface_area += polygon_area(&triangle_2d).abs();
    }
    Some((point_area, surface_area))
}

/// Area covered by points, rasterised on a grid aligned with the
/// triangle's most-orthogonal pair of edges
fn rasterized_area(
    cell: f64,
    pts: &[Vector2<f64>],
    triangle: &[Vector2<f64>; 3],
) -> f64 {
    if pts.is_empty() {
        return 0.0;
    }
    let e01 = triangle[1] - triangle[0];
    let e12 = triangle[2] - triangle[1];
    let e02 = triangle[2] - triangle[0];

    // Align the grid with the most-orthogonal pair of edges
    let d0 = e01.dot(&e12).abs();
    let d1 = e01.dot(&e02).abs();
    let d2 = e12.dot(&e02).abs();
    let v0 = if d0 <= d1 && d0 <= d2 {
        e01
    } else if d1 <= d2 {
        e01
    } else {
        e12
    };

    let rot = Rotation2::new(v0.y.atan2(v0.x)).inverse();
    // Anchor at the rotated triangle's bounding corner so every interior
    // point lands inside the grid
    let corners = triangle.map(|c| rot * c);
    let min = corners.iter().fold(corners[0], |m, c| m.inf(c));
    let max = corners.iter().fold(corners[0], |m, c| m.sup(c));
    let w = ((max.x - min.x) / cell).ceil() as usize;
    let h = ((max.y - min.y) / cell).ceil() as usize;
    if w == 0 || h == 0 {
        return 0.0;
    }

    let mut grid = vec![false; w * h];
    let mut covered = 0usize;
    for p in pts {
        let local = rot * p - min;
        let x = (local.x / cell).floor() as isize;
        let y = (local.y / cell).floor() as isize;
        // Points on the far boundary round past the last cell
        let x = x.clamp(0, w as isize - 1) as usize;
        let y = y.clamp(0, h as isize - 1) as usize;
        let idx = y * w + x;
        if !grid[idx] {
            grid[idx] = true;
            covered += 1;
        }
    }
    covered as f64 * cell * cell
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        geometry::SurfacePoint,
        manifold::{Manifold, ManifoldSet},
        primitive::create_box,
    };
    use std::sync::Arc;

    /// Unit cube planes, each carrying one `n x n` grid of face samples per
    /// offset in `offsets` (several offsets interleave several grids)
    fn sampled_cube_with(n: usize, offsets: &[f64]) -> ManifoldSet {
        let faces = [
            (Vector3::new(0.0, 0.5, 0.5), -Vector3::x()),
            (Vector3::new(1.0, 0.5, 0.5), Vector3::x()),
            (Vector3::new(0.5, 0.0, 0.5), -Vector3::y()),
            (Vector3::new(0.5, 1.0, 0.5), Vector3::y()),
            (Vector3::new(0.5, 0.5, 0.0), -Vector3::z()),
            (Vector3::new(0.5, 0.5, 1.0), Vector3::z()),
        ];
        faces
            .map(|(p, normal)| {
                let mut pc = PointCloud::default();
                let (u, v) = crate::geometry::plane_basis(&normal);
                for off in offsets {
                    for i in 0..n {
                        for j in 0..n {
                            let a = (i as f64 + off) / n as f64 - 0.5;
                            let b = (j as f64 + off) / n as f64 - 0.5;
                            pc.push(SurfacePoint {
                                pos: p + u * a + v * b,
                                normal,
                            });
                        }
                    }
                }
                Arc::new(Manifold::plane(p, normal, pc))
            })
            .to_vec()
    }

    fn sampled_cube(n: usize) -> ManifoldSet {
        sampled_cube_with(n, &[0.5])
    }

    fn ranker_for(ms: &ManifoldSet) -> PrimitiveSetRanker {
        let pc =
            PointCloud::merged(ms.iter().map(|m| &m.pc).collect::<Vec<_>>());
        PrimitiveSetRanker::new(
            pc,
            PrimitiveSet::new(),
            4,
            ScoreWeights::default(),
            true,
        )
    }

    #[test]
    fn dense_cube_scores_high() {
        let ms = sampled_cube(40);
        let ranker = ranker_for(&ms);
        let cube = create_box(&ms).unwrap();
        let rank = ranker.rank_set(&vec![cube], false);
        // Every sample sits exactly on a face with an agreeing normal
        assert!(rank > 1.9, "rank was {rank}");
        assert!(ranker.best_set().is_some());
    }

    #[test]
    fn empty_set_is_unscoreable() {
        let ms = sampled_cube(8);
        let ranker = ranker_for(&ms);
        assert_eq!(
            ranker.rank_set(&PrimitiveSet::new(), false),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn area_score_is_monotonic_in_density() {
        // Adding samples (here, a second interleaved grid per face) never
        // decreases the area score
        let sparse = sampled_cube_with(10, &[0.5]);
        let dense = sampled_cube_with(10, &[0.5, 0.25]);
        let score = |ms: &ManifoldSet| {
            let cube = create_box(ms).unwrap();
            let (pa, sa) = box_area_scores(&cube).unwrap();
            pa / sa
        };
        assert!(score(&dense) >= score(&sparse));
    }

    #[test]
    fn shifted_box_scores_low() {
        let ms = sampled_cube(12);
        let ranker = ranker_for(&ms);
        // A box built from planes far away from every sample
        let far: ManifoldSet = [
            (Vector3::new(5.0, 0.5, 0.5), Vector3::x()),
            (Vector3::new(6.0, 0.5, 0.5), Vector3::x()),
            (Vector3::new(5.5, 0.0, 0.5), Vector3::y()),
            (Vector3::new(5.5, 1.0, 0.5), Vector3::y()),
            (Vector3::new(5.5, 0.5, 0.0), Vector3::z()),
            (Vector3::new(5.5, 0.5, 1.0), Vector3::z()),
        ]
        .map(|(p, n)| {
            Arc::new(Manifold::plane(p, n, PointCloud::default()))
        })
        .to_vec();
        let good = ranker.rank_set(&vec![create_box(&ms).unwrap()], false);
        let bad = ranker.rank_set(&vec![create_box(&far).unwrap()], false);
        assert!(good > bad + 1.0);
    }

    #[test]
    fn static_primitives_join_the_geometry_term() {
        let ms = sampled_cube(10);
        let pc =
            PointCloud::merged(ms.iter().map(|m| &m.pc).collect::<Vec<_>>());
        let cube = create_box(&ms).unwrap();
        let with_static = PrimitiveSetRanker::new(
            pc.clone(),
            vec![cube.clone()],
            4,
            ScoreWeights::default(),
            false,
        );
        // A lone faraway sphere: its own geometry term is zero, but the
        // static cube explains every point
        let sphere = crate::primitive::create_sphere(&Arc::new(
            Manifold::sphere(
                Vector3::new(9.0, 0.0, 0.0),
                1.0,
                PointCloud::default(),
            ),
        ))
        .unwrap();
        let with_ = with_static.rank_set(&vec![sphere.clone()], false);
        let without = with_static.rank_set(&vec![sphere], true);
        assert!(with_ > without + 0.9);
    }

    #[test]
    fn rasterised_area_of_a_full_face() {
        // A dense grid over the right triangle (0,0)-(1,0)-(0,1) covers
        // roughly half the unit square
        let tri = [
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(0.0, 1.0),
        ];
        let mut pts = vec![];
        let n = 100;
        for i in 0..n {
            for j in 0..n {
                let p = Vector2::new(
                    (i as f64 + 0.5) / n as f64,
                    (j as f64 + 0.5) / n as f64,
                );
                if p.x + p.y <= 1.0 {
                    pts.push(p);
                }
            }
        }
        let area = rasterized_area(RASTER_CELL_SIZE, &pts, &tri);
        assert!((area - 0.5).abs() < 0.06, "area was {area}");
    }
}
