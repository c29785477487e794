//! Ghost planes
//!
//! Fitted plane sets often miss the sides of thin features, so no box can
//! close around them.  This hook widens the search space: every real plane
//! contributes the four side planes of its supporting points' minimum-area
//! bounding rectangle.  Near-duplicates of existing planes are filtered out
//! again before the creator sees them.
//!
//! Disabled by default.
use crate::{
    geometry::PointCloud,
    manifold::{Manifold, ManifoldKind, ManifoldSet},
};
use log::debug;
use nalgebra::{Rotation2, Vector2};
use std::sync::Arc;

/// Convex hull of a 2D point set (monotone chain), counter-clockwise
pub fn convex_hull(points: &[Vector2<f64>]) -> Vec<Vector2<f64>> {
    if points.len() < 3 {
        return points.to_vec();
    }
    let mut pts = points.to_vec();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup_by(|a, b| (*a - *b).norm() < 1e-12);

    let cross = |o: &Vector2<f64>, a: &Vector2<f64>, b: &Vector2<f64>| {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    };
    let mut hull: Vec<Vector2<f64>> = vec![];
    for round in 0..2 {
        let start = hull.len();
        let iter: Box<dyn Iterator<Item = &Vector2<f64>>> = if round == 0 {
            Box::new(pts.iter())
        } else {
            Box::new(pts.iter().rev())
        };
        for p in iter {
            while hull.len() >= start + 2
                && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p)
                    <= 0.0
            {
                hull.pop();
            }
            hull.push(*p);
        }
        hull.pop();
    }
    hull
}

/// Minimum-area bounding rectangle of a hull (rotating calipers)
///
/// Returns the four corners in order; `None` for degenerate hulls.
pub fn min_area_rectangle(
    hull: &[Vector2<f64>],
) -> Option<[Vector2<f64>; 4]> {
    if hull.len() < 3 {
        return None;
    }
    let mut best: Option<(f64, [Vector2<f64>; 4])> = None;
    for (i, a) in hull.iter().enumerate() {
        let b = &hull[(i + 1) % hull.len()];
        let edge = b - a;
        if edge.norm() < 1e-12 {
            continue;
        }
        // Rotate so this edge is horizontal, take the bounding box
        let rot = Rotation2::new(edge.y.atan2(edge.x)).inverse();
        let rotated: Vec<Vector2<f64>> =
            hull.iter().map(|p| rot * p).collect();
        let min = rotated
            .iter()
            .fold(rotated[0], |m, p| m.inf(p));
        let max = rotated
            .iter()
            .fold(rotated[0], |m, p| m.sup(p));
        let area = (max.x - min.x) * (max.y - min.y);
        if best.map(|(a, _)| area < a).unwrap_or(true) {
            let inv = rot.inverse();
            best = Some((
                area,
                [
                    inv * Vector2::new(min.x, min.y),
                    inv * Vector2::new(max.x, min.y),
                    inv * Vector2::new(max.x, max.y),
                    inv * Vector2::new(min.x, max.y),
                ],
            ));
        }
    }
    best.map(|(_, corners)| corners)
}

/// Four side planes of one plane's minimum bounding rectangle
fn ghost_planes_for(plane: &Manifold) -> ManifoldSet {
    let pts: Vec<Vector2<f64>> =
        plane.pc.iter().map(|p| plane.to_2d(&p.pos)).collect();
    let hull = convex_hull(&pts);
    let Some(rect) = min_area_rectangle(&hull) else {
        debug!("no bounding rectangle for plane, skipping ghosts");
        return vec![];
    };
    let corners = rect.map(|c| plane.to_3d(&c));
    (0..4)
        .map(|i| {
            let a = corners[i];
            let b = corners[(i + 1) % 4];
            let n = (a - b).cross(&plane.n).normalize();
            let p = a - (a - b) / 2.0;
            Arc::new(Manifold::plane(p, n, PointCloud::default()))
        })
        .collect()
}

/// Removes planes that nearly coincide with an already-kept plane
///
/// Two planes coincide when their anchor points are within
/// `distance_threshold` along the kept plane's normal and their normals are
/// within `angle_threshold`.
pub fn filter_close_planes(
    ms: &ManifoldSet,
    distance_threshold: f64,
    angle_threshold: f64,
) -> ManifoldSet {
    let mut out = ManifoldSet::new();
    for m in ms {
        if m.kind != ManifoldKind::Plane {
            out.push(m.clone());
            continue;
        }
        let close = out.iter().any(|kept| {
            kept.kind == ManifoldKind::Plane
                && (m.p - kept.p).dot(&kept.n).abs() < distance_threshold
                && m.n.dot(&kept.n).clamp(-1.0, 1.0).acos()
                    < angle_threshold
        });
        if close {
            debug!("filtered a near-duplicate plane");
        } else {
            out.push(m.clone());
        }
    }
    out
}

/// Augments a manifold set with ghost planes
///
/// `distance_threshold` is relative to the scan's bounding-box diagonal.
pub fn generate_ghost_planes(
    pc: &PointCloud,
    ms: &ManifoldSet,
    distance_threshold: f64,
    angle_threshold: f64,
) -> ManifoldSet {
    let mut out = ms.clone();
    for m in ms {
        if m.kind == ManifoldKind::Plane {
            out.extend(ghost_planes_for(m));
        }
    }
    filter_close_planes(
        &out,
        distance_threshold * pc.aabb_len(),
        angle_threshold,
    )
}
