//! Volumetric primitives assembled from fitted manifolds
//!
//! A [`Primitive`] is a closed solid built out of one or more manifolds: a
//! box from six planes, a capped cylinder from a cylindrical manifold plus up
//! to two cap planes, or a sphere.  Construction enforces the geometric
//! invariants and returns `None` for anything degenerate (empty polytope,
//! non-finite height, zero radius); callers retry or drop.
//!
//! Primitives are immutable once constructed; mutation always builds a new
//! one.
use crate::{
    geometry::{Aabb, SurfacePoint},
    implicit::{HalfSpace, ImplicitFn, Polytope},
    manifold::{Manifold, ManifoldKind, ManifoldRef, ManifoldSet},
};
use nalgebra::{Isometry3, Rotation3, Translation3, UnitQuaternion, Vector3};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PrimitiveKind {
    Box,
    Cylinder,
    Sphere,
}

impl std::fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrimitiveKind::Box => write!(f, "box"),
            PrimitiveKind::Cylinder => write!(f, "cylinder"),
            PrimitiveKind::Sphere => write!(f, "sphere"),
        }
    }
}

/// A closed volumetric body
#[derive(Clone, Debug)]
pub struct Primitive {
    pub kind: PrimitiveKind,

    /// The solid's signed-distance field
    pub implicit: Arc<ImplicitFn>,

    /// The manifolds this primitive was assembled from
    ///
    /// For boxes these are the six planes as three parallel pairs at indices
    /// `(0,1)`, `(2,3)`, `(4,5)`, with each pair's normals adjusted to face
    /// away from the interior.  For cylinders, `ms[0]` is the cylindrical
    /// manifold and `ms[1..]` are the cap planes.
    pub ms: ManifoldSet,

    /// Subtract this solid from the evolving union instead of adding it
    pub cutout: bool,

    pub name: String,
}

pub type PrimitiveRef = Arc<Primitive>;

/// An ordered sequence of primitives, the creature of the primitive-set
/// search.  Interpreted as "union of the non-cutouts minus union of the
/// cutouts".
pub type PrimitiveSet = Vec<Primitive>;

impl Hash for Primitive {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.cutout.hash(state);
        self.implicit.hash_shape(state);
    }
}

impl Primitive {
    fn assemble(
        kind: PrimitiveKind,
        implicit: ImplicitFn,
        ms: ManifoldSet,
    ) -> Self {
        let mut h = DefaultHasher::new();
        implicit.hash_shape(&mut h);
        let name = format!("{}_{:08x}", kind, h.finish() as u32);
        Self {
            kind,
            implicit: Arc::new(implicit),
            ms,
            cutout: false,
            name,
        }
    }

    /// Returns a copy with the given cutout flag
    pub fn with_cutout(&self, cutout: bool) -> Self {
        let mut out = self.clone();
        out.cutout = cutout;
        out
    }

    /// Shape identity (ignores the cutout flag), used to key score caches
    pub fn shape_hash(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.implicit.hash_shape(&mut h);
        h.finish()
    }

    /// All supporting surface samples across the assembled manifolds
    pub fn surface_points(&self) -> impl Iterator<Item = &SurfacePoint> {
        self.ms.iter().flat_map(|m| m.pc.iter())
    }

    pub fn num_surface_points(&self) -> usize {
        self.ms.iter().map(|m| m.pc.len()).sum()
    }

    pub fn aabb(&self) -> Option<Aabb> {
        self.implicit.aabb()
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Assembles a box primitive from exactly six planes
///
/// The planes must come as three parallel pairs `(0,1)`, `(2,3)`, `(4,5)`.
/// Within each pair the normals are re-oriented so that each plane's normal
/// points away from its partner (and hence out of the box).  Returns `None`
/// if the plane count is off or the resulting half-space intersection is
/// empty.
pub fn create_box(planes: &[ManifoldRef]) -> Option<Primitive> {
    if planes.len() != 6 {
        return None;
    }

    let mut ms = ManifoldSet::new();
    for pair in planes.chunks(2) {
        let (m1, m2) = (&pair[0], &pair[1]);
        // Re-orient so the pair encloses the slab between the two planes
        let d1 = (m2.p - m1.p).dot(&m2.n) / m1.n.dot(&m2.n);
        let d2 = (m1.p - m2.p).dot(&m1.n) / m2.n.dot(&m1.n);
        ms.push(Arc::new(if d1 >= 0.0 {
            m1.flipped()
        } else {
            (**m1).clone()
        }));
        ms.push(Arc::new(if d2 >= 0.0 {
            m2.flipped()
        } else {
            (**m2).clone()
        }));
    }

    let polytope = Polytope::new(
        ms.iter().map(|m| HalfSpace::new(m.p, m.n)).collect(),
    );
    if polytope.empty() {
        return None;
    }

    Some(Primitive::assemble(
        PrimitiveKind::Box,
        ImplicitFn::Polytope(polytope),
        ms,
    ))
}

/// Assembles a capped cylinder from a cylindrical manifold and 0–2 caps
///
/// - two caps: the height is the distance between the axis/cap intersection
///   points and the solid is centred between them;
/// - one cap: a second cap is synthesised through the supporting points'
///   extremum on the far side of the axis, then handled as two;
/// - no caps: height and centre are estimated from the supporting points'
///   extent along the axis.
pub fn create_cylinder(
    m: &ManifoldRef,
    caps: &[ManifoldRef],
) -> Option<Primitive> {
    if m.kind != ManifoldKind::Cylinder || m.radius() <= 0.0 {
        return None;
    }
    match caps.len() {
        2 => {
            // Intersect the axis with both cap planes
            let i0 = axis_plane_intersection(m, &caps[0])?;
            let i1 = axis_plane_intersection(m, &caps[1])?;
            let height = (i0 - i1).norm();
            if !height.is_finite() || height <= f64::EPSILON {
                return None;
            }
            let pos = i0 + (i1 - i0) / 2.0;
            let frame = axis_frame(&pos, &m.n);
            let mut ms = vec![m.clone()];
            ms.extend(caps.iter().cloned());
            Some(Primitive::assemble(
                PrimitiveKind::Cylinder,
                ImplicitFn::Cylinder {
                    frame,
                    radius: m.radius(),
                    height,
                },
                ms,
            ))
        }
        1 => {
            let second =
                Arc::new(estimate_second_cylinder_cap(m, &caps[0])?);
            create_cylinder(m, &[caps[0].clone(), second])
        }
        0 => {
            let (min_t, max_t) = axis_extent(m)?;
            let height = max_t - min_t;
            if !height.is_finite() || height <= f64::EPSILON {
                return None;
            }
            let pos = m.p + m.n * (min_t + max_t) / 2.0;
            let frame = axis_frame(&pos, &m.n);
            Some(Primitive::assemble(
                PrimitiveKind::Cylinder,
                ImplicitFn::Cylinder {
                    frame,
                    radius: m.radius(),
                    height,
                },
                vec![m.clone()],
            ))
        }
        _ => None,
    }
}

/// Assembles a sphere primitive
pub fn create_sphere(m: &ManifoldRef) -> Option<Primitive> {
    if m.kind != ManifoldKind::Sphere || m.radius() <= 0.0 {
        return None;
    }
    Some(Primitive::assemble(
        PrimitiveKind::Sphere,
        ImplicitFn::Sphere {
            center: m.p,
            radius: m.radius(),
        },
        vec![m.clone()],
    ))
}

/// Estimates a cylinder's height from its supporting points' extent along
/// the axis
pub fn estimate_cylinder_height(m: &Manifold) -> Option<f64> {
    axis_extent(m).map(|(min_t, max_t)| max_t - min_t)
}

/// Synthesises the missing cap of a one-capped cylinder
///
/// The new cap passes through whichever corner of the supporting points'
/// bounding box lies farther from the existing cap, with the opposite
/// orientation.
pub fn estimate_second_cylinder_cap(
    m: &Manifold,
    first: &Manifold,
) -> Option<Manifold> {
    let aabb = m.pc.aabb()?;
    let p = if (first.p - aabb.min).norm() > (first.p - aabb.max).norm() {
        aabb.min
    } else {
        aabb.max
    };
    Some(Manifold::plane(p, -first.n, Default::default()))
}

/// Intersection of the cylinder axis with a plane, `None` when parallel
fn axis_plane_intersection(
    m: &Manifold,
    plane: &Manifold,
) -> Option<Vector3<f64>> {
    let denom = m.n.dot(&plane.n);
    if denom.abs() < 1e-12 {
        return None;
    }
    let d = (plane.p - m.p).dot(&plane.n) / denom;
    Some(m.p + m.n * d)
}

/// Range of the supporting points projected onto the axis
fn axis_extent(m: &Manifold) -> Option<(f64, f64)> {
    let mut range: Option<(f64, f64)> = None;
    for pt in m.pc.iter() {
        let t = (pt.pos - m.p).dot(&m.n);
        range = Some(match range {
            None => (t, t),
            Some((lo, hi)) => (lo.min(t), hi.max(t)),
        });
    }
    range
}

/// World-from-local frame with the local y axis along `axis`
fn axis_frame(pos: &Vector3<f64>, axis: &Vector3<f64>) -> Isometry3<f64> {
    let up = if axis.z.abs() > 0.99 {
        Vector3::x()
    } else {
        Vector3::z()
    };
    let f = axis.normalize();
    let r = f.cross(&up).normalize();
    let u = r.cross(&f);
    let rot = Rotation3::from_basis_unchecked(&[r, f, u]);
    Isometry3::from_parts(
        Translation3::from(*pos),
        UnitQuaternion::from_rotation_matrix(&rot),
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::PointCloud;

    pub fn unit_cube_planes() -> Vec<ManifoldRef> {
        // Deliberately inconsistent orientations; construction fixes them
        [
            (Vector3::new(0.0, 0.5, 0.5), Vector3::x()),
            (Vector3::new(1.0, 0.5, 0.5), Vector3::x()),
            (Vector3::new(0.5, 0.0, 0.5), -Vector3::y()),
            (Vector3::new(0.5, 1.0, 0.5), -Vector3::y()),
            (Vector3::new(0.5, 0.5, 0.0), -Vector3::z()),
            (Vector3::new(0.5, 0.5, 1.0), Vector3::z()),
        ]
        .map(|(p, n)| Arc::new(Manifold::plane(p, n, PointCloud::default())))
        .to_vec()
    }

    #[test]
    fn box_pairs_face_outward() {
        let b = create_box(&unit_cube_planes()).unwrap();
        assert_eq!(b.kind, PrimitiveKind::Box);
        assert_eq!(b.ms.len(), 6);
        for pair in b.ms.chunks(2) {
            // Within a pair, each normal points away from the partner
            assert!((pair[1].p - pair[0].p).dot(&pair[0].n) < 0.0);
            assert!((pair[0].p - pair[1].p).dot(&pair[1].n) < 0.0);
        }
        // Outward normals make the interior negative
        assert!(b.implicit.signed_distance(&Vector3::repeat(0.5)) < 0.0);
        assert!(
            b.implicit.signed_distance(&Vector3::new(2.0, 0.5, 0.5)) > 0.0
        );
    }

    #[test]
    fn degenerate_box_is_rejected() {
        let mut planes = unit_cube_planes();
        planes.truncate(5);
        assert!(create_box(&planes).is_none());

        // Two disjoint parallel slabs can never intersect
        let mut planes = unit_cube_planes();
        planes[2] = Arc::new(Manifold::plane(
            Vector3::new(2.0, 0.5, 0.5),
            Vector3::x(),
            PointCloud::default(),
        ));
        planes[3] = Arc::new(Manifold::plane(
            Vector3::new(3.0, 0.5, 0.5),
            Vector3::x(),
            PointCloud::default(),
        ));
        assert!(create_box(&planes).is_none());
    }

    fn capped_cylinder_manifolds(
    ) -> (ManifoldRef, ManifoldRef, ManifoldRef) {
        let cyl = Arc::new(Manifold::cylinder(
            Vector3::zeros(),
            Vector3::z(),
            0.5,
            PointCloud::default(),
        ));
        let bottom = Arc::new(Manifold::plane(
            Vector3::new(0.0, 0.0, -1.0),
            -Vector3::z(),
            PointCloud::default(),
        ));
        let top = Arc::new(Manifold::plane(
            Vector3::new(0.0, 0.0, 2.0),
            Vector3::z(),
            PointCloud::default(),
        ));
        (cyl, bottom, top)
    }

    #[test]
    fn cylinder_two_caps() {
        let (cyl, bottom, top) = capped_cylinder_manifolds();
        let c = create_cylinder(&cyl, &[bottom, top]).unwrap();
        let ImplicitFn::Cylinder { height, .. } = *c.implicit else {
            panic!("expected cylinder field");
        };
        assert!((height - 3.0).abs() < 1e-12);
        // Centre is halfway between the caps
        assert!(c
            .implicit
            .signed_distance(&Vector3::new(0.0, 0.0, 0.5))
            < 0.0);
        assert!(c.implicit.signed_distance(&Vector3::zeros()) < 0.0);
        assert!(
            c.implicit.signed_distance(&Vector3::new(0.0, 0.0, 2.5)) > 0.0
        );
    }

    #[test]
    fn cylinder_zero_caps_estimates_height() {
        let rows: Vec<[f64; 6]> = (0..=10)
            .map(|i| {
                let z = i as f64 * 0.2;
                [0.5, 0.0, z, 1.0, 0.0, 0.0]
            })
            .collect();
        let cyl = Arc::new(Manifold::cylinder(
            Vector3::zeros(),
            Vector3::z(),
            0.5,
            PointCloud::from_rows(&rows),
        ));
        let c = create_cylinder(&cyl, &[]).unwrap();
        let ImplicitFn::Cylinder { height, .. } = *c.implicit else {
            panic!("expected cylinder field");
        };
        assert!((height - 2.0).abs() < 1e-12);
        assert!(c.implicit.signed_distance(&Vector3::new(0.0, 0.0, 1.0)) < 0.0);

        // No supporting points at all: degenerate
        let bare = Arc::new(Manifold::cylinder(
            Vector3::zeros(),
            Vector3::z(),
            0.5,
            PointCloud::default(),
        ));
        assert!(create_cylinder(&bare, &[]).is_none());
    }

    #[test]
    fn cylinder_one_cap_synthesises_partner() {
        let rows: Vec<[f64; 6]> = (0..=10)
            .map(|i| {
                let z = i as f64 * 0.2;
                [0.5, 0.0, z, 1.0, 0.0, 0.0]
            })
            .collect();
        let cyl = Arc::new(Manifold::cylinder(
            Vector3::zeros(),
            Vector3::z(),
            0.5,
            PointCloud::from_rows(&rows),
        ));
        let cap = Arc::new(Manifold::plane(
            Vector3::new(0.0, 0.0, 2.0),
            Vector3::z(),
            PointCloud::default(),
        ));
        let c = create_cylinder(&cyl, &[cap]).unwrap();
        assert_eq!(c.ms.len(), 3);
        let ImplicitFn::Cylinder { height, .. } = *c.implicit else {
            panic!("expected cylinder field");
        };
        // The synthesised cap passes through the far point extremum (z = 0)
        assert!((height - 2.0).abs() < 1e-9);
    }

    #[test]
    fn sphere_rejects_zero_radius() {
        let m = Arc::new(Manifold::sphere(
            Vector3::zeros(),
            0.0,
            PointCloud::default(),
        ));
        assert!(create_sphere(&m).is_none());
    }

    #[test]
    fn hash_tracks_shape_and_cutout() {
        let b = create_box(&unit_cube_planes()).unwrap();
        let same = create_box(&unit_cube_planes()).unwrap();
        let hash = |p: &Primitive| {
            let mut h = DefaultHasher::new();
            p.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&b), hash(&same));
        assert_eq!(b.shape_hash(), same.shape_hash());
        let cut = b.with_cutout(true);
        assert_ne!(hash(&b), hash(&cut));
        assert_eq!(b.shape_hash(), cut.shape_hash());
    }
}
