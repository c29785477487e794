//! Creator for the primitive-set search
//!
//! Builds random primitive sets out of the fitted manifolds, honouring the
//! geometric assembly rules: a box needs three mutually-perpendicular
//! parallel plane pairs, a cylinder needs caps roughly perpendicular to its
//! axis.  Candidate manifolds are filtered, then picked uniformly.
use crate::{
    evo::Creator,
    manifold::{manifolds_equal, Manifold, ManifoldKind, ManifoldRef, ManifoldSet},
    primitive::{
        create_box, create_cylinder, create_sphere, Primitive, PrimitiveKind,
        PrimitiveSet,
    },
};
use nalgebra::Vector3;
use rand::{
    distributions::{Distribution, WeightedIndex},
    rngs::StdRng,
    Rng,
};

/// Tolerance when checking whether a manifold was already used
const USED_EPSILON: f64 = 1e-4;

/// Attempt budget multiplier for set creation; primitive creation is
/// rejection sampling and may legitimately fail forever on a sparse
/// manifold set
const CREATE_ATTEMPTS_PER_SLOT: usize = 8;

/// Mutation operators, in the order of
/// [`PssCreatorParams::mutation_distribution`]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum MutationKind {
    New,
    Replace,
    Modify,
    Remove,
    Add,
}

const MUTATION_KINDS: [MutationKind; 5] = [
    MutationKind::New,
    MutationKind::Replace,
    MutationKind::Modify,
    MutationKind::Remove,
    MutationKind::Add,
];

#[derive(Clone, Debug)]
pub struct PssCreatorParams {
    /// Probability of an intra-primitive crossover; reserved, the operator
    /// currently has no effect
    pub intra_crossover_prob: f64,

    /// Weights over `[NEW, REPLACE, MODIFY, REMOVE, ADD]`
    pub mutation_distribution: [f64; 5],

    pub max_mutation_iterations: usize,
    pub max_crossover_iterations: usize,
    pub max_set_size: usize,

    /// Angular tolerance for parallel / perpendicular plane tests
    pub angle_epsilon: f64,

    /// Minimum separation between the planes of a parallel pair
    pub min_parallel_plane_distance: f64,

    /// `REMOVE` is present in the distribution but disabled by default; set
    /// this to let it actually shrink sets
    pub enable_remove: bool,
}

impl Default for PssCreatorParams {
    fn default() -> Self {
        Self {
            intra_crossover_prob: 0.0,
            mutation_distribution: [0.4, 0.15, 0.15, 0.15, 0.15],
            max_mutation_iterations: 1,
            max_crossover_iterations: 1,
            max_set_size: 50,
            angle_epsilon: std::f64::consts::PI / 9.0,
            min_parallel_plane_distance: 1e-3,
            enable_remove: false,
        }
    }
}

/// Creator over sets of volumetric primitives
pub struct PrimitiveSetCreator {
    ms: ManifoldSet,
    params: PssCreatorParams,
    mutation_dist: WeightedIndex<f64>,
    available_kinds: Vec<PrimitiveKind>,
}

impl PrimitiveSetCreator {
    pub fn new(ms: ManifoldSet, params: PssCreatorParams) -> Self {
        let mut available_kinds = vec![];
        for m in &ms {
            let kind = match m.kind {
                ManifoldKind::Plane => PrimitiveKind::Box,
                ManifoldKind::Cylinder => PrimitiveKind::Cylinder,
                ManifoldKind::Sphere => PrimitiveKind::Sphere,
            };
            if !available_kinds.contains(&kind) {
                available_kinds.push(kind);
            }
        }
        let mutation_dist =
            WeightedIndex::new(params.mutation_distribution)
                .expect("mutation distribution must not be all-zero");
        Self {
            ms,
            params,
            mutation_dist,
            available_kinds,
        }
    }

    /// Picks a uniform random manifold of the given kind, subject to the
    /// assembly filters
    ///
    /// - not geometrically equal to anything in `already_used`;
    /// - if `direction` is given, oriented along it (up to sign) within the
    ///   angular tolerance;
    /// - if `min_distance_from` is given, at least that far from the given
    ///   point, measured along the candidate's own normal.
    fn pick_manifold(
        &self,
        kind: ManifoldKind,
        direction: Option<&Vector3<f64>>,
        already_used: &[ManifoldRef],
        min_distance_from: Option<(&Vector3<f64>, f64)>,
        rng: &mut StdRng,
    ) -> Option<ManifoldRef> {
        let cos_e = self.params.angle_epsilon.cos();
        let candidates: Vec<&ManifoldRef> = self
            .ms
            .iter()
            .filter(|m| {
                m.kind == kind
                    && !already_used.iter().any(|u| {
                        manifolds_equal(m, u, USED_EPSILON)
                    })
                    && direction
                        .map(|d| d.dot(&m.n).abs() > cos_e)
                        .unwrap_or(true)
                    && min_distance_from
                        .map(|(p, min_d)| {
                            (p - m.p).dot(&m.n).abs() >= min_d
                        })
                        .unwrap_or(true)
            })
            .collect();
        if candidates.is_empty() {
            None
        } else {
            Some(candidates[rng.gen_range(0..candidates.len())].clone())
        }
    }

    /// Picks a plane roughly perpendicular to every plane in `chosen`
    fn pick_perpendicular_plane(
        &self,
        chosen: &[ManifoldRef],
        rng: &mut StdRng,
    ) -> Option<ManifoldRef> {
        // Perpendicular within the tolerance: the angle between normals
        // must exceed pi/2 - epsilon
        let max_dot =
            (std::f64::consts::FRAC_PI_2 - self.params.angle_epsilon).cos();
        let candidates: Vec<&ManifoldRef> = self
            .ms
            .iter()
            .filter(|m| {
                m.kind == ManifoldKind::Plane
                    && !chosen.iter().any(|u| {
                        manifolds_equal(m, u, USED_EPSILON)
                    })
                    && chosen
                        .iter()
                        .all(|c| c.n.dot(&m.n).abs() <= max_dot)
            })
            .collect();
        if candidates.is_empty() {
            None
        } else {
            Some(candidates[rng.gen_range(0..candidates.len())].clone())
        }
    }

    /// Picks a plane parallel to `plane`, far enough away to enclose a slab
    fn pick_parallel_plane(
        &self,
        plane: &Manifold,
        already_used: &[ManifoldRef],
        rng: &mut StdRng,
    ) -> Option<ManifoldRef> {
        self.pick_manifold(
            ManifoldKind::Plane,
            Some(&plane.n),
            already_used,
            Some((&plane.p, self.params.min_parallel_plane_distance)),
            rng,
        )
    }

    /// Attempts to build one random primitive
    pub fn create_primitive(&self, rng: &mut StdRng) -> Option<Primitive> {
        if self.available_kinds.is_empty() {
            return None;
        }
        let kind = self.available_kinds
            [rng.gen_range(0..self.available_kinds.len())];
        let mut primitive = match kind {
            PrimitiveKind::Box => {
                let mut planes: Vec<ManifoldRef> = vec![];
                // First pair anchors the box, then two perpendicular pairs
                let first = self.pick_manifold(
                    ManifoldKind::Plane,
                    None,
                    &[],
                    None,
                    rng,
                )?;
                let partner =
                    self.pick_parallel_plane(&first, &[first.clone()], rng)?;
                planes.extend([first, partner]);
                for _ in 0..2 {
                    let side =
                        self.pick_perpendicular_plane(&planes, rng)?;
                    let partner = self.pick_parallel_plane(
                        &side,
                        &planes
                            .iter()
                            .cloned()
                            .chain([side.clone()])
                            .collect::<Vec<_>>(),
                        rng,
                    )?;
                    planes.extend([side, partner]);
                }
                create_box(&planes)?
            }
            PrimitiveKind::Cylinder => {
                let cyl = self.pick_manifold(
                    ManifoldKind::Cylinder,
                    None,
                    &[],
                    None,
                    rng,
                )?;
                let caps = self.pick_caps(&cyl, rng);
                create_cylinder(&cyl, &caps)?
            }
            PrimitiveKind::Sphere => {
                let m = self.pick_manifold(
                    ManifoldKind::Sphere,
                    None,
                    &[],
                    None,
                    rng,
                )?;
                create_sphere(&m)?
            }
        };
        primitive.cutout = rng.gen_bool(0.5);
        Some(primitive)
    }

    /// Samples 0-2 cap planes roughly perpendicular to the cylinder axis
    fn pick_caps(
        &self,
        cyl: &Manifold,
        rng: &mut StdRng,
    ) -> Vec<ManifoldRef> {
        let mut caps: Vec<ManifoldRef> = vec![];
        for _ in 0..rng.gen_range(0..=2u32) {
            if let Some(p) = self.pick_manifold(
                ManifoldKind::Plane,
                Some(&cyl.n),
                &caps,
                None,
                rng,
            ) {
                caps.push(p);
            }
        }
        caps
    }

    /// Rebuilds one primitive with a perturbed assembly
    ///
    /// Boxes swap one plane of a random parallel pair for another parallel
    /// plane; cylinders resample their cap set; spheres have nothing to
    /// vary.  Returns the input unchanged when no variation is possible.
    pub fn mutate_primitive(
        &self,
        p: &Primitive,
        rng: &mut StdRng,
    ) -> Primitive {
        let rebuilt = match p.kind {
            PrimitiveKind::Box => {
                let pair = rng.gen_range(0..3) * 2;
                self.pick_parallel_plane(&p.ms[pair], &p.ms, rng).and_then(
                    |new_plane| {
                        let mut planes = p.ms.clone();
                        planes[pair + 1] = new_plane;
                        create_box(&planes)
                    },
                )
            }
            PrimitiveKind::Cylinder => {
                let cyl = &p.ms[0];
                let caps = self.pick_caps(cyl, rng);
                create_cylinder(cyl, &caps)
            }
            PrimitiveKind::Sphere => None,
        };
        match rebuilt {
            Some(mut out) => {
                out.cutout = rng.gen_bool(0.5);
                out
            }
            None => p.clone(),
        }
    }
}

impl Creator for PrimitiveSetCreator {
    type Creature = PrimitiveSet;

    /// Samples a set size in `[1, max_set_size]` and fills it with random
    /// primitives, dropping failures; the attempt budget keeps a sparse
    /// manifold set from spinning forever
    fn create(&self, rng: &mut StdRng) -> PrimitiveSet {
        let size = rng.gen_range(1..=self.params.max_set_size);
        let mut ps = PrimitiveSet::new();
        let mut attempts = size * CREATE_ATTEMPTS_PER_SLOT;
        while ps.len() < size && attempts > 0 {
            attempts -= 1;
            if let Some(p) = self.create_primitive(rng) {
                ps.push(p);
            }
        }
        ps
    }

    fn mutate(&self, ps: &PrimitiveSet, rng: &mut StdRng) -> PrimitiveSet {
        let kind = MUTATION_KINDS[self.mutation_dist.sample(rng)];
        if kind == MutationKind::New || ps.is_empty() {
            return self.create(rng);
        }
        let mut out = ps.clone();
        for _ in 0..rng.gen_range(1..=self.params.max_mutation_iterations) {
            match kind {
                MutationKind::Replace => {
                    let idx = rng.gen_range(0..out.len());
                    if let Some(p) = self.create_primitive(rng) {
                        out[idx] = p;
                    }
                }
                MutationKind::Modify => {
                    let idx = rng.gen_range(0..out.len());
                    out[idx] = self.mutate_primitive(&out[idx], rng);
                }
                MutationKind::Remove => {
                    if self.params.enable_remove && out.len() > 1 {
                        let idx = rng.gen_range(0..out.len());
                        out.remove(idx);
                    }
                }
                MutationKind::Add => {
                    if let Some(p) = self.create_primitive(rng) {
                        out.push(p);
                    }
                }
                MutationKind::New => unreachable!(),
            }
        }
        out
    }

    /// Range swap: suffixes starting at a random index are copied across,
    /// clamped to the shorter set
    fn crossover(
        &self,
        a: &PrimitiveSet,
        b: &PrimitiveSet,
        rng: &mut StdRng,
    ) -> (PrimitiveSet, PrimitiveSet) {
        let mut out_a = a.clone();
        let mut out_b = b.clone();
        for _ in 0..rng.gen_range(1..=self.params.max_crossover_iterations)
        {
            if rng.gen_bool(self.params.intra_crossover_prob) {
                // Intra-primitive crossover: reserved
            } else if !a.is_empty() && !b.is_empty() {
                let idx_a = rng.gen_range(0..a.len());
                let idx_b = rng.gen_range(0..b.len());
                for j in idx_b..out_a.len().min(b.len()) {
                    out_a[j] = b[j].clone();
                }
                for j in idx_a..out_b.len().min(a.len()) {
                    out_b[j] = a[j].clone();
                }
            }
        }
        (out_a, out_b)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::PointCloud;
    use rand::SeedableRng;
    use std::sync::Arc;

    /// Planes of the axis-aligned unit cube plus a distractor plane that is
    /// parallel to the x pair but too close to pair with either
    pub fn cube_manifolds() -> ManifoldSet {
        let mut ms: ManifoldSet = [
            (Vector3::new(0.0, 0.5, 0.5), Vector3::x()),
            (Vector3::new(1.0, 0.5, 0.5), Vector3::x()),
            (Vector3::new(0.5, 0.0, 0.5), Vector3::y()),
            (Vector3::new(0.5, 1.0, 0.5), Vector3::y()),
            (Vector3::new(0.5, 0.5, 0.0), Vector3::z()),
            (Vector3::new(0.5, 0.5, 1.0), Vector3::z()),
        ]
        .map(|(p, n)| Arc::new(Manifold::plane(p, n, PointCloud::default())))
        .to_vec();
        ms.push(Arc::new(Manifold::plane(
            Vector3::new(1.0005, 0.5, 0.5),
            Vector3::x(),
            PointCloud::default(),
        )));
        ms
    }

    fn creator() -> PrimitiveSetCreator {
        PrimitiveSetCreator::new(
            cube_manifolds(),
            PssCreatorParams {
                max_set_size: 4,
                ..PssCreatorParams::default()
            },
        )
    }

    #[test]
    fn boxes_satisfy_the_assembly_invariants() {
        let c = creator();
        let mut rng = StdRng::seed_from_u64(7);
        let mut built = 0;
        for _ in 0..200 {
            let Some(p) = c.create_primitive(&mut rng) else {
                continue;
            };
            built += 1;
            assert_eq!(p.kind, PrimitiveKind::Box);
            assert_eq!(p.ms.len(), 6);
            let params = PssCreatorParams::default();
            for i in 0..3 {
                let (a, b) = (&p.ms[i * 2], &p.ms[i * 2 + 1]);
                // Pairs are parallel and separated
                assert!(
                    a.n.dot(&b.n).abs() > params.angle_epsilon.cos()
                );
                assert!(
                    (a.p - b.p).dot(&a.n).abs()
                        >= params.min_parallel_plane_distance
                );
                // Pairs are mutually perpendicular
                for j in 0..3 {
                    if i != j {
                        let max_dot = (std::f64::consts::FRAC_PI_2
                            - params.angle_epsilon)
                            .cos();
                        assert!(
                            a.n.dot(&p.ms[j * 2].n).abs() <= max_dot + 1e-9
                        );
                    }
                }
            }
            // Polytope is non-empty by construction
            let crate::implicit::ImplicitFn::Polytope(poly) = &*p.implicit
            else {
                panic!("box must carry a polytope");
            };
            assert!(!poly.empty());
        }
        assert!(built > 0, "creator never built a primitive");
    }

    #[test]
    fn distractor_plane_is_never_paired() {
        // The distractor sits 0.0005 from the x=1 plane, below the minimum
        // parallel distance, so no box may use both
        let c = creator();
        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..200 {
            if let Some(p) = c.create_primitive(&mut rng) {
                for pair in p.ms.chunks(2) {
                    let d = (pair[0].p - pair[1].p).dot(&pair[0].n).abs();
                    assert!(d >= 1e-3);
                }
            }
        }
    }

    #[test]
    fn create_fills_sets_within_budget() {
        let c = creator();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..20 {
            let ps = c.create(&mut rng);
            assert!(ps.len() <= 4);
            // The cube manifolds always admit at least one box
            assert!(!ps.is_empty());
        }
    }

    #[test]
    fn unbuildable_manifolds_give_empty_sets() {
        // A single plane can never form a box
        let ms = vec![cube_manifolds()[0].clone()];
        let c = PrimitiveSetCreator::new(ms, PssCreatorParams::default());
        let mut rng = StdRng::seed_from_u64(10);
        assert!(c.create(&mut rng).is_empty());
    }

    #[test]
    fn remove_is_disabled_by_default() {
        let c = PrimitiveSetCreator::new(
            cube_manifolds(),
            PssCreatorParams {
                mutation_distribution: [0.0, 0.0, 0.0, 1.0, 0.0],
                max_set_size: 4,
                ..PssCreatorParams::default()
            },
        );
        let mut rng = StdRng::seed_from_u64(11);
        let ps = c.create(&mut rng);
        let n = ps.len();
        for _ in 0..20 {
            assert_eq!(c.mutate(&ps, &mut rng).len(), n);
        }

        let c = PrimitiveSetCreator::new(
            cube_manifolds(),
            PssCreatorParams {
                mutation_distribution: [0.0, 0.0, 0.0, 1.0, 0.0],
                max_set_size: 4,
                enable_remove: true,
                ..PssCreatorParams::default()
            },
        );
        let ps: PrimitiveSet = std::iter::repeat_with(|| {
            c.create_primitive(&mut rng)
        })
        .flatten()
        .take(3)
        .collect();
        let out = c.mutate(&ps, &mut rng);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn cylinder_caps_are_parallel_and_spaced() {
        // A cylinder manifold along z with three candidate cap planes, one
        // of them sideways and thus never eligible
        let rows: Vec<[f64; 6]> = (0..=10)
            .map(|i| [0.5, 0.0, i as f64 * 0.3, 1.0, 0.0, 0.0])
            .collect();
        let ms: ManifoldSet = vec![
            Arc::new(Manifold::cylinder(
                Vector3::zeros(),
                Vector3::z(),
                0.5,
                PointCloud::from_rows(&rows),
            )),
            Arc::new(Manifold::plane(
                Vector3::new(0.0, 0.0, 0.0),
                -Vector3::z(),
                PointCloud::default(),
            )),
            Arc::new(Manifold::plane(
                Vector3::new(0.0, 0.0, 3.0),
                Vector3::z(),
                PointCloud::default(),
            )),
            Arc::new(Manifold::plane(
                Vector3::new(1.0, 0.0, 1.5),
                Vector3::x(),
                PointCloud::default(),
            )),
        ];
        let c = PrimitiveSetCreator::new(ms, PssCreatorParams::default());
        let mut rng = StdRng::seed_from_u64(13);
        let mut saw_two_caps = false;
        for _ in 0..100 {
            let Some(p) = c.create_primitive(&mut rng) else {
                continue;
            };
            assert_eq!(p.kind, PrimitiveKind::Cylinder);
            if p.ms.len() == 3 {
                saw_two_caps = true;
                let (cap0, cap1) = (&p.ms[1], &p.ms[2]);
                // Caps are parallel within the angular tolerance
                let cos_e =
                    PssCreatorParams::default().angle_epsilon.cos();
                assert!(cap0.n.dot(&cap1.n).abs() > cos_e);
                // The reported height is the axis distance of the caps
                let axis = &p.ms[0].n;
                let axis_dist =
                    ((cap1.p - cap0.p).dot(axis)).abs();
                let crate::implicit::ImplicitFn::Cylinder {
                    height, ..
                } = *p.implicit
                else {
                    panic!("cylinder must carry a cylinder field");
                };
                assert!((height - axis_dist).abs() < 1e-9);
                // The sideways plane never serves as a cap
                assert!(cap0.n.dot(axis).abs() > cos_e);
                assert!(cap1.n.dot(axis).abs() > cos_e);
            }
        }
        assert!(saw_two_caps, "creator never sampled both caps");
    }

    #[test]
    fn crossover_swaps_suffixes() {
        let c = creator();
        let mut rng = StdRng::seed_from_u64(12);
        let a = c.create(&mut rng);
        let b = c.create(&mut rng);
        let (out_a, out_b) = c.crossover(&a, &b, &mut rng);
        // Sizes never change under the range swap
        assert_eq!(out_a.len(), a.len());
        assert_eq!(out_b.len(), b.len());
    }
}
