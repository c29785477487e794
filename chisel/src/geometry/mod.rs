//! Shared geometric plumbing: oriented point clouds, axis-aligned bounds,
//! and indexed triangle meshes
use nalgebra::{Vector2, Vector3};
use std::io::{BufWriter, Write};

/// A single oriented surface sample
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SurfacePoint {
    pub pos: Vector3<f64>,

    /// Unit surface normal at [`pos`](Self::pos)
    pub normal: Vector3<f64>,
}

/// A dense set of oriented surface samples
///
/// This is the row matrix `(x, y, z, nx, ny, nz)` of the input data,
/// stored as a flat list of [`SurfacePoint`] values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointCloud {
    points: Vec<SurfacePoint>,
}

impl PointCloud {
    pub fn new(points: Vec<SurfacePoint>) -> Self {
        Self { points }
    }

    /// Builds a cloud from raw `(x, y, z, nx, ny, nz)` rows
    pub fn from_rows(rows: &[[f64; 6]]) -> Self {
        Self {
            points: rows
                .iter()
                .map(|r| SurfacePoint {
                    pos: Vector3::new(r[0], r[1], r[2]),
                    normal: Vector3::new(r[3], r[4], r[5]),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SurfacePoint> {
        self.points.iter()
    }

    pub fn push(&mut self, p: SurfacePoint) {
        self.points.push(p);
    }

    /// Concatenates a set of clouds into one
    pub fn merged<'a, T: IntoIterator<Item = &'a PointCloud>>(
        clouds: T,
    ) -> Self {
        let mut points = vec![];
        for c in clouds {
            points.extend_from_slice(&c.points);
        }
        Self { points }
    }

    /// Bounding box of the sample positions, or `None` for an empty cloud
    pub fn aabb(&self) -> Option<Aabb> {
        Aabb::from_points(self.points.iter().map(|p| p.pos))
    }

    /// Diagonal length of the bounding box (0 for an empty cloud)
    pub fn aabb_len(&self) -> f64 {
        self.aabb().map(|b| b.diagonal()).unwrap_or(0.0)
    }
}

////////////////////////////////////////////////////////////////////////////////

/// An axis-aligned bounding box
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vector3<f64>,
    pub max: Vector3<f64>,
}

impl Aabb {
    pub fn new(min: Vector3<f64>, max: Vector3<f64>) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point, or `None` for an empty iterator
    pub fn from_points<T: IntoIterator<Item = Vector3<f64>>>(
        points: T,
    ) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut out = Self {
            min: first,
            max: first,
        };
        for p in iter {
            out.min = out.min.inf(&p);
            out.max = out.max.sup(&p);
        }
        Some(out)
    }

    pub fn center(&self) -> Vector3<f64> {
        (self.min + self.max) / 2.0
    }

    pub fn diagonal(&self) -> f64 {
        (self.max - self.min).norm()
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    /// Intersection of two boxes, or `None` if they are disjoint
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let min = self.min.sup(&other.min);
        let max = self.max.inf(&other.max);
        (min.x <= max.x && min.y <= max.y && min.z <= max.z)
            .then_some(Self { min, max })
    }

    /// Checks for overlap, with both boxes grown by `margin` on every side
    pub fn intersects(&self, other: &Self, margin: f64) -> bool {
        (0..3).all(|i| {
            self.min[i] - margin <= other.max[i] + margin
                && other.min[i] - margin <= self.max[i] + margin
        })
    }

    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    pub fn grown(&self, margin: f64) -> Self {
        let m = Vector3::repeat(margin);
        Self {
            min: self.min - m,
            max: self.max + m,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

/// An indexed triangle mesh
#[derive(Clone, Debug, Default)]
pub struct TriMesh {
    /// Vertex positions
    pub vertices: Vec<Vector3<f64>>,

    /// Triangles, as indexes into [`self.vertices`](Self::vertices)
    pub triangles: Vec<[usize; 3]>,
}

impl TriMesh {
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Appends another mesh, fixing up vertex indexes
    pub fn append(&mut self, other: &TriMesh) {
        let offset = self.vertices.len();
        self.vertices.extend_from_slice(&other.vertices);
        self.triangles.extend(
            other
                .triangles
                .iter()
                .map(|t| [t[0] + offset, t[1] + offset, t[2] + offset]),
        );
    }

    /// Writes the mesh as a Wavefront OBJ to the given output
    pub fn write_obj<F: Write>(&self, out: &mut F) -> Result<(), crate::Error> {
        // Many small writes, typically to a file, so buffer them
        let mut out = BufWriter::new(out);
        for v in &self.vertices {
            writeln!(out, "v {} {} {}", v.x, v.y, v.z)?;
        }
        for t in &self.triangles {
            // OBJ indexes are 1-based
            writeln!(out, "f {} {} {}", t[0] + 1, t[1] + 1, t[2] + 1)?;
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Builds an orthonormal basis `(u, v)` spanning the plane with unit normal
/// `n`, such that `(u, v, n)` is right-handed
pub fn plane_basis(n: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let a = if n.x.abs() > 0.9 {
        Vector3::y()
    } else {
        Vector3::x()
    };
    let u = n.cross(&a).normalize();
    let v = n.cross(&u);
    (u, v)
}

/// Signed area of a 2D polygon (positive for counter-clockwise winding)
pub fn polygon_area(pts: &[Vector2<f64>]) -> f64 {
    let mut sum = 0.0;
    for (i, p) in pts.iter().enumerate() {
        let q = &pts[(i + 1) % pts.len()];
        sum += p.x * q.y - q.x * p.y;
    }
    sum / 2.0
}

/// Checks whether `p` is inside (or on the boundary of) the triangle `abc`
pub fn point_in_triangle(
    p: &Vector2<f64>,
    a: &Vector2<f64>,
    b: &Vector2<f64>,
    c: &Vector2<f64>,
) -> bool {
    let sign = |p0: &Vector2<f64>, p1: &Vector2<f64>, p2: &Vector2<f64>| {
        (p1.x - p0.x) * (p2.y - p0.y) - (p2.x - p0.x) * (p1.y - p0.y)
    };
    let d0 = sign(a, b, p);
    let d1 = sign(b, c, p);
    let d2 = sign(c, a, p);
    let has_neg = d0 < 0.0 || d1 < 0.0 || d2 < 0.0;
    let has_pos = d0 > 0.0 || d1 > 0.0 || d2 > 0.0;
    !(has_neg && has_pos)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn aabb_from_points() {
        let b = Aabb::from_points(
            [
                Vector3::new(1.0, -1.0, 0.0),
                Vector3::new(-2.0, 3.0, 0.5),
                Vector3::new(0.0, 0.0, 0.0),
            ]
            .into_iter(),
        )
        .unwrap();
        assert_eq!(b.min, Vector3::new(-2.0, -1.0, 0.0));
        assert_eq!(b.max, Vector3::new(1.0, 3.0, 0.5));
        assert!(Aabb::from_points([].into_iter()).is_none());
    }

    #[test]
    fn aabb_overlap() {
        let a = Aabb::new(Vector3::zeros(), Vector3::repeat(1.0));
        let b = Aabb::new(Vector3::repeat(2.0), Vector3::repeat(3.0));
        assert!(!a.intersects(&b, 0.0));
        assert!(a.intersects(&b, 0.5));
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn triangle_containment() {
        let a = Vector2::new(0.0, 0.0);
        let b = Vector2::new(1.0, 0.0);
        let c = Vector2::new(0.0, 1.0);
        assert!(point_in_triangle(&Vector2::new(0.25, 0.25), &a, &b, &c));
        assert!(point_in_triangle(&Vector2::new(0.5, 0.5), &a, &b, &c));
        assert!(!point_in_triangle(&Vector2::new(0.6, 0.6), &a, &b, &c));
        // Winding order doesn't matter
        assert!(point_in_triangle(&Vector2::new(0.25, 0.25), &c, &b, &a));
    }

    #[test]
    fn shoelace_area() {
        let square = [
            Vector2::new(0.0, 0.0),
            Vector2::new(2.0, 0.0),
            Vector2::new(2.0, 2.0),
            Vector2::new(0.0, 2.0),
        ];
        assert_eq!(polygon_area(&square), 4.0);
        let mut rev = square;
        rev.reverse();
        assert_eq!(polygon_area(&rev), -4.0);
    }

    #[test]
    fn basis_is_orthonormal() {
        for n in [Vector3::x(), Vector3::y(), Vector3::z()] {
            let (u, v) = plane_basis(&n);
            assert!((u.norm() - 1.0).abs() < 1e-12);
            assert!((v.norm() - 1.0).abs() < 1e-12);
            assert!(u.dot(&v).abs() < 1e-12);
            assert!(u.dot(&n).abs() < 1e-12);
            assert!((u.cross(&v) - n).norm() < 1e-12);
        }
    }
}
