//! Reconstruction of CSG expression trees from fitted surface primitives.
//!
//! Given a set of fitted manifolds (planes, cylinders, spheres) and the point
//! cloud they were extracted from, this crate searches for a constructive
//! solid geometry expression whose signed-distance field reproduces the
//! observed surface.  Two evolutionary searches do the heavy lifting:
//!
//! - [`pss`] proposes *sets of volumetric primitives* (boxes assembled from
//!   six planes, capped cylinders, spheres), scored by how well sample points
//!   sit on primitive surfaces and by how much primitive face area the points
//!   actually witness.
//! - [`cns`] runs genetic programming over *CSG expression trees* whose
//!   leaves are primitives and whose internal nodes are boolean operators,
//!   scored by in/out consistency minus a size penalty.
//!
//! Both are instances of the generic engine in [`evo`].  The [`pipeline`]
//! module wires everything into the load → dedupe → decompose → optimise →
//! emit driver used by the CLI.
//!
//! ```
//! use chisel::geometry::PointCloud;
//! use chisel::manifold::Manifold;
//! use chisel::primitive::create_sphere;
//! use nalgebra::Vector3;
//! use std::sync::Arc;
//!
//! let m = Arc::new(Manifold::sphere(
//!     Vector3::zeros(), 1.0, PointCloud::default(),
//! ));
//! let p = create_sphere(&m).unwrap();
//! let (d, g) = p.implicit.signed_distance_and_gradient(
//!     &Vector3::new(2.0, 0.0, 0.0),
//! );
//! assert!((d - 1.0).abs() < 1e-12);
//! assert!((g - Vector3::x()).norm() < 1e-12);
//! ```

mod error;
pub use error::Error;

pub mod cns;
pub mod csg;
pub mod evo;
pub mod geometry;
pub mod graph;
pub mod implicit;
pub mod manifold;
pub mod pipeline;
pub mod primitive;
pub mod pss;
