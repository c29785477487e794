//! JSON serialization of CSG trees
//!
//! The on-disk schema is a nested object per node:
//!
//! ```text
//! { "op": "Union" | "Intersection" | "Difference" | "Complement"
//!        | "Geometry" | "Noop",
//!   "name": "...",
//!   "childs": [ ... ],
//!   "params": { "kind": ..., "transform": 4x4, "r": ..., "h": ...,
//!               "planes": [{"p": [..], "n": [..]}, ..] } }
//! ```
//!
//! `params` is only present on Geometry leaves.
use super::{CsgNode, CsgOp};
use crate::{
    implicit::ImplicitFn,
    manifold::Manifold,
    primitive::{create_box, Primitive, PrimitiveKind},
    Error,
};
use nalgebra::{Matrix4, Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Serialize, Deserialize)]
struct JsonNode {
    op: String,
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    childs: Vec<JsonNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<JsonParams>,
}

#[derive(Serialize, Deserialize)]
struct JsonParams {
    kind: String,
    transform: [[f64; 4]; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    r: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    h: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    planes: Option<Vec<JsonPlane>>,
}

#[derive(Serialize, Deserialize)]
struct JsonPlane {
    p: [f64; 3],
    n: [f64; 3],
}

/// Parses a CSG tree from its JSON representation
pub fn node_from_json(text: &str) -> Result<CsgNode, Error> {
    let raw: JsonNode = serde_json::from_str(text)?;
    convert(&raw)
}

/// Loads a CSG tree from a JSON file
pub fn node_from_json_file<P: AsRef<Path>>(
    path: P,
) -> Result<CsgNode, Error> {
    node_from_json(&std::fs::read_to_string(path)?)
}

/// Serializes a CSG tree to pretty-printed JSON
pub fn node_to_json(node: &CsgNode) -> Result<String, Error> {
    Ok(serde_json::to_string_pretty(&unconvert(node))?)
}

fn convert(raw: &JsonNode) -> Result<CsgNode, Error> {
    let op = match raw.op.as_str() {
        "Union" => CsgOp::Union,
        "Intersection" => CsgOp::Intersection,
        "Difference" => CsgOp::Difference,
        "Complement" => CsgOp::Complement,
        "Noop" => CsgOp::Noop,
        "Geometry" => {
            let params = raw.params.as_ref().ok_or_else(|| {
                Error::InputInvalid(format!(
                    "geometry node '{}' has no params",
                    raw.name
                ))
            })?;
            return Ok(CsgNode::Leaf(Arc::new(leaf_primitive(
                &raw.name, params,
            )?)));
        }
        other => return Err(Error::UnknownOperator(other.to_owned())),
    };
    let children = raw
        .childs
        .iter()
        .map(convert)
        .collect::<Result<Vec<_>, _>>()?;
    let (lo, hi) = op.allowed_children();
    if children.len() < lo || children.len() > hi {
        return Err(Error::InputInvalid(format!(
            "operator {} has {} children",
            op.name(),
            children.len()
        )));
    }
    Ok(CsgNode::Op { op, children })
}

fn leaf_primitive(
    name: &str,
    params: &JsonParams,
) -> Result<Primitive, Error> {
    let mat = Matrix4::from_fn(|i, j| params.transform[i][j]);
    let translation = mat.fixed_view::<3, 1>(0, 3).into_owned();
    let missing = |what: &str| {
        Error::InputInvalid(format!(
            "{} descriptor '{}' is missing {}",
            params.kind, name, what
        ))
    };

    let mut primitive = match params.kind.as_str() {
        "Sphere" => {
            let r = params.r.ok_or_else(|| missing("r"))?;
            Primitive {
                kind: PrimitiveKind::Sphere,
                implicit: Arc::new(ImplicitFn::Sphere {
                    center: translation,
                    radius: r,
                }),
                ms: vec![Arc::new(Manifold::sphere(
                    translation,
                    r,
                    Default::default(),
                ))],
                cutout: false,
                name: String::new(),
            }
        }
        "Cylinder" => {
            let r = params.r.ok_or_else(|| missing("r"))?;
            let h = params.h.ok_or_else(|| missing("h"))?;
            let rot = Rotation3::from_matrix(
                &mat.fixed_view::<3, 3>(0, 0).into_owned(),
            );
            let frame = nalgebra::Isometry3::from_parts(
                translation.into(),
                rot.into(),
            );
            let axis = rot * Vector3::y();
            Primitive {
                kind: PrimitiveKind::Cylinder,
                implicit: Arc::new(ImplicitFn::Cylinder {
                    frame,
                    radius: r,
                    height: h,
                }),
                ms: vec![Arc::new(Manifold::cylinder(
                    translation,
                    axis,
                    r,
                    Default::default(),
                ))],
                cutout: false,
                name: String::new(),
            }
        }
        "Box" => {
            let planes = params
                .planes
                .as_ref()
                .ok_or_else(|| missing("planes"))?;
            let ms = planes
                .iter()
                .map(|pl| {
                    Arc::new(Manifold::plane(
                        Vector3::from(pl.p),
                        Vector3::from(pl.n),
                        Default::default(),
                    ))
                })
                .collect::<Vec<_>>();
            create_box(&ms).ok_or_else(|| {
                Error::InputInvalid(format!(
                    "box descriptor '{name}' is degenerate"
                ))
            })?
        }
        other => {
            return Err(Error::UnknownPrimitiveKind(other.to_owned()))
        }
    };
    primitive.name = name.to_owned();
    Ok(primitive)
}

fn unconvert(node: &CsgNode) -> JsonNode {
    match node {
        CsgNode::Op { op, children } => JsonNode {
            op: op.name().to_owned(),
            name: String::new(),
            childs: children.iter().map(unconvert).collect(),
            params: None,
        },
        CsgNode::Leaf(p) => JsonNode {
            op: "Geometry".to_owned(),
            name: p.name.clone(),
            childs: vec![],
            params: Some(leaf_params(p)),
        },
    }
}

fn leaf_params(p: &Primitive) -> JsonParams {
    match &*p.implicit {
        ImplicitFn::Sphere { center, radius } => {
            let mut m = Matrix4::identity();
            m.fixed_view_mut::<3, 1>(0, 3).copy_from(center);
            JsonParams {
                kind: "Sphere".to_owned(),
                transform: matrix_rows(&m),
                r: Some(*radius),
                h: None,
                planes: None,
            }
        }
        ImplicitFn::Cylinder {
            frame,
            radius,
            height,
        } => JsonParams {
            kind: "Cylinder".to_owned(),
            transform: matrix_rows(&frame.to_homogeneous()),
            r: Some(*radius),
            h: Some(*height),
            planes: None,
        },
        _ => JsonParams {
            kind: "Box".to_owned(),
            transform: matrix_rows(&Matrix4::identity()),
            r: None,
            h: None,
            planes: Some(
                p.ms
                    .iter()
                    .map(|m| JsonPlane {
                        p: m.p.into(),
                        n: m.n.into(),
                    })
                    .collect(),
            ),
        },
    }
}

/// The schema stores transforms as rows, with the translation in the last
/// column
fn matrix_rows(m: &Matrix4<f64>) -> [[f64; 4]; 4] {
    std::array::from_fn(|i| std::array::from_fn(|j| m[(i, j)]))
}
