//! Graphviz output for CSG trees
use super::CsgNode;
use std::io::{BufWriter, Write};

/// Writes the tree as a DOT digraph
pub fn write_dot<F: Write>(
    node: &CsgNode,
    out: &mut F,
) -> Result<(), crate::Error> {
    let mut out = BufWriter::new(out);
    writeln!(out, "digraph csg {{")?;
    let mut next_id = 0;
    write_node(node, &mut next_id, &mut out)?;
    writeln!(out, "}}")?;
    Ok(())
}

fn write_node<F: Write>(
    node: &CsgNode,
    next_id: &mut usize,
    out: &mut F,
) -> Result<usize, crate::Error> {
    let id = *next_id;
    *next_id += 1;
    match node {
        CsgNode::Op { op, children } => {
            writeln!(out, "  n{id} [label=\"{}\"];", op.name())?;
            for c in children {
                let child_id = write_node(c, next_id, out)?;
                writeln!(out, "  n{id} -> n{child_id};")?;
            }
        }
        CsgNode::Leaf(p) => {
            writeln!(
                out,
                "  n{id} [label=\"{}\", shape=box];",
                p.name
            )?;
        }
    }
    Ok(id)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::csg::node_from_json;

    #[test]
    fn dot_structure() {
        let node = node_from_json(
            r#"{ "op": "Union", "childs": [
                { "op": "Geometry", "name": "a",
                  "params": { "kind": "Sphere",
                    "transform": [[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]],
                    "r": 1.0 } },
                { "op": "Geometry", "name": "b",
                  "params": { "kind": "Sphere",
                    "transform": [[1,0,0,3],[0,1,0,0],[0,0,1,0],[0,0,0,1]],
                    "r": 1.0 } } ] }"#,
        )
        .unwrap();
        let mut buf = vec![];
        write_dot(&node, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("digraph"));
        assert!(text.contains("label=\"Union\""));
        assert!(text.contains("label=\"a\""));
        assert!(text.contains("n0 -> n1"));
        assert!(text.contains("n0 -> n2"));
    }
}
