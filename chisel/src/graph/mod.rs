//! Connection graph over primitives
//!
//! An undirected graph whose vertices are primitives and whose edges say
//! "these two may touch, so a boolean between them can matter".  It exists
//! purely to prune the tree search: cliques become per-group search
//! problems, connected components drive decomposition.
//!
//! Vertices live in a plain arena (`Vec`) and all references are indices,
//! so the back-and-forth between graph and primitives never forms ownership
//! cycles.
mod merge;
pub use merge::{
    largest_common_subgraph, merge_nodes, serialize_tree, CommonSubgraph,
    MergeChoice, SerializedTree,
};

use crate::primitive::{Primitive, PrimitiveRef};

/// A set of mutually-adjacent primitives
pub type Clique = Vec<PrimitiveRef>;

/// Default adjacency predicate: overlapping bounding boxes
///
/// The margin absorbs fitting noise; two primitives whose boxes come within
/// `margin` of touching are treated as connectable.
pub fn aabb_adjacency(margin: f64) -> impl Fn(&Primitive, &Primitive) -> bool {
    move |a, b| match (a.aabb(), b.aabb()) {
        (Some(a), Some(b)) => a.intersects(&b, margin),
        _ => false,
    }
}

/// An undirected graph over shared primitive handles
pub struct ConnectionGraph {
    vertices: Vec<PrimitiveRef>,
    adjacency: Vec<Vec<bool>>,
}

impl ConnectionGraph {
    /// Builds the graph by testing every vertex pair
    pub fn build(
        vertices: Vec<PrimitiveRef>,
        adjacent: impl Fn(&Primitive, &Primitive) -> bool,
    ) -> Self {
        let n = vertices.len();
        let mut adjacency = vec![vec![false; n]; n];
        for i in 0..n {
            for j in i + 1..n {
                if adjacent(&vertices[i], &vertices[j]) {
                    adjacency[i][j] = true;
                    adjacency[j][i] = true;
                }
            }
        }
        Self {
            vertices,
            adjacency,
        }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn primitive(&self, i: usize) -> &PrimitiveRef {
        &self.vertices[i]
    }

    pub fn connected(&self, i: usize, j: usize) -> bool {
        self.adjacency[i][j]
    }

    fn neighbors(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        self.adjacency[i]
            .iter()
            .enumerate()
            .filter_map(|(j, &e)| e.then_some(j))
    }

    /// Enumerates all maximal cliques (Bron-Kerbosch with pivoting)
    pub fn maximal_cliques(&self) -> Vec<Clique> {
        let mut out = vec![];
        let mut r = vec![];
        let mut p: Vec<usize> = (0..self.len()).collect();
        let mut x = vec![];
        self.bron_kerbosch(&mut r, &mut p, &mut x, &mut out);
        out.into_iter()
            .map(|indices| {
                indices
                    .into_iter()
                    .map(|i| self.vertices[i].clone())
                    .collect()
            })
            .collect()
    }

    fn bron_kerbosch(
        &self,
        r: &mut Vec<usize>,
        p: &mut Vec<usize>,
        x: &mut Vec<usize>,
        out: &mut Vec<Vec<usize>>,
    ) {
        if p.is_empty() && x.is_empty() {
            out.push(r.clone());
            return;
        }
        // Pivot on the candidate with the most neighbors in P
        let pivot = p
            .iter()
            .chain(x.iter())
            .copied()
            .max_by_key(|&u| {
                p.iter().filter(|&&v| self.adjacency[u][v]).count()
            })
            .unwrap();
        let candidates: Vec<usize> = p
            .iter()
            .copied()
            .filter(|&v| !self.adjacency[pivot][v])
            .collect();
        for v in candidates {
            r.push(v);
            let mut p2: Vec<usize> =
                p.iter().copied().filter(|&u| self.adjacency[v][u]).collect();
            let mut x2: Vec<usize> =
                x.iter().copied().filter(|&u| self.adjacency[v][u]).collect();
            self.bron_kerbosch(r, &mut p2, &mut x2, out);
            r.pop();
            p.retain(|&u| u != v);
            x.push(v);
        }
    }

    /// Splits the vertex set into connected components
    pub fn connected_components(&self) -> Vec<Vec<PrimitiveRef>> {
        let mut seen = vec![false; self.len()];
        let mut out = vec![];
        for start in 0..self.len() {
            if seen[start] {
                continue;
            }
            let mut component = vec![];
            let mut stack = vec![start];
            seen[start] = true;
            while let Some(i) = stack.pop() {
                component.push(self.vertices[i].clone());
                for j in self.neighbors(i) {
                    if !seen[j] {
                        seen[j] = true;
                        stack.push(j);
                    }
                }
            }
            out.push(component);
        }
        out
    }
}
