// In-memory street/rail graph the snapper splices transfer nodes into.
//
// Nodes carry planar (Web Mercator) coordinates and adjacency lists; edges
// are directed and carry their full polyline geometry. The graph is
// exclusively owned by a batch run; there is no interior mutability.

use ahash::AHashMap;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;

pub type NodeId = u64;
pub type EdgeId = u64;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("edge references missing node {0}")]
    MissingNode(NodeId),
    #[error("edge geometry needs at least two points, got {0}")]
    DegenerateGeometry(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreetNode {
    pub id: NodeId,
    /// Planar position, meters.
    pub pos: [f64; 2],
    pub out_edges: Vec<EdgeId>,
    pub in_edges: Vec<EdgeId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreetEdge {
    pub id: EdgeId,
    pub from: NodeId,
    pub to: NodeId,
    /// Ordered polyline from `from` to `to`, planar meters.
    pub geometry: Vec<[f64; 2]>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StreetGraph {
    nodes: AHashMap<NodeId, StreetNode>,
    edges: AHashMap<EdgeId, StreetEdge>,
    next_node_id: NodeId,
    next_edge_id: EdgeId,
}

impl StreetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&StreetNode> {
        self.nodes.get(&id)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&StreetEdge> {
        self.edges.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &StreetNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &StreetEdge> {
        self.edges.values()
    }

    /// Node ids in ascending order, for deterministic scans.
    pub fn sorted_node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn add_node(&mut self, pos: [f64; 2]) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        self.nodes.insert(
            id,
            StreetNode {
                id,
                pos,
                out_edges: Vec::new(),
                in_edges: Vec::new(),
            },
        );
        id
    }

    /// Insert a node under an externally assigned id (graph loaders).
    /// Keeps the allocator ahead of every id seen so far.
    pub fn insert_node_with_id(&mut self, id: NodeId, pos: [f64; 2]) {
        self.next_node_id = self.next_node_id.max(id + 1);
        self.nodes.insert(
            id,
            StreetNode {
                id,
                pos,
                out_edges: Vec::new(),
                in_edges: Vec::new(),
            },
        );
    }

    pub fn add_edge(
        &mut self,
        from: NodeId,
        to: NodeId,
        geometry: Vec<[f64; 2]>,
    ) -> Result<EdgeId, GraphError> {
        if geometry.len() < 2 {
            return Err(GraphError::DegenerateGeometry(geometry.len()));
        }
        if !self.nodes.contains_key(&from) {
            return Err(GraphError::MissingNode(from));
        }
        if !self.nodes.contains_key(&to) {
            return Err(GraphError::MissingNode(to));
        }

        let id = self.next_edge_id;
        self.next_edge_id += 1;
        self.edges.insert(
            id,
            StreetEdge {
                id,
                from,
                to,
                geometry,
            },
        );
        if let Some(node) = self.nodes.get_mut(&from) {
            node.out_edges.push(id);
        }
        if let Some(node) = self.nodes.get_mut(&to) {
            node.in_edges.push(id);
        }
        Ok(id)
    }

    /// Detach and return an edge; adjacency lists are kept consistent.
    pub fn remove_edge(&mut self, id: EdgeId) -> Option<StreetEdge> {
        let edge = self.edges.remove(&id)?;
        if let Some(node) = self.nodes.get_mut(&edge.from) {
            node.out_edges.retain(|&e| e != id);
        }
        if let Some(node) = self.nodes.get_mut(&edge.to) {
            node.in_edges.retain(|&e| e != id);
        }
        Some(edge)
    }

    /// Every edge id incident to the node, outgoing then incoming.
    pub fn incident_edges(&self, node: NodeId) -> Vec<EdgeId> {
        let Some(n) = self.nodes.get(&node) else {
            return Vec::new();
        };
        let mut edges = n.out_edges.clone();
        edges.extend_from_slice(&n.in_edges);
        edges
    }

    pub fn save(&self, path: &Path) -> Result<(), GraphError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, GraphError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let graph = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())?;
        Ok(graph)
    }
}
