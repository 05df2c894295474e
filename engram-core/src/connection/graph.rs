//! In-process connection graph.
//!
//! A directed multigraph over memories: an arena of memory records plus two
//! adjacency maps of edges, all keyed by id. Traversals move over ids, never
//! references, so the cyclic structure stays borrow-checker friendly.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::constants::defaults;
use crate::types::{Connection, ConnectionType, Memory};

/// Graph tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Longest path (in nodes) BFS will consider.
    pub max_depth: usize,
    /// Neighbor-list cap.
    pub max_connections: usize,
    /// Edges weaker than this are dropped on insert.
    pub strength_threshold: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_depth: defaults::GRAPH_MAX_DEPTH,
            max_connections: defaults::GRAPH_MAX_CONNECTIONS,
            strength_threshold: defaults::GRAPH_STRENGTH_THRESHOLD,
        }
    }
}

/// Directed multigraph of memories and typed connections.
pub struct ConnectionGraph {
    config: GraphConfig,
    nodes: HashMap<String, Memory>,
    edges: HashMap<String, Vec<Connection>>,
    incoming_edges: HashMap<String, Vec<Connection>>,
}

impl ConnectionGraph {
    /// Empty graph.
    #[must_use]
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            nodes: HashMap::new(),
            edges: HashMap::new(),
            incoming_edges: HashMap::new(),
        }
    }

    /// Number of nodes currently in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether a node is present.
    #[must_use]
    pub fn contains(&self, memory_id: &str) -> bool {
        self.nodes.contains_key(memory_id)
    }

    /// Add a node. Idempotent: an existing node and its edge lists are left
    /// untouched.
    pub fn add_node(&mut self, memory: Memory) {
        let id = memory.id.clone();
        self.nodes.entry(id.clone()).or_insert(memory);
        self.edges.entry(id.clone()).or_default();
        self.incoming_edges.entry(id).or_default();
    }

    /// Add an edge. Requires both endpoints; edges below the strength
    /// threshold are dropped silently. Returns whether the edge was stored.
    pub fn add_edge(&mut self, connection: Connection) -> bool {
        if connection.strength < self.config.strength_threshold {
            return false;
        }
        if !self.nodes.contains_key(&connection.source_memory_id)
            || !self.nodes.contains_key(&connection.target_memory_id)
        {
            return false;
        }

        self.edges
            .entry(connection.source_memory_id.clone())
            .or_default()
            .push(connection.clone());
        self.incoming_edges
            .entry(connection.target_memory_id.clone())
            .or_default()
            .push(connection);
        true
    }

    /// BFS over outgoing edges. Returns the node-id path from `source` to
    /// `target`, or empty when none exists within `max_depth` nodes.
    #[must_use]
    pub fn find_path(&self, source: &str, target: &str) -> Vec<String> {
        if !self.nodes.contains_key(source) || !self.nodes.contains_key(target) {
            return Vec::new();
        }
        if source == target {
            return vec![source.to_string()];
        }

        let mut visited: HashSet<&str> = HashSet::from([source]);
        let mut frontier: VecDeque<Vec<String>> = VecDeque::from([vec![source.to_string()]]);

        while let Some(path) = frontier.pop_front() {
            if path.len() >= self.config.max_depth {
                continue;
            }
            let last = path.last().map(String::as_str).unwrap_or(source);
            let Some(outgoing) = self.edges.get(last) else {
                continue;
            };
            for edge in outgoing {
                let next = edge.target_memory_id.as_str();
                if next == target {
                    let mut found = path.clone();
                    found.push(next.to_string());
                    return found;
                }
                if visited.insert(next) {
                    let mut extended = path.clone();
                    extended.push(next.to_string());
                    frontier.push_back(extended);
                }
            }
        }
        Vec::new()
    }

    /// Union of outgoing and incoming edges, optionally filtered by type,
    /// sorted by strength descending and capped at `max_connections`.
    #[must_use]
    pub fn get_neighbors(
        &self,
        memory_id: &str,
        connection_type: Option<ConnectionType>,
    ) -> Vec<Connection> {
        let mut neighbors: Vec<Connection> = self
            .edges
            .get(memory_id)
            .into_iter()
            .flatten()
            .chain(self.incoming_edges.get(memory_id).into_iter().flatten())
            .filter(|edge| connection_type.is_none_or(|t| edge.connection_type == t))
            .cloned()
            .collect();

        neighbors.sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        neighbors.truncate(self.config.max_connections);
        neighbors
    }

    /// Connected components over the undirected view, size ≥ 2, sorted by
    /// size descending.
    #[must_use]
    pub fn get_clusters(&self) -> Vec<Vec<String>> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut clusters: Vec<Vec<String>> = Vec::new();

        for id in self.nodes.keys() {
            if visited.contains(id.as_str()) {
                continue;
            }
            // Iterative DFS over the undirected view.
            let mut component = Vec::new();
            let mut stack = vec![id.as_str()];
            while let Some(current) = stack.pop() {
                if !visited.insert(current) {
                    continue;
                }
                component.push(current.to_string());
                for edge in self.edges.get(current).into_iter().flatten() {
                    stack.push(edge.target_memory_id.as_str());
                }
                for edge in self.incoming_edges.get(current).into_iter().flatten() {
                    stack.push(edge.source_memory_id.as_str());
                }
            }
            if component.len() >= 2 {
                clusters.push(component);
            }
        }

        clusters.sort_by_key(|c| std::cmp::Reverse(c.len()));
        clusters
    }

    /// Weighted degree centrality: the sum of incident edge strengths.
    /// Returns the top `limit` nodes with their raw centrality.
    #[must_use]
    pub fn find_central_memories(&self, limit: usize) -> Vec<(String, f64)> {
        let mut centrality: Vec<(String, f64)> = self
            .nodes
            .keys()
            .map(|id| {
                let weight: f64 = self
                    .edges
                    .get(id)
                    .into_iter()
                    .flatten()
                    .chain(self.incoming_edges.get(id).into_iter().flatten())
                    .map(|edge| edge.strength)
                    .sum();
                (id.clone(), weight)
            })
            .collect();

        centrality.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        centrality.truncate(limit);
        centrality
    }

    /// Remove a node, its edge lists, and every edge elsewhere that
    /// references it.
    pub fn remove_node(&mut self, memory_id: &str) {
        self.nodes.remove(memory_id);
        self.edges.remove(memory_id);
        self.incoming_edges.remove(memory_id);
        for edges in self.edges.values_mut() {
            edges.retain(|edge| !edge.involves(memory_id));
        }
        for edges in self.incoming_edges.values_mut() {
            edges.retain(|edge| !edge.involves(memory_id));
        }
    }
}
