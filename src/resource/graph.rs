//! Dependency graph over resources and the recursive graph builder
//!
//! An edge `a -> b` means "a must complete before b". The flow compiler
//! turns a topological order of this graph into the per-resource task
//! order, so a resource's task never runs before its dependencies'.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::context::OperationContext;
use crate::resource::{Resource, ResourceKey};

/// Errors raised while building a resource graph
#[derive(Error, Debug)]
pub enum GraphBuildError {
    /// Dependency discovery has no handler for the resource's type
    #[error("no dependency discovery registered for resource type {0}")]
    UnknownResourceType(crate::resource::ResourceType),

    /// The discovered relationships form a cycle
    #[error("circular dependency involving resource {0}")]
    CircularDependency(String),

    /// A serialized graph could not be reconstructed
    #[error("malformed graph representation: {0}")]
    Malformed(String),
}

/// Collaborator that reports the resources related to a given resource.
///
/// For a protect operation the returned set contains the resources the
/// given one depends on; for restore it is the symmetric set. Either way
/// the members must be processed before the resource itself, and the
/// result must be deterministic per call.
pub trait DependencyProvider: Send + Sync {
    /// Resources that must complete before `resource`.
    fn related_resources(
        &self,
        ctx: &OperationContext,
        resource: &Resource,
    ) -> Result<BTreeSet<Resource>, GraphBuildError>;
}

/// Acyclic dependency graph over resources.
///
/// Backed by a petgraph `DiGraph` with a key -> index map so nodes
/// deduplicate by `(type, id)`. Roots are the originally requested
/// resources. Serializes through a flat representation because a
/// checkpoint persists its graph for later restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "GraphRepr", try_from = "GraphRepr")]
pub struct ResourceGraph {
    graph: DiGraph<Resource, ()>,
    node_map: BTreeMap<ResourceKey, NodeIndex>,
    roots: Vec<NodeIndex>,
}

impl ResourceGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_map: BTreeMap::new(),
            roots: Vec::new(),
        }
    }

    /// Index of the node for `key`, if present.
    pub fn index_of(&self, key: &ResourceKey) -> Option<NodeIndex> {
        self.node_map.get(key).copied()
    }

    /// Add a node, deduplicating by resource key.
    pub fn add_node(&mut self, resource: Resource) -> NodeIndex {
        if let Some(idx) = self.node_map.get(&resource.key()) {
            return *idx;
        }
        let key = resource.key();
        let idx = self.graph.add_node(resource);
        self.node_map.insert(key, idx);
        idx
    }

    /// Add a "must complete before" edge between two existing nodes.
    pub fn add_edge(&mut self, before: NodeIndex, after: NodeIndex) {
        self.graph.add_edge(before, after, ());
    }

    /// Mark a node as a root (an originally requested resource).
    pub fn mark_root(&mut self, idx: NodeIndex) {
        if !self.roots.contains(&idx) {
            self.roots.push(idx);
        }
    }

    /// The originally requested resources.
    pub fn roots(&self) -> Vec<&Resource> {
        self.roots
            .iter()
            .filter_map(|idx| self.graph.node_weight(*idx))
            .collect()
    }

    /// Number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// True when the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All resources in the graph, in node-insertion order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.graph.node_indices().filter_map(|i| self.graph.node_weight(i))
    }

    /// Whether a resource with this key is present.
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.node_map.contains_key(key)
    }

    /// Resources ordered so every dependency precedes its dependents.
    ///
    /// Deterministic for a given construction order.
    pub fn topo_order(&self) -> Result<Vec<&Resource>, GraphBuildError> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            let resource = self
                .graph
                .node_weight(cycle.node_id())
                .map(|r| r.to_string())
                .unwrap_or_else(|| "<unknown>".to_string());
            GraphBuildError::CircularDependency(resource)
        })?;
        Ok(order
            .into_iter()
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect())
    }

    /// Defensive acyclicity check.
    pub fn ensure_acyclic(&self) -> Result<(), GraphBuildError> {
        self.topo_order().map(|_| ())
    }
}

impl Default for ResourceGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Flat serialized form: nodes in index order, edges and roots as positions.
#[derive(Serialize, Deserialize)]
struct GraphRepr {
    nodes: Vec<Resource>,
    edges: Vec<(usize, usize)>,
    roots: Vec<usize>,
}

impl From<ResourceGraph> for GraphRepr {
    fn from(graph: ResourceGraph) -> Self {
        let indices: Vec<NodeIndex> = graph.graph.node_indices().collect();
        let position = |idx: NodeIndex| indices.iter().position(|i| *i == idx).unwrap_or(0);

        let nodes = indices
            .iter()
            .filter_map(|i| graph.graph.node_weight(*i).cloned())
            .collect();
        let edges = graph
            .graph
            .edge_indices()
            .filter_map(|e| graph.graph.edge_endpoints(e))
            .map(|(a, b)| (position(a), position(b)))
            .collect();
        let roots = graph.roots.iter().map(|i| position(*i)).collect();

        GraphRepr { nodes, edges, roots }
    }
}

impl TryFrom<GraphRepr> for ResourceGraph {
    type Error = GraphBuildError;

    fn try_from(repr: GraphRepr) -> Result<Self, Self::Error> {
        let mut graph = ResourceGraph::new();
        let mut indices = Vec::with_capacity(repr.nodes.len());
        for node in repr.nodes {
            indices.push(graph.add_node(node));
        }
        for (a, b) in repr.edges {
            let before = *indices
                .get(a)
                .ok_or_else(|| GraphBuildError::Malformed(format!("edge endpoint {a}")))?;
            let after = *indices
                .get(b)
                .ok_or_else(|| GraphBuildError::Malformed(format!("edge endpoint {b}")))?;
            graph.add_edge(before, after);
        }
        for r in repr.roots {
            let idx = *indices
                .get(r)
                .ok_or_else(|| GraphBuildError::Malformed(format!("root index {r}")))?;
            graph.mark_root(idx);
        }
        Ok(graph)
    }
}

/// Build the dependency graph for a set of requested resources.
///
/// Each requested resource becomes a root; discovery recurses through
/// related resources, stopping at any resource already present in the
/// graph so traversal terminates even on shared dependencies. A final
/// toposort rejects explicitly circular relationships.
pub fn build_graph(
    ctx: &OperationContext,
    provider: &dyn DependencyProvider,
    resources: &BTreeSet<Resource>,
) -> Result<ResourceGraph, GraphBuildError> {
    let mut graph = ResourceGraph::new();
    for resource in resources {
        let idx = visit(ctx, provider, resource, &mut graph)?;
        graph.mark_root(idx);
    }
    graph.ensure_acyclic()?;
    debug!(
        requested = resources.len(),
        nodes = graph.node_count(),
        "resource graph built"
    );
    Ok(graph)
}

fn visit(
    ctx: &OperationContext,
    provider: &dyn DependencyProvider,
    resource: &Resource,
    graph: &mut ResourceGraph,
) -> Result<NodeIndex, GraphBuildError> {
    if let Some(idx) = graph.index_of(&resource.key()) {
        return Ok(idx);
    }
    let idx = graph.add_node(resource.clone());
    for related in provider.related_resources(ctx, resource)? {
        let related_idx = visit(ctx, provider, &related, graph)?;
        // the related resource completes before this one
        graph.add_edge(related_idx, idx);
    }
    Ok(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceType;

    struct TableProvider {
        relations: BTreeMap<ResourceKey, BTreeSet<Resource>>,
    }

    impl TableProvider {
        fn new(relations: Vec<(Resource, Vec<Resource>)>) -> Self {
            Self {
                relations: relations
                    .into_iter()
                    .map(|(r, deps)| (r.key(), deps.into_iter().collect()))
                    .collect(),
            }
        }
    }

    impl DependencyProvider for TableProvider {
        fn related_resources(
            &self,
            _ctx: &OperationContext,
            resource: &Resource,
        ) -> Result<BTreeSet<Resource>, GraphBuildError> {
            self.relations
                .get(&resource.key())
                .cloned()
                .ok_or(GraphBuildError::UnknownResourceType(resource.resource_type))
        }
    }

    fn server(id: &str) -> Resource {
        Resource::new(ResourceType::Server, id)
    }

    fn volume(id: &str) -> Resource {
        Resource::new(ResourceType::Volume, id)
    }

    #[test]
    fn test_discovered_resources_all_appear_once() {
        // two servers sharing one volume: the volume node deduplicates
        let provider = TableProvider::new(vec![
            (server("s1"), vec![volume("v1")]),
            (server("s2"), vec![volume("v1")]),
            (volume("v1"), vec![]),
        ]);
        let ctx = OperationContext::new("proj");
        let requested: BTreeSet<Resource> = [server("s1"), server("s2")].into_iter().collect();

        let graph = build_graph(&ctx, &provider, &requested).unwrap();

        assert_eq!(graph.node_count(), 3);
        assert!(graph.contains(&volume("v1").key()));
        assert_eq!(graph.roots().len(), 2);
    }

    #[test]
    fn test_topo_order_puts_dependencies_first() {
        let provider = TableProvider::new(vec![
            (server("s1"), vec![volume("v1"), volume("v2")]),
            (volume("v1"), vec![]),
            (volume("v2"), vec![]),
        ]);
        let ctx = OperationContext::new("proj");
        let requested: BTreeSet<Resource> = [server("s1")].into_iter().collect();

        let graph = build_graph(&ctx, &provider, &requested).unwrap();
        let order: Vec<String> = graph.topo_order().unwrap().iter().map(|r| r.to_string()).collect();

        let server_pos = order.iter().position(|r| r == "server#s1").unwrap();
        for vol in ["volume#v1", "volume#v2"] {
            assert!(order.iter().position(|r| r == vol).unwrap() < server_pos);
        }
    }

    #[test]
    fn test_unknown_resource_type_fails() {
        let provider = TableProvider::new(vec![]);
        let ctx = OperationContext::new("proj");
        let requested: BTreeSet<Resource> = [server("s1")].into_iter().collect();

        let err = build_graph(&ctx, &provider, &requested).unwrap_err();
        assert!(matches!(err, GraphBuildError::UnknownResourceType(ResourceType::Server)));
    }

    #[test]
    fn test_circular_relationship_detected() {
        let provider = TableProvider::new(vec![
            (server("s1"), vec![volume("v1")]),
            (volume("v1"), vec![server("s1")]),
        ]);
        let ctx = OperationContext::new("proj");
        let requested: BTreeSet<Resource> = [server("s1")].into_iter().collect();

        let err = build_graph(&ctx, &provider, &requested).unwrap_err();
        assert!(matches!(err, GraphBuildError::CircularDependency(_)));
    }

    #[test]
    fn test_serde_round_trip_preserves_structure() {
        let provider = TableProvider::new(vec![
            (server("s1"), vec![volume("v1")]),
            (volume("v1"), vec![]),
        ]);
        let ctx = OperationContext::new("proj");
        let requested: BTreeSet<Resource> = [server("s1")].into_iter().collect();
        let graph = build_graph(&ctx, &provider, &requested).unwrap();

        let json = serde_json::to_string(&graph).unwrap();
        let back: ResourceGraph = serde_json::from_str(&json).unwrap();

        assert_eq!(back.node_count(), graph.node_count());
        assert_eq!(back.roots().len(), graph.roots().len());
        let order: Vec<String> = back.topo_order().unwrap().iter().map(|r| r.to_string()).collect();
        assert_eq!(order, vec!["volume#v1".to_string(), "server#s1".to_string()]);
    }
}
