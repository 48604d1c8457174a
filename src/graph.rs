/// Call-graph model.
///
/// A directed multigraph of functions (vertices) and call sites (edges)
/// annotated with profile statistics, plus the two graph-level scalars every
/// analysis depends on: the total number of recorded calls and the total
/// size of the profiled application. Descriptors handed to callers are plain
/// indices into the underlying storage and stay valid for the life of the
/// graph; nothing is ever removed.

use std::ops::{Index, IndexMut};

use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction;

/// Handle to a function vertex.
pub type FunctionId = petgraph::graph::NodeIndex;

/// Handle to a call-site edge.
pub type CallSiteId = petgraph::graph::EdgeIndex;

// ---------------------------------------------------------------------------
// Attribute records
// ---------------------------------------------------------------------------

/// Everything known about one function.
#[derive(Debug, Clone, Default)]
pub struct FunctionInfo {
    /// Canonical name, mangled or demangled depending on the profile.
    pub name: String,
    /// Raw profile label, `"<name>\n<incl>%\n(<self>%)\n<calls>×"`.
    pub label: String,
    /// Source file hint from the profile.
    pub file_name: String,
    /// Shared object or executable the function lives in.
    pub module: String,
    /// Exclusive cost, in percent of the total run.
    pub self_cost: f64,
    /// Inclusive cost, in percent of the total run.
    pub inclusive_cost: f64,
    /// calls / total calls of the graph, in [0, 1].
    pub frequency: f64,
    /// Synthetic heat score, set once by the heuristics pass.
    pub temperature: f64,
    /// Number of recorded invocations.
    pub calls: u64,
    /// Parameter count recovered from the signature.
    pub parameters: u32,
    /// Size in bytes, recovered from the binary. 0 when unknown.
    pub size: u64,
    /// Whether the function occupies a vtable slot.
    pub virtuality: bool,
}

/// Everything known about one call site.
#[derive(Debug, Clone, Default)]
pub struct CallSiteInfo {
    /// Raw profile label, `"<calls>×"` or `"<cost>%\n<calls>×"`.
    pub label: String,
    /// Number of recorded calls through this site.
    pub calls: u64,
    /// Cost of the site, in percent of the total run.
    pub cost: f64,
    /// calls / total calls of the graph, in [0, 1].
    pub frequency: f64,
    /// Synthetic heat score, set once by the heuristics pass.
    pub temperature: f64,
}

// ---------------------------------------------------------------------------
// The graph
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct CallGraph {
    graph: DiGraph<FunctionInfo, CallSiteInfo>,
    total_calls: u64,
    application_size: u64,
}

impl CallGraph {
    pub fn new() -> Self {
        CallGraph::default()
    }

    // ── Construction ────────────────────────────────────────────────────

    pub fn add_function(&mut self, info: FunctionInfo) -> FunctionId {
        self.graph.add_node(info)
    }

    pub fn add_call_site(
        &mut self,
        caller: FunctionId,
        callee: FunctionId,
        info: CallSiteInfo,
    ) -> CallSiteId {
        self.graph.add_edge(caller, callee, info)
    }

    // ── Iteration ───────────────────────────────────────────────────────

    pub fn functions(&self) -> impl Iterator<Item = FunctionId> + '_ {
        self.graph.node_indices()
    }

    pub fn call_sites(&self) -> impl Iterator<Item = CallSiteId> + '_ {
        self.graph.edge_indices()
    }

    // ── Structure queries ───────────────────────────────────────────────

    pub fn source(&self, site: CallSiteId) -> FunctionId {
        self.endpoints(site).0
    }

    pub fn target(&self, site: CallSiteId) -> FunctionId {
        self.endpoints(site).1
    }

    pub fn endpoints(&self, site: CallSiteId) -> (FunctionId, FunctionId) {
        self.graph
            .edge_endpoints(site)
            .expect("call site descriptor outlived its graph")
    }

    pub fn out_sites(&self, function: FunctionId) -> impl Iterator<Item = CallSiteId> + '_ {
        self.graph
            .edges_directed(function, Direction::Outgoing)
            .map(|edge| edge.id())
    }

    pub fn in_sites(&self, function: FunctionId) -> impl Iterator<Item = CallSiteId> + '_ {
        self.graph
            .edges_directed(function, Direction::Incoming)
            .map(|edge| edge.id())
    }

    pub fn out_degree(&self, function: FunctionId) -> usize {
        self.out_sites(function).count()
    }

    pub fn in_degree(&self, function: FunctionId) -> usize {
        self.in_sites(function).count()
    }

    pub fn function_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn call_site_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// `"caller --> callee"`, for report lines.
    pub fn description(&self, site: CallSiteId) -> String {
        let (caller, callee) = self.endpoints(site);
        format!("{} --> {}", self[caller].name, self[callee].name)
    }

    // ── Graph-level scalars ─────────────────────────────────────────────

    pub fn total_calls(&self) -> u64 {
        self.total_calls
    }

    pub fn set_total_calls(&mut self, calls: u64) {
        self.total_calls = calls;
    }

    pub fn application_size(&self) -> u64 {
        self.application_size
    }

    pub fn set_application_size(&mut self, size: u64) {
        self.application_size = size;
    }
}

impl Index<FunctionId> for CallGraph {
    type Output = FunctionInfo;

    fn index(&self, id: FunctionId) -> &FunctionInfo {
        &self.graph[id]
    }
}

impl IndexMut<FunctionId> for CallGraph {
    fn index_mut(&mut self, id: FunctionId) -> &mut FunctionInfo {
        &mut self.graph[id]
    }
}

impl Index<CallSiteId> for CallGraph {
    type Output = CallSiteInfo;

    fn index(&self, id: CallSiteId) -> &CallSiteInfo {
        &self.graph[id]
    }
}

impl IndexMut<CallSiteId> for CallGraph {
    fn index_mut(&mut self, id: CallSiteId) -> &mut CallSiteInfo {
        &mut self.graph[id]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn function(name: &str, module: &str) -> FunctionInfo {
        FunctionInfo {
            name: name.to_string(),
            module: module.to_string(),
            ..FunctionInfo::default()
        }
    }

    #[test]
    fn structure_queries() {
        let mut graph = CallGraph::new();
        let a = graph.add_function(function("a", "libx.so"));
        let b = graph.add_function(function("b", "liby.so"));
        let c = graph.add_function(function("c", "liby.so"));

        let ab = graph.add_call_site(a, b, CallSiteInfo::default());
        graph.add_call_site(a, c, CallSiteInfo::default());
        graph.add_call_site(c, b, CallSiteInfo::default());

        assert_eq!(graph.function_count(), 3);
        assert_eq!(graph.call_site_count(), 3);
        assert_eq!(graph.source(ab), a);
        assert_eq!(graph.target(ab), b);
        assert_eq!(graph.out_degree(a), 2);
        assert_eq!(graph.in_degree(b), 2);
        assert_eq!(graph.out_degree(b), 0);
        assert_eq!(graph.description(ab), "a --> b");
    }

    #[test]
    fn parallel_call_sites_are_kept() {
        let mut graph = CallGraph::new();
        let a = graph.add_function(function("a", "libx.so"));
        let b = graph.add_function(function("b", "liby.so"));

        graph.add_call_site(a, b, CallSiteInfo::default());
        graph.add_call_site(a, b, CallSiteInfo::default());

        assert_eq!(graph.call_site_count(), 2);
        assert_eq!(graph.in_degree(b), 2);
    }
}
