/// Analysis engine.
///
/// Works over the enriched, temperature-annotated call graph and produces
/// the actionable findings: cross-library call sites whose endpoints should
/// be co-located, clusters of hot call sites, circular dependencies between
/// libraries, and virtual hierarchies that the profile shows are not earning
/// their dispatch cost.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Instant;

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use tracing::debug;

use crate::graph::{CallGraph, CallSiteId, FunctionId};
use crate::inspect::BinaryInspector;
use crate::params::{Parameter, Params};

/// Solution text used when no move clears the benefit threshold.
pub const NO_BENEFIT_SOLUTION: &str = "Benefit is not enough, neither of them should be moved";

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// A pair of functions whose placement causes cross-library call traffic,
/// with the relocation proposals and their accumulated benefit.
#[derive(Debug, Clone)]
pub struct LibraryIssue {
    pub src: FunctionId,
    pub dest: FunctionId,
    /// Call-site paths that leave the source library and come back.
    pub paths: Vec<Vec<CallSiteId>>,
    /// Human-readable relocation proposals.
    pub solutions: Vec<String>,
    /// Net calls-avoided total over all emitted proposals.
    pub benefit: i64,
}

/// A connected group of hot call sites.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub call_sites: Vec<CallSiteId>,
    pub temperature: f64,
}

/// A virtual hierarchy whose call distribution suggests simplification.
#[derive(Debug, Clone)]
pub struct HierarchyIssue {
    /// Shared tail key of the hierarchy members.
    pub name: String,
    /// Total calls over all members.
    pub calls: u64,
    pub diagnostic: String,
    /// Every member with its call count.
    pub members: Vec<(String, u64)>,
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

pub struct Analyzer<'a> {
    graph: &'a CallGraph,
    inspector: &'a BinaryInspector,
    params: &'a Params,
    filter_duplicates: bool,
    protected_libraries: HashSet<String>,
}

impl<'a> Analyzer<'a> {
    pub fn new(graph: &'a CallGraph, inspector: &'a BinaryInspector, params: &'a Params) -> Self {
        Analyzer {
            graph,
            inspector,
            params,
            filter_duplicates: false,
            protected_libraries: HashSet::new(),
        }
    }

    /// Suppress repeated move proposals for the same function and target.
    pub fn set_filter_duplicates(&mut self, filter: bool) {
        self.filter_duplicates = filter;
    }

    /// Mark a library whose layout should not be touched; proposals moving
    /// functions into it are prefixed accordingly.
    pub fn add_protected_library(&mut self, library: impl Into<String>) {
        self.protected_libraries.insert(library.into());
    }

    // ── Structural queries ──────────────────────────────────────────────

    /// Every call site whose endpoints live in different modules.
    pub fn find_inter_library_calls(&self) -> Vec<CallSiteId> {
        self.graph
            .call_sites()
            .filter(|&site| {
                let (caller, callee) = self.graph.endpoints(site);
                self.graph[caller].module != self.graph[callee].module
            })
            .collect()
    }

    /// Every call site whose callee is virtual.
    pub fn find_virtual_calls(&self) -> Vec<CallSiteId> {
        self.graph
            .call_sites()
            .filter(|&site| self.graph[self.graph.target(site)].virtuality)
            .collect()
    }

    pub fn find_functions_called_once(&self) -> Vec<FunctionId> {
        self.graph
            .functions()
            .filter(|&f| self.graph[f].calls == 1)
            .collect()
    }

    pub fn find_leaf_functions(&self) -> Vec<FunctionId> {
        self.graph
            .functions()
            .filter(|&f| self.graph.out_degree(f) == 0)
            .collect()
    }

    // ── Clusters ────────────────────────────────────────────────────────

    /// Weakly-connected groups of call sites hotter than HOT_CALL_SITE.
    /// Groups above CLUSTER_MAX_SIZE keep only their hottest sites.
    pub fn find_clusters(&self) -> Vec<Cluster> {
        let start = Instant::now();

        let hot = self.params.get(Parameter::HotCallSite);
        let max_size = self.params.get(Parameter::ClusterMaxSize) as usize;

        let mut clusters = Vec::new();
        let mut visited: HashSet<FunctionId> = HashSet::new();

        for origin in self.graph.functions() {
            if visited.contains(&origin) {
                continue;
            }

            // Explicit work stack: profiled graphs are large enough to blow
            // the call stack under recursion.
            let mut stack = vec![origin];
            let mut member_sites: HashSet<CallSiteId> = HashSet::new();
            let mut cluster: Vec<CallSiteId> = Vec::new();

            while let Some(function) = stack.pop() {
                if !visited.insert(function) {
                    continue;
                }

                let neighbors = self
                    .graph
                    .out_sites(function)
                    .chain(self.graph.in_sites(function));
                for site in neighbors {
                    if self.graph[site].temperature < hot {
                        continue;
                    }
                    if member_sites.insert(site) {
                        cluster.push(site);
                        let (caller, callee) = self.graph.endpoints(site);
                        stack.push(caller);
                        stack.push(callee);
                    }
                }
            }

            // A single call site is not a cluster.
            if cluster.len() > 1 {
                if cluster.len() > max_size {
                    cluster.sort_by(|&a, &b| {
                        self.graph[b]
                            .temperature
                            .partial_cmp(&self.graph[a].temperature)
                            .unwrap_or(Ordering::Equal)
                    });
                    cluster.truncate(max_size);
                }

                let temperature = cluster.iter().map(|&s| self.graph[s].temperature).sum();
                clusters.push(Cluster {
                    call_sites: cluster,
                    temperature,
                });
            }
        }

        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            clusters = clusters.len(),
            "cluster search finished"
        );
        clusters
    }

    // ── Library issues ──────────────────────────────────────────────────

    /// Net reduction in cross-library call volume achieved by relocating
    /// `function` into `destination` module. Positive is an improvement.
    pub fn interest_of_moving(&self, function: FunctionId, destination: &str) -> i64 {
        let info = &self.graph[function];
        if info.module == destination {
            return 0;
        }

        let mut benefit: i64 = 0;

        let incident = self
            .graph
            .out_sites(function)
            .map(|site| (site, self.graph.target(site)))
            .chain(
                self.graph
                    .in_sites(function)
                    .map(|site| (site, self.graph.source(site))),
            );

        for (site, other) in incident {
            let calls = self.graph[site].calls as i64;
            // Calls to the destination library become local.
            if self.graph[other].module == destination {
                benefit += calls;
            }
            // Calls inside the current library become cross-library.
            if self.graph[other].module == info.module {
                benefit -= calls;
            }
        }

        benefit
    }

    fn emit_solution(
        &self,
        solutions: &mut Vec<String>,
        emitted: &mut HashSet<String>,
        function: &str,
        library: &str,
        benefit: i64,
        total: &mut i64,
    ) {
        if benefit < self.params.get(Parameter::MoveBenefitThreshold) as i64 {
            return;
        }

        if self.filter_duplicates && !emitted.insert(format!("{function}->{library}")) {
            return;
        }

        if self.protected_libraries.contains(library) {
            solutions.push(format!(
                "Protected library: {function} should be moved to {library} benefit = {benefit}"
            ));
        } else {
            solutions.push(format!(
                "{function} should be moved to {library} benefit = {benefit}"
            ));
        }

        *total += benefit;
    }

    /// Decide which endpoint of a cross-library pair should move, and
    /// whether functions along the return paths should follow it.
    fn compute_solutions(
        &self,
        src: FunctionId,
        dest: FunctionId,
        paths: &[Vec<CallSiteId>],
    ) -> (Vec<String>, i64) {
        let mut solutions = Vec::new();
        let mut emitted = HashSet::new();
        let mut total: i64 = 0;

        let benefit_src_to_dest = self.interest_of_moving(src, &self.graph[dest].module);
        let benefit_dest_to_src = self.interest_of_moving(dest, &self.graph[src].module);

        if benefit_src_to_dest <= 0 && benefit_dest_to_src <= 0 {
            solutions.push(NO_BENEFIT_SOLUTION.to_string());
        } else if benefit_src_to_dest > benefit_dest_to_src {
            self.emit_solution(
                &mut solutions,
                &mut emitted,
                &self.graph[src].name,
                &self.graph[dest].module,
                benefit_src_to_dest,
                &mut total,
            );

            // The function each path ends in may profit from moving too.
            for path in paths {
                let Some(&last) = path.last() else { continue };
                let terminal = self.graph.target(last);

                // A direct two-function cycle would re-test src itself.
                if self.graph[terminal].name == self.graph[src].name {
                    continue;
                }

                let benefit = self.interest_of_moving(terminal, &self.graph[dest].module);
                self.emit_solution(
                    &mut solutions,
                    &mut emitted,
                    &self.graph[terminal].name,
                    &self.graph[dest].module,
                    benefit,
                    &mut total,
                );
            }
        } else {
            self.emit_solution(
                &mut solutions,
                &mut emitted,
                &self.graph[dest].name,
                &self.graph[src].module,
                benefit_dest_to_src,
                &mut total,
            );

            // Long paths: consider pulling the intermediate functions over as
            // well, stopping as soon as a candidate falls under the
            // threshold to avoid splitting the path over many libraries.
            for path in paths {
                if path.len() <= 3 {
                    continue;
                }

                for &site in &path[1..path.len() - 1] {
                    let function = self.graph.target(site);
                    let benefit = self.interest_of_moving(function, &self.graph[src].module);

                    if benefit < self.params.get(Parameter::MoveBenefitThreshold) as i64 {
                        break;
                    }

                    self.emit_solution(
                        &mut solutions,
                        &mut emitted,
                        &self.graph[function].name,
                        &self.graph[src].module,
                        benefit,
                        &mut total,
                    );
                }
            }
        }

        // Everything proposed was filtered away: report that explicitly
        // instead of returning an issue with no text.
        if solutions.is_empty() {
            solutions.push(NO_BENEFIT_SOLUTION.to_string());
        }

        (solutions, total)
    }

    /// Simple call-site paths starting at `site` that come back to the
    /// module of `origin`. Intermediate hops stay in the module the previous
    /// edge landed in, or jump straight back into the origin module.
    fn find_paths(
        &self,
        site: CallSiteId,
        origin: FunctionId,
        limit: u32,
    ) -> Vec<Vec<CallSiteId>> {
        let mut paths = Vec::new();
        let mut path = Vec::new();
        self.walk_path(site, origin, limit, &mut path, &mut paths);
        paths
    }

    fn walk_path(
        &self,
        site: CallSiteId,
        origin: FunctionId,
        limit: u32,
        path: &mut Vec<CallSiteId>,
        paths: &mut Vec<Vec<CallSiteId>>,
    ) {
        if limit == 0 {
            return;
        }

        path.push(site);

        let here = self.graph.target(site);
        let library = &self.graph[here].module;

        if self.graph[origin].module == *library {
            // Back in the origin library.
            paths.push(path.clone());
        } else {
            for next in self.graph.out_sites(here) {
                let callee = self.graph.target(next);
                let module = &self.graph[callee].module;

                if (module == library || *module == self.graph[origin].module)
                    && !path.contains(&next)
                {
                    self.walk_path(next, origin, limit - 1, path, paths);
                }
            }
        }

        path.pop();
    }

    fn min_path_calls(&self, path: &[CallSiteId]) -> u64 {
        path.iter()
            .map(|&site| self.graph[site].calls)
            .min()
            .unwrap_or(0)
    }

    /// Cross-library call sites worth reporting: heavy ones immediately,
    /// moderately loaded ones when the calls provably come back to the
    /// caller's library over a short path.
    pub fn find_library_issues(&self) -> Vec<LibraryIssue> {
        let start = Instant::now();

        let heavy = self.params.get(Parameter::HeavyCallSite) as u64;
        let path_threshold = self.params.get(Parameter::LibraryPathThreshold) as u64;
        let max_length = self.params.get(Parameter::LibraryPathMaxLength) as u32;
        let min_path_calls = self.params.get(Parameter::LibraryMinPathCalls) as u64;

        let mut issues = Vec::new();

        for site in self.find_inter_library_calls() {
            let calls = self.graph[site].calls;

            if calls >= heavy {
                let (src, dest) = self.graph.endpoints(site);
                let paths = Vec::new();
                let (solutions, benefit) = self.compute_solutions(src, dest, &paths);
                issues.push(LibraryIssue {
                    src,
                    dest,
                    paths,
                    solutions,
                    benefit,
                });
            } else if calls >= path_threshold {
                let src = self.graph.source(site);
                let paths = self.find_paths(site, src, max_length);

                let kept: Vec<_> = paths
                    .into_iter()
                    .filter(|path| self.min_path_calls(path) >= min_path_calls)
                    .collect();

                if !kept.is_empty() {
                    let dest = self.graph.target(site);
                    let (solutions, benefit) = self.compute_solutions(src, dest, &kept);
                    issues.push(LibraryIssue {
                        src,
                        dest,
                        paths: kept,
                        solutions,
                        benefit,
                    });
                }
            }
        }

        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            issues = issues.len(),
            "library issue search finished"
        );
        issues
    }

    // ── Circular dependencies ───────────────────────────────────────────

    /// Strongly connected groups of libraries. An edge exists between two
    /// libraries whenever at least one call site crosses that pair.
    pub fn find_circular_dependencies(&self) -> Vec<Vec<String>> {
        let mut dependencies: DiGraph<String, ()> = DiGraph::new();
        let mut libraries: HashMap<String, petgraph::graph::NodeIndex> = HashMap::new();
        let mut linked: HashSet<(petgraph::graph::NodeIndex, petgraph::graph::NodeIndex)> =
            HashSet::new();

        for site in self.graph.call_sites() {
            let (caller, callee) = self.graph.endpoints(site);
            let src = self.graph[caller].module.trim();
            let dst = self.graph[callee].module.trim();

            for library in [src, dst] {
                if !library.is_empty() && !libraries.contains_key(library) {
                    let index = dependencies.add_node(library.to_string());
                    libraries.insert(library.to_string(), index);
                }
            }

            if !src.is_empty() && !dst.is_empty() && src != dst {
                let pair = (libraries[src], libraries[dst]);
                if linked.insert(pair) {
                    dependencies.add_edge(pair.0, pair.1, ());
                }
            }
        }

        tarjan_scc(&dependencies)
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| {
                component
                    .into_iter()
                    .map(|index| dependencies[index].clone())
                    .collect()
            })
            .collect()
    }

    // ── Virtual hierarchies ─────────────────────────────────────────────

    /// Group the recorded virtual functions into override hierarchies and
    /// diagnose the ones whose call distribution defeats the point of
    /// dynamic dispatch.
    pub fn find_virtual_hierarchy_issues(&self) -> Vec<HierarchyIssue> {
        let virtual_functions = self.inspector.virtual_functions();
        if virtual_functions.is_empty() {
            return Vec::new();
        }

        let demangled = self.inspector.is_demangled();

        // Ordered containers keep member scans deterministic.
        let mut hierarchies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for key in virtual_functions {
            let Some((_, function)) = key.split_once("##") else {
                continue;
            };
            if function.len() <= 1 {
                continue;
            }

            let tail = if demangled {
                demangled_hierarchy_key(function)
            } else {
                mangled_hierarchy_key(function)
            };

            if let Some(tail) = tail {
                hierarchies
                    .entry(tail)
                    .or_default()
                    .insert(function.to_string());
            }
        }

        let mut calls_by_name: HashMap<&str, u64> = HashMap::new();
        for function in self.graph.functions() {
            calls_by_name.insert(&self.graph[function].name, self.graph[function].calls);
        }
        let calls_of = |member: &str| calls_by_name.get(member).copied().unwrap_or(0);

        let max_calls_fraction = self.params.get(Parameter::HierarchyMaxCallsFunction);
        let min_called_fraction = self.params.get(Parameter::HierarchyMinCalledFunctions);

        let mut issues = Vec::new();

        for (name, members) in &hierarchies {
            // Destructors share a hierarchy key by construction.
            if name == "D1Ev" {
                continue;
            }

            if members.len() > 1 {
                let sum: u64 = members.iter().map(|m| calls_of(m)).sum();
                let called = members.iter().filter(|m| calls_of(m) > 0).count();

                if sum == 0 {
                    continue;
                }

                let mut diagnostic = String::new();
                for member in members {
                    let calls = calls_of(member);
                    if calls == sum {
                        diagnostic = format!(
                            "Only {member} is called. This hierarchy should not be virtual."
                        );
                        break;
                    } else if calls as f64 > sum as f64 * max_calls_fraction {
                        diagnostic = format!(
                            "{member} is called more than {}% of the time. Perhaps this hierarchy should not be virtual or this function should be called directly",
                            percent_text(max_calls_fraction)
                        );
                        break;
                    }
                }

                if diagnostic.is_empty()
                    && (called as f64) < min_called_fraction * members.len() as f64
                {
                    diagnostic = format!(
                        "Less than {}% of the functions are called.",
                        percent_text(min_called_fraction)
                    );
                }

                if !diagnostic.is_empty() {
                    issues.push(HierarchyIssue {
                        name: name.clone(),
                        calls: sum,
                        diagnostic,
                        members: members.iter().map(|m| (m.clone(), calls_of(m))).collect(),
                    });
                }
            } else if let Some(member) = members.iter().next() {
                let sum = calls_of(member);
                if sum > 0 {
                    issues.push(HierarchyIssue {
                        name: name.clone(),
                        calls: sum,
                        diagnostic:
                            "The hierarchy contains only one member. This hierarchy should not be virtual."
                                .to_string(),
                        members: vec![(member.clone(), sum)],
                    });
                }
            }
        }

        issues
    }
}

// ---------------------------------------------------------------------------
// Hierarchy keys
// ---------------------------------------------------------------------------

/// Tail after the last `::` preceding the argument list, e.g.
/// `"Shape::area() const"` → `"area() const"`. Thunks and free functions
/// yield no key.
fn demangled_hierarchy_key(function: &str) -> Option<String> {
    if function.contains("virtual thunk") {
        return None;
    }

    let arguments = function.find('(')?;
    let mut position = function.find("::")?;
    if position >= arguments {
        return None;
    }

    loop {
        match function[position + 2..].find("::") {
            Some(relative) => {
                let next = position + 2 + relative;
                if next < arguments {
                    position = next;
                } else {
                    break;
                }
            }
            None => break,
        }
    }

    Some(function[position + 2..].to_string())
}

/// Tail after the first length-prefixed component of a `_ZN…` name, e.g.
/// `"_ZN5Shape4areaEv"` → `"4areaEv"`. Overrides of the same slot in
/// different classes share the tail.
fn mangled_hierarchy_key(function: &str) -> Option<String> {
    if !function.contains("_ZN") {
        return None;
    }

    let bytes = function.as_bytes();
    let first_digit = bytes.iter().position(|b| b.is_ascii_digit())?;
    let digits_end = first_digit
        + bytes[first_digit..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();

    let length: usize = function[first_digit..digits_end].parse().ok()?;
    function
        .get(digits_end + length..)
        .map(|tail| tail.to_string())
}

/// Render a fraction as a percentage without float noise: 0.8 prints "80".
fn percent_text(fraction: f64) -> String {
    let percent = fraction * 100.0;
    let rounded = (percent * 1e6).round() / 1e6;
    if rounded == rounded.trunc() {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
