/// Statistic and issue reports.
///
/// Pure ranking and filtering over the analysis results, plus the printed
/// reports the command-line tool emits. Filters are exact function names; a
/// call site is filtered when either endpoint is.

use std::cmp::Ordering;
use std::collections::HashSet;

use colored::Colorize;

use crate::analyzer::Analyzer;
use crate::graph::{CallGraph, CallSiteId, FunctionId};
use crate::params::{Parameter, Params};

// ---------------------------------------------------------------------------
// Ranking keys
// ---------------------------------------------------------------------------

/// The closed set of attributes reports can rank by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankKey {
    Calls,
    Size,
    Parameters,
    Temperature,
    SelfCost,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

pub struct Reports<'a> {
    graph: &'a CallGraph,
    analyzer: &'a Analyzer<'a>,
    params: &'a Params,
    filters: HashSet<String>,
}

impl<'a> Reports<'a> {
    pub fn new(graph: &'a CallGraph, analyzer: &'a Analyzer<'a>, params: &'a Params) -> Self {
        Reports {
            graph,
            analyzer,
            params,
            filters: HashSet::new(),
        }
    }

    // ── Filters ─────────────────────────────────────────────────────────

    pub fn add_filter(&mut self, name: impl Into<String>) {
        self.filters.insert(name.into());
    }

    /// Seed the usual allocator and runtime noise.
    pub fn enable_default_filters(&mut self) {
        for name in ["malloc", "free", "memcpy", "exit", "(below main)"] {
            self.filters.insert(name.to_string());
        }
    }

    pub fn is_filtered(&self, function: FunctionId) -> bool {
        self.filters.contains(&self.graph[function].name)
    }

    pub fn is_site_filtered(&self, site: CallSiteId) -> bool {
        let (caller, callee) = self.graph.endpoints(site);
        self.is_filtered(caller) || self.is_filtered(callee)
    }

    // ── Ranking ─────────────────────────────────────────────────────────

    fn function_rank(&self, function: FunctionId, key: RankKey) -> f64 {
        let info = &self.graph[function];
        match key {
            RankKey::Calls => info.calls as f64,
            RankKey::Size => info.size as f64,
            RankKey::Parameters => f64::from(info.parameters),
            RankKey::Temperature => info.temperature,
            RankKey::SelfCost => info.self_cost,
        }
    }

    fn call_site_rank(&self, site: CallSiteId, key: RankKey) -> f64 {
        let info = &self.graph[site];
        match key {
            RankKey::Calls => info.calls as f64,
            RankKey::Temperature => info.temperature,
            RankKey::SelfCost => info.cost,
            // Size and parameter count are function attributes.
            RankKey::Size | RankKey::Parameters => 0.0,
        }
    }

    /// The `top` unfiltered functions with the greatest value of `key`.
    pub fn top_functions(&self, top: usize, key: RankKey) -> Vec<FunctionId> {
        let mut functions: Vec<_> = self
            .graph
            .functions()
            .filter(|&f| !self.is_filtered(f))
            .collect();
        sort_descending(&mut functions, |&f| self.function_rank(f, key));
        functions.truncate(top);
        functions
    }

    /// The `top` unfiltered call sites with the greatest value of `key`.
    pub fn top_call_sites(&self, top: usize, key: RankKey) -> Vec<CallSiteId> {
        let mut sites: Vec<_> = self
            .graph
            .call_sites()
            .filter(|&s| !self.is_site_filtered(s))
            .collect();
        sort_descending(&mut sites, |&s| self.call_site_rank(s, key));
        sites.truncate(top);
        sites
    }

    /// Smallest functions of known size, ascending.
    pub fn tiniest_functions(&self, top: usize) -> Vec<FunctionId> {
        let mut functions: Vec<_> = self
            .graph
            .functions()
            .filter(|&f| self.graph[f].size > 0 && !self.is_filtered(f))
            .collect();
        functions.sort_by(|&a, &b| self.graph[a].size.cmp(&self.graph[b].size));
        functions.truncate(top);
        functions
    }

    pub fn heaviest_inter_library_calls(&self, top: usize) -> Vec<CallSiteId> {
        let mut sites: Vec<_> = self
            .analyzer
            .find_inter_library_calls()
            .into_iter()
            .filter(|&s| !self.is_site_filtered(s))
            .collect();
        sort_descending(&mut sites, |&s| self.graph[s].calls as f64);
        sites.truncate(top);
        sites
    }

    pub fn heaviest_virtual_calls(&self, top: usize) -> Vec<CallSiteId> {
        let mut sites: Vec<_> = self
            .analyzer
            .find_virtual_calls()
            .into_iter()
            .filter(|&s| !self.is_site_filtered(s))
            .collect();
        sort_descending(&mut sites, |&s| self.graph[s].calls as f64);
        sites.truncate(top);
        sites
    }

    /// Functions with more parameters than PARAMETERS_THRESHOLD, most
    /// parameterized first.
    pub fn over_parameterized_functions(&self) -> Vec<FunctionId> {
        let threshold = self.params.get(Parameter::ParametersThreshold) as u32;
        let mut functions: Vec<_> = self
            .graph
            .functions()
            .filter(|&f| self.graph[f].parameters > threshold && !self.is_filtered(f))
            .collect();
        sort_descending(&mut functions, |&f| f64::from(self.graph[f].parameters));
        functions
    }

    // ── Statistic reports ───────────────────────────────────────────────

    pub fn print_statistic_reports(&self, top: usize) {
        println!();
        println!("{}", "# Statistic Reports".bold());
        println!();

        self.print_function_heuristics(top);
        self.print_call_site_heuristics(top);
        self.print_heavy_inter_library_calls(top);
        self.print_heavy_virtual_calls(top);
        self.print_most_called_functions(top);
        self.print_most_called_call_sites(top);
        self.print_tiniest_functions(top);
        self.print_most_parameterized_functions(top);
        self.print_most_costly_functions(top);
        self.print_biggest_functions(top);
        self.print_pareto_functions();
    }

    fn print_function_report(&self, title: &str, functions: &[FunctionId], value: RankKey) {
        println!("{title}");
        for &function in functions {
            println!(
                "\tFunction {} = {}",
                self.graph[function].name,
                self.format_function_value(function, value)
            );
        }
    }

    fn format_function_value(&self, function: FunctionId, value: RankKey) -> String {
        let info = &self.graph[function];
        match value {
            RankKey::Calls => info.calls.to_string(),
            RankKey::Size => info.size.to_string(),
            RankKey::Parameters => info.parameters.to_string(),
            RankKey::Temperature => format!("{}", info.temperature),
            RankKey::SelfCost => format!("{}", info.self_cost),
        }
    }

    pub fn print_function_heuristics(&self, top: usize) {
        self.print_function_report(
            &format!("Top {top} function temperature:"),
            &self.top_functions(top, RankKey::Temperature),
            RankKey::Temperature,
        );
    }

    pub fn print_call_site_heuristics(&self, top: usize) {
        println!("Top {top} call site temperature:");
        for site in self.top_call_sites(top, RankKey::Temperature) {
            println!(
                "\tCall site {} = {}",
                self.graph.description(site),
                self.graph[site].temperature
            );
        }
    }

    pub fn print_heavy_inter_library_calls(&self, top: usize) {
        println!("Top {top} heavy calls between libraries:");
        for site in self.heaviest_inter_library_calls(top) {
            println!(
                "\tCall site {} = {}",
                self.graph.description(site),
                self.graph[site].calls
            );
        }
    }

    pub fn print_heavy_virtual_calls(&self, top: usize) {
        println!("Top {top} heavy virtual calls:");
        for site in self.heaviest_virtual_calls(top) {
            println!(
                "\tCall site {} = {}",
                self.graph.description(site),
                self.graph[site].calls
            );
        }
    }

    pub fn print_most_called_functions(&self, top: usize) {
        self.print_function_report(
            &format!("Top {top} most called functions:"),
            &self.top_functions(top, RankKey::Calls),
            RankKey::Calls,
        );
    }

    pub fn print_most_called_call_sites(&self, top: usize) {
        println!("Top {top} most called call sites:");
        for site in self.top_call_sites(top, RankKey::Calls) {
            println!(
                "\tCall site {} = {}",
                self.graph.description(site),
                self.graph[site].calls
            );
        }
    }

    pub fn print_tiniest_functions(&self, top: usize) {
        self.print_function_report(
            &format!("Top {top} tiniest functions:"),
            &self.tiniest_functions(top),
            RankKey::Size,
        );
    }

    pub fn print_most_parameterized_functions(&self, top: usize) {
        self.print_function_report(
            &format!("Top {top} most parameterized functions:"),
            &self.top_functions(top, RankKey::Parameters),
            RankKey::Parameters,
        );
    }

    pub fn print_most_costly_functions(&self, top: usize) {
        self.print_function_report(
            &format!("Top {top} most costly functions:"),
            &self.top_functions(top, RankKey::SelfCost),
            RankKey::SelfCost,
        );
    }

    pub fn print_biggest_functions(&self, top: usize) {
        self.print_function_report(
            &format!("Top {top} biggest functions:"),
            &self.top_functions(top, RankKey::Size),
            RankKey::Size,
        );
    }

    /// List the functions covering 80% of the self cost and report how small
    /// a share of all functions they are.
    pub fn print_pareto_functions(&self) {
        let mut functions: Vec<_> = self.graph.functions().collect();
        sort_descending(&mut functions, |&f| self.graph[f].self_cost);

        println!("Functions taking 80% of the run time");

        let mut cumulative = 0.0;
        let mut number = 0usize;
        for &function in &functions {
            cumulative += self.graph[function].self_cost;
            if cumulative > 80.0 {
                break;
            }
            number += 1;
            println!("\tFunction {}", self.graph[function].name);
        }

        let share = if self.graph.function_count() > 0 {
            100.0 * number as f64 / self.graph.function_count() as f64
        } else {
            0.0
        };
        println!("{share}% of the functions take 80% of the run time");
    }

    // ── Issue reports ───────────────────────────────────────────────────

    pub fn print_issues(&self) {
        println!();
        println!("{}", "# Found issues".bold());
        println!();

        self.print_library_issues();
        self.print_clusters();
        self.print_circular_dependencies();
        self.print_virtual_hierarchy_issues();
        self.print_over_parameterized_functions();
    }

    pub fn print_library_issues(&self) {
        let mut issues = self.analyzer.find_library_issues();
        if issues.is_empty() {
            return;
        }

        issues.sort_by_key(|issue| std::cmp::Reverse(issue.benefit));

        println!("Library issues:");
        for issue in &issues {
            if self.is_filtered(issue.src) || self.is_filtered(issue.dest) {
                continue;
            }

            println!(
                "\tFunctions {}[{}] and {}[{}] should be in the same library",
                self.graph[issue.src].name,
                self.graph[issue.src].module,
                self.graph[issue.dest].name,
                self.graph[issue.dest].module,
            );
            for solution in &issue.solutions {
                println!("\t\t{solution}");
            }
        }
    }

    pub fn print_clusters(&self) {
        let mut clusters = self.analyzer.find_clusters();
        if clusters.is_empty() {
            return;
        }

        println!("There are {} clusters", clusters.len());

        clusters.sort_by(|a, b| {
            b.temperature
                .partial_cmp(&a.temperature)
                .unwrap_or(Ordering::Equal)
        });

        for cluster in &clusters {
            println!("\tCluster of {} call sites", cluster.call_sites.len());
            for &site in &cluster.call_sites {
                println!("\t\t{}", self.graph.description(site));
            }
            println!("\t\tTemperature: {}", cluster.temperature);
        }
    }

    pub fn print_circular_dependencies(&self) {
        let dependencies = self.analyzer.find_circular_dependencies();
        if dependencies.is_empty() {
            return;
        }

        println!(
            "There are {} circular dependencies in the graph",
            dependencies.len()
        );
        for group in &dependencies {
            println!("Circular dependency detected between these libraries:");
            for library in group {
                println!("\t{library}");
            }
        }
    }

    pub fn print_virtual_hierarchy_issues(&self) {
        let mut issues = self.analyzer.find_virtual_hierarchy_issues();
        if issues.is_empty() {
            return;
        }

        issues.sort_by_key(|issue| std::cmp::Reverse(issue.calls));

        let min_calls = self.params.get(Parameter::HierarchyMinCalls) as u64;
        if issues[0].calls < min_calls {
            return;
        }

        println!("Virtual hierarchy issues");
        for issue in &issues {
            if issue.calls < min_calls {
                // Sorted descending: nothing below this line qualifies.
                break;
            }

            println!("Function hierarchy for {} calls = {}", issue.name, issue.calls);
            println!("\t{}", issue.diagnostic);
            println!("\tMembers of the hierarchy");
            for (member, calls) in &issue.members {
                println!("\t\tFunction {member} : {calls}");
            }
        }
    }

    pub fn print_over_parameterized_functions(&self) {
        let functions = self.over_parameterized_functions();
        if functions.is_empty() {
            return;
        }

        println!("Functions with too many parameters");
        for function in functions {
            println!(
                "\t{} : {} parameters",
                self.graph[function].name,
                self.graph[function].parameters
            );
        }
    }

    pub fn print_functions_called_once(&self) {
        println!("Functions called once");
        for function in self.analyzer.find_functions_called_once() {
            if !self.is_filtered(function) {
                println!("\tFunction {}", self.graph[function].name);
            }
        }
    }

    pub fn print_leaf_functions(&self) {
        println!("Leaf functions");
        for function in self.analyzer.find_leaf_functions() {
            if !self.is_filtered(function) {
                println!("\tFunction {}", self.graph[function].name);
            }
        }
    }
}

/// Sort by a float key, greatest first. Ties keep any deterministic order.
fn sort_descending<T, F: Fn(&T) -> f64>(values: &mut [T], key: F) {
    values.sort_by(|a, b| key(b).partial_cmp(&key(a)).unwrap_or(Ordering::Equal));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
