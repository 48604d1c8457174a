/// Top-level driver.
///
/// Single entry point wiring the whole pipeline together: read the graph,
/// enrich it from the binaries, compute temperatures, then hand the
/// analyzer's findings to the reports. Configuration is collected up front
/// through the setters; `analyze` runs everything on the caller's thread.

use std::path::Path;
use std::time::Instant;

use tracing::debug;

use crate::analyzer::Analyzer;
use crate::enrich;
use crate::errors::GraphReadError;
use crate::graph::CallGraph;
use crate::heuristics;
use crate::inspect::BinaryInspector;
use crate::params::Params;
use crate::reader;
use crate::reports::Reports;

pub struct Driver {
    inspector: BinaryInspector,
    params: Params,
    display_issues: bool,
    display_statistics: bool,
    filter_duplicates: bool,
    default_filters: bool,
    filters: Vec<String>,
    protected_libraries: Vec<String>,
    top: usize,
}

impl Driver {
    pub fn new() -> Self {
        Driver {
            inspector: BinaryInspector::new(),
            params: Params::new(),
            display_issues: true,
            display_statistics: true,
            filter_duplicates: false,
            default_filters: false,
            filters: Vec::new(),
            protected_libraries: Vec::new(),
            top: 20,
        }
    }

    // ── Configuration surface ───────────────────────────────────────────

    /// The profile carries demangled names rather than mangled ones.
    pub fn set_demangled(&mut self, demangled: bool) {
        self.inspector.set_demangled(demangled);
    }

    pub fn set_display_issues(&mut self, issues: bool) {
        self.display_issues = issues;
    }

    pub fn set_display_statistics(&mut self, statistics: bool) {
        self.display_statistics = statistics;
    }

    pub fn set_filter_duplicates(&mut self, filter: bool) {
        self.filter_duplicates = filter;
    }

    pub fn add_filter(&mut self, name: impl Into<String>) {
        self.filters.push(name.into());
    }

    pub fn enable_default_filters(&mut self) {
        self.default_filters = true;
    }

    pub fn add_protected_library(&mut self, library: impl Into<String>) {
        self.protected_libraries.push(library.into());
    }

    pub fn set_top(&mut self, top: usize) {
        self.top = top;
    }

    pub fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }

    // ── Pipeline ────────────────────────────────────────────────────────

    /// Run the full analysis over a call-graph file and print the reports.
    pub fn analyze(&mut self, path: &Path) -> Result<(), GraphReadError> {
        let start = Instant::now();

        let mut graph = reader::read_graph(path)?;
        enrich::enrich(&mut graph, &mut self.inspector);
        heuristics::apply(&mut graph, &self.params);

        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            "graph ready for analysis"
        );

        self.print_header(path, &graph);

        if self.display_statistics || self.display_issues {
            let mut analyzer = Analyzer::new(&graph, &self.inspector, &self.params);
            // Reports repeat proposals endlessly without this.
            analyzer.set_filter_duplicates(self.filter_duplicates || self.display_issues);
            for library in &self.protected_libraries {
                analyzer.add_protected_library(library.clone());
            }

            let mut reports = Reports::new(&graph, &analyzer, &self.params);
            if self.default_filters {
                reports.enable_default_filters();
            }
            for filter in &self.filters {
                reports.add_filter(filter.clone());
            }

            if self.display_statistics {
                reports.print_statistic_reports(self.top);
            }
            if self.display_issues {
                reports.print_issues();
            }
        }

        Ok(())
    }

    fn print_header(&self, path: &Path, graph: &CallGraph) {
        println!("# thermograph");
        println!("# file: {}", path.display());
        println!("# functions: {}", graph.function_count());
        println!("# call sites: {}", graph.call_site_count());
        println!("# libraries: {}", self.inspector.library_count());
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}
