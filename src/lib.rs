/// Thermograph — offline inlining and library-placement analyzer.
///
/// Mines a profiled call graph together with the application's ELF binaries
/// and recommends inlining targets, function moves between shared libraries,
/// hot-cluster co-location, and virtual-hierarchy simplifications.
///
/// Module layout:
///   - params     — tunable thresholds and heuristic weights
///   - graph      — call-graph model (functions, call sites, totals)
///   - elf        — byte-level ELF32/ELF64 reader
///   - inspect    — binary inspector (function sizes, virtual functions)
///   - reader     — profiler graph-file ingestion
///   - enrich     — attribute enrichment (labels, parameters, frequencies)
///   - heuristics — function and call-site temperatures
///   - analyzer   — library issues, clusters, circular deps, hierarchies
///   - reports    — filters, top-N rankings, printed reports
///   - driver     — end-to-end pipeline entry point
///   - errors     — recoverable error types

pub mod analyzer;
pub mod driver;
pub mod elf;
pub mod enrich;
pub mod errors;
pub mod graph;
pub mod heuristics;
pub mod inspect;
pub mod params;
pub mod reader;
pub mod reports;

// Re-exports for convenience
pub use analyzer::{Analyzer, Cluster, HierarchyIssue, LibraryIssue};
pub use driver::Driver;
pub use errors::{ConfigError, ElfError, GraphReadError};
pub use graph::{CallGraph, CallSiteId, CallSiteInfo, FunctionId, FunctionInfo};
pub use inspect::BinaryInspector;
pub use params::{Parameter, Params};
pub use reader::{parse_graph, read_graph};
pub use reports::{RankKey, Reports};
