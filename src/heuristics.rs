/// Temperature heuristics.
///
/// Temperature estimates how much an entity would gain from inlining: an
/// intrinsic cost (parameters to marshal, virtual dispatch, crossing a
/// library boundary) divided by a size-overhead damper, scaled by the
/// observed frequency. Computed exactly once per function and per call site,
/// after enrichment; afterwards the graph is effectively immutable.

use crate::graph::{CallGraph, CallSiteId, FunctionId};
use crate::params::{Parameter, Params};

/// Compute and store the temperature of every function and call site.
pub fn apply(graph: &mut CallGraph, params: &Params) {
    let functions: Vec<_> = graph.functions().collect();
    for function in functions {
        let temperature = function_temperature(graph, function, params);
        graph[function].temperature = temperature;
    }

    let call_sites: Vec<_> = graph.call_sites().collect();
    for site in call_sites {
        let temperature = call_site_temperature(graph, site, params);
        graph[site].temperature = temperature;
    }
}

/// Temperature of a function. Zero when the binary gave no size, since
/// nothing meaningful can be said about inlining it.
pub fn function_temperature(graph: &CallGraph, function: FunctionId, params: &Params) -> f64 {
    let info = &graph[function];
    if info.size == 0 {
        return 0.0;
    }

    let cost = 1.0
        + f64::from(info.parameters) * params.get(Parameter::HeuristicFunctionParameterCost)
        + if info.virtuality {
            params.get(Parameter::HeuristicFunctionVirtualityCost)
        } else {
            0.0
        };

    // Inlining a function duplicates its body once per extra caller.
    let extra_callers = graph.in_degree(function).saturating_sub(1);
    let size_overhead =
        1.0 + (info.size * extra_callers as u64) as f64 / graph.application_size() as f64;

    (cost / size_overhead) * info.frequency
}

/// Temperature of a call site. Zero when the caller was never called (the
/// site cannot be exercised) or the callee's size is unknown.
pub fn call_site_temperature(graph: &CallGraph, site: CallSiteId, params: &Params) -> f64 {
    let (caller, callee) = graph.endpoints(site);

    if graph[caller].calls == 0 {
        return 0.0;
    }
    if graph[callee].size == 0 {
        return 0.0;
    }

    let crosses_library = graph[caller].module != graph[callee].module;

    let cost = 1.0
        + f64::from(graph[callee].parameters) * params.get(Parameter::HeuristicCallSiteParameterCost)
        + if graph[callee].virtuality {
            params.get(Parameter::HeuristicCallSiteVirtualityCost)
        } else {
            0.0
        }
        + if crosses_library {
            params.get(Parameter::HeuristicLibraryCost)
        } else {
            0.0
        };

    // Body duplication only matters when the callee has several callers.
    let size_overhead = if graph.in_degree(callee) > 1 {
        1.0 + graph[callee].size as f64 / graph.application_size() as f64
    } else {
        1.0
    };

    (cost / size_overhead) * graph[site].frequency
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
