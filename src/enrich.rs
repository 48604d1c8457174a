/// Attribute enrichment pass.
///
/// Takes a freshly read call graph — names, labels and modules only — and
/// fills in everything else: profile costs and call counts parsed from the
/// labels, parameter counts recovered from the signatures, sizes and
/// virtuality from the binaries, and finally the graph totals and the
/// per-entity frequencies every later pass depends on. Running the pass
/// again on the same graph recomputes identical values.

use tracing::warn;

use crate::graph::CallGraph;
use crate::inspect::{demangle, BinaryInspector};

// ---------------------------------------------------------------------------
// Label parsing
// ---------------------------------------------------------------------------

/// Labels read from a graph file carry the two-character `\n` escape; labels
/// built programmatically carry real newlines. Normalize to real newlines.
fn normalize_label(label: &str) -> String {
    label.replace("\\n", "\n")
}

/// `"<name>\n<incl>%\n(<self>%)\n<calls>×"` → (inclusive, self, calls).
fn parse_function_label(label: &str) -> Option<(f64, f64, u64)> {
    let mut lines = label.split('\n');
    let _name = lines.next()?;
    let inclusive = lines.next()?.trim().strip_suffix('%')?.parse().ok()?;
    let self_cost = lines
        .next()?
        .trim()
        .strip_prefix('(')?
        .strip_suffix(')')?
        .strip_suffix('%')?
        .parse()
        .ok()?;
    let calls = lines
        .next()?
        .trim()
        .strip_suffix('×')?
        .parse()
        .ok()?;
    Some((inclusive, self_cost, calls))
}

/// `"<calls>×"` or `"<cost>%\n<calls>×"` → (cost, calls).
fn parse_call_site_label(label: &str) -> Option<(f64, u64)> {
    match label.split_once('\n') {
        None => {
            let calls = label.trim().strip_suffix('×')?.parse().ok()?;
            Some((0.0, calls))
        }
        Some((cost, calls)) => {
            let cost = cost.trim().strip_suffix('%')?.parse().ok()?;
            let calls = calls.trim().strip_suffix('×')?.parse().ok()?;
            Some((cost, calls))
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter counting
// ---------------------------------------------------------------------------

/// Count the parameters of a demangled signature by scanning backwards from
/// the rightmost `)`. Commas count only at depth zero, where depth is
/// tracked separately for template brackets and for nested parentheses
/// (function-pointer types). Any non-space character before the first comma
/// means there is at least one parameter.
pub fn count_parameters(name: &str) -> u32 {
    let bytes = name.as_bytes();

    let Some(start) = name.rfind(')') else {
        return 0;
    };

    let mut parameters: u32 = 0;
    let mut in_template: u32 = 0;
    let mut in_parenthesis: u32 = 0;

    let mut index = start as isize - 1;
    while index >= 0 {
        let byte = bytes[index as usize];

        if in_parenthesis == 0 && byte == b'(' {
            break;
        }

        if !byte.is_ascii_whitespace() && parameters == 0 {
            parameters = 1;
        }

        if byte == b')' {
            in_parenthesis += 1;
        } else if byte == b'(' {
            in_parenthesis = in_parenthesis.saturating_sub(1);
        }

        if in_parenthesis == 0 {
            if byte == b'>' {
                in_template += 1;
            } else if byte == b'<' {
                in_template = in_template.saturating_sub(1);
            }

            if byte == b',' && in_template == 0 {
                parameters += 1;
            }
        }

        index -= 1;
    }

    parameters
}

// ---------------------------------------------------------------------------
// The pass
// ---------------------------------------------------------------------------

/// Populate every derived attribute of `graph` in place.
pub fn enrich(graph: &mut CallGraph, inspector: &mut BinaryInspector) {
    let demangled = inspector.is_demangled();

    let mut total_calls: u64 = 0;
    let mut total_size: u64 = 0;

    let functions: Vec<_> = graph.functions().collect();
    for &function in &functions {
        let name = graph[function].name.clone();
        let module = graph[function].module.clone();

        let parameters = if demangled {
            count_parameters(&name)
        } else {
            count_parameters(&demangle(&name))
        };
        let size = inspector.size_of(&module, &name);
        let virtuality = inspector.is_virtual(&module, &name);

        let label = normalize_label(&graph[function].label);
        let parsed = if label.is_empty() {
            None
        } else {
            let parsed = parse_function_label(&label);
            if parsed.is_none() {
                warn!(function = %name, label = %graph[function].label, "unparsable function label");
            }
            parsed
        };

        let info = &mut graph[function];
        info.parameters = parameters;
        info.size = size;
        info.virtuality = virtuality;
        if let Some((inclusive, self_cost, calls)) = parsed {
            info.inclusive_cost = inclusive;
            info.self_cost = self_cost;
            info.calls = calls;
        } else if !label.is_empty() {
            // Unparsable labels degrade to zeroed statistics.
            info.inclusive_cost = 0.0;
            info.self_cost = 0.0;
            info.calls = 0;
        }

        total_size += size;
        total_calls += info.calls;
    }

    graph.set_total_calls(total_calls);
    graph.set_application_size(total_size);

    if total_calls == 0 {
        warn!("the profile records no calls at all; every frequency degrades to zero");
    }

    for &function in &functions {
        let calls = graph[function].calls;
        graph[function].frequency = frequency(calls, total_calls);
    }

    let call_sites: Vec<_> = graph.call_sites().collect();
    for site in call_sites {
        let label = normalize_label(&graph[site].label);
        let parsed = if label.is_empty() {
            None
        } else {
            let parsed = parse_call_site_label(&label);
            if parsed.is_none() {
                warn!(site = %graph.description(site), label = %graph[site].label, "unparsable call site label");
            }
            parsed
        };

        let info = &mut graph[site];
        if let Some((cost, calls)) = parsed {
            info.cost = cost;
            info.calls = calls;
        } else if !label.is_empty() {
            info.cost = 0.0;
            info.calls = 0;
        }
        info.frequency = frequency(info.calls, total_calls);
    }
}

fn frequency(calls: u64, total_calls: u64) -> f64 {
    if total_calls == 0 {
        0.0
    } else {
        calls as f64 / total_calls as f64
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
