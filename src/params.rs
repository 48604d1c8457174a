/// Tunable analysis parameters.
///
/// Every threshold and heuristic weight used by the analyzer is a named
/// numeric parameter. The table seeds its defaults when it is built; `set`
/// overwrites unconditionally, `set_default` writes only while the key is
/// unset. The table is owned by the driver and handed by reference to the
/// passes that need it — nothing here is global.

use std::collections::HashMap;

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Parameter keys
// ---------------------------------------------------------------------------

/// The closed set of tunable parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    /// Call count above which a call site is considered heavy.
    HeavyCallSite,
    /// Temperature above which a call site is considered hot.
    HotCallSite,
    /// Maximum number of call sites kept per cluster.
    ClusterMaxSize,
    /// Minimum calls for a non-heavy site to trigger a path search.
    LibraryPathThreshold,
    /// Maximum number of edges in a return-path search.
    LibraryPathMaxLength,
    /// Minimum of the per-edge call counts along a candidate path.
    LibraryMinPathCalls,
    /// Minimum benefit before a move proposal is emitted.
    MoveBenefitThreshold,
    /// Parameter count above which a function is over-parameterized.
    ParametersThreshold,
    /// Dominance fraction after which a hierarchy member is reported.
    HierarchyMaxCallsFunction,
    /// Minimum fraction of hierarchy members that must be called.
    HierarchyMinCalledFunctions,
    /// Minimum call total for a hierarchy issue to be reportable.
    HierarchyMinCalls,
    /// Per-parameter temperature cost of a function.
    HeuristicFunctionParameterCost,
    /// Virtuality temperature cost of a function.
    HeuristicFunctionVirtualityCost,
    /// Per-parameter temperature cost of a call site.
    HeuristicCallSiteParameterCost,
    /// Virtuality temperature cost of a call site.
    HeuristicCallSiteVirtualityCost,
    /// Cross-library temperature cost of a call site.
    HeuristicLibraryCost,
}

/// A parameter with its command-line key, default, and documentation.
#[derive(Debug, Clone, Copy)]
pub struct ParamDef {
    pub key: Parameter,
    pub name: &'static str,
    pub default: f64,
    pub description: &'static str,
}

/// All known parameters. Drives `--set key=value` parsing and the help text.
pub static ALL_PARAMS: &[ParamDef] = &[
    ParamDef {
        key: Parameter::HeavyCallSite,
        name: "heavy-call-site",
        default: 10000.0,
        description: "number of calls after which a call site is considered heavy",
    },
    ParamDef {
        key: Parameter::HotCallSite,
        name: "hot-call-site",
        default: 0.001,
        description: "temperature after which a call site is considered hot",
    },
    ParamDef {
        key: Parameter::ClusterMaxSize,
        name: "cluster-max-size",
        default: 10.0,
        description: "maximum number of call sites kept per cluster",
    },
    ParamDef {
        key: Parameter::LibraryPathThreshold,
        name: "library-path-threshold",
        default: 500.0,
        description: "minimum number of calls of paths in library issue search",
    },
    ParamDef {
        key: Parameter::LibraryPathMaxLength,
        name: "library-path-max-length",
        default: 3.0,
        description: "maximum length of paths considered in library issue search",
    },
    ParamDef {
        key: Parameter::LibraryMinPathCalls,
        name: "library-min-path-calls",
        default: 10.0,
        description: "minimum of calls along the full path in library issue search",
    },
    ParamDef {
        key: Parameter::MoveBenefitThreshold,
        name: "move-benefit-threshold",
        default: 100.0,
        description: "minimum number of avoided calls before proposing to move a function",
    },
    ParamDef {
        key: Parameter::ParametersThreshold,
        name: "parameters-threshold",
        default: 10.0,
        description: "number of parameters after which a function is over-parameterized",
    },
    ParamDef {
        key: Parameter::HierarchyMaxCallsFunction,
        name: "hierarchy-max-calls-function",
        default: 0.80,
        description: "fraction of hierarchy calls after which a member is reported",
    },
    ParamDef {
        key: Parameter::HierarchyMinCalledFunctions,
        name: "hierarchy-min-called-functions",
        default: 0.20,
        description: "minimum fraction of hierarchy members that must be called",
    },
    ParamDef {
        key: Parameter::HierarchyMinCalls,
        name: "hierarchy-min-calls",
        default: 100.0,
        description: "minimum number of calls for a hierarchy issue to be displayed",
    },
    ParamDef {
        key: Parameter::HeuristicFunctionParameterCost,
        name: "heuristic-function-parameter-cost",
        default: 0.10,
        description: "cost of a parameter in the temperature of a function",
    },
    ParamDef {
        key: Parameter::HeuristicFunctionVirtualityCost,
        name: "heuristic-function-virtuality-cost",
        default: 0.10,
        description: "cost of virtuality in the temperature of a function",
    },
    ParamDef {
        key: Parameter::HeuristicCallSiteParameterCost,
        name: "heuristic-call-site-parameter-cost",
        default: 0.10,
        description: "cost of a parameter in the temperature of a call site",
    },
    ParamDef {
        key: Parameter::HeuristicCallSiteVirtualityCost,
        name: "heuristic-call-site-virtuality-cost",
        default: 0.39,
        description: "cost of virtuality in the temperature of a call site",
    },
    ParamDef {
        key: Parameter::HeuristicLibraryCost,
        name: "heuristic-library-cost",
        default: 0.39,
        description: "cost of a cross-library call in the temperature of a call site",
    },
];

impl Parameter {
    /// Look a parameter up by its command-line key.
    pub fn from_cli_key(name: &str) -> Option<Parameter> {
        ALL_PARAMS.iter().find(|d| d.name == name).map(|d| d.key)
    }

    /// The seeded default of this parameter.
    pub fn default_value(self) -> f64 {
        ALL_PARAMS
            .iter()
            .find(|d| d.key == self)
            .map(|d| d.default)
            .unwrap_or(0.0)
    }
}

/// Parse a `key=value` assignment as accepted on the command line. The whole
/// assignment is validated before anything is applied, so a bad input never
/// mutates the table.
pub fn parse_assignment(input: &str) -> Result<(Parameter, f64), ConfigError> {
    let (key, value) = input
        .split_once('=')
        .ok_or_else(|| ConfigError::MalformedAssignment(input.to_string()))?;

    let param = Parameter::from_cli_key(key)
        .ok_or_else(|| ConfigError::UnknownParameter(key.to_string()))?;

    let value: f64 = value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })?;

    Ok((param, value))
}

// ---------------------------------------------------------------------------
// Parameter table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Params {
    values: HashMap<Parameter, f64>,
}

impl Params {
    /// Build a table seeded with every default.
    pub fn new() -> Self {
        let mut params = Params {
            values: HashMap::new(),
        };
        for def in ALL_PARAMS {
            params.set_default(def.key, def.default);
        }
        params
    }

    /// Overwrite the value of a parameter.
    pub fn set(&mut self, param: Parameter, value: f64) {
        self.values.insert(param, value);
    }

    /// Set a parameter only if it has not been set yet.
    pub fn set_default(&mut self, param: Parameter, value: f64) {
        self.values.entry(param).or_insert(value);
    }

    /// Current value of a parameter.
    pub fn get(&self, param: Parameter) -> f64 {
        self.values
            .get(&param)
            .copied()
            .unwrap_or_else(|| param.default_value())
    }
}

impl Default for Params {
    fn default() -> Self {
        Params::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_seeded() {
        let params = Params::new();
        assert_eq!(params.get(Parameter::HeavyCallSite), 10000.0);
        assert_eq!(params.get(Parameter::HotCallSite), 0.001);
        assert_eq!(params.get(Parameter::HierarchyMaxCallsFunction), 0.80);
        assert_eq!(params.get(Parameter::HeuristicCallSiteVirtualityCost), 0.39);
    }

    #[test]
    fn set_overwrites_and_set_default_does_not() {
        let mut params = Params::new();
        params.set(Parameter::HeavyCallSite, 42.0);
        assert_eq!(params.get(Parameter::HeavyCallSite), 42.0);

        params.set_default(Parameter::HeavyCallSite, 7.0);
        assert_eq!(params.get(Parameter::HeavyCallSite), 42.0);
    }

    #[test]
    fn cli_key_lookup() {
        assert_eq!(
            Parameter::from_cli_key("move-benefit-threshold"),
            Some(Parameter::MoveBenefitThreshold)
        );
        assert_eq!(Parameter::from_cli_key("no-such-knob"), None);
    }

    #[test]
    fn assignment_parsing() {
        let (param, value) = parse_assignment("hot-call-site=0.5").unwrap();
        assert_eq!(param, Parameter::HotCallSite);
        assert_eq!(value, 0.5);

        assert!(matches!(
            parse_assignment("bogus=1"),
            Err(ConfigError::UnknownParameter(_))
        ));
        assert!(matches!(
            parse_assignment("hot-call-site=warm"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_assignment("hot-call-site"),
            Err(ConfigError::MalformedAssignment(_))
        ));
    }

    #[test]
    fn every_key_has_exactly_one_descriptor() {
        for def in ALL_PARAMS {
            let matches = ALL_PARAMS.iter().filter(|d| d.key == def.key).count();
            assert_eq!(matches, 1, "{} listed more than once", def.name);
        }
    }
}
