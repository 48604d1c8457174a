/// Thermograph CLI.
/// Reads a profiled call graph, inspects the binaries it references, and
/// prints the statistic and issue reports.

use std::path::PathBuf;

use clap::Parser;
use miette::{miette, Result};
use tracing_subscriber::EnvFilter;

use thermograph::params::{self, ALL_PARAMS};
use thermograph::Driver;

// System libraries whose layout the analyzer must never propose to change.
const DEFAULT_PROTECTED_LIBRARIES: &[&str] = &[
    "/usr/lib/x86_64-linux-gnu/libstdc++.so.6.0.14",
    "/lib/x86_64-linux-gnu/libc-2.13.so",
    "/lib/x86_64-linux-gnu/ld-2.13.so",
];

#[derive(Parser)]
#[command(
    name = "thermograph",
    version,
    about = "Offline inlining and library-placement analyzer",
    long_about = "thermograph — analyze a profiled call graph and the application's \
                  binaries, and report inlining, relocation, and virtual-hierarchy \
                  opportunities."
)]
struct Cli {
    /// Call-graph file exported by the profiler
    #[arg(required_unless_present = "list_params")]
    graph: Option<PathBuf>,

    /// The profile carries demangled function names
    #[arg(long)]
    demangled: bool,

    /// Do not display the issue reports
    #[arg(long)]
    no_issues: bool,

    /// Do not display the statistic reports
    #[arg(long)]
    no_statistic: bool,

    /// Do not display several library issues with the same solution
    #[arg(long)]
    filter_duplicates: bool,

    /// Activate the default function filters (malloc, free, …)
    #[arg(long)]
    default_filters: bool,

    /// Hide a function from the reports (repeatable)
    #[arg(long = "filter", value_name = "NAME")]
    filters: Vec<String>,

    /// Override an analysis parameter (repeatable); see --list-params
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Number of entries per statistic report
    #[arg(long, default_value_t = 20)]
    top: usize,

    /// List every tunable parameter with its default and exit
    #[arg(long)]
    list_params: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.list_params {
        print_parameter_list();
        return Ok(());
    }

    // Validate the whole configuration before mutating anything.
    let assignments = cli
        .set
        .iter()
        .map(|input| params::parse_assignment(input))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| miette!("{error}"))?;

    let graph = cli.graph.expect("clap enforces the graph argument");
    if !graph.exists() {
        return Err(miette!("The file \"{}\" does not exist", graph.display()));
    }

    let mut driver = Driver::new();
    for (parameter, value) in assignments {
        driver.params_mut().set(parameter, value);
    }

    driver.set_demangled(cli.demangled);
    driver.set_display_issues(!cli.no_issues);
    driver.set_display_statistics(!cli.no_statistic);
    driver.set_filter_duplicates(cli.filter_duplicates);
    driver.set_top(cli.top);
    if cli.default_filters {
        driver.enable_default_filters();
    }
    for filter in cli.filters {
        driver.add_filter(filter);
    }
    for library in DEFAULT_PROTECTED_LIBRARIES {
        driver.add_protected_library(*library);
    }

    driver.analyze(&graph).map_err(|error| miette!("{error}"))?;

    Ok(())
}

fn print_parameter_list() {
    println!("Tunable parameters (use --set key=value):");
    println!();
    for def in ALL_PARAMS {
        println!("  {:<38} [{}]", def.name, def.default);
        println!("      {}", def.description);
    }
}
