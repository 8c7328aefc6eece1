// CLI entry point for the pathscout editor tooling.
//
// Runs one tooling operation over a saved level file and writes the result
// back. Graph operations load the level's nav points, run the builder, store
// the graph back into the entity list and save. `review` and `route` only
// read. The build report (or the route) is printed to stdout as JSON; logs
// go to stderr through `tracing` (`RUST_LOG`, default `info`).
//
// Usage:
//   pathscout <COMMAND> <LEVEL.json> [OPTIONS]
//
// Commands:
//   build            Full rebuild: clear, mark, explore, evaluate, merge, prune
//   remove           Delete auto-built nav points and all edges
//   define           Recompute all edges over the existing nav points
//   define-changed   Recompute edges of nav points flagged as changed
//   undefine         Strip to designer nav points with no edges
//   review           Validate the saved graph without changing it
//   route            Route query from --from to --to over the saved graph
//
// Exit status: 0 on success, 1 on bad arguments or unreadable files, 2 when
// the report contains errors or the route query finds no path.

use std::path::PathBuf;

use pathscout_nav::{
    BuildReport, Destination, Level, NavConfig, NavGraphBuilder, NavResult, NavSession, PathGraph,
    Seeker, SearchOutcome, Traveler, Vec3,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Build,
    Remove,
    Define,
    DefineChanged,
    Undefine,
    Review,
    Route,
}

impl Command {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "build" => Command::Build,
            "remove" => Command::Remove,
            "define" => Command::Define,
            "define-changed" => Command::DefineChanged,
            "undefine" => Command::Undefine,
            "review" => Command::Review,
            "route" => Command::Route,
            _ => return None,
        })
    }

    fn mutates(self) -> bool {
        !matches!(self, Command::Review | Command::Route)
    }
}

#[derive(Debug)]
struct Options {
    command: Command,
    level: PathBuf,
    config: Option<PathBuf>,
    out: Option<PathBuf>,
    trust_edges: bool,
    /// `(from, to)` for `route`, checked present at parse time.
    endpoints: Option<(Vec3, Vec3)>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let options = parse_args();
    match run(&options) {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}

/// Run the command. `Ok(false)` means it ran but found problems.
fn run(options: &Options) -> NavResult<bool> {
    let config = match &options.config {
        Some(path) => NavConfig::load(path)?,
        None => NavConfig::default(),
    };
    let mut level = Level::load(&options.level)?;

    // Review and route look at the graph as saved.
    let trust = options.trust_edges || !options.command.mutates();
    let mut graph = level.load_graph(trust)?;

    if let Some((from, to)) = options.endpoints.filter(|_| options.command == Command::Route) {
        return route(&level, graph, config, from, to);
    }

    let report = {
        let mut builder = NavGraphBuilder::new(&mut level.geometry, &config).with_progress(|phase, fraction| {
            info!(?phase, progress = format!("{:.0}%", fraction * 100.0), "build progress");
        });
        match options.command {
            Command::Build => builder.build(&mut graph, &level.entities),
            Command::Remove => builder.remove(&mut graph),
            Command::Define => builder.define(&mut graph),
            Command::DefineChanged => builder.define_changed(&mut graph),
            Command::Undefine => builder.undefine(&mut graph),
            Command::Review | Command::Route => builder.review(&graph),
        }
    };
    print_report(&report)?;

    if options.command.mutates() {
        let stored = level.store_graph(&graph);
        let out = options.out.as_ref().unwrap_or(&options.level);
        level.save(out)?;
        info!(nav_points = stored, path = %out.display(), "wrote level");
    }
    Ok(!report.has_errors())
}

fn route(level: &Level, graph: PathGraph, config: NavConfig, from: Vec3, to: Vec3) -> NavResult<bool> {
    let mut session = NavSession::new(graph, config);
    let mut seeker = Seeker::new(from, Traveler::human());
    let result = session.find_path_toward(&level.geometry, &mut seeker, Destination::Point(to), None, 0);

    let waypoints: Vec<serde_json::Value> = seeker
        .route
        .iter()
        .filter_map(|h| session.graph().node(h))
        .map(|n| {
            serde_json::json!({
                "label": n.label,
                "position": [n.position.x, n.position.y, n.position.z],
            })
        })
        .collect();
    let out = serde_json::json!({
        "outcome": format!("{:?}", result.outcome),
        "weight": result.weight,
        "expansions": result.expansions,
        "route": waypoints,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(matches!(
        result.outcome,
        SearchOutcome::Reached | SearchOutcome::BudgetExhausted
    ))
}

fn print_report(report: &BuildReport) -> NavResult<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn parse_vec3(s: &str) -> Option<Vec3> {
    let parts: Vec<f32> = s
        .split(',')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [x, y, z] => Some(Vec3::new(*x, *y, *z)),
        _ => None,
    }
}

/// Parse command-line arguments. Uses simple `std::env::args()` matching.
fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        std::process::exit(0);
    }
    let command = args.get(1).and_then(|s| Command::parse(s)).unwrap_or_else(|| {
        eprintln!("Missing or unknown command");
        print_usage();
        std::process::exit(1);
    });
    let level = args.get(2).map(PathBuf::from).unwrap_or_else(|| {
        eprintln!("Missing level file");
        print_usage();
        std::process::exit(1);
    });
    let mut options = Options {
        command,
        level,
        config: None,
        out: None,
        trust_edges: false,
        endpoints: None,
    };
    let (mut from, mut to) = (None, None);

    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                options.config = args.get(i).map(PathBuf::from).or_else(|| {
                    eprintln!("--config requires a path");
                    std::process::exit(1);
                });
            }
            "--out" => {
                i += 1;
                options.out = args.get(i).map(PathBuf::from).or_else(|| {
                    eprintln!("--out requires a path");
                    std::process::exit(1);
                });
            }
            "--trust-edges" => options.trust_edges = true,
            "--from" => {
                i += 1;
                from = args.get(i).and_then(|s| parse_vec3(s)).or_else(|| {
                    eprintln!("--from requires x,y,z");
                    std::process::exit(1);
                });
            }
            "--to" => {
                i += 1;
                to = args.get(i).and_then(|s| parse_vec3(s)).or_else(|| {
                    eprintln!("--to requires x,y,z");
                    std::process::exit(1);
                });
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }
    if command == Command::Route {
        let (Some(from), Some(to)) = (from, to) else {
            eprintln!("route requires --from and --to");
            print_usage();
            std::process::exit(1);
        };
        options.endpoints = Some((from, to));
    }
    options
}

fn print_usage() {
    println!("Usage: pathscout <COMMAND> <LEVEL.json> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  build             Full rebuild of the nav graph");
    println!("  remove            Delete auto-built nav points and all edges");
    println!("  define            Recompute all edges");
    println!("  define-changed    Recompute edges of changed nav points");
    println!("  undefine          Strip to designer nav points with no edges");
    println!("  review            Validate the saved graph");
    println!("  route             Route from --from to --to");
    println!();
    println!("Options:");
    println!("  --config <PATH>   NavConfig JSON (default: built-in tuning)");
    println!("  --out <PATH>      Write the level here instead of in place");
    println!("  --trust-edges     Keep saved edges when loading the graph");
    println!("  --from <X,Y,Z>    Route start (route only)");
    println!("  --to <X,Y,Z>      Route goal (route only)");
    println!("  --help, -h        Show this help");
}
