// Benchmarks for route search and edge definition over generated grids.
//
// `route_search/*` routes corner to corner across a hand-linked grid of
// nodes, with and without a tight expansion budget. `define_grid` runs the
// full probe-backed edge definition over a smaller grid, which is what
// dominates editor rebuilds.
//
// Run with `cargo bench -p pathscout_nav`.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use pathscout_nav::types::NodeHandle;
use pathscout_nav::voxel_level::VoxelLevel;
use pathscout_nav::{
    Destination, NavConfig, NavGraphBuilder, NavSession, NewNode, PathGraph, ReachFlags, ReachSpec,
    Seeker, Traveler,
};

const SPACING: i32 = 2;

fn grid_nodes(level: &VoxelLevel, side: i32) -> (PathGraph, Vec<NodeHandle>) {
    let mut graph = PathGraph::new();
    let mut handles = Vec::with_capacity((side * side) as usize);
    for z in 0..side {
        for x in 0..side {
            let p = level.stand_point(1 + x * SPACING, 0, 1 + z * SPACING, 0.9);
            handles.push(graph.add_node(NewNode::designer(p).label(&format!("N{x}_{z}"))));
        }
    }
    (graph, handles)
}

/// A `side` x `side` grid with four-way walk edges in both directions.
fn linked_grid(side: i32) -> (VoxelLevel, PathGraph, Vec<NodeHandle>) {
    let extent = (side * SPACING + 2) as u32;
    let level = VoxelLevel::with_floor(extent, 4, extent, 1.0);
    let (mut graph, handles) = grid_nodes(&level, side);
    let at = |x: i32, z: i32| handles[(z * side + x) as usize];
    for z in 0..side {
        for x in 0..side {
            let mut neighbours = Vec::new();
            if x + 1 < side {
                neighbours.push(at(x + 1, z));
            }
            if z + 1 < side {
                neighbours.push(at(x, z + 1));
            }
            for n in neighbours {
                for (s, e) in [(at(x, z), n), (n, at(x, z))] {
                    graph.add_edge(ReachSpec {
                        start: s,
                        end: e,
                        distance: SPACING as f32,
                        radius: 1.1,
                        height: 1.2,
                        flags: ReachFlags::WALK,
                        max_landing_speed: 0.0,
                        pruned: false,
                    });
                }
            }
        }
    }
    (level, graph, handles)
}

fn route_benches(c: &mut Criterion) {
    let side = 40;
    let (level, graph, handles) = linked_grid(side);
    let goal = handles[handles.len() - 1];
    let start = level.stand_point(1, 0, 1, 0.9);

    let mut group = c.benchmark_group("route_search");
    for budget in [300usize, 5000] {
        let mut config = NavConfig::default();
        config.search.max_expansions = budget;
        let mut session = NavSession::new(graph.clone(), config);
        let mut tick = 0u64;
        group.bench_function(format!("corner_to_corner_budget_{budget}"), |b| {
            b.iter(|| {
                tick += 1;
                let mut seeker = Seeker::new(start, Traveler::human());
                let result = session.find_path_toward(
                    &level,
                    &mut seeker,
                    Destination::Node(goal),
                    None,
                    tick,
                );
                black_box(result)
            })
        });
    }
    group.finish();
}

fn define_benches(c: &mut Criterion) {
    let side = 6;
    let extent = (side * SPACING + 2) as u32;
    let mut level = VoxelLevel::with_floor(extent, 4, extent, 1.0);
    let (graph, _) = grid_nodes(&level, side);
    let mut config = NavConfig::default();
    config.build.explore.enabled = false;
    config.build.min_spawn_points = 0;

    c.bench_function("define_grid", |b| {
        b.iter(|| {
            let mut g = graph.clone();
            let report = NavGraphBuilder::new(&mut level, &config).define(&mut g);
            black_box((g.edge_count(), report.stats.edges_created))
        })
    });
}

criterion_group!(benches, route_benches, define_benches);
criterion_main!(benches);
