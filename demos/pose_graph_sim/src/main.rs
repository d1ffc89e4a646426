use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use log::info;
use nalgebra::{Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use posegraph::core::math::{wrap_to_pi, xyt_compose, xyt_relative};
use posegraph::prelude::*;
use posegraph::projection::dijkstra_projection;

/// Simulates a noisy closed-loop trajectory, initializes it with the
/// Dijkstra projection and optimizes it with Levenberg-Marquardt.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// number of simulated poses
    #[arg(short, long, default_value_t = 200)]
    nodes: usize,

    /// odometry translation noise (1 sigma, meters)
    #[arg(long, default_value_t = 0.05)]
    trans_noise: f64,

    /// odometry heading noise (1 sigma, radians)
    #[arg(long, default_value_t = 0.02)]
    rot_noise: f64,

    /// random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// write the optimized graph to this JSON file
    #[arg(short, long)]
    save: Option<PathBuf>,
}

fn simulate(args: &Args) -> Result<Graph> {
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut graph = Graph::new();
    let step = Vector3::new(1.0, 0.0, 2.0 * std::f64::consts::PI / args.nodes as f64);
    let p = Matrix3::from_diagonal(&Vector3::new(
        args.trans_noise * args.trans_noise,
        args.trans_noise * args.trans_noise,
        args.rot_noise * args.rot_noise,
    ));

    // ground-truth circle; odometry measurements corrupted by noise
    let mut truth = Vector3::zeros();
    let mut truths = Vec::with_capacity(args.nodes);
    for _ in 0..args.nodes {
        graph.add_node(Node::Xyt(XytNode::with_truth(Vector3::zeros(), truth)));
        truths.push(truth);
        truth = xyt_compose(&truth, &step);
    }
    let mut closures = ProjectionParams::default();
    for i in 0..args.nodes {
        let j = (i + 1) % args.nodes;
        let z = Vector3::new(
            step.x + rng.gen_range(-1.0..1.0) * args.trans_noise,
            step.y + rng.gen_range(-1.0..1.0) * args.trans_noise,
            wrap_to_pi(step.z + rng.gen_range(-1.0..1.0) * args.rot_noise),
        );
        let index = graph.add_edge(Edge::Xyt(XytEdge::new(i, j, z, p)?))?;
        if j == 0 {
            // the closing measurement is the loop-consistency constraint
            closures.forbidden_edges.insert(index);
        }
    }

    // dead-reckon the initial guess along the noisy odometry chain
    let projections = dijkstra_projection(&graph, 0, &closures)?;
    for i in 1..args.nodes {
        if let Some(projection) = projections.get(&i) {
            graph.node_mut(i)?.set_state(projection.xyt.as_slice());
        }
    }

    // one extra mid-loop closure, taken from ground truth
    if args.nodes >= 4 {
        let a = args.nodes / 4;
        let b = 3 * args.nodes / 4;
        let z = xyt_relative(&truths[a], &truths[b]);
        graph.add_edge(Edge::Xyt(XytEdge::new(a, b, z, p * 2.0)?))?;
    }
    Ok(graph)
}

fn print_stats(label: &str, stats: &ErrorStats) {
    println!(
        "{}: chi2 {:.4e} (normalized {:.4e}), mse position {:.4e}, mse heading {:.4e}",
        label,
        stats.chi2,
        stats.chi2_normalized,
        stats.mean_squared_distance_error.unwrap_or(f64::NAN),
        stats.mean_squared_theta_error.unwrap_or(f64::NAN),
    );
}

fn main() -> std::result::Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut graph = simulate(&args)?;
    print_stats("initial", &graph.error_stats()?);

    let mut solver = LmSolver::new();
    let start = Instant::now();
    let mut iterations = 0;
    for _ in 0..100 {
        let report = solver.iterate(&mut graph)?;
        iterations += 1;
        if !report.improved() && !solver.can_iterate() {
            break;
        }
    }
    info!(
        "optimized {} poses in {} iterations ({:?})",
        args.nodes,
        iterations,
        start.elapsed()
    );
    print_stats("final", &graph.error_stats()?);

    if let Some(path) = &args.save {
        posegraph::io::save_json(&graph, path)?;
        info!("graph written to {}", path.display());
    }
    Ok(())
}
