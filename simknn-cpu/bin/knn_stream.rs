use std::io::{self, BufWriter, Write};
use std::time::Instant;

use clap::Parser;
use eyre::{eyre, Result};
use itertools::Itertools;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use simknn_common::{tracing::initialize_tracing, FilteredKnnConfig, Opt};
use simknn_cpu::{
    filter::{IdMap, NodeIdMap},
    similarity::{NodeProperties, PropertySimilarity, SimilarityMetric},
    FilteredKnn, NodeId, SimilarityResult,
};
use tracing::info;

/// Build a filtered k-NN graph over random vectors and write it as JSON lines.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of nodes to generate
    #[arg(long, default_value_t = 1000)]
    num_nodes: u64,

    /// Dimension of the generated vectors
    #[arg(long, default_value_t = 16)]
    dimensions: usize,

    #[arg(long, value_enum, default_value_t = SimilarityMetric::Cosine)]
    metric: SimilarityMetric,

    /// Seed of the vector generator, independent of the algorithm seed
    #[arg(long, default_value_t = 0)]
    data_seed: u64,

    /// Original id of the first generated node, output rows use original ids
    #[arg(long, default_value_t = 0)]
    first_node_id: u64,

    /// Write one line per source node instead of one line per pair
    #[arg(long)]
    group_by_source: bool,

    /// Prefix of the environment variables holding the configuration
    #[arg(long, default_value = "SIMKNN")]
    env_prefix: String,

    #[command(flatten)]
    opt: Opt,
}

#[derive(Serialize)]
struct NodeNeighbors {
    node: NodeId,
    neighbors: Vec<NodeId>,
}

fn random_vectors(num_nodes: u64, dimensions: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..num_nodes)
        .map(|_| (0..dimensions).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    initialize_tracing()?;

    let args = Args::parse();
    let mut config = FilteredKnnConfig::load_config(&args.env_prefix)?;
    config.overwrite_defaults_with_cli_args(args.opt)?;
    info!("Running with {:?}", config);

    let vectors = random_vectors(args.num_nodes, args.dimensions, args.data_seed);
    let similarity = PropertySimilarity::new()
        .with_property_and_metric(NodeProperties::FloatArray(vectors), args.metric)?;
    let first_node_id = args.first_node_id;
    let id_map = NodeIdMap::from_original_ids(first_node_id..first_node_id + args.num_nodes);
    let original = |node: NodeId| {
        id_map
            .to_original_node_id(node)
            .ok_or_else(|| eyre!("No original id for node {node}"))
    };

    let start = Instant::now();
    let result = FilteredKnn::new(&id_map, config, &similarity).compute()?;
    let elapsed = start.elapsed();

    let mut out = BufWriter::new(io::stdout().lock());
    if args.group_by_source {
        for (node, rows) in &result.similarity_result_stream().chunk_by(|row| row.source) {
            let line = NodeNeighbors {
                node: original(node)?,
                neighbors: rows
                    .map(|row| original(row.target))
                    .collect::<Result<_>>()?,
            };
            serde_json::to_writer(&mut out, &line)?;
            writeln!(out)?;
        }
    } else {
        for row in result.similarity_result_stream() {
            let row = SimilarityResult::new(original(row.source)?, original(row.target)?, row.similarity);
            serde_json::to_writer(&mut out, &row)?;
            writeln!(out)?;
        }
    }
    out.flush()?;

    let seeding = result.seeding_summary();
    info!(
        "Computed {} similarity pairs for {} nodes in {:?}: {} iterations, converged: {}, \
         {} node pairs considered, {} seed pairs compared",
        result.total_similarity_pairs(),
        result.node_count(),
        elapsed,
        result.ran_iterations(),
        result.did_converge(),
        result.node_pairs_considered(),
        seeding.node_pairs_compared,
    );
    Ok(())
}
