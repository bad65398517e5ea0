use crate::{error::ConfigError, node_filter_spec::NodeFilterSpec};
use clap::{Parser, ValueEnum};
use eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Command line overrides for values loaded from the environment.
#[derive(Debug, Default, Parser)]
pub struct Opt {
    #[clap(long)]
    top_k: Option<usize>,

    #[clap(long)]
    max_iterations: Option<usize>,

    #[clap(long)]
    sample_rate: Option<f64>,

    #[clap(long)]
    similarity_cutoff: Option<f64>,

    #[clap(long)]
    concurrency: Option<usize>,

    #[clap(long)]
    random_seed: Option<u64>,

    #[clap(long, value_enum)]
    initial_sampler: Option<InitialSampler>,

    /// Source node filter, either a label or a JSON list of node ids
    #[clap(long)]
    source_node_filter: Option<String>,

    /// Target node filter, either a label or a JSON list of node ids
    #[clap(long)]
    target_node_filter: Option<String>,

    #[clap(long)]
    seed_target_nodes: Option<bool>,
}

/// How the candidate lists are populated before the first round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialSampler {
    /// Distinct other nodes drawn uniformly at random
    #[default]
    Uniform,
    /// Nodes visited by a random walk over the relationships of the graph,
    /// topped up with uniform draws
    RandomWalk,
}

/// Parameters of the NN-Descent engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnConfig {
    /// Number of neighbors to find for each node
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Fraction of new neighbors sampled per node and round
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    /// Fraction of the maximum number of updates under which a round counts
    /// as converged
    #[serde(default = "default_delta_threshold")]
    pub delta_threshold: f64,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Number of purely exploratory random joins per node and round
    #[serde(default = "default_random_joins")]
    pub random_joins: usize,

    /// Probability of replacing the weakest neighbor with a weaker candidate
    #[serde(default)]
    pub perturbation_rate: f64,

    /// Lower bound for similarities in the result
    #[serde(default)]
    pub similarity_cutoff: f64,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Lower bound for the number of nodes per partition
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,

    /// Only allowed with `concurrency = 1`, concurrent runs are not
    /// reproducible
    #[serde(default)]
    pub random_seed: Option<u64>,

    #[serde(default)]
    pub initial_sampler: InitialSampler,
}

fn default_top_k() -> usize {
    10
}

fn default_sample_rate() -> f64 {
    0.5
}

fn default_delta_threshold() -> f64 {
    0.001
}

fn default_max_iterations() -> usize {
    100
}

fn default_random_joins() -> usize {
    10
}

fn default_concurrency() -> usize {
    4
}

fn default_min_batch_size() -> usize {
    1000
}

impl Default for KnnConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            sample_rate: default_sample_rate(),
            delta_threshold: default_delta_threshold(),
            max_iterations: default_max_iterations(),
            random_joins: default_random_joins(),
            perturbation_rate: 0.0,
            similarity_cutoff: 0.0,
            concurrency: default_concurrency(),
            min_batch_size: default_min_batch_size(),
            random_seed: None,
            initial_sampler: InitialSampler::Uniform,
        }
    }
}

impl KnnConfig {
    /// Check every parameter against its accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::invalid("top_k", self.top_k, "a value >= 1"));
        }
        if !(self.sample_rate > 0.0 && self.sample_rate <= 1.0) {
            return Err(ConfigError::invalid(
                "sample_rate",
                self.sample_rate,
                "a value in (0, 1]",
            ));
        }
        check_unit_interval("delta_threshold", self.delta_threshold)?;
        check_unit_interval("perturbation_rate", self.perturbation_rate)?;
        check_unit_interval("similarity_cutoff", self.similarity_cutoff)?;
        if self.max_iterations == 0 {
            return Err(ConfigError::invalid(
                "max_iterations",
                self.max_iterations,
                "a value >= 1",
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::invalid(
                "concurrency",
                self.concurrency,
                "a value >= 1",
            ));
        }
        if let Some(random_seed) = self.random_seed {
            if self.concurrency > 1 {
                return Err(ConfigError::invalid(
                    "random_seed",
                    random_seed,
                    "no seed unless concurrency is 1",
                ));
            }
        }
        if self.min_batch_size == 0 {
            return Err(ConfigError::invalid(
                "min_batch_size",
                self.min_batch_size,
                "a value >= 1",
            ));
        }
        Ok(())
    }

    /// Number of neighbors kept per node: `top_k`, capped by the number of
    /// other nodes.
    pub fn bounded_k(&self, node_count: u64) -> usize {
        let others = node_count.saturating_sub(1);
        (self.top_k as u64).min(others) as usize
    }

    /// Number of new neighbors sampled per node and round.
    pub fn sampled_k(&self, node_count: u64) -> usize {
        let sampled = (self.sample_rate * self.top_k as f64).ceil() as usize;
        sampled.min(self.bounded_k(node_count))
    }
}

fn check_unit_interval(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, value, "a value in [0, 1]"))
    }
}

/// Configuration of a filtered k-NN computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilteredKnnConfig {
    #[serde(default)]
    pub knn: KnnConfig,

    /// Nodes for which results are produced
    #[serde(default)]
    pub source_node_filter: NodeFilterSpec,

    /// Nodes that may appear as neighbors in the results
    #[serde(default)]
    pub target_node_filter: NodeFilterSpec,

    /// Pre-populate the result of every node with similarities to a small
    /// set of target nodes
    #[serde(default)]
    pub seed_target_nodes: bool,
}

impl FilteredKnnConfig {
    /// Load the configuration from environment variables, e.g.
    /// `SIMKNN__KNN__TOP_K=20` or `SIMKNN__TARGET_NODE_FILTER=Person`.
    pub fn load_config(prefix: &str) -> Result<FilteredKnnConfig> {
        let settings = config::Config::builder();
        let settings = settings
            .add_source(
                config::Environment::with_prefix(prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: FilteredKnnConfig = settings.try_deserialize::<FilteredKnnConfig>()?;
        config.validate()?;
        debug!("Loaded configuration from {prefix} environment: {config:?}");
        Ok(config)
    }

    pub fn overwrite_defaults_with_cli_args(&mut self, opts: Opt) -> Result<(), ConfigError> {
        if let Some(top_k) = opts.top_k {
            self.knn.top_k = top_k;
        }

        if let Some(max_iterations) = opts.max_iterations {
            self.knn.max_iterations = max_iterations;
        }

        if let Some(sample_rate) = opts.sample_rate {
            self.knn.sample_rate = sample_rate;
        }

        if let Some(similarity_cutoff) = opts.similarity_cutoff {
            self.knn.similarity_cutoff = similarity_cutoff;
        }

        if let Some(concurrency) = opts.concurrency {
            self.knn.concurrency = concurrency;
        }

        if let Some(random_seed) = opts.random_seed {
            self.knn.random_seed = Some(random_seed);
        }

        if let Some(initial_sampler) = opts.initial_sampler {
            self.knn.initial_sampler = initial_sampler;
        }

        if let Some(filter) = opts.source_node_filter {
            self.source_node_filter = parse_filter_arg(&filter)?;
        }

        if let Some(filter) = opts.target_node_filter {
            self.target_node_filter = parse_filter_arg(&filter)?;
        }

        if let Some(seed_target_nodes) = opts.seed_target_nodes {
            self.seed_target_nodes = seed_target_nodes;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.knn.validate()
    }
}

/// Command line filters are either a bare label, a single id or a JSON list.
fn parse_filter_arg(arg: &str) -> Result<NodeFilterSpec, ConfigError> {
    match serde_json::from_str::<serde_json::Value>(arg) {
        Ok(value) => NodeFilterSpec::parse(&value),
        Err(_) => NodeFilterSpec::parse(&serde_json::Value::String(arg.to_string())),
    }
}
