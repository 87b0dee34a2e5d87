use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use crate::ensemble::SelectionCriterion;
use crate::util::constants;
use crate::util::scimm_types::{AssignmentMode, ClusteringParams};

/// How the first partition of a `cluster` run is produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum, Serialize)]
pub enum InitMethod {
    /// assign every read to a random cluster
    Random,
    /// read a complete partition from the `cluster-<c>.fa` listings in the workspace
    Given,
    /// read an incomplete partition from the workspace and place the remaining reads
    /// with a single maximization step
    Seeded,
    /// seed every cluster with the reads constrained to it
    ConstraintSeeded,
}

/// Options shared by every subcommand that clusters reads.
#[derive(clap::Args, Clone, Debug, Serialize)]
pub struct CommonOpts {
    /// FASTA file (possibly gzipped) holding all of the reads
    #[arg(short, long)]
    pub reads: PathBuf,

    /// number of clusters to start with
    #[arg(short = 'k', long = "num-clusters")]
    pub k: usize,

    /// directory in which the cluster listings, models and scores live
    #[arg(short, long, default_value = ".")]
    pub workspace: PathBuf,

    /// file of mate pairs, one pair of whitespace separated read ids per line
    #[arg(short, long)]
    pub mates: Option<PathBuf>,

    /// use a soft (EM) assignment of reads to clusters when training
    #[arg(long)]
    pub soft: bool,

    /// keep the cluster priors uniform rather than estimating them
    #[arg(long)]
    pub uniform_priors: bool,

    /// number of clusters trained and scored concurrently
    #[arg(short = 'j', long, default_value_t = 1)]
    pub threads: usize,

    /// directory holding `build-icm`, `em_build-icm` and `simple-score`;
    /// the `PATH` is searched if absent
    #[arg(long)]
    pub bin_dir: Option<PathBuf>,

    /// maximum number of reassignment iterations
    #[arg(long, help_heading = "EM", default_value_t = constants::MAX_ITER)]
    pub max_iter: u32,

    /// stop after this many consecutive decreases of the likelihood
    #[arg(long, help_heading = "EM", default_value_t = constants::LIKE_DECREASE_LIMIT)]
    pub streak_limit: u32,

    /// stop once fewer than this fraction of the reads change cluster
    #[arg(long, help_heading = "EM", default_value_t = constants::REASSIGN_THRESH)]
    pub reassign_thresh: f64,

    /// in soft mode, the posterior a read needs to train a cluster
    #[arg(long, help_heading = "EM", default_value_t = constants::SOFT_ASSIGN_THRESH)]
    pub soft_assign_thresh: f64,
}

impl CommonOpts {
    pub fn mode(&self) -> AssignmentMode {
        if self.soft {
            AssignmentMode::Soft
        } else {
            AssignmentMode::Hard
        }
    }

    pub fn params(&self, k: usize, seed_only: bool) -> ClusteringParams {
        ClusteringParams::builder()
            .k(k)
            .mode(self.mode())
            .estimate_priors(!self.uniform_priors)
            .threads(self.threads)
            .max_iter(self.max_iter)
            .streak_limit(self.streak_limit)
            .reassign_thresh(self.reassign_thresh)
            .soft_assign_thresh(self.soft_assign_thresh)
            .seed_only(seed_only)
            .build()
    }
}

#[derive(clap::Args, Clone, Debug, Serialize)]
pub struct ClusterOpts {
    #[command(flatten)]
    pub common: CommonOpts,

    /// file of constraints, one `read_id cluster_index` per line
    #[arg(short, long)]
    pub constraints: Option<PathBuf>,

    /// how the initial partition is produced
    #[arg(long, value_enum, default_value_t = InitMethod::Random)]
    pub init: InitMethod,

    /// the models of the given partition are already trained and their
    /// `icm-<c>.scores.tmp` listings are in the workspace
    #[arg(long, conflicts_with_all = ["seed_only", "init"])]
    pub trained: bool,

    /// only initialize, then train and score once; prepares an ensemble candidate
    #[arg(long)]
    pub seed_only: bool,

    /// seed for the random initial partition
    #[arg(long, default_value_t = 0)]
    pub rng_seed: u64,
}

#[derive(clap::Args, Clone, Debug, Serialize)]
pub struct EnsembleOpts {
    #[command(flatten)]
    pub common: CommonOpts,

    /// shell command producing one initial partition in the current directory;
    /// `{reads}`, `{k}`, `{threads}`, `{sample}` and `{start}` are substituted
    #[arg(long)]
    pub init_cmd: Option<String>,

    /// how many times `--init-cmd` is run, each in its own `tmp.start<i>` directory
    #[arg(long, default_value_t = 0)]
    pub num_starts: usize,

    /// directories already holding candidate partitions and their scores
    #[arg(long, value_delimiter = ',')]
    pub starts: Vec<PathBuf>,

    /// how the candidates are compared
    #[arg(long, value_enum, default_value_t = SelectionCriterion::MinEntropy)]
    pub criterion: SelectionCriterion,

    /// number of reads each seeding command should sample
    #[arg(long, default_value_t = constants::DEFAULT_SEED_SAMPLE)]
    pub seed_sample: usize,

    /// threads given to each seeding command
    #[arg(long, default_value_t = 1)]
    pub threads_per_start: usize,
}

#[derive(Subcommand, Clone, Debug, Serialize)]
pub enum Command {
    /// cluster the reads by iteratively training a model per cluster and
    /// reassigning every read to the model that explains it best
    Cluster(ClusterOpts),
    /// run several initializations, keep the most confident one, and
    /// cluster from it
    Ensemble(EnsembleOpts),
}

/// clustering of metagenomic reads with interpolated Markov models
#[derive(Parser, Debug, Serialize)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// be quiet (i.e. don't output log messages that aren't at least warnings)
    #[arg(long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// be verbose (i.e. output debugging messages too)
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}
