//! The sequence models behind each cluster.
//!
//! The clustering loop never looks inside a model. Once per iteration
//! it asks a [`ClusterModeller`] to train a model on every cluster's
//! training set and to score all reads against it; the resulting
//! listings become the [`ScoreMatrix`] the posteriors are built from.

use anyhow::{Context, bail};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::assignment::partition::Partition;
use crate::util::file_utils::{model_path, scores_path, training_path};
use crate::util::read_function::read_score_listing;
use crate::util::scimm_types::{AssignmentMode, ReadSet, ScoreMatrix, WeightedRead};
use crate::util::write_function::write_training_set;

pub trait ClusterModeller: Sync {
    /// Handle to a trained model.
    type Model;

    /// Train the model of `cluster` on its (possibly weighted) training set.
    fn train(
        &self,
        cluster: usize,
        reads: &ReadSet,
        training: &[WeightedRead],
    ) -> anyhow::Result<Self::Model>;

    /// Log-likelihood of every read under `model`, keyed by read id.
    fn score(
        &self,
        cluster: usize,
        model: &Self::Model,
        reads: &ReadSet,
    ) -> anyhow::Result<FxHashMap<String, f64>>;
}

/// Train and score every live cluster of `partition` on `pool`, and
/// assemble the listings into a score matrix. A failure for any
/// cluster fails the whole iteration.
pub fn train_and_score<M: ClusterModeller>(
    modeller: &M,
    reads: &ReadSet,
    partition: &Partition,
    pool: &rayon::ThreadPool,
) -> anyhow::Result<ScoreMatrix> {
    let k = partition.num_clusters();
    let listings = pool.install(|| {
        (0..k)
            .into_par_iter()
            .map(|c| {
                let model = modeller
                    .train(c, reads, partition.training_set(c))
                    .with_context(|| format!("training the model for cluster {c}"))?;
                modeller
                    .score(c, &model, reads)
                    .with_context(|| format!("scoring reads against cluster {c}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()
    })?;
    Ok(ScoreMatrix::from_listings(reads, &listings)?)
}

/// Read the `icm-<c>.scores.tmp` listings left in `dir` for the first
/// `k` clusters.
pub fn load_score_listings(dir: &Path, reads: &ReadSet, k: usize) -> anyhow::Result<ScoreMatrix> {
    let listings = (0..k)
        .map(|c| read_score_listing(&scores_path(dir, c)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(ScoreMatrix::from_listings(reads, &listings)?)
}

/// Interpolated Markov models built and scored by the Glimmer
/// programs `build-icm` (or `em_build-icm` for weighted training
/// sets) and `simple-score`, with all artifacts in `workspace`.
#[derive(TypedBuilder, Clone, Debug)]
pub struct ImmModeller {
    /// Directory holding the programs; `$PATH` is searched otherwise.
    #[builder(default)]
    bin_dir: Option<PathBuf>,
    workspace: PathBuf,
    /// The complete read file, streamed to the scorer.
    reads_path: PathBuf,
    #[builder(default = AssignmentMode::Hard)]
    mode: AssignmentMode,
}

impl ImmModeller {
    fn program(&self, name: &str) -> PathBuf {
        match &self.bin_dir {
            Some(d) => d.join(name),
            None => PathBuf::from(name),
        }
    }

    fn run(&self, mut cmd: Command) -> anyhow::Result<()> {
        debug!("running {:?}", cmd);
        let status = cmd
            .current_dir(&self.workspace)
            .status()
            .with_context(|| format!("could not launch {:?}", cmd.get_program()))?;
        if !status.success() {
            bail!("{:?} exited with {}", cmd.get_program(), status);
        }
        Ok(())
    }
}

impl ClusterModeller for ImmModeller {
    type Model = PathBuf;

    fn train(
        &self,
        cluster: usize,
        reads: &ReadSet,
        training: &[WeightedRead],
    ) -> anyhow::Result<PathBuf> {
        let build = training_path(&self.workspace, cluster);
        write_training_set(&build, reads, training, self.mode)?;

        let icm = model_path(&self.workspace, cluster);
        let builder = match self.mode {
            AssignmentMode::Hard => "build-icm",
            AssignmentMode::Soft => "em_build-icm",
        };
        let mut cmd = Command::new(self.program(builder));
        cmd.arg("-p")
            .arg("1")
            .arg(&icm)
            .stdin(File::open(&build).with_context(|| format!("opening {}", build.display()))?)
            .stdout(Stdio::null());
        self.run(cmd)?;
        Ok(icm)
    }

    fn score(
        &self,
        cluster: usize,
        model: &PathBuf,
        _reads: &ReadSet,
    ) -> anyhow::Result<FxHashMap<String, f64>> {
        let out = scores_path(&self.workspace, cluster);
        let mut cmd = Command::new(self.program("simple-score"));
        cmd.arg("-N")
            .arg(model)
            .stdin(
                File::open(&self.reads_path)
                    .with_context(|| format!("opening {}", self.reads_path.display()))?,
            )
            .stdout(File::create(&out).with_context(|| format!("creating {}", out.display()))?)
            .stderr(Stdio::null());
        self.run(cmd)?;
        read_score_listing(&out)
    }
}
