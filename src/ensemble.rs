//! Pick the best of several independently seeded starting partitions.
//!
//! Each candidate lives in its own directory holding `cluster-<c>.fa`
//! listings and the matching `icm-<c>.scores.tmp` score listings. A
//! candidate whose seeding failed is excluded; the run only fails if
//! no candidate is usable.

use anyhow::Context;
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{info, warn};

use crate::assignment::constraints::{Constraints, MatePairs};
use crate::assignment::posterior::{compute_posteriors, update_priors};
use crate::modeller::load_score_listings;
use crate::util::errors::ClusterError;
use crate::util::file_utils::{
    is_nonempty_file, membership_indices, membership_path, prepare_empty_dir, remove_stale,
    scores_path,
};
use crate::util::read_function::read_score_listing;
use crate::util::scimm_types::{AssignmentMode, Priors, ReadSet, ScoreMatrix};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, clap::ValueEnum)]
pub enum SelectionCriterion {
    /// Lowest total posterior entropy.
    MinEntropy,
    /// Highest likelihood.
    MaxLikelihood,
}

/// The non-empty clusters found in a candidate directory, by their
/// index in that directory.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub dir: PathBuf,
    pub clusters: Vec<usize>,
}

impl Candidate {
    /// `None` if the directory holds no non-empty membership listing.
    pub fn discover(dir: &Path) -> anyhow::Result<Option<Self>> {
        let clusters: Vec<usize> = membership_indices(dir)?
            .into_iter()
            .filter(|c| is_nonempty_file(&membership_path(dir, *c)))
            .collect();
        if clusters.is_empty() {
            return Ok(None);
        }
        Ok(Some(Self {
            dir: dir.to_path_buf(),
            clusters,
        }))
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    fn scores(&self, reads: &ReadSet) -> anyhow::Result<ScoreMatrix> {
        // read the listings of the surviving clusters as if they were 0..k
        let listings = self
            .clusters
            .iter()
            .map(|c| read_score_listing(&scores_path(&self.dir, *c)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(ScoreMatrix::from_listings(reads, &listings)?)
    }
}

/// Score one candidate by the posteriors of a single step from
/// uniform priors, ignoring mates and constraints.
pub fn score_candidate(
    reads: &ReadSet,
    scores: &ScoreMatrix,
    mode: AssignmentMode,
    criterion: SelectionCriterion,
) -> Result<f64, ClusterError> {
    let k = scores.num_clusters();
    let mates = MatePairs::none(reads.len());
    let cons = Constraints::none();
    let priors = update_priors(reads, scores, &Priors::uniform(k), &mates, &cons, mode)?;
    let post = compute_posteriors(reads, scores, &priors, &mates, &cons, mode)?;
    Ok(match criterion {
        SelectionCriterion::MinEntropy => post.entropy(),
        SelectionCriterion::MaxLikelihood => post.likelihood(),
    })
}

/// Evaluate every candidate directory; failed candidates get `None`.
pub fn evaluate_candidates(
    reads: &ReadSet,
    dirs: &[PathBuf],
    mode: AssignmentMode,
    criterion: SelectionCriterion,
) -> Vec<Option<f64>> {
    dirs.iter()
        .map(|dir| {
            let res = Candidate::discover(dir).and_then(|cand| match cand {
                None => Ok(None),
                Some(cand) => {
                    let scores = cand.scores(reads)?;
                    Ok(Some(score_candidate(reads, &scores, mode, criterion)?))
                }
            });
            match res {
                Ok(Some(v)) => {
                    info!("{}: {:?} = {:.4}", dir.display(), criterion, v);
                    Some(v)
                }
                Ok(None) => {
                    warn!("{} holds no clusters; excluding it", dir.display());
                    None
                }
                Err(e) => {
                    warn!("could not evaluate {}: {:#}; excluding it", dir.display(), e);
                    None
                }
            }
        })
        .collect()
}

/// Index of the best usable candidate. Ties go to the earlier one.
pub fn select_best(values: &[Option<f64>], criterion: SelectionCriterion) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, v) in values.iter().enumerate() {
        let Some(v) = v.filter(|v| !v.is_nan()) else {
            continue;
        };
        let better = match (best, criterion) {
            (None, _) => true,
            (Some((_, b)), SelectionCriterion::MinEntropy) => v < b,
            (Some((_, b)), SelectionCriterion::MaxLikelihood) => v > b,
        };
        if better {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}

/// Copy a candidate's listings into `workspace`, renumbering its
/// clusters densely. Returns the number of clusters installed.
pub fn install_candidate(candidate: &Candidate, workspace: &Path) -> anyhow::Result<usize> {
    for (new, old) in candidate.clusters.iter().enumerate() {
        let paths: [fn(&Path, usize) -> PathBuf; 2] = [membership_path, scores_path];
        for path_fn in paths {
            let src = path_fn(&candidate.dir, *old);
            let dst = path_fn(workspace, new);
            std::fs::copy(&src, &dst)
                .with_context(|| format!("copying {} to {}", src.display(), dst.display()))?;
        }
    }
    let k = candidate.num_clusters();
    remove_stale(workspace, k, membership_path)?;
    remove_stale(workspace, k, scores_path)?;
    Ok(k)
}

/// Values substituted into a seeding command template.
#[derive(Clone, Debug)]
pub struct SeedTemplate<'a> {
    pub template: &'a str,
    pub reads: &'a Path,
    pub k: usize,
    pub threads: usize,
    pub sample: usize,
}

impl SeedTemplate<'_> {
    pub fn expand(&self, start: usize) -> String {
        self.template
            .replace("{reads}", &self.reads.display().to_string())
            .replace("{k}", &self.k.to_string())
            .replace("{threads}", &self.threads.to_string())
            .replace("{sample}", &self.sample.to_string())
            .replace("{start}", &start.to_string())
    }
}

/// Run `num_starts` seeding commands, each through `sh -c` inside its
/// own freshly emptied `root/tmp.start<i>`, at most `concurrency` at a
/// time. A failing command only taints its own directory.
pub fn run_seed_commands(
    template: &SeedTemplate,
    num_starts: usize,
    root: &Path,
    concurrency: usize,
) -> anyhow::Result<Vec<PathBuf>> {
    let dirs: Vec<PathBuf> = (0..num_starts)
        .map(|i| root.join(format!("tmp.start{i}")))
        .collect();
    for d in &dirs {
        prepare_empty_dir(d)?;
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(concurrency.max(1))
        .build()?;
    pool.install(|| {
        dirs.par_iter().enumerate().for_each(|(i, dir)| {
            let cmd = template.expand(i);
            info!("start {}: {}", i, cmd);
            if let Err(e) = run_in(dir, &cmd) {
                warn!("start {} failed: {:#}", i, e);
            }
        })
    });
    Ok(dirs)
}

fn run_in(dir: &Path, cmd: &str) -> anyhow::Result<()> {
    let log = File::create(dir.join("start.log"))?;
    let status = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log)
        .status()
        .context("could not launch the shell")?;
    if !status.success() {
        anyhow::bail!("exited with {}", status);
    }
    Ok(())
}

/// Evaluate the candidates, install the best into `workspace`, and
/// return it along with the installed cluster count.
pub fn choose_start(
    reads: &ReadSet,
    dirs: &[PathBuf],
    mode: AssignmentMode,
    criterion: SelectionCriterion,
    workspace: &Path,
) -> anyhow::Result<(usize, usize)> {
    let values = evaluate_candidates(reads, dirs, mode, criterion);
    let best = select_best(&values, criterion).ok_or(ClusterError::NoViableSeed {
        attempted: dirs.len(),
    })?;
    let cand = Candidate::discover(&dirs[best])?.ok_or(ClusterError::NoViableSeed {
        attempted: dirs.len(),
    })?;
    let k = install_candidate(&cand, workspace)?;
    info!("selected {} with {} clusters", dirs[best].display(), k);
    // sanity check that the installed listings read back cleanly
    load_score_listings(workspace, reads, k)?;
    Ok((best, k))
}
