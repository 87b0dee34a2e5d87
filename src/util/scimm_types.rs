use rustc_hash::FxHashMap;
use serde::Serialize;
use typed_builder::TypedBuilder;

use crate::util::constants;
use crate::util::errors::ClusterError;

/// Whether reads are assigned wholly to their best cluster, or
/// fractionally to every sufficiently probable cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, clap::ValueEnum)]
pub enum AssignmentMode {
    Hard,
    Soft,
}

/// A single input read. Only the identifier and the sequence
/// length matter to the clustering itself; the sequence is kept
/// so that membership and training listings can be written out.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadInfo {
    pub name: String,
    pub seq: Vec<u8>,
}

impl ReadInfo {
    pub fn new(name: impl Into<String>, seq: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            seq: seq.into(),
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.seq.len()
    }
}

/// The full set of reads being clustered. Reads are referred to
/// everywhere else by their dense index into this set.
#[derive(Debug, Default)]
pub struct ReadSet {
    reads: Vec<ReadInfo>,
    index: FxHashMap<String, usize>,
}

impl ReadSet {
    pub fn from_reads(reads: Vec<ReadInfo>) -> anyhow::Result<Self> {
        let mut index = FxHashMap::default();
        index.reserve(reads.len());
        for (i, r) in reads.iter().enumerate() {
            if index.insert(r.name.clone(), i).is_some() {
                anyhow::bail!(
                    "read identifiers must be unique up to the first whitespace, but {} appears more than once",
                    r.name
                );
            }
        }
        Ok(Self { reads, index })
    }

    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    pub fn get(&self, idx: usize) -> &ReadInfo {
        &self.reads[idx]
    }

    pub fn name(&self, idx: usize) -> &str {
        &self.reads[idx].name
    }

    pub fn seq_len(&self, idx: usize) -> usize {
        self.reads[idx].len()
    }

    pub fn total_bases(&self) -> usize {
        self.reads.iter().map(ReadInfo::len).sum()
    }

    pub fn id_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ReadInfo> {
        self.reads.iter()
    }
}

/// Prior probability of each live cluster. The length always
/// equals the number of live clusters and the entries sum to 1.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Priors {
    probs: Vec<f64>,
}

impl Priors {
    pub fn uniform(k: usize) -> Self {
        Self {
            probs: vec![1.0 / k as f64; k],
        }
    }

    /// Build priors proportional to `weights`. If the weights carry
    /// no mass at all, fall back to uniform.
    pub fn from_weights(weights: Vec<f64>) -> Self {
        let mut p = Self { probs: weights };
        p.normalize();
        p
    }

    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.probs
    }

    pub fn get(&self, cluster: usize) -> f64 {
        self.probs[cluster]
    }

    pub fn normalize(&mut self) {
        let total: f64 = self.probs.iter().sum();
        if total > 0.0 && total.is_finite() {
            self.probs.iter_mut().for_each(|p| *p /= total);
        } else if !self.is_empty() {
            let u = 1.0 / self.probs.len() as f64;
            self.probs.fill(u);
        }
    }

    /// Carry each surviving prior to its new index; the result is
    /// *not* renormalized.
    pub(crate) fn retain_mapped(&mut self, old_to_new: &[Option<usize>], new_k: usize) {
        let mut probs = vec![0.0; new_k];
        for (old, new) in old_to_new.iter().enumerate() {
            if let Some(new) = new {
                probs[*new] = self.probs[old];
            }
        }
        self.probs = probs;
    }
}

/// Per-read log-likelihood under each live cluster's model, stored
/// as a dense read-major matrix so that every row has exactly `k`
/// entries.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreMatrix {
    k: usize,
    values: Vec<f64>,
}

impl ScoreMatrix {
    /// Assemble the matrix from one listing (read id -> score) per
    /// cluster. Every read in `reads` must be present in every
    /// listing; ids in a listing that are not in `reads` are ignored.
    pub fn from_listings(
        reads: &ReadSet,
        listings: &[FxHashMap<String, f64>],
    ) -> Result<Self, ClusterError> {
        let k = listings.len();
        let mut values = vec![0.0; reads.len() * k];
        for (ridx, r) in reads.iter().enumerate() {
            for (c, listing) in listings.iter().enumerate() {
                match listing.get(&r.name) {
                    Some(s) => values[ridx * k + c] = *s,
                    None => {
                        return Err(ClusterError::MissingScore {
                            read: r.name.clone(),
                            cluster: c,
                        });
                    }
                }
            }
        }
        Ok(Self { k, values })
    }

    /// Build directly from read-major rows.
    #[cfg(test)]
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, ClusterError> {
        let k = rows.first().map_or(0, Vec::len);
        let mut values = Vec::with_capacity(rows.len() * k);
        for row in rows {
            if row.len() != k {
                return Err(ClusterError::ClusterCountMismatch {
                    expected: k,
                    found: row.len(),
                });
            }
            values.extend(row);
        }
        Ok(Self { k, values })
    }

    pub fn num_clusters(&self) -> usize {
        self.k
    }

    pub fn num_reads(&self) -> usize {
        if self.k == 0 { 0 } else { self.values.len() / self.k }
    }

    #[inline(always)]
    pub fn row(&self, read: usize) -> &[f64] {
        &self.values[read * self.k..(read + 1) * self.k]
    }

    /// Fail unless the rows are exactly `k` wide.
    pub fn check_width(&self, k: usize) -> Result<(), ClusterError> {
        if self.k != k {
            return Err(ClusterError::ClusterCountMismatch {
                expected: k,
                found: self.k,
            });
        }
        Ok(())
    }

    /// Reorder columns so that old column `c` becomes column `perm[c]`.
    pub fn permute_columns(&self, perm: &[usize]) -> Self {
        let mut values = vec![0.0; self.values.len()];
        for (src, dst) in self
            .values
            .chunks_exact(self.k.max(1))
            .zip(values.chunks_exact_mut(self.k.max(1)))
        {
            for (c, v) in src.iter().enumerate() {
                dst[perm[c]] = *v;
            }
        }
        Self { k: self.k, values }
    }
}

/// A read contributing to a cluster's training set, with the
/// weight of its contribution (1 under hard assignment).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightedRead {
    pub read: usize,
    pub weight: f64,
}

/// The parameters controlling one clustering run.
#[derive(TypedBuilder, Clone, Debug, Serialize)]
pub struct ClusteringParams {
    /// Number of clusters to start with; this can only shrink
    /// as clusters empty out.
    pub k: usize,
    /// Hard or soft (EM) assignment of reads to clusters.
    #[builder(default = AssignmentMode::Hard)]
    pub mode: AssignmentMode,
    /// Re-estimate cluster priors from the expected number of
    /// bases assigned to each cluster, rather than keeping them
    /// uniform.
    #[builder(default = true)]
    pub estimate_priors: bool,
    /// Number of clusters trained and scored concurrently.
    #[builder(default = 1)]
    pub threads: usize,
    #[builder(default = constants::MAX_ITER)]
    pub max_iter: u32,
    /// Stop after this many consecutive likelihood decreases.
    #[builder(default = constants::LIKE_DECREASE_LIMIT)]
    pub streak_limit: u32,
    /// Stop once fewer than this fraction of reads are reassigned.
    #[builder(default = constants::REASSIGN_THRESH)]
    pub reassign_thresh: f64,
    #[builder(default = constants::SOFT_ASSIGN_THRESH)]
    pub soft_assign_thresh: f64,
    /// Perform only the seeding pass and a single round of
    /// training and scoring on its result.
    #[builder(default = false)]
    pub seed_only: bool,
}
