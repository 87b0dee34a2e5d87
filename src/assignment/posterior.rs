use itertools::izip;
use tracing::trace;

use crate::assignment::constraints::{Constraints, MatePairs};
use crate::util::errors::ClusterError;
use crate::util::probs::{LogSpace, log_sum};
use crate::util::scimm_types::{AssignmentMode, Priors, ReadSet, ScoreMatrix};

/// Posterior probability of every read under every live cluster,
/// along with the likelihood of the whole read set.
#[derive(Clone, Debug, PartialEq)]
pub struct Posteriors {
    k: usize,
    probs: Vec<f64>,
    likelihood: f64,
}

impl Posteriors {
    #[cfg(test)]
    pub(crate) fn from_rows(rows: Vec<Vec<f64>>, likelihood: f64) -> Self {
        let k = rows.first().map_or(0, Vec::len);
        Self {
            k,
            probs: rows.into_iter().flatten().collect(),
            likelihood,
        }
    }

    pub fn num_clusters(&self) -> usize {
        self.k
    }

    pub fn num_reads(&self) -> usize {
        if self.k == 0 { 0 } else { self.probs.len() / self.k }
    }

    #[inline(always)]
    pub fn row(&self, read: usize) -> &[f64] {
        &self.probs[read * self.k..(read + 1) * self.k]
    }

    pub fn likelihood(&self) -> f64 {
        self.likelihood
    }

    /// The most probable cluster for `read`; ties go to the lowest index.
    pub fn best_cluster(&self, read: usize) -> usize {
        let mut best = 0;
        let mut best_p = f64::NEG_INFINITY;
        for (c, p) in self.row(read).iter().enumerate() {
            if *p > best_p {
                best_p = *p;
                best = c;
            }
        }
        best
    }

    /// Sum over reads and clusters of `-p ln p`.
    pub fn entropy(&self) -> f64 {
        self.probs
            .iter()
            .filter(|p| **p > 0.0)
            .map(|p| -p * p.ln())
            .sum()
    }
}

/// Combine the per-cluster model scores with the priors and mate
/// evidence into normalized posteriors, and accumulate the likelihood.
///
/// A constrained read gets a one-hot posterior on its forced cluster
/// and contributes nothing to the likelihood. A mated read is scored
/// by the elementwise sum of its own and its mate's scores; since the
/// mate is scored the same way, each read adds half of that value.
/// Under hard assignment a read contributes its best combined score,
/// under soft assignment the log of the summed combined scores.
pub fn compute_posteriors(
    reads: &ReadSet,
    scores: &ScoreMatrix,
    priors: &Priors,
    mates: &MatePairs,
    constraints: &Constraints,
    mode: AssignmentMode,
) -> Result<Posteriors, ClusterError> {
    let k = priors.len();
    scores.check_width(k)?;
    if scores.num_reads() != reads.len() {
        return Err(ClusterError::ClusterCountMismatch {
            expected: reads.len(),
            found: scores.num_reads(),
        });
    }

    let ln_priors: Vec<LogSpace> = priors
        .as_slice()
        .iter()
        .map(|p| LogSpace::new_from_linear(*p))
        .collect();

    let mut probs = vec![0.0_f64; reads.len() * k];
    let mut combined = vec![LogSpace::new_from_ln(0.0); k];
    let mut likelihood = 0.0_f64;

    for (r, post) in probs.chunks_exact_mut(k.max(1)).enumerate().take(reads.len()) {
        if let Some(forced) = constraints.forced(r) {
            if forced >= k {
                return Err(ClusterError::ConstraintOutOfRange {
                    read: reads.name(r).to_string(),
                    cluster: forced,
                    k,
                });
            }
            post[forced] = 1.0;
            continue;
        }

        let mate = mates.mate(r);
        match mate {
            Some(m) => {
                for (dst, s, ms, lp) in izip!(&mut combined, scores.row(r), scores.row(m), &ln_priors) {
                    *dst = LogSpace::new_from_ln(s + ms) * *lp;
                }
            }
            None => {
                for (dst, s, lp) in izip!(&mut combined, scores.row(r), &ln_priors) {
                    *dst = LogSpace::new_from_ln(*s) * *lp;
                }
            }
        }

        let norm = log_sum(&combined);

        if norm.get_ln() == f64::NEG_INFINITY || norm.get_ln().is_nan() {
            // no cluster can explain this read at all
            trace!("read {} has no finite score; spreading it uniformly", reads.name(r));
            post.fill(1.0 / k as f64);
        } else {
            for (p, s) in post.iter_mut().zip(&combined) {
                *p = (*s / norm).get_linear();
            }
        }

        let contribution = match mode {
            AssignmentMode::Hard => combined
                .iter()
                .map(LogSpace::get_ln)
                .fold(f64::NEG_INFINITY, f64::max),
            AssignmentMode::Soft => norm.get_ln(),
        };
        likelihood += if mate.is_some() {
            contribution / 2.0
        } else {
            contribution
        };
    }

    Ok(Posteriors {
        k,
        probs,
        likelihood,
    })
}

/// Re-estimate the priors as the expected number of bases each
/// cluster explains, using posteriors under the previous priors.
pub fn update_priors(
    reads: &ReadSet,
    scores: &ScoreMatrix,
    prev: &Priors,
    mates: &MatePairs,
    constraints: &Constraints,
    mode: AssignmentMode,
) -> Result<Priors, ClusterError> {
    let post = compute_posteriors(reads, scores, prev, mates, constraints, mode)?;
    let mut expected_bp = vec![0.0_f64; prev.len()];
    for r in 0..reads.len() {
        let len = reads.seq_len(r) as f64;
        for (bp, p) in expected_bp.iter_mut().zip(post.row(r)) {
            *bp += p * len;
        }
    }
    Ok(Priors::from_weights(expected_bp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::probs::log_add;
    use crate::util::scimm_types::ReadInfo;

    fn reads(lens: &[usize]) -> ReadSet {
        ReadSet::from_reads(
            lens.iter()
                .enumerate()
                .map(|(i, l)| ReadInfo::new(format!("r{i}"), vec![b'A'; *l]))
                .collect(),
        )
        .unwrap()
    }

    fn scores() -> ScoreMatrix {
        ScoreMatrix::from_rows(vec![
            vec![-10.0, -12.0, -15.0],
            vec![-300.0, -290.0, -310.0],
            vec![-5.0, -5.0, -5.0],
            vec![-1e6, -1e6 + 1.0, -1e6 + 3.0],
        ])
        .unwrap()
    }

    #[test]
    fn posteriors_sum_to_one() {
        let rs = reads(&[100, 100, 100, 100]);
        let priors = Priors::from_weights(vec![0.5, 0.3, 0.2]);
        for mode in [AssignmentMode::Hard, AssignmentMode::Soft] {
            let post = compute_posteriors(
                &rs,
                &scores(),
                &priors,
                &MatePairs::none(4),
                &Constraints::none(),
                mode,
            )
            .unwrap();
            for r in 0..4 {
                let s: f64 = post.row(r).iter().sum();
                assert!((s - 1.0).abs() < 1e-9, "read {r} sums to {s}");
            }
            assert_eq!(post.best_cluster(0), 0);
            assert_eq!(post.best_cluster(1), 1);
            assert_eq!(post.best_cluster(3), 2);
        }
    }

    #[test]
    fn constrained_read_is_one_hot_and_silent() {
        let rs = reads(&[100, 100, 100, 100]);
        let priors = Priors::uniform(3);
        let cons = Constraints::from_named(&rs, &[("r0".to_string(), 2)]).unwrap();
        let post = compute_posteriors(
            &rs,
            &scores(),
            &priors,
            &MatePairs::none(4),
            &cons,
            AssignmentMode::Hard,
        )
        .unwrap();
        assert_eq!(post.row(0), &[0.0, 0.0, 1.0]);

        let free = compute_posteriors(
            &rs,
            &scores(),
            &priors,
            &MatePairs::none(4),
            &Constraints::none(),
            AssignmentMode::Hard,
        )
        .unwrap();
        // read 0 contributes its best combined score when unconstrained
        let r0 = -10.0 + (1.0_f64 / 3.0).ln();
        assert!((free.likelihood() - post.likelihood() - r0).abs() < 1e-6);
    }

    #[test]
    fn likelihood_modes_differ_only_in_accumulated_quantity() {
        let rs = reads(&[10]);
        let sm = ScoreMatrix::from_rows(vec![vec![-2.0, -3.0]]).unwrap();
        let priors = Priors::uniform(2);
        let ln_half = 0.5_f64.ln();
        let hard = compute_posteriors(&rs, &sm, &priors, &MatePairs::none(1), &Constraints::none(), AssignmentMode::Hard)
            .unwrap();
        let soft = compute_posteriors(&rs, &sm, &priors, &MatePairs::none(1), &Constraints::none(), AssignmentMode::Soft)
            .unwrap();
        assert!((hard.likelihood() - (-2.0 + ln_half)).abs() < 1e-12);
        let norm = log_add(-2.0 + ln_half, -3.0 + ln_half);
        assert!((soft.likelihood() - norm).abs() < 1e-12);
        assert_eq!(hard.row(0), soft.row(0));
    }

    #[test]
    fn mates_share_posteriors_and_count_once() {
        let rs = reads(&[50, 50, 50]);
        let sm = ScoreMatrix::from_rows(vec![
            vec![-4.0, -1.0],
            vec![-1.0, -6.0],
            vec![-2.0, -2.0],
        ])
        .unwrap();
        let mates = MatePairs::from_named_pairs(&rs, &[("r0".to_string(), "r1".to_string())]).unwrap();
        let priors = Priors::uniform(2);
        let post = compute_posteriors(&rs, &sm, &priors, &mates, &Constraints::none(), AssignmentMode::Hard)
            .unwrap();
        assert_eq!(post.row(0), post.row(1));
        // pair combined: [-5, -7]; best is -5 plus ln(1/2), counted once
        let ln_half = 0.5_f64.ln();
        let expected = (-5.0 + ln_half) + (-2.0 + ln_half);
        assert!((post.likelihood() - expected).abs() < 1e-12);
        assert_eq!(post.best_cluster(0), 0);
        assert_eq!(post.best_cluster(1), 0);
    }

    #[test]
    fn mismatched_widths_are_rejected() {
        let rs = reads(&[10, 10, 10, 10]);
        let err = compute_posteriors(
            &rs,
            &scores(),
            &Priors::uniform(2),
            &MatePairs::none(4),
            &Constraints::none(),
            AssignmentMode::Hard,
        );
        assert!(matches!(
            err,
            Err(ClusterError::ClusterCountMismatch { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn priors_track_expected_bases() {
        // read 0 (300bp) is certainly cluster 0, read 1 (100bp) certainly cluster 1
        let rs = reads(&[300, 100]);
        let sm = ScoreMatrix::from_rows(vec![vec![0.0, -1000.0], vec![-1000.0, 0.0]]).unwrap();
        let p = update_priors(
            &rs,
            &sm,
            &Priors::uniform(2),
            &MatePairs::none(2),
            &Constraints::none(),
            AssignmentMode::Hard,
        )
        .unwrap();
        assert!((p.get(0) - 0.75).abs() < 1e-9);
        assert!((p.get(1) - 0.25).abs() < 1e-9);
        assert!((p.as_slice().iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn entropy_of_certain_assignment_is_zero() {
        let post = Posteriors::from_rows(vec![vec![1.0, 0.0], vec![0.0, 1.0]], 0.0);
        assert_eq!(post.entropy(), 0.0);
        let post = Posteriors::from_rows(vec![vec![0.5, 0.5]], 0.0);
        assert!((post.entropy() - 2.0_f64.ln()).abs() < 1e-12);
    }
}
