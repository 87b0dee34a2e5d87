use crate::assignment::constraints::Constraints;
use crate::assignment::posterior::Posteriors;
use crate::util::errors::ClusterError;
use crate::util::scimm_types::{AssignmentMode, ReadSet, WeightedRead};

/// The live assignment of reads to clusters, together with the
/// training set each cluster's model will be built from next.
///
/// Every read belongs to exactly one cluster; under soft assignment
/// a read may additionally appear, with fractional weight, in the
/// training sets of several clusters.
#[derive(Clone, Debug, PartialEq)]
pub struct Partition {
    k: usize,
    assignment: Vec<usize>,
    training: Vec<Vec<WeightedRead>>,
}

impl Partition {
    /// A partition where each read trains only the cluster it belongs to.
    pub fn from_assignment(k: usize, assignment: Vec<usize>) -> Self {
        let mut p = Self {
            k,
            assignment,
            training: Vec::new(),
        };
        p.training = p.hard_training_sets();
        p
    }

    /// Build a complete partition from per-cluster member lists.
    /// Every read in `reads` must appear in exactly one list.
    pub fn from_members(reads: &ReadSet, members: &[Vec<usize>]) -> Result<Self, ClusterError> {
        let mut assignment = vec![usize::MAX; reads.len()];
        for (c, mem) in members.iter().enumerate() {
            for r in mem {
                let prev = assignment[*r];
                if prev != usize::MAX && prev != c {
                    return Err(ClusterError::DuplicateMembership {
                        read: reads.name(*r).to_string(),
                        first: prev,
                        second: c,
                    });
                }
                assignment[*r] = c;
            }
        }
        if let Some(r) = assignment.iter().position(|c| *c == usize::MAX) {
            return Err(ClusterError::MissingMembership {
                read: reads.name(r).to_string(),
            });
        }
        Ok(Self::from_assignment(members.len(), assignment))
    }

    pub fn num_clusters(&self) -> usize {
        self.k
    }

    pub fn num_reads(&self) -> usize {
        self.assignment.len()
    }

    #[inline(always)]
    pub fn cluster_of(&self, read: usize) -> usize {
        self.assignment[read]
    }

    pub fn assignments(&self) -> &[usize] {
        &self.assignment
    }

    pub fn members(&self, cluster: usize) -> impl Iterator<Item = usize> + '_ {
        self.assignment
            .iter()
            .enumerate()
            .filter_map(move |(r, c)| (*c == cluster).then_some(r))
    }

    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0_usize; self.k];
        for c in &self.assignment {
            sizes[*c] += 1;
        }
        sizes
    }

    pub fn training_set(&self, cluster: usize) -> &[WeightedRead] {
        &self.training[cluster]
    }

    /// Move `read` into `cluster`; returns `true` if it changed clusters.
    pub fn reassign(&mut self, read: usize, cluster: usize) -> bool {
        let prev = std::mem::replace(&mut self.assignment[read], cluster);
        prev != cluster
    }

    /// Rewrite the membership from a fresh set of posteriors: each
    /// unconstrained read goes to its most probable cluster and each
    /// constrained read stays in its forced cluster. The training sets
    /// are rebuilt from scratch.
    ///
    /// Returns the number of unconstrained reads that changed cluster.
    pub fn apply_posteriors(
        &mut self,
        reads: &ReadSet,
        posteriors: &Posteriors,
        constraints: &Constraints,
        mode: AssignmentMode,
        soft_assign_thresh: f64,
    ) -> Result<usize, ClusterError> {
        debug_assert_eq!(posteriors.num_reads(), self.num_reads());
        let mut reassignments = 0_usize;
        for r in 0..self.assignment.len() {
            match constraints.forced(r) {
                Some(forced) => {
                    let current = self.assignment[r];
                    if current != forced {
                        return Err(ClusterError::ConstraintViolation {
                            read: reads.name(r).to_string(),
                            found: current,
                            expected: forced,
                        });
                    }
                }
                None => {
                    if self.reassign(r, posteriors.best_cluster(r)) {
                        reassignments += 1;
                    }
                }
            }
        }
        self.training = match mode {
            AssignmentMode::Hard => self.hard_training_sets(),
            AssignmentMode::Soft => soft_training_sets(posteriors, soft_assign_thresh),
        };
        Ok(reassignments)
    }

    /// The partition obtained by sending every read to its most
    /// probable cluster (constrained reads to their forced cluster),
    /// with no notion of a previous assignment.
    pub fn from_posteriors(
        posteriors: &Posteriors,
        constraints: &Constraints,
        mode: AssignmentMode,
        soft_assign_thresh: f64,
    ) -> Self {
        let assignment = (0..posteriors.num_reads())
            .map(|r| {
                constraints
                    .forced(r)
                    .unwrap_or_else(|| posteriors.best_cluster(r))
            })
            .collect();
        let mut p = Self::from_assignment(posteriors.num_clusters(), assignment);
        if mode == AssignmentMode::Soft {
            p.training = soft_training_sets(posteriors, soft_assign_thresh);
        }
        p
    }

    /// Replace the training sets, e.g. with the seeds of an
    /// incomplete initial partition.
    pub(crate) fn with_training(mut self, training: Vec<Vec<WeightedRead>>) -> Self {
        self.training = training;
        self
    }

    /// Renumber clusters through the compaction table; reads and
    /// training entries of dropped clusters must not exist.
    pub(crate) fn remap(&mut self, old_to_new: &[Option<usize>], new_k: usize) {
        for c in self.assignment.iter_mut() {
            if let Some(n) = old_to_new[*c] {
                *c = n;
            }
        }
        let mut training = vec![Vec::new(); new_k];
        for (old, set) in std::mem::take(&mut self.training).into_iter().enumerate() {
            if let Some(n) = old_to_new.get(old).copied().flatten() {
                training[n] = set;
            }
        }
        self.training = training;
        self.k = new_k;
    }

    fn hard_training_sets(&self) -> Vec<Vec<WeightedRead>> {
        let mut sets = vec![Vec::new(); self.k];
        for (r, c) in self.assignment.iter().enumerate() {
            sets[*c].push(WeightedRead { read: r, weight: 1.0 });
        }
        sets
    }
}

/// Every read contributes to each cluster whose posterior for it
/// exceeds `thresh`, weighted by that posterior.
fn soft_training_sets(posteriors: &Posteriors, thresh: f64) -> Vec<Vec<WeightedRead>> {
    let mut sets = vec![Vec::new(); posteriors.num_clusters()];
    for r in 0..posteriors.num_reads() {
        for (c, p) in posteriors.row(r).iter().enumerate() {
            if *p > thresh {
                sets[c].push(WeightedRead { read: r, weight: *p });
            }
        }
    }
    sets
}

/// Seeds of an incomplete partition, each with unit weight.
pub(crate) fn seed_training_sets(members: &[Vec<usize>]) -> Vec<Vec<WeightedRead>> {
    members
        .iter()
        .map(|m| m.iter().map(|r| WeightedRead { read: *r, weight: 1.0 }).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::scimm_types::ReadInfo;

    fn reads(n: usize) -> ReadSet {
        ReadSet::from_reads(
            (0..n)
                .map(|i| ReadInfo::new(format!("r{i}"), b"ACGT".to_vec()))
                .collect(),
        )
        .unwrap()
    }

    fn one_hot_posteriors(best: &[usize], k: usize) -> Posteriors {
        let rows = best
            .iter()
            .map(|b| {
                let mut v = vec![0.0; k];
                v[*b] = 1.0;
                v
            })
            .collect();
        Posteriors::from_rows(rows, 0.0)
    }

    #[test]
    fn reassignment_count_ignores_k() {
        // ten reads in cluster 0; three of them move
        for k in [2, 3, 8] {
            let rs = reads(10);
            let mut p = Partition::from_assignment(k, vec![0; 10]);
            let mut best = vec![0; 10];
            best[2] = 1;
            best[5] = k - 1;
            best[9] = 1;
            let post = one_hot_posteriors(&best, k);
            let n = p
                .apply_posteriors(&rs, &post, &Constraints::none(), AssignmentMode::Hard, 0.01)
                .unwrap();
            assert_eq!(n, 3);
            assert_eq!(p.cluster_of(5), k - 1);
        }
    }

    #[test]
    fn constrained_reads_never_move_or_count() {
        let rs = reads(3);
        let cons = Constraints::from_named(&rs, &[("r1".to_string(), 0)]).unwrap();
        let mut p = Partition::from_assignment(2, vec![0, 0, 0]);
        let post = one_hot_posteriors(&[1, 1, 1], 2);
        let n = p
            .apply_posteriors(&rs, &post, &cons, AssignmentMode::Hard, 0.01)
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(p.assignments(), &[1, 0, 1]);
    }

    #[test]
    fn misplaced_constrained_read_is_an_error() {
        let rs = reads(2);
        let cons = Constraints::from_named(&rs, &[("r0".to_string(), 1)]).unwrap();
        let mut p = Partition::from_assignment(2, vec![0, 0]);
        let post = one_hot_posteriors(&[1, 1], 2);
        assert!(matches!(
            p.apply_posteriors(&rs, &post, &cons, AssignmentMode::Hard, 0.01),
            Err(ClusterError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn soft_training_sets_respect_threshold() {
        let rs = reads(2);
        let mut p = Partition::from_assignment(3, vec![0, 0]);
        let post = Posteriors::from_rows(vec![vec![0.6, 0.395, 0.005], vec![0.2, 0.3, 0.5]], 0.0);
        p.apply_posteriors(&rs, &post, &Constraints::none(), AssignmentMode::Soft, 0.01)
            .unwrap();
        assert_eq!(p.assignments(), &[0, 2]);
        assert_eq!(
            p.training_set(0),
            &[
                WeightedRead { read: 0, weight: 0.6 },
                WeightedRead { read: 1, weight: 0.2 }
            ]
        );
        assert_eq!(p.training_set(1).len(), 2);
        // read 0 falls under the threshold for cluster 2
        assert_eq!(p.training_set(2), &[WeightedRead { read: 1, weight: 0.5 }]);
    }

    #[test]
    fn hard_training_sets_mirror_membership() {
        let p = Partition::from_assignment(2, vec![1, 0, 1]);
        let ids: Vec<usize> = p.training_set(1).iter().map(|w| w.read).collect();
        assert_eq!(ids, vec![0, 2]);
        assert_eq!(p.members(1).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(p.cluster_sizes(), vec![1, 2]);
    }

    #[test]
    fn incomplete_member_lists_are_rejected() {
        let rs = reads(3);
        assert!(matches!(
            Partition::from_members(&rs, &[vec![0], vec![2]]),
            Err(ClusterError::MissingMembership { .. })
        ));
        let p = Partition::from_members(&rs, &[vec![0], vec![1, 2]]).unwrap();
        assert_eq!(p.assignments(), &[0, 1, 1]);
    }

    #[test]
    fn a_read_in_two_member_lists_is_rejected() {
        let rs = reads(3);
        match Partition::from_members(&rs, &[vec![0, 1], vec![1, 2]]) {
            Err(ClusterError::DuplicateMembership { read, first, second }) => {
                assert_eq!(read, "r1");
                assert_eq!(first, 0);
                assert_eq!(second, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        // listing a read twice in the same cluster is harmless
        let p = Partition::from_members(&rs, &[vec![0, 0], vec![1, 2]]).unwrap();
        assert_eq!(p.assignments(), &[0, 1, 1]);
    }
}
