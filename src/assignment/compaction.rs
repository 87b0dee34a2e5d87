use tracing::info;

use crate::assignment::constraints::Constraints;
use crate::assignment::partition::Partition;
use crate::util::errors::ClusterError;
use crate::util::scimm_types::{Priors, ReadSet};

/// Index remapping for one compaction pass: surviving clusters keep
/// their relative order and are renumbered to close the gaps.
#[derive(Clone, Debug, PartialEq)]
pub struct CompactionMap {
    old_to_new: Vec<Option<usize>>,
    removed: Vec<usize>,
}

impl CompactionMap {
    pub fn from_sizes(sizes: &[usize]) -> Self {
        let mut old_to_new = Vec::with_capacity(sizes.len());
        let mut removed = Vec::new();
        let mut next = 0_usize;
        for (c, n) in sizes.iter().enumerate() {
            if *n == 0 {
                old_to_new.push(None);
                removed.push(c);
            } else {
                old_to_new.push(Some(next));
                next += 1;
            }
        }
        Self { old_to_new, removed }
    }

    pub fn new_k(&self) -> usize {
        self.old_to_new.len() - self.removed.len()
    }

    pub fn removed(&self) -> &[usize] {
        &self.removed
    }

    pub fn is_identity(&self) -> bool {
        self.removed.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, old: usize) -> Option<usize> {
        self.old_to_new.get(old).copied().flatten()
    }
}

/// Drop every cluster without members, renumbering the rest and
/// carrying priors and constraints along. Priors are renormalized
/// afterwards. Returns the new number of clusters.
pub fn filter_empty(
    reads: &ReadSet,
    partition: &mut Partition,
    priors: &mut Priors,
    constraints: &mut Constraints,
) -> Result<usize, ClusterError> {
    let map = CompactionMap::from_sizes(&partition.cluster_sizes());
    if map.is_identity() {
        priors.normalize();
        return Ok(partition.num_clusters());
    }

    let new_k = map.new_k();
    if new_k == 0 {
        return Err(ClusterError::EmptyClusterExhaustion);
    }
    info!(
        "removing {} empty clusters {:?}; {} remain",
        map.removed().len(),
        map.removed(),
        new_k
    );

    constraints.remap(reads, &map.old_to_new)?;
    priors.retain_mapped(&map.old_to_new, new_k);
    priors.normalize();
    partition.remap(&map.old_to_new, new_k);
    Ok(new_k)
}
