use rand::Rng;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::assignment::partition::Partition;
use crate::util::errors::ClusterError;
use crate::util::scimm_types::ReadSet;

/// Symmetric mate relation between reads. Either read of a pair
/// can be used to look up its partner.
#[derive(Clone, Debug, Default)]
pub struct MatePairs {
    mate_of: Vec<Option<usize>>,
    num_pairs: usize,
}

impl MatePairs {
    pub fn none(num_reads: usize) -> Self {
        Self {
            mate_of: vec![None; num_reads],
            num_pairs: 0,
        }
    }

    /// Build the mate relation from pairs of read identifiers.
    /// Pairs that mention reads absent from `reads` are skipped
    /// with a warning.
    pub fn from_named_pairs(reads: &ReadSet, pairs: &[(String, String)]) -> anyhow::Result<Self> {
        let mut mp = Self::none(reads.len());
        let mut skipped = 0_usize;
        for (a, b) in pairs {
            let (Some(ia), Some(ib)) = (reads.id_of(a), reads.id_of(b)) else {
                skipped += 1;
                continue;
            };
            if ia == ib {
                anyhow::bail!("read {} cannot be its own mate", a);
            }
            for (r, m) in [(ia, ib), (ib, ia)] {
                if let Some(prev) = mp.mate_of[r] {
                    if prev != m {
                        anyhow::bail!(
                            "read {} is listed with two different mates ({} and {})",
                            reads.name(r),
                            reads.name(prev),
                            reads.name(m)
                        );
                    }
                }
            }
            if mp.mate_of[ia].is_none() {
                mp.num_pairs += 1;
            }
            mp.mate_of[ia] = Some(ib);
            mp.mate_of[ib] = Some(ia);
        }
        if skipped > 0 {
            warn!("skipped {} mate pairs naming reads that are not in the read set", skipped);
        }
        Ok(mp)
    }

    #[inline(always)]
    pub fn mate(&self, read: usize) -> Option<usize> {
        self.mate_of.get(read).copied().flatten()
    }

    pub fn num_pairs(&self) -> usize {
        self.num_pairs
    }
}

/// Reads whose cluster is fixed for the whole run.
#[derive(Clone, Debug, Default)]
pub struct Constraints {
    forced: FxHashMap<usize, usize>,
}

impl Constraints {
    pub fn none() -> Self {
        Self::default()
    }

    /// Build the constraint map from `(read id, cluster)` lines. A read
    /// may be listed more than once, but only ever with the same cluster.
    pub fn from_named(reads: &ReadSet, named: &[(String, usize)]) -> Result<Self, ClusterError> {
        let mut forced = FxHashMap::default();
        let mut skipped = 0_usize;
        for (name, c) in named {
            let Some(r) = reads.id_of(name) else {
                skipped += 1;
                continue;
            };
            if let Some(prev) = forced.insert(r, *c) {
                if prev != *c {
                    return Err(ClusterError::ConflictingConstraints {
                        read: name.clone(),
                        first: prev,
                        second: *c,
                    });
                }
            }
        }
        if skipped > 0 {
            warn!("skipped {} constraints naming reads that are not in the read set", skipped);
        }
        Ok(Self { forced })
    }

    #[inline(always)]
    pub fn forced(&self, read: usize) -> Option<usize> {
        self.forced.get(&read).copied()
    }

    pub fn len(&self) -> usize {
        self.forced.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forced.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.forced.iter().map(|(r, c)| (*r, *c))
    }

    /// A constraint on one read pins its mate as well, since mates
    /// always share a cluster.
    pub fn propagate_to_mates(&mut self, reads: &ReadSet, mates: &MatePairs) -> Result<(), ClusterError> {
        if self.is_empty() || mates.num_pairs() == 0 {
            return Ok(());
        }
        let mut added = Vec::new();
        for (r, c) in self.iter() {
            if let Some(m) = mates.mate(r) {
                match self.forced(m) {
                    Some(mc) if mc != c => {
                        return Err(ClusterError::ConflictingMateConstraints {
                            read: reads.name(r).to_string(),
                            mate: reads.name(m).to_string(),
                            first: c,
                            second: mc,
                        });
                    }
                    Some(_) => {}
                    None => added.push((m, c)),
                }
            }
        }
        if !added.is_empty() {
            debug!("extended constraints to {} unconstrained mates", added.len());
        }
        self.forced.extend(added);
        Ok(())
    }

    pub fn check_range(&self, reads: &ReadSet, k: usize) -> Result<(), ClusterError> {
        for (r, c) in self.iter() {
            if c >= k {
                return Err(ClusterError::ConstraintOutOfRange {
                    read: reads.name(r).to_string(),
                    cluster: c,
                    k,
                });
            }
        }
        Ok(())
    }

    /// Every constrained read must currently sit in its forced cluster.
    pub fn verify(&self, reads: &ReadSet, partition: &Partition) -> Result<(), ClusterError> {
        for (r, c) in self.iter() {
            let found = partition.cluster_of(r);
            if found != c {
                return Err(ClusterError::ConstraintViolation {
                    read: reads.name(r).to_string(),
                    found,
                    expected: c,
                });
            }
        }
        Ok(())
    }

    /// Rewrite every constraint through the compaction table. A
    /// constraint can only point at a cluster that still has
    /// members, since its read lives there.
    pub(crate) fn remap(&mut self, reads: &ReadSet, old_to_new: &[Option<usize>]) -> Result<(), ClusterError> {
        for (r, c) in self.forced.iter_mut() {
            match old_to_new.get(*c).copied().flatten() {
                Some(n) => *c = n,
                None => {
                    return Err(ClusterError::ConstrainedClusterEmptied {
                        read: reads.name(*r).to_string(),
                        cluster: *c,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Provisional clusters handed out to the first read of a mate pair
/// during random seeding, held only until the mate is placed.
#[derive(Default)]
struct PendingMates {
    provisional: FxHashMap<usize, usize>,
}

impl PendingMates {
    fn place<R: Rng + ?Sized>(&mut self, read: usize, mate: usize, k: usize, rng: &mut R) -> usize {
        // the mate reserved a cluster for us, and no longer
        // needs to remember it
        if let Some(c) = self.provisional.remove(&read) {
            return c;
        }
        let c = rng.random_range(0..k);
        self.provisional.insert(mate, c);
        c
    }

    fn is_empty(&self) -> bool {
        self.provisional.is_empty()
    }
}

/// Assign every read to a uniformly random cluster, keeping mates
/// together and placing constrained reads in their forced cluster.
pub fn random_partition<R: Rng + ?Sized>(
    num_reads: usize,
    k: usize,
    mates: &MatePairs,
    constraints: &Constraints,
    rng: &mut R,
) -> Partition {
    let mut pending = PendingMates::default();
    let mut assignment = Vec::with_capacity(num_reads);
    for r in 0..num_reads {
        let c = match (constraints.forced(r), mates.mate(r)) {
            (Some(c), _) => c,
            (None, Some(m)) => pending.place(r, m, k, rng),
            (None, None) => rng.random_range(0..k),
        };
        assignment.push(c);
    }
    debug_assert!(pending.is_empty());
    Partition::from_assignment(k, assignment)
}

/// Seed clusters using only the constrained reads. Every cluster
/// must receive at least one seed.
pub fn constraint_seed(k: usize, constraints: &Constraints) -> Result<Vec<Vec<usize>>, ClusterError> {
    let mut seeds = vec![Vec::new(); k];
    for (r, c) in constraints.iter() {
        if c < k {
            seeds[c].push(r);
        }
    }
    for s in seeds.iter_mut() {
        s.sort_unstable();
    }
    if let Some(c) = seeds.iter().position(Vec::is_empty) {
        return Err(ClusterError::MissingSeedReads { cluster: c });
    }
    Ok(seeds)
}

/// Work out how the clusters of an externally produced partition
/// (`members[c]` lists the reads of physical cluster `c`) map onto
/// the cluster numbering used by the constraints.
///
/// Returns `map` with `map[physical] = constraint index`. Physical
/// clusters without constrained reads take the remaining free
/// indices in ascending order.
pub fn reconcile_labels(
    reads: &ReadSet,
    members: &[Vec<usize>],
    constraints: &Constraints,
) -> Result<Vec<usize>, ClusterError> {
    let k = members.len();
    let mut map: Vec<Option<usize>> = vec![None; k];
    let mut owner: Vec<Option<usize>> = vec![None; k];

    for (c, mem) in members.iter().enumerate() {
        for r in mem {
            let Some(target) = constraints.forced(*r) else {
                continue;
            };
            if target >= k {
                return Err(ClusterError::ConstraintOutOfRange {
                    read: reads.name(*r).to_string(),
                    cluster: target,
                    k,
                });
            }
            match map[c] {
                None => {
                    if let Some(other) = owner[target] {
                        return Err(ClusterError::DuplicateConstraintTarget {
                            first: other,
                            second: c,
                            target,
                        });
                    }
                    map[c] = Some(target);
                    owner[target] = Some(c);
                }
                Some(existing) if existing != target => {
                    return Err(ClusterError::InconsistentConstraints {
                        cluster: c,
                        read: reads.name(*r).to_string(),
                        first: existing,
                        second: target,
                    });
                }
                Some(_) => {}
            }
        }
    }

    let mut open = (0..k).filter(|t| owner[*t].is_none());
    Ok(map
        .into_iter()
        .map(|m| match m {
            Some(t) => t,
            // there are exactly as many open targets as unmapped clusters
            None => open.next().unwrap_or_default(),
        })
        .collect())
}

/// Move physical cluster `c` to index `map[c]`.
pub fn relabel<T: Clone + Default>(items: &[T], map: &[usize]) -> Vec<T> {
    let mut out = vec![T::default(); items.len()];
    for (c, item) in items.iter().enumerate() {
        out[map[c]] = item.clone();
    }
    out
}
