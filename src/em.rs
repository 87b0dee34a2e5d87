use num_format::{Locale, ToFormattedString};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span};

use crate::assignment::compaction::filter_empty;
use crate::assignment::constraints::{
    Constraints, MatePairs, constraint_seed, random_partition, reconcile_labels, relabel,
};
use crate::assignment::partition::{Partition, seed_training_sets};
use crate::assignment::posterior::{Posteriors, compute_posteriors, update_priors};
use crate::convergence::{ConvergenceTracker, StopReason};
use crate::modeller::{ClusterModeller, train_and_score};
use crate::util::errors::ClusterError;
use crate::util::scimm_types::{ClusteringParams, Priors, ReadSet, ScoreMatrix};
use crate::util::write_function::{write_checkpoint, write_partition};

/// Where the first partition comes from.
#[derive(Clone, Debug)]
pub enum Initialization {
    /// Every read goes to a uniformly random cluster.
    Random { seed: u64 },
    /// A complete partition, numbered independently of the constraints.
    Given(Vec<Vec<usize>>),
    /// An incomplete partition: models are trained on the seeds and
    /// every read is placed by a single maximization step.
    Seeded(Vec<Vec<usize>>),
    /// Seed each cluster with the reads constrained to it.
    ConstraintSeeded,
    /// A complete partition whose models were already trained and
    /// scored; the first iteration uses `scores` directly.
    Trained {
        members: Vec<Vec<usize>>,
        scores: ScoreMatrix,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub likelihood: f64,
    pub reassignments: usize,
    pub num_clusters: usize,
}

/// Receives the partition after every iteration and whenever a
/// new best checkpoint is taken.
pub trait IterationObserver {
    fn on_iteration(
        &mut self,
        _reads: &ReadSet,
        _record: &IterationRecord,
        _partition: &Partition,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_checkpoint(&mut self, _reads: &ReadSet, _partition: &Partition) -> anyhow::Result<()> {
        Ok(())
    }
}

impl IterationObserver for () {}

/// Keeps `cluster-<c>.fa` and the `cluster-<c>.max` checkpoint in a
/// workspace directory in step with the run.
pub struct WorkspaceObserver {
    dir: PathBuf,
}

impl WorkspaceObserver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl IterationObserver for WorkspaceObserver {
    fn on_iteration(
        &mut self,
        reads: &ReadSet,
        _record: &IterationRecord,
        partition: &Partition,
    ) -> anyhow::Result<()> {
        write_partition(&self.dir, reads, partition)
    }

    fn on_checkpoint(&mut self, reads: &ReadSet, partition: &Partition) -> anyhow::Result<()> {
        write_checkpoint(&self.dir, reads, partition)
    }
}

#[derive(Debug)]
pub struct ClusteringResult {
    /// The best checkpointed partition (or, for a seed-only run, the
    /// seeded partition).
    pub partition: Partition,
    pub priors: Priors,
    pub likelihood: f64,
    pub best_iteration: u32,
    pub iterations: u32,
    /// `None` when only the seeding pass ran.
    pub stop_reason: Option<StopReason>,
    /// Scores of the final models, kept only by seed-only runs.
    pub scores: Option<ScoreMatrix>,
    pub history: Vec<IterationRecord>,
    pub elapsed: Duration,
}

enum StartFrom {
    Complete(Partition),
    Seeds(Vec<Vec<usize>>),
}

/// Train on the seeds, score everything and hand each read to its
/// most probable cluster.
fn seed_pass<M: ClusterModeller>(
    modeller: &M,
    reads: &ReadSet,
    mates: &MatePairs,
    constraints: &Constraints,
    seeds: &[Vec<usize>],
    params: &ClusteringParams,
    pool: &rayon::ThreadPool,
) -> anyhow::Result<(Partition, Priors, Posteriors)> {
    let k = seeds.len();
    // only the training sets matter until the maximization step
    let provisional = Partition::from_assignment(k, vec![0; reads.len()])
        .with_training(seed_training_sets(seeds));
    let scores = train_and_score(modeller, reads, &provisional, pool)?;

    let mut priors = Priors::uniform(k);
    if params.estimate_priors {
        priors = update_priors(reads, &scores, &priors, mates, constraints, params.mode)?;
    }
    let post = compute_posteriors(reads, &scores, &priors, mates, constraints, params.mode)?;
    let partition =
        Partition::from_posteriors(&post, constraints, params.mode, params.soft_assign_thresh);
    Ok((partition, priors, post))
}

/// Bring an externally numbered partition onto the constraint
/// numbering. Returns the relabelled member lists and the map used.
fn reconcile(
    reads: &ReadSet,
    members: &[Vec<usize>],
    constraints: &Constraints,
) -> Result<(Vec<Vec<usize>>, Vec<usize>), ClusterError> {
    let map = reconcile_labels(reads, members, constraints)?;
    if map.iter().enumerate().any(|(c, t)| c != *t) {
        debug!("relabelling initial clusters {:?}", map);
    }
    Ok((relabel(members, &map), map))
}

/// Run the reassignment loop to convergence.
///
/// Each iteration trains and scores one model per live cluster,
/// re-estimates the priors, reassigns every unconstrained read to its
/// most probable cluster, and drops clusters that emptied out. The
/// partition with the highest likelihood seen is returned, which need
/// not be the last one.
pub fn run_clustering<M: ClusterModeller, O: IterationObserver>(
    modeller: &M,
    reads: &ReadSet,
    mates: &MatePairs,
    mut constraints: Constraints,
    params: &ClusteringParams,
    init: Initialization,
    observer: &mut O,
) -> anyhow::Result<ClusteringResult> {
    let span = info_span!("clustering", k = params.k, mode = ?params.mode);
    let _guard = span.enter();
    let start = Instant::now();

    if params.k == 0 {
        anyhow::bail!("at least one cluster is required");
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(params.threads.max(1))
        .build()?;

    constraints.propagate_to_mates(reads, mates)?;
    constraints.check_range(reads, params.k)?;
    info!(
        "clustering {} reads ({} mate pairs, {} constrained) into {} clusters",
        reads.len().to_formatted_string(&Locale::en),
        mates.num_pairs().to_formatted_string(&Locale::en),
        constraints.len().to_formatted_string(&Locale::en),
        params.k
    );

    let check_k = |members: &[Vec<usize>]| -> Result<(), ClusterError> {
        if members.len() != params.k {
            return Err(ClusterError::ClusterCountMismatch {
                expected: params.k,
                found: members.len(),
            });
        }
        Ok(())
    };

    let mut priors = Priors::uniform(params.k);
    let mut pending_scores = None;
    let mut history = Vec::new();

    let start_from = match init {
        Initialization::Random { seed } => {
            let mut rng = StdRng::seed_from_u64(seed);
            StartFrom::Complete(random_partition(
                reads.len(),
                params.k,
                mates,
                &constraints,
                &mut rng,
            ))
        }
        Initialization::Given(members) => {
            check_k(&members)?;
            let (members, _) = reconcile(reads, &members, &constraints)?;
            StartFrom::Complete(Partition::from_members(reads, &members)?)
        }
        Initialization::Trained { members, scores } => {
            check_k(&members)?;
            scores.check_width(params.k)?;
            let (members, map) = reconcile(reads, &members, &constraints)?;
            pending_scores = Some(scores.permute_columns(&map));
            StartFrom::Complete(Partition::from_members(reads, &members)?)
        }
        Initialization::Seeded(members) => {
            check_k(&members)?;
            let (members, _) = reconcile(reads, &members, &constraints)?;
            StartFrom::Seeds(members)
        }
        Initialization::ConstraintSeeded => {
            StartFrom::Seeds(constraint_seed(params.k, &constraints)?)
        }
    };

    let (mut partition, seed_likelihood) = match start_from {
        StartFrom::Complete(p) => (p, None),
        StartFrom::Seeds(seeds) => {
            let (mut p, seeded_priors, post) =
                seed_pass(modeller, reads, mates, &constraints, &seeds, params, &pool)?;
            priors = seeded_priors;
            filter_empty(reads, &mut p, &mut priors, &mut constraints)?;
            info!("iteration 0: likelihood {}", post.likelihood() as i64);
            let record = IterationRecord {
                iteration: 0,
                likelihood: post.likelihood(),
                reassignments: 0,
                num_clusters: p.num_clusters(),
            };
            observer.on_iteration(reads, &record, &p)?;
            history.push(record);
            (p, Some(post.likelihood()))
        }
    };
    constraints.verify(reads, &partition)?;
    // a random or external start may leave clusters with nothing to train on
    if filter_empty(reads, &mut partition, &mut priors, &mut constraints)? != params.k
        && pending_scores.take().is_some()
    {
        debug!("initial partition had empty clusters; retraining instead of reusing scores");
    }

    if params.seed_only {
        // train on every read so that candidate likelihoods compare fairly
        let scores = train_and_score(modeller, reads, &partition, &pool)?;
        let likelihood = match seed_likelihood {
            Some(l) => l,
            None => {
                compute_posteriors(reads, &scores, &priors, mates, &constraints, params.mode)?
                    .likelihood()
            }
        };
        if seed_likelihood.is_none() {
            observer.on_iteration(
                reads,
                &IterationRecord {
                    iteration: 0,
                    likelihood,
                    reassignments: 0,
                    num_clusters: partition.num_clusters(),
                },
                &partition,
            )?;
        }
        return Ok(ClusteringResult {
            partition,
            priors,
            likelihood,
            best_iteration: 0,
            iterations: 0,
            stop_reason: None,
            scores: Some(scores),
            history,
            elapsed: start.elapsed(),
        });
    }

    let mut tracker = ConvergenceTracker::<Partition>::new(
        params.streak_limit,
        params.max_iter,
        params.reassign_thresh,
    );
    let mut best_priors = priors.clone();
    let mut iteration = 0_u32;
    let stop_reason = loop {
        iteration += 1;

        let scores = match pending_scores.take() {
            Some(s) => s,
            None => train_and_score(modeller, reads, &partition, &pool)?,
        };
        if params.estimate_priors {
            priors = update_priors(reads, &scores, &priors, mates, &constraints, params.mode)?;
        }
        let post = compute_posteriors(reads, &scores, &priors, mates, &constraints, params.mode)?;
        let reassignments = partition.apply_posteriors(
            reads,
            &post,
            &constraints,
            params.mode,
            params.soft_assign_thresh,
        )?;
        let k = filter_empty(reads, &mut partition, &mut priors, &mut constraints)?;

        let record = IterationRecord {
            iteration,
            likelihood: post.likelihood(),
            reassignments,
            num_clusters: k,
        };
        info!(
            "iteration {}: likelihood {}, {} reassignments",
            iteration,
            post.likelihood() as i64,
            reassignments.to_formatted_string(&Locale::en)
        );
        observer.on_iteration(reads, &record, &partition)?;
        history.push(record);

        if tracker.assess(iteration, post.likelihood(), &partition) {
            best_priors = priors.clone();
            observer.on_checkpoint(reads, &partition)?;
        } else {
            debug!(
                "no improvement on {}; {} consecutive decreases",
                tracker.max_likelihood().unwrap_or(f64::NEG_INFINITY) as i64,
                tracker.non_improving_streak()
            );
        }
        if let Some(reason) = tracker.should_stop(iteration, reassignments, reads.len()) {
            break reason;
        }
    };

    let elapsed = start.elapsed();
    info!(
        "stopped after {} iterations ({}) in {}",
        iteration,
        stop_reason,
        humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64))
    );

    let best = tracker
        .into_best()
        .ok_or_else(|| anyhow::anyhow!("no iteration completed"))?;
    info!(
        "best likelihood {} at iteration {} with {} clusters",
        best.likelihood as i64,
        best.iteration,
        best.snapshot.num_clusters()
    );
    Ok(ClusteringResult {
        partition: best.snapshot,
        priors: best_priors,
        likelihood: best.likelihood,
        best_iteration: best.iteration,
        iterations: iteration,
        stop_reason: Some(stop_reason),
        scores: None,
        history,
        elapsed,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::util::file_utils::checkpoint_path;
    use crate::util::read_function::read_membership;
    use crate::util::scimm_types::{AssignmentMode, ReadInfo, WeightedRead};
    use rustc_hash::FxHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Models a cluster by its weighted base composition and scores a
    /// read by the log-likelihood of its bases under that composition.
    pub(crate) struct CompositionModeller;

    fn base_index(b: u8) -> Option<usize> {
        match b {
            b'A' => Some(0),
            b'C' => Some(1),
            b'G' => Some(2),
            b'T' => Some(3),
            _ => None,
        }
    }

    impl ClusterModeller for CompositionModeller {
        type Model = [f64; 4];

        fn train(
            &self,
            _cluster: usize,
            reads: &ReadSet,
            training: &[WeightedRead],
        ) -> anyhow::Result<[f64; 4]> {
            // pseudocounts keep every base possible
            let mut counts = [1.0_f64; 4];
            for w in training {
                for b in &reads.get(w.read).seq {
                    if let Some(i) = base_index(*b) {
                        counts[i] += w.weight;
                    }
                }
            }
            let total: f64 = counts.iter().sum();
            Ok(counts.map(|c| (c / total).ln()))
        }

        fn score(
            &self,
            _cluster: usize,
            model: &[f64; 4],
            reads: &ReadSet,
        ) -> anyhow::Result<FxHashMap<String, f64>> {
            Ok(reads
                .iter()
                .map(|r| {
                    let s = r.seq.iter().filter_map(|b| base_index(*b)).map(|i| model[i]).sum();
                    (r.name.clone(), s)
                })
                .collect())
        }
    }

    /// Twenty AT-rich reads followed by twenty GC-rich reads.
    pub(crate) fn two_source_reads() -> ReadSet {
        let at = [b"AATTATATTAATATAGATTA", b"TATTAATATTACATATTAAT"];
        let gc = [b"GCGGCCGCGGCGCCGTGCGG", b"CCGCGGCGGCCAGCGCGCCG"];
        let mut v = Vec::new();
        for i in 0..20 {
            v.push(ReadInfo::new(format!("at{i}"), at[i % 2].to_vec()));
        }
        for i in 0..20 {
            v.push(ReadInfo::new(format!("gc{i}"), gc[i % 2].to_vec()));
        }
        ReadSet::from_reads(v).unwrap()
    }

    fn params(k: usize) -> ClusteringParams {
        ClusteringParams::builder().k(k).threads(2).build()
    }

    fn is_pure(reads: &ReadSet, p: &Partition) -> bool {
        (0..reads.len()).all(|r| {
            let prefix = &reads.name(r)[..2];
            (0..reads.len())
                .filter(|o| &reads.name(*o)[..2] == prefix)
                .all(|o| p.cluster_of(o) == p.cluster_of(r))
        })
    }

    #[derive(Default)]
    struct Recorder {
        iterations: Vec<IterationRecord>,
        checkpoints: usize,
    }

    impl IterationObserver for Recorder {
        fn on_iteration(
            &mut self,
            _reads: &ReadSet,
            record: &IterationRecord,
            partition: &Partition,
        ) -> anyhow::Result<()> {
            assert_eq!(partition.num_clusters(), record.num_clusters);
            assert!(partition.cluster_sizes().iter().all(|n| *n > 0));
            self.iterations.push(record.clone());
            Ok(())
        }

        fn on_checkpoint(&mut self, _reads: &ReadSet, _partition: &Partition) -> anyhow::Result<()> {
            self.checkpoints += 1;
            Ok(())
        }
    }

    #[test]
    fn given_partition_separates_sources() {
        let reads = two_source_reads();
        // each cluster starts with a quarter of the other source mixed in
        let members = vec![
            (0..15).chain(20..25).collect::<Vec<_>>(),
            (15..20).chain(25..40).collect::<Vec<_>>(),
        ];
        let mut rec = Recorder::default();
        let res = run_clustering(
            &CompositionModeller,
            &reads,
            &MatePairs::none(reads.len()),
            Constraints::none(),
            &params(2),
            Initialization::Given(members),
            &mut rec,
        )
        .unwrap();
        assert!(is_pure(&reads, &res.partition));
        assert_eq!(res.partition.num_clusters(), 2);
        assert!(res.stop_reason.is_some());
        assert_eq!(rec.iterations.len() as u32, res.iterations);
        assert!(rec.checkpoints >= 1);
        // the reported likelihood is the best seen
        let best = rec
            .iterations
            .iter()
            .map(|r| r.likelihood)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(res.likelihood, best);
    }

    #[test]
    fn surplus_clusters_are_compacted_away() {
        let reads = two_source_reads();
        let res = run_clustering(
            &CompositionModeller,
            &reads,
            &MatePairs::none(reads.len()),
            Constraints::none(),
            &params(5),
            Initialization::Random { seed: 7 },
            &mut (),
        )
        .unwrap();
        let k = res.partition.num_clusters();
        assert!((1..=5).contains(&k));
        assert_eq!(res.priors.len(), k);
        assert!((res.priors.as_slice().iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(res.partition.cluster_sizes().iter().all(|n| *n > 0));
    }

    #[test]
    fn mates_and_constraints_hold_throughout() {
        let reads = two_source_reads();
        // mate an AT read with a GC read so that they must travel together
        let mates =
            MatePairs::from_named_pairs(&reads, &[("at3".to_string(), "gc3".to_string())]).unwrap();
        let cons =
            Constraints::from_named(&reads, &[("at0".to_string(), 1), ("gc0".to_string(), 0)])
                .unwrap();
        let res = run_clustering(
            &CompositionModeller,
            &reads,
            &mates,
            cons,
            &params(2),
            Initialization::Random { seed: 11 },
            &mut (),
        )
        .unwrap();
        let p = &res.partition;
        let at3 = reads.id_of("at3").unwrap();
        let gc3 = reads.id_of("gc3").unwrap();
        assert_eq!(p.cluster_of(at3), p.cluster_of(gc3));
        assert_eq!(p.cluster_of(reads.id_of("at0").unwrap()), 1);
        assert_eq!(p.cluster_of(reads.id_of("gc0").unwrap()), 0);
    }

    #[test]
    fn seeded_run_places_every_read() {
        let reads = two_source_reads();
        let seeds = vec![vec![0, 1], vec![20, 21]];
        let mut rec = Recorder::default();
        let res = run_clustering(
            &CompositionModeller,
            &reads,
            &MatePairs::none(reads.len()),
            Constraints::none(),
            &params(2),
            Initialization::Seeded(seeds),
            &mut rec,
        )
        .unwrap();
        assert_eq!(rec.iterations[0].iteration, 0);
        assert_eq!(rec.iterations[0].reassignments, 0);
        assert!(is_pure(&reads, &res.partition));
        assert_ne!(res.partition.cluster_of(0), res.partition.cluster_of(20));
    }

    #[test]
    fn seed_only_stops_after_scoring() {
        let reads = two_source_reads();
        let cons =
            Constraints::from_named(&reads, &[("at0".to_string(), 0), ("gc0".to_string(), 1)])
                .unwrap();
        let p = ClusteringParams::builder()
            .k(2)
            .mode(AssignmentMode::Soft)
            .seed_only(true)
            .build();
        let res = run_clustering(
            &CompositionModeller,
            &reads,
            &MatePairs::none(reads.len()),
            cons,
            &p,
            Initialization::ConstraintSeeded,
            &mut (),
        )
        .unwrap();
        assert_eq!(res.iterations, 0);
        assert!(res.stop_reason.is_none());
        let scores = res.scores.unwrap();
        assert_eq!(scores.num_clusters(), res.partition.num_clusters());
        assert_eq!(res.partition.cluster_of(reads.id_of("at5").unwrap()), 0);
        assert_eq!(res.partition.cluster_of(reads.id_of("gc5").unwrap()), 1);
    }

    #[test]
    fn constraint_seeding_needs_a_seed_per_cluster() {
        let reads = two_source_reads();
        let cons = Constraints::from_named(&reads, &[("at0".to_string(), 0)]).unwrap();
        let err = run_clustering(
            &CompositionModeller,
            &reads,
            &MatePairs::none(reads.len()),
            cons,
            &params(2),
            Initialization::ConstraintSeeded,
            &mut (),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClusterError>(),
            Some(ClusterError::MissingSeedReads { cluster: 1 })
        ));
    }

    #[test]
    fn trained_start_reuses_supplied_scores_under_the_constraint_numbering() {
        let reads = two_source_reads();
        let at: Vec<usize> = (0..20).collect();
        let gc: Vec<usize> = (20..40).collect();
        // physical cluster 0 holds the GC reads, but gc0 is constrained to 1
        let members = vec![gc.clone(), at.clone()];
        let cons = Constraints::from_named(&reads, &[("gc0".to_string(), 1)]).unwrap();
        // column 0 favours GC reads, matching the physical numbering
        let rows = (0..40)
            .map(|r| if r < 20 { vec![-50.0, -1.0] } else { vec![-1.0, -50.0] })
            .collect();
        let scores = ScoreMatrix::from_rows(rows).unwrap();
        let p = ClusteringParams::builder().k(2).max_iter(1).build();
        let res = run_clustering(
            &CompositionModeller,
            &reads,
            &MatePairs::none(reads.len()),
            cons,
            &p,
            Initialization::Trained { members, scores },
            &mut (),
        )
        .unwrap();
        assert_eq!(res.iterations, 1);
        assert_eq!(res.stop_reason, Some(StopReason::FewReassignments));
        assert!(gc.iter().all(|r| res.partition.cluster_of(*r) == 1));
        assert!(at.iter().all(|r| res.partition.cluster_of(*r) == 0));
    }

    #[test]
    fn conflicting_constraint_targets_are_fatal() {
        let reads = two_source_reads();
        // at0 and gc0 are both constrained to 0 but sit in different clusters
        let cons =
            Constraints::from_named(&reads, &[("at0".to_string(), 0), ("gc0".to_string(), 0)])
                .unwrap();
        let members = vec![(0..20).collect(), (20..40).collect()];
        let err = run_clustering(
            &CompositionModeller,
            &reads,
            &MatePairs::none(reads.len()),
            cons,
            &params(2),
            Initialization::Given(members),
            &mut (),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClusterError>(),
            Some(ClusterError::DuplicateConstraintTarget { target: 0, .. })
        ));
    }

    /// Fails every training call after the first `ok_calls`.
    struct FailsLater {
        calls: AtomicUsize,
        ok_calls: usize,
    }

    impl ClusterModeller for FailsLater {
        type Model = [f64; 4];

        fn train(
            &self,
            cluster: usize,
            reads: &ReadSet,
            training: &[WeightedRead],
        ) -> anyhow::Result<[f64; 4]> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.ok_calls {
                anyhow::bail!("model builder crashed");
            }
            CompositionModeller.train(cluster, reads, training)
        }

        fn score(
            &self,
            cluster: usize,
            model: &[f64; 4],
            reads: &ReadSet,
        ) -> anyhow::Result<FxHashMap<String, f64>> {
            CompositionModeller.score(cluster, model, reads)
        }
    }

    fn mixed_start() -> Vec<Vec<usize>> {
        vec![
            (0..15).chain(20..25).collect::<Vec<_>>(),
            (15..20).chain(25..40).collect::<Vec<_>>(),
        ]
    }

    fn checkpoint_members(dir: &std::path::Path, reads: &ReadSet, k: usize) -> Vec<Vec<usize>> {
        (0..k)
            .map(|c| read_membership(&checkpoint_path(dir, c), reads, c).unwrap())
            .collect()
    }

    #[test]
    fn checkpoint_listings_hold_the_best_partition() {
        let tmp = tempfile::tempdir().unwrap();
        let reads = two_source_reads();
        // left over from an earlier run with more clusters
        for c in 2..4 {
            std::fs::write(checkpoint_path(tmp.path(), c), ">at0\nAATT\n").unwrap();
        }
        let mut members = mixed_start();
        members.push(Vec::new());
        let mut obs = WorkspaceObserver::new(tmp.path());
        let res = run_clustering(
            &CompositionModeller,
            &reads,
            &MatePairs::none(reads.len()),
            Constraints::none(),
            &params(3),
            Initialization::Given(members),
            &mut obs,
        )
        .unwrap();
        let k = res.partition.num_clusters();
        assert_eq!(k, 2);
        let on_disk = checkpoint_members(tmp.path(), &reads, k);
        for (c, listed) in on_disk.iter().enumerate() {
            assert_eq!(listed, &res.partition.members(c).collect::<Vec<_>>());
        }
        assert!(!checkpoint_path(tmp.path(), 2).exists());
        assert!(!checkpoint_path(tmp.path(), 3).exists());
    }

    #[test]
    fn failed_iteration_leaves_the_last_checkpoint_alone() {
        let reads = two_source_reads();
        let one_step = ClusteringParams::builder().k(2).threads(2).max_iter(1).build();

        // the checkpoint a single successful iteration leaves behind
        let good = tempfile::tempdir().unwrap();
        let res = run_clustering(
            &CompositionModeller,
            &reads,
            &MatePairs::none(reads.len()),
            Constraints::none(),
            &one_step,
            Initialization::Given(mixed_start()),
            &mut WorkspaceObserver::new(good.path()),
        )
        .unwrap();
        assert_eq!(res.best_iteration, 1);

        // the same run, but the models of the second iteration cannot be built
        let failed = tempfile::tempdir().unwrap();
        let modeller = FailsLater {
            calls: AtomicUsize::new(0),
            ok_calls: 2,
        };
        let err = run_clustering(
            &modeller,
            &reads,
            &MatePairs::none(reads.len()),
            Constraints::none(),
            &params(2),
            Initialization::Given(mixed_start()),
            &mut WorkspaceObserver::new(failed.path()),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("model builder crashed"));

        for c in 0..2 {
            let kept = std::fs::read(checkpoint_path(failed.path(), c)).unwrap();
            let expected = std::fs::read(checkpoint_path(good.path(), c)).unwrap();
            assert_eq!(kept, expected);
        }
        assert_eq!(
            checkpoint_members(failed.path(), &reads, 2),
            (0..2).map(|c| res.partition.members(c).collect()).collect::<Vec<Vec<usize>>>()
        );
    }
}
