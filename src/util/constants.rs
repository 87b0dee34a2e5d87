/// Hard ceiling on the number of reassignment iterations.
pub const MAX_ITER: u32 = 200;

/// Number of consecutive likelihood decreases after which
/// the iteration is considered to have stopped making progress.
pub const LIKE_DECREASE_LIMIT: u32 = 5;

/// The run is considered converged when fewer than this fraction
/// of the reads change cluster in a single iteration.
pub const REASSIGN_THRESH: f64 = 0.0005;

/// In soft-assignment mode, a read is added to the training set of
/// every cluster whose posterior exceeds this value.
pub const SOFT_ASSIGN_THRESH: f64 = 0.01;

/// Default number of reads handed to each seeding heuristic.
pub const DEFAULT_SEED_SAMPLE: usize = 3000;

pub const MEMBERSHIP_PREFIX: &str = "cluster-";
pub const MEMBERSHIP_SUFFIX: &str = ".fa";
pub const CHECKPOINT_SUFFIX: &str = ".max";
pub const TRAINING_SUFFIX: &str = ".build.fa";
pub const MODEL_SUFFIX: &str = ".icm";
pub const SCORES_PREFIX: &str = "icm-";
pub const SCORES_SUFFIX: &str = ".scores.tmp";
