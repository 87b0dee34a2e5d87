//! Invariant violations detected while clustering.
//!
//! None of these are recoverable: they mean the inputs (scores, external
//! partitions, constraints) contradict each other, and the run must stop
//! before it overwrites the last good checkpoint.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// A live read has no score in the listing for some cluster.
    #[error("missing scores for read {read} in the listing for cluster {cluster}")]
    MissingScore { read: String, cluster: usize },

    /// An externally supplied partition did not place every read.
    #[error("read {read} is not a member of any cluster in the supplied partition")]
    MissingMembership { read: String },

    /// An externally supplied partition placed a read in two clusters.
    #[error("read {read} is listed in both cluster {first} and cluster {second}")]
    DuplicateMembership {
        read: String,
        first: usize,
        second: usize,
    },

    /// A membership listing mentions a read that is not in the read set.
    #[error("cluster {cluster} lists unknown read {read}")]
    UnknownRead { read: String, cluster: usize },

    /// A constrained read sits outside of its forced cluster.
    #[error("constrained read {read} found in cluster {found}, but it is constrained to cluster {expected}")]
    ConstraintViolation {
        read: String,
        found: usize,
        expected: usize,
    },

    /// Compaction was asked to drop the cluster a constrained read lives in.
    #[error("constrained read {read} points at cluster {cluster}, which has no members")]
    ConstrainedClusterEmptied { read: String, cluster: usize },

    /// One physical cluster holds reads constrained to different clusters.
    #[error(
        "inconsistent constraints: cluster {cluster} holds read {read} constrained to {second}, but earlier reads were constrained to {first}"
    )]
    InconsistentConstraints {
        cluster: usize,
        read: String,
        first: usize,
        second: usize,
    },

    /// Two physical clusters claim the same constraint cluster.
    #[error("clusters {first} and {second} both hold reads constrained to cluster {target}")]
    DuplicateConstraintTarget {
        first: usize,
        second: usize,
        target: usize,
    },

    /// The constraint file pins one read to two different clusters.
    #[error("read {read} is constrained to both cluster {first} and cluster {second}")]
    ConflictingConstraints {
        read: String,
        first: usize,
        second: usize,
    },

    #[error("read {read} is constrained to cluster {cluster}, but only {k} clusters exist")]
    ConstraintOutOfRange { read: String, cluster: usize, k: usize },

    #[error("mates {read} and {mate} are constrained to different clusters ({first} and {second})")]
    ConflictingMateConstraints {
        read: String,
        mate: String,
        first: usize,
        second: usize,
    },

    /// Seeding from constraints left some cluster without a single read.
    #[error("cluster {cluster} has no seed reads; try a different initialization method")]
    MissingSeedReads { cluster: usize },

    /// Compaction removed every cluster.
    #[error("every cluster is empty; the initial partition or k is unworkable")]
    EmptyClusterExhaustion,

    /// Score vectors do not match the number of live clusters.
    #[error("expected scores for {expected} clusters, but found {found}")]
    ClusterCountMismatch { expected: usize, found: usize },

    /// No ensemble candidate produced a usable partition.
    #[error("none of the {attempted} initial partitions produced usable output")]
    NoViableSeed { attempted: usize },
}
