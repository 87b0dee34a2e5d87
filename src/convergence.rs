use serde::Serialize;
use std::fmt;

/// Why the iteration loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// The likelihood decreased too many times in a row.
    NoImprovement,
    /// Too few reads changed cluster.
    FewReassignments,
    /// The iteration ceiling was reached.
    MaxIterations,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StopReason::NoImprovement => write!(f, "likelihood stopped improving"),
            StopReason::FewReassignments => write!(f, "reassignments fell below threshold"),
            StopReason::MaxIterations => write!(f, "reached the maximum number of iterations"),
        }
    }
}

/// The best state seen so far.
#[derive(Clone, Debug)]
pub struct Checkpoint<S> {
    pub iteration: u32,
    pub likelihood: f64,
    pub snapshot: S,
}

/// Follows the likelihood trajectory of the iterations, which need
/// not be monotone, and keeps a copy of the best state seen.
#[derive(Debug)]
pub struct ConvergenceTracker<S> {
    last_likelihood: Option<f64>,
    max_likelihood: Option<f64>,
    non_improving_streak: u32,
    streak_limit: u32,
    max_iter: u32,
    reassign_thresh: f64,
    best: Option<Checkpoint<S>>,
}

impl<S: Clone> ConvergenceTracker<S> {
    pub fn new(streak_limit: u32, max_iter: u32, reassign_thresh: f64) -> Self {
        Self {
            last_likelihood: None,
            max_likelihood: None,
            non_improving_streak: 0,
            streak_limit,
            max_iter,
            reassign_thresh,
            best: None,
        }
    }

    /// Record the likelihood of `iteration`. If it is the best seen so
    /// far, `snapshot` is cloned as the new checkpoint (replacing the
    /// previous one) and `true` is returned.
    pub fn assess(&mut self, iteration: u32, likelihood: f64, snapshot: &S) -> bool {
        if let Some(last) = self.last_likelihood {
            if likelihood > last {
                self.non_improving_streak = 0;
            } else if likelihood < last {
                self.non_improving_streak += 1;
            }
        }
        self.last_likelihood = Some(likelihood);

        let is_best = self.max_likelihood.is_none_or(|m| likelihood > m);
        if is_best {
            self.max_likelihood = Some(likelihood);
            self.best = Some(Checkpoint {
                iteration,
                likelihood,
                snapshot: snapshot.clone(),
            });
        }
        is_best
    }

    /// Decide whether another iteration should run, given how many
    /// iterations have completed and how many reads moved in the last.
    pub fn should_stop(&self, iterations: u32, reassignments: usize, total_reads: usize) -> Option<StopReason> {
        if self.non_improving_streak >= self.streak_limit {
            Some(StopReason::NoImprovement)
        } else if (reassignments as f64) < (total_reads as f64) * self.reassign_thresh {
            Some(StopReason::FewReassignments)
        } else if iterations >= self.max_iter {
            Some(StopReason::MaxIterations)
        } else {
            None
        }
    }

    pub fn non_improving_streak(&self) -> u32 {
        self.non_improving_streak
    }

    pub fn max_likelihood(&self) -> Option<f64> {
        self.max_likelihood
    }

    pub fn into_best(self) -> Option<Checkpoint<S>> {
        self.best
    }
}
