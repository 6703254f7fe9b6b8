//! The retrieval pool's element type: a raw, un-scored signal bundle
//! the ranker (spec.md §4.F) turns into normalized `[0,1]` features.

use suggestd_core::{RecoverySource, TaskCandidate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateSource {
    SessionTransition,
    RepoTransition,
    DirTransition,
    GlobalTransition,
    SessionFrequency,
    RepoFrequency,
    GlobalFrequency,
    Task,
    FailureRecovery,
}

impl CandidateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CandidateSource::SessionTransition => "session_transition",
            CandidateSource::RepoTransition => "repo_transition",
            CandidateSource::DirTransition => "dir_transition",
            CandidateSource::GlobalTransition => "global_transition",
            CandidateSource::SessionFrequency => "session_frequency",
            CandidateSource::RepoFrequency => "repo_frequency",
            CandidateSource::GlobalFrequency => "global_frequency",
            CandidateSource::Task => "task",
            CandidateSource::FailureRecovery => "recovery",
        }
    }

    pub fn is_transition(self) -> bool {
        matches!(
            self,
            CandidateSource::SessionTransition
                | CandidateSource::RepoTransition
                | CandidateSource::DirTransition
                | CandidateSource::GlobalTransition
        )
    }

    pub fn is_frequency(self) -> bool {
        matches!(
            self,
            CandidateSource::SessionFrequency
                | CandidateSource::RepoFrequency
                | CandidateSource::GlobalFrequency
        )
    }
}

/// One retrieved candidate before ranking. Several producers may emit
/// a candidate for the same `template_id`; the ranker merges them by
/// `template_id` and folds every contributing source into its
/// support-diversity confidence factor.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub template_id: String,
    pub cmd_norm: String,
    pub source: CandidateSource,
    pub scope: String,
    /// Time-decayed weight from the originating aggregate row.
    pub weight: f64,
    pub count: u64,
    /// Success rate in `[0,1]`; `1.0` when the source has no failure
    /// signal of its own (e.g. task candidates).
    pub success_rate: f64,
    pub last_seen_ms: i64,
    /// Present only for `CandidateSource::Task` candidates.
    pub task: Option<TaskCandidate>,
    /// Present only for `CandidateSource::FailureRecovery` candidates.
    pub recovery_source: Option<RecoverySource>,
}

impl Candidate {
    pub fn dedup_key(&self) -> &str {
        &self.cmd_norm
    }
}
