// crates/core/src/types.rs
//! Domain model shared by the store, ingestion pipeline, candidate
//! generator, ranker and cache. All timestamps are integer
//! milliseconds since epoch; identifiers are stable lowercase hex
//! strings unless noted otherwise.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Aggregate scope qualifier. Encoded as a string for storage
/// (`session:<id>`, `repo:<key>`, `dir:<cwd>`, `global`) but kept as an
/// enum in memory so callers can't construct a malformed scope key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    Session(String),
    Repo(String),
    Dir(String),
    Global,
}

impl Scope {
    pub fn as_key(&self) -> String {
        match self {
            Scope::Session(id) => format!("session:{id}"),
            Scope::Repo(key) => format!("repo:{key}"),
            Scope::Dir(cwd) => format!("dir:{cwd}"),
            Scope::Global => "global".to_string(),
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        if key == "global" {
            return Some(Scope::Global);
        }
        let (prefix, rest) = key.split_once(':')?;
        match prefix {
            "session" => Some(Scope::Session(rest.to_string())),
            "repo" => Some(Scope::Repo(rest.to_string())),
            "dir" => Some(Scope::Dir(rest.to_string())),
            _ => None,
        }
    }
}

/// A live interactive shell session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub shell: String,
    pub started_ms: i64,
    pub host: String,
    pub user: String,
    pub initial_cwd: Option<String>,
    pub project_types: BTreeSet<String>,
    pub ended_ms: Option<i64>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, shell: impl Into<String>, started_ms: i64) -> Self {
        Self {
            session_id: session_id.into(),
            shell: shell.into(),
            started_ms,
            host: String::new(),
            user: String::new(),
            initial_cwd: None,
            project_types: BTreeSet::new(),
            ended_ms: None,
        }
    }

    pub fn with_initial_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.initial_cwd = Some(cwd.into());
        self
    }

    pub fn is_ended(&self) -> bool {
        self.ended_ms.is_some()
    }
}

/// A single typed slot extracted from a raw command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    Path,
    Sha,
    Url,
    Num,
    Msg,
    Branch,
    Namespace,
    Service,
    Arg,
}

impl SlotType {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotType::Path => "path",
            SlotType::Sha => "sha",
            SlotType::Url => "url",
            SlotType::Num => "num",
            SlotType::Msg => "msg",
            SlotType::Branch => "branch",
            SlotType::Namespace => "namespace",
            SlotType::Service => "service",
            SlotType::Arg => "arg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub slot_type: SlotType,
    pub value: String,
}

/// One non-ephemeral (or in-flight ephemeral) command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEvent {
    pub id: i64,
    pub session_id: String,
    pub ts_ms: i64,
    pub cwd: String,
    pub repo_key: Option<String>,
    pub branch: Option<String>,
    pub cmd_raw: String,
    pub cmd_norm: String,
    pub cmd_truncated: bool,
    pub template_id: String,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<i64>,
    pub ephemeral: bool,
}

/// The identity row for a normalized command shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub template_id: String,
    pub cmd_norm: String,
    pub slot_count: u32,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
}

/// Time-decayed edge weight between two templates within a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionStat {
    pub scope: String,
    pub prev_template_id: String,
    pub next_template_id: String,
    pub weight: f64,
    pub count: u64,
    pub last_seen_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStat {
    pub scope: String,
    pub template_id: String,
    pub score: f64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_seen_ms: i64,
}

impl CommandStat {
    pub fn total(&self) -> u64 {
        self.success_count + self.failure_count
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.success_count as f64 / total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotStat {
    pub scope: String,
    pub template_id: String,
    pub slot_index: u32,
    pub value: String,
    pub weight: f64,
    pub count: u64,
    pub last_seen_ms: i64,
}

/// Default cap on distinct values retained per `(scope, template_id, slot_index)`.
pub const SLOT_STAT_MAX_VALUES: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotCorrelation {
    pub scope: String,
    pub template_id: String,
    pub slot_key: String,
    pub tuple_hash: String,
    pub tuple_value_json: String,
    pub weight: f64,
    pub count: u64,
    pub last_seen_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    Auto,
    Playbook,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCandidate {
    pub repo_key: String,
    pub kind: String,
    pub name: String,
    pub command_text: String,
    pub description: Option<String>,
    pub source: TaskSource,
    pub priority_boost: f64,
    pub source_checksum: Option<String>,
    pub discovered_ms: i64,
}

/// Sentinel `failed_template_id` used by bootstrap (non-learned) recovery rows.
pub const RECOVERY_WILDCARD: &str = "__wildcard__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverySource {
    Learned,
    Bootstrap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecoveryEdge {
    pub scope: String,
    pub failed_template_id: String,
    pub exit_code_class: String,
    pub recovery_template_id: String,
    pub weight: f64,
    pub count: u64,
    pub success_rate: f64,
    pub last_seen_ms: i64,
    pub source: RecoverySource,
}

impl FailureRecoveryEdge {
    /// Fold in one more outcome observation, per spec.md §4.D step 7.
    pub fn record_outcome(&mut self, succeeded: bool, now_ms: i64) {
        let next_count = self.count + 1;
        self.success_rate = (self.success_rate * self.count as f64
            + if succeeded { 1.0 } else { 0.0 })
            / next_count as f64;
        self.count = next_count;
        self.weight = next_count as f64;
        self.last_seen_ms = now_ms;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionLevel {
    Temporary,
    Learned,
    Permanent,
}

/// Dismissal state for a `(scope, context_template_id, dismissed_template_id)`
/// tuple. Absence of a row means state `none`; this type only represents
/// rows that exist (states other than `none`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DismissalPattern {
    pub scope: String,
    pub context_template_id: String,
    pub dismissed_template_id: String,
    pub dismissal_count: u32,
    pub last_dismissed_ms: i64,
    pub suppression_level: SuppressionLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Accepted,
    Dismissed,
    EditedThenRun,
    IgnoredTimeout,
    Never,
    Unblock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionFeedback {
    pub session_id: String,
    pub ts_ms: i64,
    pub prompt_prefix: Option<String>,
    pub suggested_text: String,
    pub action: FeedbackAction,
    pub executed_text: Option<String>,
    pub latency_ms: Option<i64>,
}

/// Per-profile ranking weight vector (spec.md §4.F scoring formula).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankWeightProfile {
    pub profile_key: String,
    pub w_transition: f64,
    pub w_frequency: f64,
    pub w_success: f64,
    pub w_prefix: f64,
    pub w_affinity: f64,
    pub w_task: f64,
    pub w_feedback: f64,
    pub w_risk_penalty: f64,
    /// Recovery boost weight (`w_v`); only applies when a candidate came
    /// from the failure-recovery source.
    pub w_recovery: f64,
    pub sample_count: u64,
    pub learning_rate: f64,
}

impl RankWeightProfile {
    /// Default weight vector, per spec.md §4.F.
    pub fn defaults(profile_key: impl Into<String>) -> Self {
        Self {
            profile_key: profile_key.into(),
            w_transition: 0.30,
            w_frequency: 0.20,
            w_success: 0.10,
            w_prefix: 0.15,
            w_affinity: 0.10,
            w_task: 0.05,
            w_feedback: 0.15,
            w_risk_penalty: 0.20,
            w_recovery: 0.25,
            sample_count: 0,
            learning_rate: 0.02,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_round_trips_through_key() {
        for scope in [
            Scope::Session("abc123".into()),
            Scope::Repo("org/repo".into()),
            Scope::Dir("/home/user/proj".into()),
            Scope::Global,
        ] {
            let key = scope.as_key();
            assert_eq!(Scope::parse(&key), Some(scope));
        }
    }

    #[test]
    fn scope_parse_rejects_unknown_prefix() {
        assert_eq!(Scope::parse("branch:main"), None);
    }

    #[test]
    fn session_builder_sets_optional_cwd() {
        let s = Session::new("s1", "zsh", 1000).with_initial_cwd("/tmp");
        assert_eq!(s.initial_cwd.as_deref(), Some("/tmp"));
        assert!(!s.is_ended());
    }

    #[test]
    fn command_stat_success_rate_handles_zero_total() {
        let stat = CommandStat {
            scope: "global".into(),
            template_id: "t1".into(),
            score: 0.0,
            success_count: 0,
            failure_count: 0,
            last_seen_ms: 0,
        };
        assert_eq!(stat.success_rate(), 0.0);
    }

    #[test]
    fn command_stat_success_rate_computes_ratio() {
        let stat = CommandStat {
            scope: "global".into(),
            template_id: "t1".into(),
            score: 0.0,
            success_count: 3,
            failure_count: 1,
            last_seen_ms: 0,
        };
        assert_eq!(stat.success_rate(), 0.75);
    }

    #[test]
    fn failure_recovery_edge_records_outcome() {
        let mut edge = FailureRecoveryEdge {
            scope: "global".into(),
            failed_template_id: "t1".into(),
            exit_code_class: "generic_error".into(),
            recovery_template_id: "t2".into(),
            weight: 1.0,
            count: 1,
            success_rate: 1.0,
            last_seen_ms: 0,
            source: RecoverySource::Learned,
        };
        edge.record_outcome(false, 1000);
        assert_eq!(edge.count, 2);
        assert_eq!(edge.weight, 2.0);
        assert_eq!(edge.success_rate, 0.5);
        assert_eq!(edge.last_seen_ms, 1000);
    }

    #[test]
    fn rank_weight_profile_defaults_sum_matches_spec() {
        let p = RankWeightProfile::defaults("global");
        assert_eq!(p.w_transition, 0.30);
        assert_eq!(p.w_risk_penalty, 0.20);
        assert_eq!(p.w_recovery, 0.25);
    }
}
