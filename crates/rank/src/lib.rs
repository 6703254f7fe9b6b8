//! The Ranker (spec.md §4.F): turns a retrieved candidate pool into a
//! deduplicated, slot-filled, scored, dismissal-filtered suggestion
//! list in deterministic tie-break order.

pub mod confidence;
pub mod dismissal;
pub mod explain;
pub mod features;
pub mod ranker;
pub mod slotfill;

pub use confidence::compute_confidence;
pub use dismissal::is_suppressed;
pub use explain::explain;
pub use features::{compute_features, CandidateFeatures, FeatureContext};
pub use ranker::{rank, RankRequest, RankedSuggestion, MIN_CONFIDENCE_DEFAULT, RANKING_DEADLINE_MS, RETRIEVAL_DEADLINE_MS};
pub use slotfill::{fill_slots, SlotFillConfig};
