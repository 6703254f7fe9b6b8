//! The suggestion cache and online learner (spec.md §4.G): L1/L2/L3
//! tiers with TTL+LRU eviction, session/repo invalidation wired into
//! the ingestion pipeline, feedback handling onto the dismissal state
//! machine, and the bandit-style weight learner.

pub mod feedback;
pub mod invalidator;
pub mod learner;
pub mod tiers;

pub use feedback::{is_implicit_accept, learn_from_feedback, record_feedback, FEEDBACK_MATCH_WINDOW_MS_DEFAULT, LEARNED_THRESHOLD_DEFAULT};
pub use invalidator::CacheInvalidator;
pub use learner::{apply_update, ONLINE_LEARNING_MIN_SAMPLES};
pub use tiers::{prefix_hash, L1Key, L2Key, SuggestionCache, CACHE_MEMORY_BUDGET_MB_DEFAULT, CACHE_TTL_MS_DEFAULT};
