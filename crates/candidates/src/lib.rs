//! The Candidate Generator (spec.md §4.E): multi-source retrieval
//! behind a uniform producer interface, plus the prefix/typo filter
//! that narrows the pool before ranking.

pub mod candidate;
pub mod fuzzy;
pub mod producers;
pub mod retrieval;

pub use candidate::{Candidate, CandidateSource};
pub use producers::CandidateProducer;
pub use retrieval::{retrieve_candidates, wait_for_ingest_sync, RetrievalContext};
