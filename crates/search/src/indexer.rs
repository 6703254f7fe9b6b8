use tantivy::doc;
use tantivy::Term;
use tracing::{debug, info};

use crate::{SearchError, SearchIndex};

/// A document to be indexed in Tantivy, representing a single command
/// event (spec.md §4.D step 8: "index cmd_raw/cmd_norm into the search
/// index").
pub struct SearchDocument {
    pub session_id: String,
    pub repo_key: String,
    pub branch: String,
    pub cmd_raw: String,
    pub cmd_norm: String,
    pub ts_ms: i64,
    pub exit_code: i64,
}

impl SearchIndex {
    /// Index a batch of command events for a session. Deletes any
    /// existing documents for this session_id first. Does NOT commit —
    /// call `commit()` after indexing a batch.
    pub fn index_commands(
        &self,
        session_id: &str,
        docs: &[SearchDocument],
    ) -> Result<(), SearchError> {
        let writer = self.writer.lock().map_err(|e| {
            SearchError::Io(std::io::Error::other(format!("writer lock poisoned: {e}")))
        })?;

        let delete_term = Term::from_field_text(self.session_id_field, session_id);
        writer.delete_term(delete_term);

        for doc_data in docs {
            let tantivy_doc = doc!(
                self.session_id_field => doc_data.session_id.as_str(),
                self.repo_key_field => doc_data.repo_key.as_str(),
                self.branch_field => doc_data.branch.as_str(),
                self.cmd_raw_field => doc_data.cmd_raw.as_str(),
                self.cmd_norm_field => doc_data.cmd_norm.as_str(),
                self.ts_ms_field => doc_data.ts_ms,
                self.exit_code_field => doc_data.exit_code,
            );
            writer.add_document(tantivy_doc)?;
        }

        debug!(
            session_id = session_id,
            doc_count = docs.len(),
            "indexed command documents"
        );

        Ok(())
    }

    /// Index a single command event. Convenience wrapper over
    /// `index_commands` for the common one-event-at-a-time ingestion
    /// path (spec.md §4.D runs this inline in the write transaction's
    /// final step, outside the SQLite transaction itself).
    pub fn index_command(&self, doc: SearchDocument) -> Result<(), SearchError> {
        let session_id = doc.session_id.clone();
        self.index_commands(&session_id, std::slice::from_ref(&doc))
    }

    /// Delete all documents for a given session_id. Does NOT commit.
    pub fn delete_session(&self, session_id: &str) -> Result<(), SearchError> {
        let writer = self.writer.lock().map_err(|e| {
            SearchError::Io(std::io::Error::other(format!("writer lock poisoned: {e}")))
        })?;

        let delete_term = Term::from_field_text(self.session_id_field, session_id);
        writer.delete_term(delete_term);

        debug!(session_id = session_id, "deleted session from search index");

        Ok(())
    }

    /// Commit all pending writes (inserts and deletes) to disk.
    pub fn commit(&self) -> Result<(), SearchError> {
        let mut writer = self.writer.lock().map_err(|e| {
            SearchError::Io(std::io::Error::other(format!("writer lock poisoned: {e}")))
        })?;

        writer.commit()?;
        info!("search index committed");

        Ok(())
    }
}
