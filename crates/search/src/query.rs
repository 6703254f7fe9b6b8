use std::time::Instant;

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{TantivyDocument, Term};

use crate::types::{SearchHit, SearchOutcome};
use crate::{SearchError, SearchIndex};

/// A parsed `key:value` qualifier extracted from a raw query string.
#[derive(Debug, Clone)]
struct Qualifier {
    key: String,
    value: String,
}

const KNOWN_QUALIFIER_KEYS: [&str; 3] = ["repo", "branch", "session"];

/// Split a raw query into free text and qualifiers (spec.md §6 `Search`
/// allows scoping the text query to a repo/branch/session).
fn parse_query_string(raw: &str) -> (String, Vec<Qualifier>) {
    let mut qualifiers = Vec::new();
    let mut text_parts = Vec::new();

    for token in raw.split_whitespace() {
        if let Some(colon_pos) = token.find(':') {
            let key = &token[..colon_pos];
            let value = &token[colon_pos + 1..];
            if KNOWN_QUALIFIER_KEYS.contains(&key) && !value.is_empty() {
                qualifiers.push(Qualifier {
                    key: key.to_string(),
                    value: value.to_string(),
                });
                continue;
            }
        }
        text_parts.push(token);
    }

    (text_parts.join(" "), qualifiers)
}

/// Run a full-text search over `cmd_raw`/`cmd_norm`, optionally scoped
/// to a repo/session via `scope` (matching spec.md §6 `SearchRequest`'s
/// `repo_key`/`session_id` fields, pre-resolved by the caller into a
/// `key:value` qualifier string appended to `raw_query`).
pub fn search(
    index: &SearchIndex,
    raw_query: &str,
    scope_qualifier: Option<&str>,
    limit: usize,
) -> Result<SearchOutcome, SearchError> {
    let start = Instant::now();

    let combined = match scope_qualifier {
        Some(q) => format!("{raw_query} {q}"),
        None => raw_query.to_string(),
    };
    let (text_query, qualifiers) = parse_query_string(&combined);

    let searcher = index.reader.searcher();
    let mut subqueries: Vec<(Occur, Box<dyn Query>)> = Vec::new();

    if !text_query.trim().is_empty() {
        let parser = QueryParser::for_index(
            &index.index,
            vec![index.cmd_raw_field, index.cmd_norm_field],
        );
        let parsed = parser.parse_query(&text_query)?;
        subqueries.push((Occur::Must, parsed));
    }

    for qualifier in &qualifiers {
        let field = match qualifier.key.as_str() {
            "repo" => index.repo_key_field,
            "branch" => index.branch_field,
            "session" => index.session_id_field,
            _ => continue,
        };
        let term = Term::from_field_text(field, &qualifier.value);
        let term_query = TermQuery::new(term, IndexRecordOption::Basic);
        subqueries.push((Occur::Must, Box::new(term_query)));
    }

    if subqueries.is_empty() {
        return Ok(SearchOutcome {
            query: raw_query.to_string(),
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
            hits: Vec::new(),
            used_fallback: false,
        });
    }

    let query: Box<dyn Query> = if subqueries.len() == 1 {
        subqueries.into_iter().next().unwrap().1
    } else {
        Box::new(BooleanQuery::new(subqueries))
    };

    let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

    let mut hits = Vec::with_capacity(top_docs.len());
    for (score, doc_address) in top_docs {
        let doc: TantivyDocument = searcher.doc(doc_address)?;
        let get_text = |field| {
            doc.get_first(field)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let cmd_raw = get_text(index.cmd_raw_field);
        let cmd_norm = get_text(index.cmd_norm_field);
        let session_id = get_text(index.session_id_field);
        let repo_key = get_text(index.repo_key_field);
        let ts_ms = doc
            .get_first(index.ts_ms_field)
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        hits.push(SearchHit {
            cmd_raw,
            cmd_norm,
            ts_ms,
            repo_key: if repo_key.is_empty() { None } else { Some(repo_key) },
            session_id,
            rank_score: score as f64,
        });
    }

    Ok(SearchOutcome {
        query: raw_query.to_string(),
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        hits,
        used_fallback: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::SearchDocument;

    fn sample_index() -> SearchIndex {
        let idx = SearchIndex::open_in_ram().unwrap();
        idx.index_commands(
            "s1",
            &[
                SearchDocument {
                    session_id: "s1".into(),
                    repo_key: "clai/suggestd".into(),
                    branch: "main".into(),
                    cmd_raw: "kubectl apply -f deploy.yaml".into(),
                    cmd_norm: "kubectl apply -f <path>".into(),
                    ts_ms: 1000,
                    exit_code: 0,
                },
                SearchDocument {
                    session_id: "s1".into(),
                    repo_key: "other/repo".into(),
                    branch: "main".into(),
                    cmd_raw: "kubectl get pods".into(),
                    cmd_norm: "kubectl get pods".into(),
                    ts_ms: 2000,
                    exit_code: 0,
                },
            ],
        )
        .unwrap();
        idx.commit().unwrap();
        idx.reader.reload().unwrap();
        idx
    }

    #[test]
    fn search_scopes_by_repo_qualifier() {
        let idx = sample_index();
        let outcome = search(&idx, "kubectl repo:clai/suggestd", None, 10).unwrap();
        assert_eq!(outcome.hits.len(), 1);
        assert_eq!(outcome.hits[0].repo_key.as_deref(), Some("clai/suggestd"));
    }

    #[test]
    fn search_with_no_text_and_no_qualifiers_returns_empty() {
        let idx = sample_index();
        let outcome = search(&idx, "   ", None, 10).unwrap();
        assert!(outcome.hits.is_empty());
    }
}
