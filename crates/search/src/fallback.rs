//! Substring-scan fallback search, used when the Tantivy index is
//! unavailable or a query fails to parse (spec.md §6 `SearchBackend::Fallback`).
//! Scans `cmd_raw` for each candidate row directly rather than going
//! through an index, trading throughput for zero index-maintenance cost.

use grep_matcher::Matcher;
use grep_regex::RegexMatcher;

use crate::SearchError;

/// One row eligible for a fallback scan. Callers pull these from the
/// store's most recent `command_event` rows for the requested scope.
pub struct ScanRow<'a> {
    pub cmd_raw: &'a str,
    pub index: usize,
}

/// Return the indices of rows whose `cmd_raw` contains `query` as a
/// literal substring (case-insensitive), most-recent-first order
/// preserved from the input slice.
pub fn substring_scan(query: &str, rows: &[ScanRow<'_>]) -> Result<Vec<usize>, SearchError> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let pattern = format!("(?i){}", escape_regex(query));
    let matcher = RegexMatcher::new(&pattern)?;

    let mut matched = Vec::new();
    for row in rows {
        if matcher.is_match(row.cmd_raw.as_bytes())? {
            matched.push(row.index);
        }
    }
    Ok(matched)
}

/// Escape regex metacharacters so the fallback scan treats `query` as a
/// literal substring, not a pattern.
fn escape_regex(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_case_insensitive_substring() {
        let rows = vec![
            ScanRow { cmd_raw: "git REBASE -i HEAD~3", index: 0 },
            ScanRow { cmd_raw: "cargo test", index: 1 },
        ];
        let matched = substring_scan("rebase", &rows).unwrap();
        assert_eq!(matched, vec![0]);
    }

    #[test]
    fn empty_query_matches_nothing() {
        let rows = vec![ScanRow { cmd_raw: "git status", index: 0 }];
        assert!(substring_scan("", &rows).unwrap().is_empty());
    }

    #[test]
    fn special_regex_characters_are_treated_literally() {
        let rows = vec![
            ScanRow { cmd_raw: "echo a.b", index: 0 },
            ScanRow { cmd_raw: "echo axb", index: 1 },
        ];
        let matched = substring_scan("a.b", &rows).unwrap();
        assert_eq!(matched, vec![0]);
    }
}
