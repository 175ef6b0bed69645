//! Structured output extraction: recover a JSON object from free-form model text

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::repair::{parse_lenient, parse_lenient_prefix};

const FENCE: &str = "```";

/// Some models emit shell-style `#` comments inside JSON; rewritten to `//` for a second pass
const SHELL_COMMENT: &str = ", #";
const LINE_COMMENT: &str = ", //";

/// Where the extraction candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate<'a> {
    /// From the first `{` to the brace that brings the balance back to zero
    Balanced(&'a str),
    /// From the first `{` to the last `}`; the balance never returned to zero
    UpToLastBrace(&'a str),
    /// The whole cleaned text
    Whole(&'a str),
}

impl<'a> Candidate<'a> {
    pub fn text(&self) -> &'a str {
        match *self {
            Self::Balanced(text) | Self::UpToLastBrace(text) | Self::Whole(text) => text,
        }
    }
}

/// Recover the JSON value embedded in `raw`.
///
/// Code fences are stripped, the candidate object is located by brace balance (falling back to
/// the last `}` and then to the whole text), parsed leniently, and parsed once more after
/// rewriting `, #` comments. A last-`}` candidate that still fails is cut off at its last
/// complete member, since the object it starts was truncated before some unrelated `}`.
/// No shape validation happens here.
pub fn extract(raw: &str) -> Result<Value, LlmError> {
    let cleaned = strip_code_fences(raw);
    let candidate = locate_candidate(&cleaned);
    let text = candidate.text();
    debug!("Extraction candidate: {} of {} chars", text.len(), cleaned.len());

    let first_error = match parse_lenient(text) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };
    warn!(
        "Lenient JSON parse failed ({}), retrying with comment cleanup",
        first_error
    );

    let patched = text.replace(SHELL_COMMENT, LINE_COMMENT);
    let second_error = match parse_lenient(&patched) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let unparsable = || LlmError::UnparsableOutput {
        raw: raw.to_string(),
    };
    if !matches!(candidate, Candidate::UpToLastBrace(_)) {
        warn!("Comment cleanup did not help ({})", second_error);
        return Err(unparsable());
    }

    parse_lenient_prefix(&patched)
        .inspect(|_| warn!("Recovered truncated object up to its last complete member"))
        .map_err(|e| {
            warn!("Truncated object could not be closed ({})", e);
            unparsable()
        })
}

/// Remove every ```` ``` ```` marker, together with a language tag such as `json` when the tag
/// ends the fence line.
pub fn strip_code_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find(FENCE) {
        out.push_str(&rest[..idx]);
        rest = &rest[idx + FENCE.len()..];
        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+')))
            .unwrap_or(rest.len());
        let after_tag = &rest[tag_len..];
        if after_tag.is_empty() || after_tag.starts_with(char::is_whitespace) {
            rest = after_tag;
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Slice of `cleaned` most likely to hold the JSON object.
///
/// The balance counter is naive: braces inside string literals count too. A region that never
/// balances falls back to the last `}`.
pub fn locate_candidate(cleaned: &str) -> Candidate<'_> {
    let Some(start) = cleaned.find('{') else {
        return Candidate::Whole(cleaned);
    };

    let mut balance: usize = 0;
    for (offset, byte) in cleaned.as_bytes()[start..].iter().enumerate() {
        match byte {
            b'{' => balance += 1,
            b'}' => {
                balance -= 1;
                if balance == 0 {
                    return Candidate::Balanced(&cleaned[start..=start + offset]);
                }
            }
            _ => {}
        }
    }

    match cleaned.rfind('}') {
        Some(end) if end > start => Candidate::UpToLastBrace(&cleaned[start..=end]),
        _ => Candidate::Whole(cleaned),
    }
}
