use sha1::{Digest, Sha1};
use tracing::trace;

/// PostgreSQL's `NAMEDATALEN - 1`; the generated schema stays portable to it.
pub const DEFAULT_MAX_IDENTIFIER_LENGTH: usize = 63;

/// Only the trailing segments of a structural path take part in a name.
const PATH_CONTEXT_WINDOW: usize = 4;
const DIGEST_BYTES: usize = 4;
const DIGEST_HEX_LEN: usize = DIGEST_BYTES * 2;
const UNNAMED: &str = "unnamed";

/// Converts a JSON property name to a lowercase, underscore separated form.
///
/// An underscore is inserted before an uppercase letter that follows a
/// lowercase letter or digit, every non-alphanumeric character becomes an
/// underscore, runs of underscores collapse and leading/trailing underscores
/// are trimmed.
///
/// ```
/// assert_eq!(common::to_snake_case("registerEntryDetails"), "register_entry_details");
/// assert_eq!(common::to_snake_case("--zip  Code--"), "zip_code");
/// ```
pub fn to_snake_case(value: &str) -> String {
    let mut spread = String::with_capacity(value.len() + 4);
    let mut prev_lower = false;
    for c in value.chars() {
        if c.is_uppercase() && prev_lower {
            spread.push('_');
        }
        if c.is_alphanumeric() {
            spread.extend(c.to_lowercase());
        } else {
            spread.push('_');
        }
        prev_lower = c.is_lowercase() || c.is_numeric();
    }

    let mut snake = String::with_capacity(spread.len());
    for c in spread.chars() {
        if c == '_' && snake.ends_with('_') {
            continue;
        }
        snake.push(c);
    }
    snake.trim_matches('_').to_string()
}

/// Derives relational identifiers (table and column names) from structural
/// paths. Pure and deterministic: the same path always yields the same name,
/// so repeated runs agree without any persisted naming state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierNamer {
    max_length: usize,
}

impl Default for IdentifierNamer {
    fn default() -> Self {
        IdentifierNamer {
            max_length: DEFAULT_MAX_IDENTIFIER_LENGTH,
        }
    }
}

impl IdentifierNamer {
    /// The limit never drops below what a one-character prefix plus the
    /// separator and digest need.
    pub fn new(max_length: usize) -> Self {
        IdentifierNamer {
            max_length: max_length.max(DIGEST_HEX_LEN + 2),
        }
    }

    /// Builds the identifier for `parts`.
    ///
    /// Only the last four normalized segments are joined. Names longer than the
    /// limit keep a truncated prefix followed by `_` and a 4-byte hex digest of
    /// the full, untruncated path, so distinct long paths stay distinct.
    pub fn identifier<I, S>(&self, parts: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cleaned: Vec<String> = parts
            .into_iter()
            .map(|p| to_snake_case(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        if cleaned.is_empty() {
            return UNNAMED.to_string();
        }

        let window_start = cleaned.len().saturating_sub(PATH_CONTEXT_WINDOW);
        let base = cleaned[window_start..].join("_");
        if base.len() <= self.max_length {
            return base;
        }

        let digest = short_digest(&cleaned.join("_"));
        let truncated = truncate_on_char_boundary(&base, self.max_length - DIGEST_HEX_LEN - 1);
        let prefix = match truncated.trim_end_matches('_') {
            "" => truncated,
            trimmed => trimmed,
        };
        trace!(
            identifier = %base,
            max_length = self.max_length,
            "identifier shortened with digest"
        );
        format!("{prefix}_{digest}")
    }
}

/// Identifier for `parts` under the default (PostgreSQL) length limit.
pub fn make_identifier<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    IdentifierNamer::default().identifier(parts)
}

/// Double-quotes an identifier for use in generated SQL.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn short_digest(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    digest[..DIGEST_BYTES]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn truncate_on_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
