//! Environment variable expansion for path patterns
//!
//! Resolves `${NAME}` and `${NAME:-default}` references, including
//! nested references inside resolved values. A backslash immediately
//! before the `$` suppresses expansion.

use regex::Regex;
use std::sync::OnceLock;

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\\?\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("reference pattern is a valid regex")
    })
}

/// Expand environment references in `input` against the process
/// environment. Unresolvable names expand to the empty string; this
/// never fails.
pub fn expand(input: &str) -> String {
    expand_with(input, &|name| std::env::var(name).ok())
}

/// Expand environment references using an explicit lookup function.
///
/// References are consumed left to right by span, so a replacement can
/// never corrupt an adjacent reference in the same input. Resolved
/// values (including defaults) are themselves expanded recursively.
pub fn expand_with(input: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut consumed = 0;

    for caps in reference_pattern().captures_iter(input) {
        let Some(reference) = caps.get(0) else {
            continue;
        };
        out.push_str(&input[consumed..reference.start()]);
        consumed = reference.end();

        if let Some(literal) = reference.as_str().strip_prefix('\\') {
            // Escaped: drop the backslash, emit the reference verbatim.
            out.push_str(literal);
            continue;
        }

        let value = match lookup(&caps[1]) {
            Some(v) if !v.is_empty() => v,
            _ => caps
                .get(2)
                .map(|d| d.as_str().to_string())
                .unwrap_or_default(),
        };
        out.push_str(&expand_with(&value, lookup));
    }

    out.push_str(&input[consumed..]);
    out
}
