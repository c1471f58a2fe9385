//! Version tokenization and ordering
//!
//! Version strings seen across a fleet are inconsistent: `"1.2"`,
//! `"1.2.0"`, `"1.10 (Build 4)"`, `"2023.1b"`, `"Not Installed"`. Instead of
//! parsing them as semver, each string is split into alternating digit and
//! non-digit runs and the resulting token sequences are compared
//! lexicographically:
//!
//! - numeric tokens compare numerically (`10 > 2`), with arbitrary precision;
//! - text tokens compare by code point;
//! - at the same position a numeric token sorts before a text token;
//! - a strict prefix sorts first, so `"1.2" < "1.2.0"`.
//!
//! Empty and explicitly-unknown inputs produce [`VersionKey::none`], the empty
//! sequence, which sorts below every concrete version.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Parenthetical and bracketed annotations such as `(Build 4)` or `[beta]`.
static ANNOTATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\([^)]*\)|\[[^\]]*\]").expect("annotation pattern is valid")
});

/// Inputs that mean "no version installed".
const UNKNOWN_MARKERS: &[&str] = &["not installed", "unknown"];

/// A non-negative integer of any size, stored as its decimal digits without
/// leading zeros.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Number(String);

impl Number {
    /// Build from an all-ASCII-digit run.
    fn from_digits(digits: &str) -> Self {
        let trimmed = digits.trim_start_matches('0');
        Number(if trimmed.is_empty() { "0" } else { trimmed }.to_string())
    }

    pub fn digits(&self) -> &str {
        &self.0
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        // Without leading zeros, a longer digit string is a larger number
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<u64> for Number {
    fn from(value: u64) -> Self {
        Number(value.to_string())
    }
}

/// One component of a version string.
///
/// Variant order is significant: the derived `Ord` places every `Numeric`
/// before every `Text`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VersionToken {
    Numeric(Number),
    Text(String),
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionToken::Numeric(n) => f.write_str(n.digits()),
            VersionToken::Text(s) => f.write_str(s),
        }
    }
}

/// Order-comparable form of a version string.
///
/// The derived `Ord` on the token vector is exactly the lexicographic rule
/// described in the module docs, including "shorter prefix sorts first".
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionKey(Vec<VersionToken>);

impl VersionKey {
    /// The "no version" key, lower than any concrete version.
    pub fn none() -> Self {
        VersionKey(Vec::new())
    }

    pub fn tokens(&self) -> &[VersionToken] {
        &self.0
    }

    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            return f.write_str("<none>");
        }
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// Tokenize a raw version string.
pub fn tokenize(raw: &str) -> VersionKey {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || UNKNOWN_MARKERS
            .iter()
            .any(|marker| trimmed.eq_ignore_ascii_case(marker))
    {
        return VersionKey::none();
    }

    let stripped = ANNOTATION.replace_all(trimmed, "");
    let mut tokens = Vec::new();
    let mut rest: &str = &stripped;

    while let Some(first) = rest.chars().next() {
        let is_digit = first.is_ascii_digit();
        let end = rest
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() != is_digit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);

        if is_digit {
            tokens.push(VersionToken::Numeric(Number::from_digits(run)));
        } else {
            let text = run.trim();
            if !text.is_empty() {
                tokens.push(VersionToken::Text(text.to_string()));
            }
        }
        rest = tail;
    }

    VersionKey(tokens)
}

/// Three-way comparison returning -1, 0 or 1.
pub fn compare(a: &VersionKey, b: &VersionKey) -> i8 {
    match a.cmp(b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// Compare two raw version strings.
pub fn compare_raw(a: &str, b: &str) -> i8 {
    compare(&tokenize(a), &tokenize(b))
}
