//! Total ordering over node version strings.

use std::cmp::Ordering;
use std::fmt;

/// A node version with a total order.
///
/// Versions are not required to be semver. The order is: split on `.`, parse
/// the first three segments as unsigned integers (a missing or non-numeric
/// segment counts as 0), compare the resulting triple, and break remaining
/// ties by comparing the raw strings lexicographically. Every pair of
/// strings is therefore comparable, and `"2.0" > "1.9.9"` while
/// `"1.0.0-beta"` sorts with the `1.0.0` family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeVersion {
    raw: String,
    triple: [u64; 3],
}

impl NodeVersion {
    pub fn parse(raw: &str) -> Self {
        let mut triple = [0u64; 3];
        for (slot, segment) in triple.iter_mut().zip(raw.split('.')) {
            *slot = segment
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0);
        }
        Self {
            raw: raw.to_string(),
            triple,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for NodeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialOrd for NodeVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.triple
            .cmp(&other.triple)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}
