// Tolerant three-component version parsing and ordering.

use std::cmp::Ordering;

/// Exactly three numeric components, most significant first.
///
/// Parsing never fails: a leading non-digit prefix (release tag markers like
/// `v`) is stripped per component, a non-numeric remainder counts as 0, and
/// missing trailing components default to 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(pub [u32; 3]);

impl Version {
    pub fn parse(text: &str) -> Self {
        let mut parts = [0u32; 3];
        for (slot, token) in parts.iter_mut().zip(text.split('.')) {
            *slot = parse_part(token);
        }
        Version(parts)
    }
}

fn parse_part(token: &str) -> u32 {
    let trimmed = token.trim().trim_start_matches(|c: char| !c.is_ascii_digit());
    let end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    trimmed[..end].parse().unwrap_or(0)
}

/// Compare two dotted version strings component-wise.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    Version::parse(a).cmp(&Version::parse(b))
}
