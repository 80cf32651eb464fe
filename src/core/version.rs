//! Version ordering for plugin and release version strings.
//!
//! Versions are split on `.` and `-` and compared segment by segment.
//! Numeric segments compare numerically (a missing segment counts as `0`).
//! When either side of a position is not a number, both segments are
//! compared case-insensitively as text instead.

use std::cmp::Ordering;

/// Split a version string into its comparable segments.
fn segments(version: &str) -> Vec<&str> {
    version.trim().split(['.', '-']).filter(|s| !s.is_empty()).collect()
}

/// Compare one position of two split versions.
fn compare_segment(a: Option<&str>, b: Option<&str>) -> Ordering {
    let parse = |s: Option<&str>| match s {
        None => Some(0),
        Some(s) => s.parse::<u64>().ok(),
    };

    if let (Some(x), Some(y)) = (parse(a), parse(b)) {
        return x.cmp(&y);
    }

    match (a, b) {
        (Some(x), Some(y)) => x.to_uppercase().cmp(&y.to_uppercase()),
        // A trailing text segment is a pre-release tag, which ranks below
        // the bare release ("2.0.0-beta" is older than "2.0.0").
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Order two version strings. `Greater` means `a` is newer than `b`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left = segments(a);
    let right = segments(b);
    let length = left.len().max(right.len());

    for i in 0..length {
        let ordering = compare_segment(left.get(i).copied(), right.get(i).copied());

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Check whether `latest` is newer than `version`.
///
/// Equal versions are "not newer".
pub fn check_version(version: &str, latest: &str) -> bool {
    compare_versions(latest, version) == Ordering::Greater
}

/// Sort version strings so the most recent comes first.
pub fn sort_newest_first<S: AsRef<str>>(versions: &mut [S]) {
    versions.sort_by(|a, b| compare_versions(b.as_ref(), a.as_ref()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_segments_compare_numerically() {
        assert!(check_version("1.2.0", "1.10.0"));
        assert!(!check_version("1.10.0", "1.2.0"));
    }

    #[test]
    fn test_equal_versions_are_not_newer() {
        assert!(!check_version("1.0.0", "1.0.0"));
        assert_eq!(compare_versions("1.0", "1.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_missing_segments_default_to_zero() {
        assert!(check_version("1.0", "1.0.1"));
        assert!(!check_version("1.0.1", "1.0"));
    }

    #[test]
    fn test_text_segments_compare_case_insensitively() {
        assert!(check_version("2.0.0-alpha", "2.0.0-BETA"));
        assert_eq!(compare_versions("2.0.0-rc", "2.0.0-RC"), Ordering::Equal);
    }

    #[test]
    fn test_ordering_chain_is_transitive() {
        let chain = ["1.0.0", "1.0.1", "1.1.0", "2.0.0-beta", "2.0.0"];

        for (i, older) in chain.iter().enumerate() {
            for newer in &chain[i + 1..] {
                assert!(check_version(older, newer), "{newer} should be newer than {older}");
                assert!(!check_version(newer, older), "{older} should not be newer than {newer}");
            }
        }
    }

    #[test]
    fn test_sort_newest_first() {
        let mut versions = vec!["1.0.0", "2.0.0", "2.0.0-beta", "1.10.0", "1.2.0"];
        sort_newest_first(&mut versions);

        assert_eq!(versions, vec!["2.0.0", "2.0.0-beta", "1.10.0", "1.2.0", "1.0.0"]);
    }
}
