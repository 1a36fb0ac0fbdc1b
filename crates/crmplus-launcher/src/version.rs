// Copyright (c) 2025 digimine9
//
// This file is part of CRM Plus.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, see <https://github.com/digimine9/CRMPlus>.

//! Version parsing and comparison module

use std::cmp::Ordering;

/// Version of the running build, injected from the workspace Cargo.toml at compile time
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Dot-delimited version parsed into its numeric segments (e.g. "1.10.2")
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTuple(Vec<u64>);

impl VersionTuple {
    /// Parse every dot-separated segment as a non-negative integer.
    ///
    /// Returns `None` if any segment is empty or not a number.
    pub fn parse(s: &str) -> Option<Self> {
        s.trim()
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }

    pub fn segments(&self) -> &[u64] {
        &self.0
    }

    /// Compare segment by segment, treating missing trailing segments as zero
    pub fn compare(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| {
                let ours = self.0.get(i).copied().unwrap_or(0);
                let theirs = other.0.get(i).copied().unwrap_or(0);
                ours.cmp(&theirs)
            })
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

/// True when both sides parse as numeric versions
pub fn both_numeric(local: &str, remote: &str) -> bool {
    VersionTuple::parse(local).is_some() && VersionTuple::parse(remote).is_some()
}

/// Returns true if `remote` is newer than `local`.
///
/// Falls back to a plain string comparison when either side does not parse
/// as a numeric version. That path is best effort only.
pub fn is_newer(local: &str, remote: &str) -> bool {
    match (VersionTuple::parse(local), VersionTuple::parse(remote)) {
        (Some(local_tuple), Some(remote_tuple)) => {
            remote_tuple.compare(&local_tuple) == Ordering::Greater
        }
        (None, _) | (_, None) => {
            tracing::debug!("Comparing {local:?} and {remote:?} as strings");
            local != remote && remote > local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(VersionTuple::parse("1.3").unwrap().segments(), &[1, 3]);
        assert_eq!(
            VersionTuple::parse("10.20.30").unwrap().segments(),
            &[10, 20, 30]
        );
        assert_eq!(VersionTuple::parse("7").unwrap().segments(), &[7]);
    }

    #[test]
    fn test_parse_version_invalid() {
        assert!(VersionTuple::parse("invalid").is_none());
        assert!(VersionTuple::parse("1..2").is_none());
        assert!(VersionTuple::parse("1.2-beta").is_none());
        assert!(VersionTuple::parse("-1.2").is_none());
        assert!(VersionTuple::parse("").is_none());
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("1.2", "1.3"));
        assert!(!is_newer("1.3", "1.2"));
        assert!(is_newer("1.3", "2.0"));
        assert!(!is_newer("2.0", "1.99"));
    }

    #[test]
    fn test_same_version_is_not_newer() {
        for v in ["1", "1.3", "0.0.0", "10.20.30"] {
            assert!(!is_newer(v, v), "{v} should not be newer than itself");
        }
    }

    #[test]
    fn test_numeric_not_lexicographic() {
        assert!(is_newer("1.9", "1.10"));
        assert!(!is_newer("1.10", "1.9"));
    }

    #[test]
    fn test_missing_segments_pad_with_zero() {
        assert!(is_newer("1.2", "1.2.1"));
        assert!(!is_newer("1.2.0", "1.2"));
        assert!(!is_newer("1.2", "1.2.0"));
    }

    #[test]
    fn test_both_numeric() {
        assert!(both_numeric("1.3", "2.0.1"));
        assert!(!both_numeric("1.3", "v2"));
        assert!(!both_numeric("", "1.3"));
    }

    #[test]
    fn test_malformed_falls_back_to_string_compare() {
        assert!(is_newer("1.2", "1.3-beta"));
        assert!(!is_newer("1.3-beta", "1.3-beta"));
        assert!(!is_newer("v2", "v1"));
        assert!(is_newer("v1", "v2"));
    }
}
