//! REST API version negotiation.
//!
//! Version strings are not ordered lexically (`1.10` is newer than `1.9`). Instead, precedence is
//! given by the position in [`SUPPORTED_VERSIONS`], oldest first.

/// The REST API versions this client can speak, in ascending order of precedence.
pub const SUPPORTED_VERSIONS: &[&str] = &[
    "1.0", "1.1", "1.2", "1.3", "1.4", "1.5", "1.6", "1.7", "1.8", "1.9", "1.10", "1.11", "1.12",
];

/// Picks the version of highest precedence in `supported` that is also contained in `offered`.
///
/// Returns `None` if the two sets do not intersect.
pub fn negotiate<'a, S>(supported: &[&'a str], offered: &[S]) -> Option<&'a str>
where
    S: AsRef<str>,
{
    supported
        .iter()
        .rev()
        .find(|version| offered.iter().any(|o| o.as_ref() == **version))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_highest_common_version() {
        let offered = ["1.0", "1.1", "1.2", "1.3"];
        assert_eq!(negotiate(SUPPORTED_VERSIONS, &offered), Some("1.3"));
    }

    #[test]
    fn precedence_is_not_lexical() {
        let offered = ["1.9", "1.10", "1.2"];
        assert_eq!(negotiate(SUPPORTED_VERSIONS, &offered), Some("1.10"));
    }

    #[test]
    fn ignores_versions_unknown_to_the_client() {
        let offered = ["1.8", "2.0", "2.1"];
        assert_eq!(negotiate(SUPPORTED_VERSIONS, &offered), Some("1.8"));
    }

    #[test]
    fn offered_order_does_not_matter() {
        let supported = ["a", "b", "c"];
        assert_eq!(negotiate(&supported, &["c", "a"]), Some("c"));
        assert_eq!(negotiate(&supported, &["a", "c"]), Some("c"));
        assert_eq!(negotiate(&supported, &["b"]), Some("b"));
    }

    #[test]
    fn fails_without_intersection() {
        let offered = vec!["2.0".to_string(), "2.1".to_string()];
        assert_eq!(negotiate(SUPPORTED_VERSIONS, &offered), None);
        assert_eq!(negotiate::<&str>(SUPPORTED_VERSIONS, &[]), None);
    }
}
