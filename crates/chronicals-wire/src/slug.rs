//! Route slug validation.
//!
//! Slugs are segments of the fully-qualified route path. The orchestrator
//! re-validates on declare and reports offenders in `invalidSlugs`; local
//! validation exists so a host can warn before ever connecting.

/// Returns `true` when `slug` is non-empty and contains only
/// `[A-Za-z0-9_.-]` characters.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_slugs() {
        for slug in ["helloCurrentUser", "users.list", "back-fill_v2", "a"] {
            assert!(is_valid_slug(slug), "{slug} should be valid");
        }
    }

    #[test]
    fn rejects_empty_and_special_characters() {
        for slug in ["", "!bad", "has space", "emoji🙂", "slash/slug"] {
            assert!(!is_valid_slug(slug), "{slug:?} should be invalid");
        }
    }
}
