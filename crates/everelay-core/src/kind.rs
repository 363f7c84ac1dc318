//! Kind classification.
//!
//! A pure mapping from an event's integer `kind` to the retention/routing
//! class that governs how the ingest pipeline and store treat it. See
//! the "Kind classification rules" table.

/// An event's retention/routing class, derived from its `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindClass {
    Regular,
    Ephemeral,
    Replaceable,
    Addressable,
    Syncable,
    Purge,
}

/// Exhaustive, precedence-ordered classification of a `kind` value.
///
/// `kind` is assumed already range-checked to `0..=65535` by the structural
/// validator; this function still returns `None` for any value that isn't
/// assigned a class (the spec's `Invalid` row), since the ranges below do
/// not cover every integer in `0..=65535`.
pub fn classify(kind: u32) -> Option<KindClass> {
    if kind == 0 || kind == 3 || (10000..=19999).contains(&kind) {
        return Some(KindClass::Replaceable);
    }
    if (20000..=29999).contains(&kind) {
        return Some(KindClass::Ephemeral);
    }
    if (30000..=39999).contains(&kind) {
        return Some(KindClass::Addressable);
    }
    if kind == 49999 {
        return Some(KindClass::Purge);
    }
    if (40000..=49998).contains(&kind) {
        return Some(KindClass::Syncable);
    }
    if kind == 1 || kind == 2 || (4..=44).contains(&kind) || (1000..=9999).contains(&kind) {
        return Some(KindClass::Regular);
    }
    None
}

/// Lower/upper bound of the syncable kind range, used by the purge
/// pipeline to validate a purge event's `k` tag.
pub const SYNCABLE_RANGE: std::ops::RangeInclusive<u32> = 40000..=49998;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaceable() {
        assert_eq!(classify(0), Some(KindClass::Replaceable));
        assert_eq!(classify(3), Some(KindClass::Replaceable));
        assert_eq!(classify(10000), Some(KindClass::Replaceable));
        assert_eq!(classify(19999), Some(KindClass::Replaceable));
    }

    #[test]
    fn ephemeral() {
        assert_eq!(classify(20000), Some(KindClass::Ephemeral));
        assert_eq!(classify(29999), Some(KindClass::Ephemeral));
    }

    #[test]
    fn addressable() {
        assert_eq!(classify(30000), Some(KindClass::Addressable));
        assert_eq!(classify(39999), Some(KindClass::Addressable));
    }

    #[test]
    fn purge_is_exact() {
        assert_eq!(classify(49999), Some(KindClass::Purge));
        assert_eq!(classify(49998), Some(KindClass::Syncable));
    }

    #[test]
    fn syncable() {
        assert_eq!(classify(40000), Some(KindClass::Syncable));
        assert_eq!(classify(49998), Some(KindClass::Syncable));
    }

    #[test]
    fn regular() {
        assert_eq!(classify(1), Some(KindClass::Regular));
        assert_eq!(classify(2), Some(KindClass::Regular));
        assert_eq!(classify(4), Some(KindClass::Regular));
        assert_eq!(classify(44), Some(KindClass::Regular));
        assert_eq!(classify(1000), Some(KindClass::Regular));
        assert_eq!(classify(9999), Some(KindClass::Regular));
    }

    #[test]
    fn invalid_gaps() {
        assert_eq!(classify(45), None);
        assert_eq!(classify(999), None);
        assert_eq!(classify(50000), None);
        assert_eq!(classify(65535), None);
    }
}
