//! Property-based tests for the matching predicate

use super::*;
use crate::caps::MatchingMode;
use proptest::prelude::*;

fn arb_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 .,!?()$^+\\[\\]|]{0,40}"
}

fn all_modes() -> impl Strategy<Value = MatchingMode> {
    prop_oneof![
        Just(MatchingMode::Exact),
        Just(MatchingMode::Include),
        Just(MatchingMode::IncludeIgnoreCase),
        Just(MatchingMode::Wildcard),
        Just(MatchingMode::WildcardIgnoreCase),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Every non-regexp mode accepts the text itself, metacharacters included
    #[test]
    fn prop_text_matches_itself(text in arb_text(), mode in all_modes()) {
        prop_assert!(Matcher::new(mode).matches(&text, &text).unwrap());
    }

    // Containment modes find any slice of the actual text
    #[test]
    fn prop_slice_is_found(
        prefix in arb_text(),
        middle in arb_text(),
        suffix in arb_text(),
    ) {
        let actual = format!("{prefix}{middle}{suffix}");
        for mode in [MatchingMode::Include, MatchingMode::Wildcard] {
            prop_assert!(Matcher::new(mode).matches(&actual, &middle).unwrap());
        }
    }

    // A `*` between two slices spans whatever lies between them
    #[test]
    fn prop_wildcard_spans_gap(
        head in arb_text(),
        gap in arb_text(),
        tail in arb_text(),
    ) {
        let actual = format!("{head}{gap}{tail}");
        let expected = format!("{head}*{tail}");
        prop_assert!(Matcher::new(MatchingMode::Wildcard).matches(&actual, &expected).unwrap());
    }

    // Case-insensitive modes ignore ASCII case on both sides
    #[test]
    fn prop_ignore_case(text in arb_text()) {
        let upper = text.to_uppercase();
        for mode in [MatchingMode::IncludeIgnoreCase, MatchingMode::WildcardIgnoreCase] {
            prop_assert!(Matcher::new(mode).matches(&upper, &text.to_lowercase()).unwrap());
        }
    }
}
