//! Smart-query normalization for streaming catalog searches.
//!
//! Catalog search engines often miss on edition qualifiers and exotic
//! punctuation. The smart query keeps the words a catalog indexes and drops
//! the rest: `"Bohemian Rhapsody (2011 Remaster)"` becomes
//! `"Bohemian Rhapsody"`.

use std::sync::LazyLock;

use regex::Regex;

/// `(...)` and `[...]` groups.
static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^()]*\)|\[[^\[\]]*\]").expect("bracket pattern is valid"));

/// Trailing ` - 2011 Remaster`, ` - Live at Wembley`, ` - Radio Edit` and friends.
static DASH_QUALIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\s+-\s+[^-]*\b(remaster(ed)?|live|version|edit|mono|stereo|mix|deluxe|edition)\b.*$",
    )
    .expect("qualifier pattern is valid")
});

/// Trailing ` feat. X`, ` ft. X`, ` featuring X` outside brackets.
static FEATURING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+(feat\.|ft\.|featuring\b).*$").expect("featuring pattern is valid")
});

/// Strip qualifiers, diacritics and punctuation, collapse whitespace.
///
/// If stripping qualifiers would leave nothing (a title that is entirely
/// parenthesised), only diacritics and punctuation are removed.
pub fn smart_query(value: &str) -> String {
    let without_brackets = BRACKETED.replace_all(value, " ");
    let without_qualifiers = DASH_QUALIFIER.replace(&without_brackets, "");
    let without_qualifiers = FEATURING.replace(&without_qualifiers, "");

    let cleaned = strip_punctuation(&without_qualifiers);
    if cleaned.is_empty() {
        strip_punctuation(value)
    } else {
        cleaned
    }
}

/// Fold to ASCII, keep word characters, whitespace and `-`, collapse spaces.
fn strip_punctuation(value: &str) -> String {
    let folded = deunicode::deunicode(value);
    let kept: String = folded
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || *c == '_' || *c == '-')
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strips_parenthetical_remaster() {
        assert_eq!(
            smart_query("Bohemian Rhapsody (2011 Remaster)"),
            "Bohemian Rhapsody"
        );
    }

    #[test]
    fn test_strips_brackets_and_dash_qualifiers() {
        assert_eq!(smart_query("Song [Deluxe Edition]"), "Song");
        assert_eq!(smart_query("Heroes - 2017 Remaster"), "Heroes");
        assert_eq!(smart_query("Creep - Live at Glastonbury"), "Creep");
    }

    #[test]
    fn test_strips_bare_featuring_credit() {
        assert_eq!(smart_query("Song feat. X"), "Song");
        assert_eq!(smart_query("Old Town Road ft. Billy Ray Cyrus"), "Old Town Road");
        assert_eq!(smart_query("Stay Featuring Someone Else"), "Stay");
        assert_eq!(smart_query("Feature Presentation"), "Feature Presentation");
    }

    #[test]
    fn test_keeps_meaningful_dashes() {
        assert_eq!(smart_query("Jay-Z"), "Jay-Z");
        assert_eq!(smart_query("Part 1 - The Beginning"), "Part 1 - The Beginning");
    }

    #[test]
    fn test_folds_diacritics_and_punctuation() {
        assert_eq!(smart_query("Beyoncé"), "Beyonce");
        assert_eq!(smart_query("Don't Stop Me Now!"), "Dont Stop Me Now");
        assert_eq!(smart_query("Sigur Rós"), "Sigur Ros");
    }

    #[test]
    fn test_fully_parenthesised_title_survives() {
        assert_eq!(
            smart_query("(What's the Story)"),
            "Whats the Story"
        );
    }

    #[test]
    fn test_plain_query_unchanged() {
        assert_eq!(smart_query("Test Song"), "Test Song");
        assert_eq!(smart_query("  Test   Song  "), "Test Song");
    }

    proptest! {
        #[test]
        fn prop_output_is_clean_ascii(input in "\\PC{0,60}") {
            let out = smart_query(&input);
            prop_assert!(out.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '_' || c == '-'));
            prop_assert!(!out.starts_with(' ') && !out.ends_with(' '));
            prop_assert!(!out.contains("  "));
        }

        #[test]
        fn prop_plain_words_pass_through(words in prop::collection::vec("[A-Za-z0-9]{1,8}", 1..6)) {
            let input = words.join(" ");
            prop_assert_eq!(smart_query(&input), input);
        }
    }
}
