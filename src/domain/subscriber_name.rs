use std::collections::HashSet;

use unicode_segmentation::UnicodeSegmentation;

/// A struct that parses a user-submitted name (or surname) and enforces
/// constraints, namely: reject empty/whitespace, enforce maximum length,
/// reject some problematic characters.
///
/// Must be instantiated with `SubscriberName::parse`.
///
/// The field is left private, to prevent bypassing of `parse`, and mutation of
/// the value.
#[derive(Debug, Clone)]
pub struct SubscriberName(String);

impl SubscriberName {
    pub fn parse(name: String) -> Result<Self, String> {
        let empty = name.trim().is_empty();
        let too_long = name.graphemes(true).count() > 256;
        let bad_chars: HashSet<char> = r#"/()"<>\{}"#.chars().collect();
        let bad = name.chars().any(|c| bad_chars.contains(&c));
        match !empty && !too_long && !bad {
            true => Ok(Self(name)),
            false => Err(format!("Invalid name: {name:?}")),
        }
    }
}

impl AsRef<str> for SubscriberName {
    fn as_ref(&self) -> &str { &self.0 }
}
