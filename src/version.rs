use crate::store::{read_field, AssociationStore, FieldName, RecordGroupId};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt};

/// Product directory that precedes the version segment in install paths.
pub const ANCHOR: &str = "Vivado";
pub const SEPARATOR: char = '\\';

/// Dot-separated numeric release name such as `2021.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionToken(String);

impl VersionToken {
    pub fn parse(value: &str) -> Option<Self> {
        if is_version_token(value) {
            Some(Self(value.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub fn is_version_token(value: &str) -> bool {
    value.contains('.')
        && value
            .split('.')
            .all(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
}

// Segments are compared as integers without parsing, so arbitrarily long
// digit runs cannot overflow.
fn compare_segment(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl Ord for VersionToken {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut left = self.0.split('.');
        let mut right = other.0.split('.');
        loop {
            match (left.next(), right.next()) {
                (Some(a), Some(b)) => match compare_segment(a, b) {
                    Ordering::Equal => continue,
                    unequal => return unequal,
                },
                (Some(_), None) => return Ordering::Greater,
                (None, Some(_)) => return Ordering::Less,
                (None, None) => return self.0.cmp(&other.0),
            }
        }
    }
}

impl PartialOrd for VersionToken {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VersionToken {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_version_token(&value) {
            Ok(Self(value))
        } else {
            Err(format!("not a version: {value:?}"))
        }
    }
}

impl From<VersionToken> for String {
    fn from(token: VersionToken) -> Self {
        token.0
    }
}

fn starts_segment(value: &str, index: usize) -> bool {
    index == 0 || matches!(value[..index].chars().next_back(), Some('\\' | '/' | '"'))
}

/// Byte offsets of `needle` where it begins a path segment. `needle` must start with the anchor.
fn anchored_matches<'a>(value: &'a str, needle: &'a str) -> impl Iterator<Item = usize> + 'a {
    value
        .match_indices(needle)
        .map(|(index, _)| index)
        .filter(move |&index| starts_segment(value, index))
}

/// Version named by the segment after the first `Vivado\` that is followed by a valid token.
pub fn extract_version_token(path: &str) -> Option<VersionToken> {
    let needle = format!("{ANCHOR}{SEPARATOR}");
    let found = anchored_matches(path, &needle).find_map(|index| {
        let rest = &path[index + needle.len()..];
        let segment = rest.split(SEPARATOR).next().unwrap_or(rest);
        VersionToken::parse(segment)
    });
    found
}

/// Replaces every anchored `Vivado\<source>\` with `Vivado\<target>\`.
///
/// Returns the new value and how many segments were substituted.
pub fn replace_anchored_version(value: &str, source: &str, target: &str) -> (String, usize) {
    let from = format!("{ANCHOR}{SEPARATOR}{source}{SEPARATOR}");
    let to = format!("{ANCHOR}{SEPARATOR}{target}{SEPARATOR}");
    let mut out = String::with_capacity(value.len());
    let mut last = 0;
    let mut count = 0;
    for index in anchored_matches(value, &from) {
        out.push_str(&value[last..index]);
        out.push_str(&to);
        last = index + from.len();
        count += 1;
    }
    out.push_str(&value[last..]);
    (out, count)
}

/// First version found in a group's display path, in group order.
///
/// Groups whose entry cannot be opened or read are skipped.
pub fn detect_current_version<S: AssociationStore>(
    store: &S,
    groups: &[RecordGroupId],
) -> Option<VersionToken> {
    groups.iter().find_map(|&group| {
        read_field(store, group, FieldName::DisplayPath)
            .ok()
            .and_then(|value| extract_version_token(&value))
    })
}
