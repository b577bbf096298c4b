use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Version string of a plugin, ordered the way plugin upgrades need.
///
/// Whitespace is ignored and the rest is split on `.`. When every segment is
/// a non-empty run of ASCII digits the version is *numeric* and compares
/// segment by segment, missing trailing segments counting as `0`
/// (`"1.0" == "1.0.0"`, `"1.10" > "1.2"`). Any other version sorts below every
/// numeric one; two non-numeric versions compare by their stripped text.
#[derive(Debug, Clone)]
pub struct PluginVersion {
    raw: String,
    stripped: String,
}

impl PluginVersion {
    pub fn new(version: impl Into<String>) -> Self {
        let raw = version.into();
        let stripped = raw.chars().filter(|c| !c.is_whitespace()).collect();
        Self { raw, stripped }
    }

    /// The version exactly as declared.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_numeric(&self) -> bool {
        self.numeric_segments().is_some()
    }

    fn numeric_segments(&self) -> Option<Vec<&str>> {
        let segments: Vec<&str> = self.stripped.split('.').collect();
        let valid = segments
            .iter()
            .all(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()));
        if valid { Some(segments) } else { None }
    }
}

/// Compares two digit strings as unbounded non-negative integers.
fn compare_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl Ord for PluginVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric_segments(), other.numeric_segments()) {
            (Some(left), Some(right)) => {
                let len = left.len().max(right.len());
                for i in 0..len {
                    let l = left.get(i).copied().unwrap_or("0");
                    let r = right.get(i).copied().unwrap_or("0");
                    let ord = compare_digits(l, r);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            }
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => self.stripped.cmp(&other.stripped),
        }
    }
}

impl PartialOrd for PluginVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PluginVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PluginVersion {}

impl Hash for PluginVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Must agree with `eq`: numeric versions hash without trailing zero segments.
        match self.numeric_segments() {
            Some(mut segments) => {
                while segments.len() > 1 && compare_digits(segments[segments.len() - 1], "0") == Ordering::Equal {
                    segments.pop();
                }
                for segment in segments {
                    let trimmed = segment.trim_start_matches('0');
                    trimmed.hash(state);
                }
            }
            None => self.stripped.hash(state),
        }
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl From<&str> for PluginVersion {
    fn from(version: &str) -> Self {
        PluginVersion::new(version)
    }
}

impl From<String> for PluginVersion {
    fn from(version: String) -> Self {
        PluginVersion::new(version)
    }
}
