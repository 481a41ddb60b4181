//! Path parsing and wildcard matching
//!
//! Paths address nodes in the form value tree and the field graph. A path is
//! an immutable sequence of segments parsed from a dotted/bracket string.
//! Parse results are cached process-wide so hot patterns are tokenized once.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock};

/// A single segment of a parsed path
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    /// Object key (`user` in `user.name`)
    Key(String),
    /// Array index (`0` in `items[0]` or `items.0`)
    Index(usize),
    /// Wildcard matching exactly one segment (`*` in `*.name`)
    Wildcard,
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{key}"),
            PathSegment::Index(index) => write!(f, "{index}"),
            PathSegment::Wildcard => write!(f, "*"),
        }
    }
}

/// A normalized, immutable address into the value tree and the field graph.
///
/// Equality, ordering and hashing are structural. Cloning is cheap (the
/// segment slice is shared).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormPath {
    segments: Arc<[PathSegment]>,
}

fn parse_cache() -> &'static Mutex<FxHashMap<String, FormPath>> {
    static CACHE: OnceLock<Mutex<FxHashMap<String, FormPath>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(FxHashMap::default()))
}

fn tokenize(pattern: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_bracket = false;

    let mut push = |raw: &mut String, segments: &mut Vec<PathSegment>| {
        if raw.is_empty() {
            return;
        }
        let segment = if raw == "*" {
            PathSegment::Wildcard
        } else if let Ok(index) = raw.parse::<usize>() {
            PathSegment::Index(index)
        } else {
            PathSegment::Key(std::mem::take(raw))
        };
        raw.clear();
        segments.push(segment);
    };

    for ch in pattern.chars() {
        match ch {
            '.' if !in_bracket => push(&mut current, &mut segments),
            '[' => {
                push(&mut current, &mut segments);
                in_bracket = true;
            }
            ']' => {
                push(&mut current, &mut segments);
                in_bracket = false;
            }
            _ => current.push(ch),
        }
    }
    push(&mut current, &mut segments);
    segments
}

impl FormPath {
    /// The empty (root) path
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a dotted/bracket string into a normalized path.
    ///
    /// `a.b[0].c`, `a.b.0.c` and `a.b.0["c"]`-free forms all normalize to the
    /// same segment sequence. Results are cached by pattern string.
    pub fn parse(pattern: &str) -> Self {
        if pattern.is_empty() {
            return Self::root();
        }
        let mut cache = parse_cache().lock().unwrap();
        if let Some(path) = cache.get(pattern) {
            return path.clone();
        }
        let path = FormPath {
            segments: tokenize(pattern).into(),
        };
        cache.insert(pattern.to_string(), path.clone());
        path
    }

    /// Build a path from owned segments
    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self {
            segments: segments.into(),
        }
    }

    /// The segments of this path
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append one segment
    pub fn concat(&self, segment: PathSegment) -> Self {
        let mut segments = self.segments.to_vec();
        segments.push(segment);
        Self::from_segments(segments)
    }

    /// Append an index segment
    pub fn index(&self, index: usize) -> Self {
        self.concat(PathSegment::Index(index))
    }

    /// Append a key segment
    pub fn key(&self, key: impl Into<String>) -> Self {
        self.concat(PathSegment::Key(key.into()))
    }

    /// The path without its final segment, or `None` at the root
    pub fn parent(&self) -> Option<Self> {
        if self.is_empty() {
            return None;
        }
        Some(Self::from_segments(
            self.segments[..self.len() - 1].to_vec(),
        ))
    }

    /// The final segment, if any
    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// Whether `self` is a (non-strict) prefix of `other`
    pub fn is_prefix_of(&self, other: &FormPath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Whether this path starts with `prefix`
    pub fn starts_with(&self, prefix: &FormPath) -> bool {
        prefix.is_prefix_of(self)
    }

    /// Whether the path contains any wildcard segment
    pub fn is_wildcard_pattern(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, PathSegment::Wildcard))
    }

    /// Match a concrete path against this pattern.
    ///
    /// A wildcard matches exactly one segment; all other segments must be
    /// structurally equal. Lengths must agree.
    pub fn matches(&self, path: &FormPath) -> bool {
        if self.segments.len() != path.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(path.segments.iter())
            .all(|(pattern, concrete)| match pattern {
                PathSegment::Wildcard => true,
                other => other == concrete,
            })
    }

    /// Replace the segment at `position`, used to re-key array items
    pub fn with_segment(&self, position: usize, segment: PathSegment) -> Self {
        let mut segments = self.segments.to_vec();
        if position < segments.len() {
            segments[position] = segment;
        }
        Self::from_segments(segments)
    }
}

impl fmt::Display for FormPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for FormPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for FormPath {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for FormPath {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl Serialize for FormPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FormPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(FormPath::parse(&raw))
    }
}
