//! Ordered key/value payloads with structured field paths
//!
//! A payload body is a sequence of `key=value` lines. Keys are dotted paths
//! whose segments address nested records (`stats.0.key`), list lengths
//! (`keys.[]`) and map entries (`stats.{kills}`). Paths are parsed into
//! [`FieldPath`] at the codec boundary so callers never build or split
//! dotted strings themselves.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::fmt;
use std::str::FromStr;

/// One element of a field path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Plain record key
    Key(String),
    /// List element index
    Index(usize),
    /// Map entry, rendered as `{key}`
    MapKey(String),
    /// List length marker `[]`
    ListLength,
    /// Map length marker `{}`
    MapLength,
}

impl Segment {
    pub fn key(name: impl Into<String>) -> Self {
        Self::Key(name.into())
    }

    fn parse(raw: &str) -> Result<Self> {
        const BRACKETS: [char; 4] = ['{', '}', '[', ']'];
        match raw {
            "" => Err(Error::MalformedFrame("empty field path segment".into())),
            "[]" => Ok(Self::ListLength),
            "{}" => Ok(Self::MapLength),
            s if s.len() > 2 && s.starts_with('{') && s.ends_with('}') => {
                let inner = &s[1..s.len() - 1];
                if inner.contains(BRACKETS) {
                    return Err(Error::MalformedFrame(format!("invalid map key segment {s:?}")));
                }
                Ok(Self::MapKey(inner.to_string()))
            }
            s if s.contains(BRACKETS) => {
                Err(Error::MalformedFrame(format!("invalid field path segment {s:?}")))
            }
            // Only canonical decimals are indices so rendering stays lossless
            s if is_canonical_index(s) => s
                .parse()
                .map(Self::Index)
                .map_err(|_| Error::MalformedFrame(format!("list index {s} out of range"))),
            s => Ok(Self::Key(s.to_string())),
        }
    }
}

fn is_canonical_index(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit()) && (s == "0" || !s.starts_with('0'))
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(index) => write!(f, "{index}"),
            Self::MapKey(key) => write!(f, "{{{key}}}"),
            Self::ListLength => f.write_str("[]"),
            Self::MapLength => f.write_str("{}"),
        }
    }
}

/// Structured key of a payload field
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<Segment>);

impl FieldPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Path consisting of a single plain key
    pub fn key(name: impl Into<String>) -> Self {
        Self(vec![Segment::key(name)])
    }

    pub fn push(mut self, segment: Segment) -> Self {
        self.0.push(segment);
        self
    }

    pub fn child(self, name: impl Into<String>) -> Self {
        self.push(Segment::key(name))
    }

    pub fn index(self, index: usize) -> Self {
        self.push(Segment::Index(index))
    }

    pub fn map_key(self, key: impl Into<String>) -> Self {
        self.push(Segment::MapKey(key.into()))
    }

    pub fn list_length(self) -> Self {
        self.push(Segment::ListLength)
    }

    pub fn map_length(self) -> Self {
        self.push(Segment::MapLength)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Remainder of this path below `prefix`
    pub fn strip_prefix(&self, prefix: &FieldPath) -> Option<FieldPath> {
        self.0
            .strip_prefix(prefix.0.as_slice())
            .map(|rest| FieldPath(rest.to_vec()))
    }

    /// This path re-rooted below `prefix`
    pub fn under(&self, prefix: &FieldPath) -> FieldPath {
        let mut segments = prefix.0.clone();
        segments.extend(self.0.iter().cloned());
        FieldPath(segments)
    }
}

impl FromStr for FieldPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::MalformedFrame("empty field key".into()));
        }
        s.split('.').map(Segment::parse).collect::<Result<Vec<_>>>().map(Self)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

/// Ordered collection of field path to raw value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    fields: IndexMap<FieldPath, String>,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a frame body (without its terminating NUL)
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|e| Error::MalformedFrame(format!("payload is not valid UTF-8: {e}")))?;
        let mut payload = Self::new();
        for line in text.split('\n').filter(|line| !line.is_empty()) {
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::MalformedFrame(format!("payload line without '=': {line:?}")))?;
            let path: FieldPath = key.parse()?;
            if payload.fields.contains_key(&path) {
                return Err(Error::MalformedFrame(format!("duplicate payload key {path}")));
            }
            payload.fields.insert(path, value.to_string());
        }
        Ok(payload)
    }

    /// Renders the payload as newline separated `key=value` lines
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut lines = Vec::with_capacity(self.fields.len());
        for (path, value) in &self.fields {
            if value.contains(['\n', '\0']) {
                return Err(Error::InvalidArgument(format!(
                    "value of {path} contains a line or frame terminator"
                )));
            }
            lines.push(format!("{path}={value}"));
        }
        Ok(lines.join("\n").into_bytes())
    }

    /// Builder-style insert of a root-level key
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.insert(FieldPath::key(key), value);
        self
    }

    /// Builder-style insert of a structured path
    pub fn with_path(mut self, path: FieldPath, value: impl ToString) -> Self {
        self.insert(path, value);
        self
    }

    /// Sets a field, keeping the position of an existing one
    pub fn insert(&mut self, path: FieldPath, value: impl ToString) {
        self.fields.insert(path, value.to_string());
    }

    /// Writes `prefix.N[.leaf]=value` for each item plus `prefix.[]=count`
    pub fn insert_list<I, V>(&mut self, prefix: &str, leaf: Option<&str>, items: I)
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        let base = FieldPath::key(prefix);
        let mut count = 0;
        for (index, item) in items.into_iter().enumerate() {
            let mut path = base.clone().index(index);
            if let Some(leaf) = leaf {
                path = path.child(leaf);
            }
            self.insert(path, item);
            count += 1;
        }
        self.insert(base.list_length(), count);
    }

    pub fn get(&self, path: &FieldPath) -> Option<&str> {
        self.fields.get(path).map(String::as_str)
    }

    /// Value of a root-level key
    pub fn field(&self, key: &str) -> Option<&str> {
        self.get(&FieldPath::key(key))
    }

    pub fn contains(&self, path: &FieldPath) -> bool {
        self.fields.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldPath, &str)> {
        self.fields.iter().map(|(path, value)| (path, value.as_str()))
    }

    /// All fields below `prefix`, re-rooted at it
    pub fn subtree(&self, prefix: &FieldPath) -> Payload {
        let fields = self
            .fields
            .iter()
            .filter_map(|(path, value)| {
                path.strip_prefix(prefix)
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest, value.clone()))
            })
            .collect();
        Payload { fields }
    }

    /// All fields moved below `prefix`
    pub fn nested_under(&self, prefix: &FieldPath) -> Payload {
        let fields = self
            .fields
            .iter()
            .map(|(path, value)| (path.under(prefix), value.clone()))
            .collect();
        Payload { fields }
    }

    /// Appends all fields of `other`, replacing values of shared paths
    pub fn extend(&mut self, other: Payload) {
        self.fields.extend(other.fields);
    }

    fn has_values_below(&self, prefix: &FieldPath) -> bool {
        self.fields
            .keys()
            .any(|path| path.len() > prefix.len() && path.starts_with(prefix))
    }

    fn declared_length(&self, path: &FieldPath) -> Result<Option<usize>> {
        self.get(path)
            .map(|raw| {
                raw.trim().parse::<usize>().map_err(|_| {
                    Error::MalformedFrame(format!("invalid structure length {raw:?} at {path}"))
                })
            })
            .transpose()
    }

    /// Elements of the list at `prefix`, each re-rooted at its index
    ///
    /// An absent list is empty. A list whose declared length disagrees with
    /// its elements is malformed.
    pub fn list(&self, prefix: &FieldPath) -> Result<Vec<Payload>> {
        let Some(length) = self.declared_length(&prefix.clone().list_length())? else {
            if self.has_values_below(prefix) {
                return Err(Error::MalformedFrame(format!("list at {prefix} lacks a length")));
            }
            return Ok(Vec::new());
        };
        (0..length)
            .map(|index| {
                let element_path = prefix.clone().index(index);
                let element = self.subtree(&element_path);
                if element.is_empty() && !self.contains(&element_path) {
                    return Err(Error::MalformedFrame(format!(
                        "list at {prefix} is missing element {index}"
                    )));
                }
                Ok(element)
            })
            .collect()
    }

    /// Scalar elements of the list at `prefix`
    pub fn scalar_list(&self, prefix: &FieldPath) -> Result<Vec<&str>> {
        let length = self
            .declared_length(&prefix.clone().list_length())?
            .unwrap_or(0);
        (0..length)
            .map(|index| {
                self.get(&prefix.clone().index(index)).ok_or_else(|| {
                    Error::MalformedFrame(format!("list at {prefix} is missing element {index}"))
                })
            })
            .collect()
    }

    /// Entries of the map at `prefix`, keyed by their braced key
    pub fn map(&self, prefix: &FieldPath) -> Result<IndexMap<String, Payload>> {
        let length = self.declared_length(&prefix.clone().map_length())?;
        let mut entries: IndexMap<String, Payload> = IndexMap::new();
        for (path, value) in &self.fields {
            let Some(rest) = path.strip_prefix(prefix) else {
                continue;
            };
            let Some((Segment::MapKey(key), tail)) = rest.segments().split_first() else {
                continue;
            };
            entries
                .entry(key.clone())
                .or_default()
                .insert(FieldPath(tail.to_vec()), value);
        }
        match length {
            Some(length) if length != entries.len() => Err(Error::MalformedFrame(format!(
                "map at {prefix} declares {length} entries but has {}",
                entries.len()
            ))),
            _ => Ok(entries),
        }
    }
}

impl FromIterator<(FieldPath, String)> for Payload {
    fn from_iter<T: IntoIterator<Item = (FieldPath, String)>>(iter: T) -> Self {
        Payload {
            fields: iter.into_iter().collect(),
        }
    }
}
