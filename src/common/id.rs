use std::fmt;

use serde::{Deserialize, Serialize};

/*
    Abstractions are named by their position in the stack. A static child
    appends `.name` to its parent (`app.beb.pl`); a dynamically created
    instance appends `.name[key]` (`app.uc[topic].ep[3]`). Keys may contain
    dots, so every split has to respect brackets.
*/

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AbstractionId(String);

/// One dot-separated piece of an id: `ep[3]` is `{ name: "ep", key: Some("3") }`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Segment<'a> {
    pub name: &'a str,
    pub key: Option<&'a str>,
}

impl AbstractionId {
    pub fn root(name: &str) -> Self {
        AbstractionId(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, name: &str) -> Self {
        if self.0.is_empty() {
            return AbstractionId(name.to_string());
        }
        AbstractionId(format!("{}.{}", self.0, name))
    }

    pub fn indexed_child(&self, name: &str, key: impl fmt::Display) -> Self {
        self.child(&format!("{}[{}]", name, key))
    }

    /// The id with its last segment removed, `None` for a root id.
    pub fn parent(&self) -> Option<Self> {
        self.split_points()
            .last()
            .map(|pos| AbstractionId(self.0[..*pos].to_string()))
    }

    pub fn segments(&self) -> Vec<Segment<'_>> {
        if self.0.is_empty() {
            return Vec::new();
        }
        let mut start = 0;
        let mut segments = Vec::new();
        for pos in self.split_points().into_iter().chain(std::iter::once(self.0.len())) {
            segments.push(Segment::parse(&self.0[start..pos]));
            start = pos + 1;
        }
        segments
    }

    pub fn last_segment(&self) -> Option<Segment<'_>> {
        self.segments().pop()
    }

    /// Finds the first instance segment called `name` and returns the id up to
    /// and including it, together with its key.
    ///
    /// `app.nnar[x].beb.pl` with `"nnar"` gives `(app.nnar[x], "x")`.
    pub fn instance_prefix(&self, name: &str) -> Option<(AbstractionId, &str)> {
        let mut end = 0;
        for (i, segment) in self.segments().into_iter().enumerate() {
            end += segment.len() + usize::from(i > 0);
            if segment.name == name {
                if let Some(key) = segment.key {
                    return Some((AbstractionId(self.0[..end].to_string()), key));
                }
            }
        }
        None
    }

    /// Key of the nearest enclosing instance called `name`.
    pub fn instance_key(&self, name: &str) -> Option<&str> {
        self.instance_prefix(name).map(|(_, key)| key)
    }

    fn split_points(&self) -> Vec<usize> {
        let mut depth = 0usize;
        let mut points = Vec::new();
        for (pos, c) in self.0.char_indices() {
            match c {
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                '.' if depth == 0 => points.push(pos),
                _ => {}
            }
        }
        points
    }
}

impl<'a> Segment<'a> {
    fn parse(raw: &'a str) -> Self {
        match raw.find('[') {
            Some(open) if raw.ends_with(']') => Segment {
                name: &raw[..open],
                key: Some(&raw[open + 1..raw.len() - 1]),
            },
            _ => Segment { name: raw, key: None },
        }
    }

    fn len(&self) -> usize {
        self.name.len() + self.key.map_or(0, |key| key.len() + 2)
    }
}

impl fmt::Display for AbstractionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AbstractionId {
    fn from(raw: &str) -> Self {
        AbstractionId(raw.to_string())
    }
}
