//! Attribute path syntax: `segment(/segment)*` where a segment is `name` or
//! `name[key]`.
//!
//! Parsing is purely syntactic; nothing is checked against a live graph
//! until resolution.

use std::fmt;

/// One hop of an attribute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Plain field name
    Field(String),
    /// Field name followed by an index expression
    Indexed { name: String, key: String },
}

impl Segment {
    /// Parses a single segment.
    ///
    /// A segment is indexed only when it contains `[` and ends with `]`;
    /// anything else is taken verbatim as a field name.
    pub fn parse(raw: &str) -> Self {
        if let Some(stripped) = raw.strip_suffix(']') {
            if let Some((name, key)) = stripped.split_once('[') {
                return Self::Indexed {
                    name: name.to_string(),
                    key: key.to_string(),
                };
            }
        }
        Self::Field(raw.to_string())
    }

    /// Returns the field name of this segment.
    pub fn name(&self) -> &str {
        match self {
            Self::Field(name) | Self::Indexed { name, .. } => name,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => f.write_str(name),
            Self::Indexed { name, key } => write!(f, "{name}[{key}]"),
        }
    }
}

/// A parsed attribute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributePath {
    segments: Vec<Segment>,
}

impl AttributePath {
    /// Splits `raw` on `/` and parses each piece. Brackets do not protect
    /// a `/`, so keys cannot contain one.
    pub fn parse(raw: &str) -> Self {
        Self {
            segments: raw.split('/').map(Segment::parse).collect(),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Splits into the intermediate hops and the final target segment.
    pub fn split_last(&self) -> Option<(&Segment, &[Segment])> {
        self.segments.split_last()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AttributePath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_indexed_path() {
        let path = AttributePath::parse("Requests[2]/Type");
        assert_eq!(
            path.segments(),
            &[
                Segment::Indexed {
                    name: "Requests".to_string(),
                    key: "2".to_string()
                },
                Segment::Field("Type".to_string()),
            ]
        );
        assert_eq!(path.to_string(), "Requests[2]/Type");
    }

    #[test]
    fn test_unclosed_bracket_is_plain_field() {
        assert_eq!(
            Segment::parse("Requests[2"),
            Segment::Field("Requests[2".to_string())
        );
    }

    #[test]
    fn test_key_is_kept_verbatim() {
        let path = AttributePath::parse("Lookup[a b]x]/Type");
        assert_eq!(
            path.segments()[0],
            Segment::Indexed {
                name: "Lookup".to_string(),
                key: "a b]x".to_string()
            }
        );
    }

    #[test]
    fn test_slash_inside_brackets_splits_the_path() {
        let path = AttributePath::parse("Lookup[a/b]");
        assert_eq!(path.len(), 2);
        assert_eq!(path.segments()[0], Segment::Field("Lookup[a".to_string()));
        assert_eq!(path.segments()[1], Segment::Field("b]".to_string()));
    }

    #[test]
    fn test_empty_segments_are_syntactically_valid() {
        let path = AttributePath::parse("a//b");
        assert_eq!(path.len(), 3);
        assert_eq!(path.segments()[1], Segment::Field(String::new()));
    }

    #[test]
    fn test_split_last() {
        let path = AttributePath::parse("A/B/C");
        let (last, hops) = path.split_last().unwrap();
        assert_eq!(last.name(), "C");
        assert_eq!(hops.len(), 2);
    }
}
