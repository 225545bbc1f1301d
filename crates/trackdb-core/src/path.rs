//! Field paths into owned object graphs
//!
//! A path is a `.`-separated list of field names, each optionally followed by a
//! `[key]` dictionary lookup: `Name`, `Address.FirstLine`, `Phones[home].Number`.
//! Inside a key, `\]` and `\\` stand for a literal `]` and `\`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{DbError, DbResult};
use crate::field::SetOptions;
use crate::tracked::TrackedObject;

/// One step of a field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    /// Field name on the current object
    pub field: String,
    /// Dictionary key applied to the field's value
    pub key: Option<String>,
}

/// Escape a dictionary key for use between `[` and `]`
pub fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for c in key.chars() {
        if c == ']' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}[{}]", self.field, escape_key(key)),
            None => f.write_str(&self.field),
        }
    }
}

/// Parsed field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    /// Parse a textual path
    pub fn parse(text: &str) -> DbResult<Self> {
        let invalid = |message: &str| DbError::invalid_path(text, message);
        let mut segments = Vec::new();
        let mut chars = text.chars().peekable();

        loop {
            let mut field = String::new();
            while let Some(&c) = chars.peek() {
                if c == '.' || c == '[' {
                    break;
                }
                if c == ']' {
                    return Err(invalid("unexpected ']'"));
                }
                field.push(c);
                chars.next();
            }
            if field.is_empty() {
                return Err(invalid("empty field name"));
            }

            let mut key = None;
            if chars.peek() == Some(&'[') {
                chars.next();
                let mut text_key = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some(escaped) => text_key.push(escaped),
                            None => break,
                        },
                        _ => text_key.push(c),
                    }
                }
                if !closed {
                    return Err(invalid("unterminated '['"));
                }
                key = Some(text_key);
            }
            segments.push(PathSegment { field, key });

            match chars.next() {
                None => break,
                Some('.') => continue,
                Some(c) => return Err(invalid(&format!("unexpected '{}' after segment", c))),
            }
        }

        Ok(Self { segments })
    }

    /// Path segments, outermost first
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Walk the owned objects named by every segment but the last
    ///
    /// Returns the object holding the final field, or `None` when that object is
    /// `root` itself.
    fn parent(&self, root: &dyn TrackedObject) -> DbResult<(Option<Arc<dyn TrackedObject>>, &str)> {
        let (last, parents) = self
            .segments
            .split_last()
            .ok_or_else(|| DbError::invalid_path("", "empty path"))?;
        if last.key.is_some() {
            return Err(DbError::invalid_path(
                self.to_string(),
                "path must end in a field, not a dictionary entry",
            ));
        }

        let mut owned: Option<Arc<dyn TrackedObject>> = None;
        for segment in parents {
            let current: &dyn TrackedObject = match &owned {
                Some(object) => object.as_ref(),
                None => root,
            };
            let next = current
                .owned(&segment.field, segment.key.as_deref())?
                .ok_or_else(|| {
                    DbError::invalid_path(
                        self.to_string(),
                        format!("'{}' does not name an owned object", segment),
                    )
                })?;
            owned = Some(next);
        }
        Ok((owned, &last.field))
    }

    /// Coerce `value` to the target field's type and store it
    pub fn assign(&self, root: &dyn TrackedObject, value: Value, options: SetOptions) -> DbResult<bool> {
        let (owned, field) = self.parent(root)?;
        let target: &dyn TrackedObject = match &owned {
            Some(object) => object.as_ref(),
            None => root,
        };
        target.fields().assign(field, value, options)
    }

    /// Read the value at the path
    pub fn read(&self, root: &dyn TrackedObject) -> DbResult<Value> {
        let (owned, field) = self.parent(root)?;
        let target: &dyn TrackedObject = match &owned {
            Some(object) => object.as_ref(),
            None => root,
        };
        target.fields().get(field)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
