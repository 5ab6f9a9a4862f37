//! Document-tree addresses.
//!
//! An [`OpPath`] is an ordered list of selectors. The first selector names a
//! shape (or the document root), the remaining ones select a field, a named
//! collection or the text body of that shape:
//!
//! ```text
//! [shape, "fill", "opacity"]   scalar property "fill.opacity"
//! [shape, "fills"]             named collection "fills"
//! [shape, "text"]              rich text body
//! [page, "shapes"]             shape hierarchy of a page
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator used when a path is flattened into a map key.
pub const PATH_SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct OpPath(Vec<String>);

impl OpPath {
    pub fn new<I, S>(selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(selectors.into_iter().map(Into::into).collect())
    }

    pub fn selectors(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First selector (the shape the path starts from).
    pub fn head(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Selectors after the head.
    pub fn rest(&self) -> &[String] {
        if self.0.is_empty() {
            &[]
        } else {
            &self.0[1..]
        }
    }

    /// The first `len` selectors as a new path.
    pub fn prefix(&self, len: usize) -> OpPath {
        Self(self.0[..len.min(self.0.len())].to_vec())
    }

    /// Flattened map key (`a/b/c`).
    pub fn key(&self) -> String {
        let mut key = String::new();
        for (i, selector) in self.0.iter().enumerate() {
            if i > 0 {
                key.push(PATH_SEPARATOR);
            }
            key.push_str(selector);
        }
        key
    }
}

impl fmt::Display for OpPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl<S: Into<String>> FromIterator<S> for OpPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}
