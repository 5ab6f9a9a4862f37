//! # Rich text runtime
//!
//! Text is stored as a flat sequence of glyphs addressed by character offset.
//! Each glyph carries its span attributes; paragraph attributes live on the
//! paragraph terminator (`'\n'`) glyph.
//!
//! Every mutation returns its *realized* effect so that callers can invert it
//! exactly:
//! - [`RichText::insert`] returns where the runs actually landed
//! - [`RichText::remove`] returns the removed runs with their attributes
//! - [`RichText::format`] returns the prior value of every affected sub-range

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Attribute bag (bold, color, bullet, indent, line height ...).
pub type AttrMap = BTreeMap<String, Value>;

pub const PARAGRAPH_END: char = '\n';

/// Which attribute layer an attribute op addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrTarget {
    /// Character-level attributes.
    Span,
    /// Paragraph-level attributes, stored on paragraph terminators.
    Para,
}

/// A run of characters sharing the same attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: AttrMap,
    /// Paragraph attributes, only meaningful for `'\n'` characters of the run.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub para: AttrMap,
}

impl TextRun {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attrs: AttrMap::new(),
            para: AttrMap::new(),
        }
    }

    pub fn styled(text: impl Into<String>, attrs: AttrMap) -> Self {
        Self {
            text: text.into(),
            attrs,
            para: AttrMap::new(),
        }
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Total length in characters of a list of runs.
pub fn runs_len(runs: &[TextRun]) -> usize {
    runs.iter().map(TextRun::len).sum()
}

/// Prior value of one attribute over a sub-range, as recorded by
/// [`RichText::format`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrChange {
    pub start: usize,
    pub len: usize,
    pub prior: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
struct Glyph {
    ch: char,
    attrs: AttrMap,
    para: AttrMap,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<TextRun>", into = "Vec<TextRun>")]
pub struct RichText {
    glyphs: Vec<Glyph>,
}

impl RichText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_plain(text: &str) -> Self {
        Self::from(vec![TextRun::plain(text)])
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }

    pub fn to_plain(&self) -> String {
        self.glyphs.iter().map(|g| g.ch).collect()
    }

    /// Span attributes of the character at `index`.
    pub fn attrs_at(&self, index: usize) -> Option<&AttrMap> {
        self.glyphs.get(index).map(|g| &g.attrs)
    }

    /// Paragraph attributes of the paragraph containing `index`.
    pub fn para_at(&self, index: usize) -> Option<&AttrMap> {
        self.glyphs[index.min(self.glyphs.len())..]
            .iter()
            .find(|g| g.ch == PARAGRAPH_END)
            .map(|g| &g.para)
    }

    /// The whole text as maximal runs.
    pub fn runs(&self) -> Vec<TextRun> {
        glyphs_to_runs(&self.glyphs)
    }

    /// Insert runs at `start` (clamped to the text length).
    ///
    /// Returns the offset the runs were inserted at.
    pub fn insert(&mut self, start: usize, runs: &[TextRun]) -> usize {
        let start = start.min(self.glyphs.len());
        let glyphs = runs_to_glyphs(runs);
        self.glyphs.splice(start..start, glyphs);
        start
    }

    /// Remove `len` characters from `start` (clamped).
    ///
    /// Returns the realized start and the removed runs.
    pub fn remove(&mut self, start: usize, len: usize) -> (usize, Vec<TextRun>) {
        let start = start.min(self.glyphs.len());
        let end = start.saturating_add(len).min(self.glyphs.len());
        let removed: Vec<Glyph> = self.glyphs.drain(start..end).collect();
        (start, glyphs_to_runs(&removed))
    }

    /// Set (or clear, with `None`) attribute `key` over `[start, start+len)`.
    ///
    /// Span attributes apply to every character of the window, paragraph
    /// attributes to every paragraph terminator inside it. Returns the prior
    /// value of each maximal sub-range that changed hands.
    pub fn format(
        &mut self,
        start: usize,
        len: usize,
        target: AttrTarget,
        key: &str,
        value: Option<&Value>,
    ) -> Vec<AttrChange> {
        let start = start.min(self.glyphs.len());
        let end = start.saturating_add(len).min(self.glyphs.len());
        let mut changes: Vec<AttrChange> = Vec::new();

        for index in start..end {
            let glyph = &mut self.glyphs[index];
            let layer = match target {
                AttrTarget::Span => &mut glyph.attrs,
                AttrTarget::Para if glyph.ch == PARAGRAPH_END => &mut glyph.para,
                AttrTarget::Para => continue,
            };
            let prior = match value {
                Some(v) => layer.insert(key.to_string(), v.clone()),
                None => layer.remove(key),
            };

            match changes.last_mut() {
                Some(last) if last.start + last.len == index && last.prior == prior => {
                    last.len += 1;
                }
                _ => changes.push(AttrChange {
                    start: index,
                    len: 1,
                    prior,
                }),
            }
        }

        changes
    }
}

impl From<Vec<TextRun>> for RichText {
    fn from(runs: Vec<TextRun>) -> Self {
        Self {
            glyphs: runs_to_glyphs(&runs),
        }
    }
}

impl From<RichText> for Vec<TextRun> {
    fn from(text: RichText) -> Self {
        text.runs()
    }
}

fn runs_to_glyphs(runs: &[TextRun]) -> Vec<Glyph> {
    let mut glyphs = Vec::with_capacity(runs_len(runs));
    for run in runs {
        for ch in run.text.chars() {
            glyphs.push(Glyph {
                ch,
                attrs: run.attrs.clone(),
                para: if ch == PARAGRAPH_END {
                    run.para.clone()
                } else {
                    AttrMap::new()
                },
            });
        }
    }
    glyphs
}

fn glyphs_to_runs(glyphs: &[Glyph]) -> Vec<TextRun> {
    let mut runs: Vec<TextRun> = Vec::new();
    for glyph in glyphs {
        if let Some(last) = runs.last_mut() {
            let para_compatible = glyph.ch != PARAGRAPH_END
                || !last.text.contains(PARAGRAPH_END)
                || last.para == glyph.para;
            if last.attrs == glyph.attrs && para_compatible {
                if glyph.ch == PARAGRAPH_END {
                    last.para = glyph.para.clone();
                }
                last.text.push(glyph.ch);
                continue;
            }
        }
        runs.push(TextRun {
            text: glyph.ch.to_string(),
            attrs: glyph.attrs.clone(),
            para: glyph.para.clone(),
        });
    }
    runs
}
