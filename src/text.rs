use std::sync::Arc;

use dashmap::DashMap;
use tower_lsp::lsp_types::{Position, Range};

use crate::syntax::JsonTree;

pub type DocumentStore = DashMap<String, Document>;

type LineOffset = usize;

#[derive(Debug, Clone)]
pub struct Document {
    text: Arc<str>,
    line_index: Arc<LineIndex>,
    tree: Option<Arc<JsonTree>>,
    version: Option<i32>,
}

impl Document {
    pub fn new(text: String) -> Self {
        let line_index = LineIndex::new(&text);
        let tree = JsonTree::parse(&text).map(Arc::new);
        Self {
            text: Arc::from(text),
            line_index: Arc::new(line_index),
            tree,
            version: None,
        }
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tree(&self) -> Option<&JsonTree> {
        self.tree.as_deref()
    }

    pub fn version(&self) -> Option<i32> {
        self.version
    }

    pub fn offset(&self, position: Position) -> Option<usize> {
        self.line_index.offset(&self.text, position)
    }

    pub fn position_at(&self, byte_offset: usize) -> Position {
        self.line_index.position_at(&self.text, byte_offset)
    }

    pub fn span_range(&self, start: usize, end: usize) -> Range {
        Range {
            start: self.position_at(start),
            end: self.position_at(end),
        }
    }
}

#[derive(Debug)]
struct LineIndex {
    line_starts: Vec<LineOffset>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (idx, byte) in text.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(idx + 1);
            }
        }
        Self { line_starts }
    }

    fn offset(&self, text: &str, position: Position) -> Option<usize> {
        let line = position.line as usize;
        let line_start = *self.line_starts.get(line)?;
        let line_end = self
            .line_starts
            .get(line + 1)
            .copied()
            .unwrap_or(text.len());
        let line_slice = text[line_start..line_end]
            .strip_suffix('\n')
            .map(|s| s.strip_suffix('\r').unwrap_or(s))
            .unwrap_or(&text[line_start..line_end]);

        let mut units = 0u32;
        for (byte_idx, ch) in line_slice.char_indices() {
            if units >= position.character {
                return Some(line_start + byte_idx);
            }
            units += ch.len_utf16() as u32;
        }

        // Clients may send a column past the end of the line; clamp it.
        Some(line_start + line_slice.len())
    }

    fn position_at(&self, text: &str, byte_offset: usize) -> Position {
        let mut clamped = byte_offset.min(text.len());
        while !text.is_char_boundary(clamped) {
            clamped -= 1;
        }
        let line = self.line_for_offset(clamped);
        let line_start = self.line_starts.get(line).copied().unwrap_or(0);
        let character = text[line_start..clamped]
            .chars()
            .map(|ch| ch.len_utf16() as u32)
            .sum();

        Position {
            line: line as u32,
            character,
        }
    }

    fn line_for_offset(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next_line) => next_line.saturating_sub(1),
        }
    }
}
