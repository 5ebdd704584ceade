//! Source spans for tokens and nodes.
//!
//! Locations compare equal to each other unconditionally: node equality and
//! content hashing must not depend on where a node was written, only on its
//! shape. Diagnostics are the single consumer of the actual coordinates.

use ahash::AHashMap;

/// A line/column span. `-1` marks an unset coordinate.
#[derive(Debug, Clone)]
pub struct Location {
    pub line: i32,
    pub col: i32,
    pub end_line: i32,
    pub end_col: i32,
    /// Named intermediate spans inside the node, e.g. the `=` of a function
    /// header, used to point diagnostics at a sub-range.
    pub checkpoints: AHashMap<&'static str, Location>,
}

impl Default for Location {
    fn default() -> Self {
        Self {
            line: -1,
            col: -1,
            end_line: -1,
            end_col: -1,
            checkpoints: AHashMap::new(),
        }
    }
}

impl PartialEq for Location {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl Eq for Location {}

impl std::hash::Hash for Location {
    fn hash<H: std::hash::Hasher>(&self, _: &mut H) {}
}

impl Location {
    pub fn new(line: i32, col: i32, end_line: i32, end_col: i32) -> Self {
        Self {
            line,
            col,
            end_line,
            end_col,
            checkpoints: AHashMap::new(),
        }
    }

    pub fn point(line: i32, col: i32) -> Self {
        Self::new(line, col, line, col)
    }

    pub fn is_set(&self) -> bool {
        self.line != -1
    }

    /// Extends this span to the end of `other`.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        if other.end_line != -1 {
            merged.end_line = other.end_line;
        }
        if other.end_col != -1 {
            merged.end_col = other.end_col;
        }
        merged
    }

    #[must_use]
    pub fn with_checkpoint(mut self, name: &'static str, loc: Self) -> Self {
        self.checkpoints.insert(name, loc);
        self
    }

    /// Splits a multi-line span into one span per line, for rendering
    /// underlines line by line.
    pub fn split(&self) -> Vec<Self> {
        let end_line = if self.end_line != -1 { self.end_line } else { self.line };
        (self.line..=end_line)
            .map(|line| Self {
                line,
                col: if line == self.line { self.col } else { 1 },
                end_line: line,
                end_col: if line == end_line { self.end_col } else { -1 },
                checkpoints: AHashMap::new(),
            })
            .collect()
    }

    fn endpoint(&self, name: &str) -> Self {
        match name {
            "start" => Self::point(self.line, self.col),
            "end" => {
                let el = if self.end_line != -1 { self.end_line } else { self.line };
                let ec = if self.end_col != -1 { self.end_col } else { self.col };
                Self::point(el, ec)
            }
            _ => self.checkpoints.get(name).cloned().unwrap_or_else(|| self.endpoint("start")),
        }
    }

    /// The span between two named points ("start", "end", or a checkpoint).
    #[must_use]
    pub fn span(&self, start: &str, end: &str) -> Self {
        let s = self.endpoint(start);
        let e = self.endpoint(end);
        Self::new(s.line, s.col, e.end_line, e.end_col)
    }
}

/// Merges the spans of the first and last element.
pub fn enclosing(first: &Location, last: &Location) -> Location {
    first.merge(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_coordinates() {
        assert_eq!(Location::new(1, 2, 3, 4), Location::default());
    }

    #[test]
    fn split_covers_each_line() {
        let loc = Location::new(2, 5, 4, 3);
        let lines = loc.split();
        assert_eq!(lines.len(), 3);
        assert_eq!((lines[0].line, lines[0].col), (2, 5));
        assert_eq!((lines[1].line, lines[1].col), (3, 1));
        assert_eq!((lines[2].line, lines[2].end_col), (4, 3));
    }

    #[test]
    fn span_reads_checkpoints() {
        let loc = Location::new(1, 1, 2, 10).with_checkpoint("assign", Location::point(1, 8));
        let header = loc.span("start", "assign");
        assert_eq!((header.line, header.col, header.end_line, header.end_col), (1, 1, 1, 8));
    }
}
