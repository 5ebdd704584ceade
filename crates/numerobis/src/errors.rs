//! Catalogue-driven diagnostics.
//!
//! Every reportable failure carries a stable numeric code. The codes, their
//! one-line kinds and message templates live in `messages.txt`, a flat file
//! with `[Ecode / Kind]` headers followed by a message line and an optional
//! help line. Failures are fatal: phases propagate a boxed [`Diagnostic`]
//! with `?` and the CLI boundary renders it and exits.

use std::{fmt, path::PathBuf, rc::Rc, sync::LazyLock};

use smallvec::SmallVec;

use ahash::AHashMap;

use crate::location::Location;

/// A source module: path plus full source text, shared across phases so
/// diagnostics can render previews.
#[derive(Debug, Clone, Default)]
pub struct ModuleMeta {
    pub path: PathBuf,
    pub source: String,
}

impl ModuleMeta {
    pub fn new(path: impl Into<PathBuf>, source: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            path: path.into(),
            source: source.into(),
        })
    }
}

#[derive(Debug, Clone)]
struct ErrorMessage {
    kind: &'static str,
    message: &'static str,
    help: Option<&'static str>,
}

static CATALOGUE: LazyLock<AHashMap<u16, ErrorMessage>> = LazyLock::new(|| {
    parse_catalogue(include_str!("messages.txt")).expect("malformed messages.txt")
});

fn parse_catalogue(source: &'static str) -> std::result::Result<AHashMap<u16, ErrorMessage>, String> {
    let mut messages = AHashMap::new();
    let mut current: Option<(u16, &'static str, Vec<&'static str>)> = None;

    let mut flush = |entry: Option<(u16, &'static str, Vec<&'static str>)>| -> std::result::Result<(), String> {
        if let Some((code, kind, lines)) = entry {
            let message = *lines.first().ok_or_else(|| format!("E{code:03} has no message"))?;
            if lines.len() > 2 {
                return Err(format!("E{code:03} has more than two fields"));
            }
            messages.insert(
                code,
                ErrorMessage {
                    kind,
                    message,
                    help: lines.get(1).copied(),
                },
            );
        }
        Ok(())
    };

    for line in source.lines() {
        let trimmed = line.trim();
        if let Some(header) = trimmed.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            let (code, kind) = header
                .split_once('/')
                .ok_or_else(|| format!("bad header {trimmed:?}"))?;
            let code = code
                .trim()
                .strip_prefix('E')
                .and_then(|digits| digits.parse::<u16>().ok())
                .ok_or_else(|| format!("bad code in {trimmed:?}"))?;
            flush(current.take())?;
            current = Some((code, kind.trim(), Vec::new()));
        } else if !trimmed.is_empty() {
            match &mut current {
                Some((_, _, lines)) => lines.push(trimmed),
                None => return Err("catalogue must start with a header".into()),
            }
        }
    }
    flush(current)?;
    Ok(messages)
}

/// A single rendered-to-be diagnostic. Construction goes through
/// [`Errors::throw`]; `code` is the stable user-facing identifier asserted
/// by tests.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: u16,
    pub kind: String,
    pub message: String,
    pub help: Option<String>,
    pub loc: Option<Location>,
    /// Call-site locations accumulated while re-checking function bodies.
    pub stack: SmallVec<[Location; 4]>,
    pub module: Rc<ModuleMeta>,
}

pub type Result<T> = std::result::Result<T, Box<Diagnostic>>;

impl Diagnostic {
    /// Substitutes `{key}` in the message template. Unknown keys are left in
    /// place so a missing substitution shows up verbatim in the output.
    #[must_use]
    pub fn arg(mut self: Box<Self>, key: &str, value: impl fmt::Display) -> Box<Self> {
        self.message = self.message.replace(&format!("{{{key}}}"), &value.to_string());
        self
    }

    #[must_use]
    pub fn help(mut self: Box<Self>, text: impl Into<String>) -> Box<Self> {
        self.help = Some(text.into());
        self
    }

    #[must_use]
    pub fn help_opt(mut self: Box<Self>, text: Option<String>) -> Box<Self> {
        if let Some(text) = text {
            self.help = Some(text);
        }
        self
    }

    pub fn fail<T>(self: Box<Self>) -> Result<T> {
        Err(self)
    }
}

impl std::error::Error for Diagnostic {}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.module.path.display();
        for previous in &self.stack {
            writeln!(f, "at {path}:{}:{}", previous.line, previous.col)?;
        }

        match &self.loc {
            Some(loc) if loc.is_set() => {
                writeln!(f, "{} at {path}:{}:{}", self.kind, loc.line, loc.col)?;
            }
            _ => writeln!(f, "{} at {path}", self.kind)?,
        }
        writeln!(f, "  [E{:03}] {}", self.code, self.message)?;

        if let Some(preview) = self.preview() {
            writeln!(f)?;
            f.write_str(&preview)?;
        }
        if let Some(help) = &self.help {
            writeln!(f, "  {help}")?;
        }
        Ok(())
    }
}

impl Diagnostic {
    /// Renders the offending source lines with an underline beneath the span.
    fn preview(&self) -> Option<String> {
        let loc = self.loc.as_ref().filter(|loc| loc.is_set())?;
        let lines: Vec<&str> = self.module.source.lines().collect();
        let end_line = if loc.end_line > 0 { loc.end_line } else { loc.line };
        if self.module.source.is_empty() || end_line <= 0 || end_line as usize > lines.len() {
            return None;
        }

        let mut out = String::new();
        let parts = loc.split();
        let count = parts.len();
        for (i, mut line) in parts.into_iter().enumerate() {
            let src: Vec<char> = lines[line.line as usize - 1].chars().collect();
            if line.end_col <= 0 {
                line.end_col = src.len() as i32 + 1;
            }

            let col = (line.col.max(1) as usize - 1).min(src.len());
            let end_col = (line.end_col as usize).min(src.len());
            let start = col.saturating_sub(30);
            let end = (end_col + 30).min(src.len());

            let prefix = if start > 0 { "..." } else { "" };
            let suffix = if end < src.len() { "..." } else { "" };
            let shown: String = src[start..end].iter().collect();
            out.push_str(&format!("{:>5} │   {prefix}{shown}{suffix}\n", line.line));

            let mut underline: Vec<char> = vec!['─'; end_col.saturating_sub(col).max(1)];
            if i == 0 {
                underline[0] = '╰';
            }
            if i == count - 1 {
                if let Some(last) = underline.last_mut() {
                    *last = '╯';
                }
            }
            let underline: String = underline.into_iter().collect();
            out.push_str(&format!(
                "      |   {}{underline}\n",
                " ".repeat(prefix.len() + col - start)
            ));
        }
        Some(out)
    }
}

/// Per-module diagnostic factory. Holds the module (for previews) and the
/// call-site stack pushed around function body re-checks.
#[derive(Debug, Clone)]
pub struct Errors {
    pub module: Rc<ModuleMeta>,
    pub stack: SmallVec<[Location; 4]>,
}

impl Errors {
    pub fn new(module: Rc<ModuleMeta>) -> Self {
        Self { module, stack: SmallVec::new() }
    }

    /// Looks the code up in the catalogue and starts a diagnostic. Message
    /// placeholders are filled via [`Diagnostic::arg`].
    ///
    /// # Panics
    /// Panics on a code missing from `messages.txt`; that is a compiler bug,
    /// not a user error.
    #[must_use]
    pub fn throw(&self, code: u16, loc: Option<Location>) -> Box<Diagnostic> {
        let entry = CATALOGUE
            .get(&code)
            .unwrap_or_else(|| panic!("unknown error code: {code}"));
        Box::new(Diagnostic {
            code,
            kind: entry.kind.to_owned(),
            message: entry.message.to_owned(),
            help: entry.help.map(str::to_owned),
            loc,
            stack: self.stack.clone(),
            module: Rc::clone(&self.module),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_parses_and_contains_core_codes() {
        for code in [1, 101, 502, 543, 602, 603, 703, 704, 705, 801] {
            assert!(CATALOGUE.contains_key(&code), "missing E{code:03}");
        }
        assert_eq!(CATALOGUE[&703].kind, "DimensionError");
        assert!(CATALOGUE[&705].help.is_some());
    }

    #[test]
    fn message_substitution() {
        let errors = Errors::new(ModuleMeta::new("<test>", ""));
        let diag = errors
            .throw(602, None)
            .arg("kind", "dimension")
            .arg("name", "Lenght")
            .help("did you mean 'Length'?");
        assert_eq!(diag.message, "unknown dimension 'Lenght'");
        assert_eq!(diag.help.as_deref(), Some("did you mean 'Length'?"));
    }

    #[test]
    fn preview_underlines_span() {
        let module = ModuleMeta::new("m.nbis", "x = 1 m + 1 s\n");
        let errors = Errors::new(module);
        let diag = errors.throw(703, Some(Location::new(1, 5, 1, 13)));
        let rendered = diag.to_string();
        assert!(rendered.contains("1 │   x = 1 m + 1 s"));
        assert!(rendered.contains("╰"));
    }
}
