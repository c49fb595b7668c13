//! Plugin manifest parsing.
//!
//! The manifest is a small INI-like file:
//!
//! ```text
//! [global]
//! verbose=0      # silence informational output
//!
//! [module]
//! first.dll
//! second.dll
//! ```
//!
//! Parsing never fails. Lines that are not understood produce a
//! [`Diagnostic`] and parsing carries on, so a hand-edited manifest with a
//! typo still loads every module it does name correctly.

use std::fmt;

use crate::config::MANIFEST_FILE_NAME;

/// Parsed manifest contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Whether informational console lines are printed.
    pub verbose: bool,

    /// Plugin file names in declaration order, duplicates preserved.
    pub modules: Vec<String>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            verbose: true,
            modules: Vec::new(),
        }
    }
}

impl Manifest {
    /// Manifest synthesized from a directory scan.
    pub fn from_modules(modules: Vec<String>) -> Self {
        Self {
            modules,
            ..Self::default()
        }
    }
}

/// Section currently being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Global,
    Module,
}

/// What was wrong with a manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    UnknownSection(String),
    UnknownProperty(String),
}

/// Non-fatal manifest problem, tied to a 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// File name the line belongs to, as shown to the user.
    pub file: String,
    pub line: usize,
    pub kind: DiagnosticKind,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}): - ", self.file, self.line)?;
        match &self.kind {
            DiagnosticKind::UnknownSection(name) => write!(f, "unknown section {}", name),
            DiagnosticKind::UnknownProperty(name) => write!(f, "unknown property {}", name),
        }
    }
}

/// Transient parser state.
struct ParseState<'a> {
    file: &'a str,
    section: Section,
    line: usize,
    manifest: Manifest,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> ParseState<'a> {
    fn new(file: &'a str) -> Self {
        Self {
            file,
            section: Section::Global,
            line: 0,
            manifest: Manifest::default(),
            diagnostics: Vec::new(),
        }
    }

    fn report(&mut self, kind: DiagnosticKind) {
        tracing::debug!(line = self.line, ?kind, "manifest diagnostic");
        self.diagnostics.push(Diagnostic {
            file: self.file.to_string(),
            line: self.line,
            kind,
        });
    }

    fn feed(&mut self, raw: &str) {
        self.line += 1;

        let line = strip_comment(raw).trim();
        if line.is_empty() {
            return;
        }

        if let Some(header) = line.strip_prefix('[') {
            let name = header.split(']').next().unwrap_or(header);
            match name {
                "module" => self.section = Section::Module,
                "global" => self.section = Section::Global,
                other => self.report(DiagnosticKind::UnknownSection(other.to_string())),
            }
            return;
        }

        match line.split_once('=') {
            Some((name, value)) => self.property(name.trim_end(), value.trim_start()),
            None if self.section == Section::Module => {
                self.manifest.modules.push(line.to_string());
            }
            None => self.report(DiagnosticKind::UnknownProperty(line.to_string())),
        }
    }

    fn property(&mut self, name: &str, value: &str) {
        match (self.section, name) {
            (Section::Global, "verbose") => self.manifest.verbose = parse_flag(value),
            _ => self.report(DiagnosticKind::UnknownProperty(name.to_string())),
        }
    }
}

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or(line)
}

/// Numeric truthiness: non-zero is `true`, zero, empty or non-numeric is
/// `false`. Decimal, float, `Infinity` and `0x`/`0o`/`0b` literals count as
/// numeric.
fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() {
        return false;
    }
    if let Some(nonzero) = radix_literal(value) {
        return nonzero;
    }
    if let Ok(n) = value.parse::<i64>() {
        return n != 0;
    }
    match value.parse::<f64>() {
        Ok(n) => n != 0.0 && !n.is_nan(),
        Err(_) => false,
    }
}

/// Whether a prefixed integer literal is non-zero, or `None` when `value` is
/// not one. Unsigned only, any length.
fn radix_literal(value: &str) -> Option<bool> {
    let radix = match value.get(..2)? {
        "0x" | "0X" => 16,
        "0o" | "0O" => 8,
        "0b" | "0B" => 2,
        _ => return None,
    };
    let digits = &value[2..];
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Some(false);
    }
    Some(digits.chars().any(|c| c != '0'))
}

/// Parse manifest text into a [`Manifest`] and the diagnostics collected on
/// the way. Diagnostics name the default manifest file.
pub fn parse(text: &str) -> (Manifest, Vec<Diagnostic>) {
    parse_named(MANIFEST_FILE_NAME, text)
}

/// Like [`parse`], with diagnostics attributed to `file`.
pub fn parse_named(file: &str, text: &str) -> (Manifest, Vec<Diagnostic>) {
    let mut state = ParseState::new(file);
    for line in text.lines() {
        state.feed(line);
    }
    (state.manifest, state.diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn verbose_of(value: &str) -> bool {
        parse(&format!("[global]\nverbose={}\n", value)).0.verbose
    }

    #[test]
    fn test_empty_text() {
        let (manifest, diags) = parse("");
        assert!(manifest.verbose);
        assert!(manifest.modules.is_empty());
        assert!(diags.is_empty());
    }

    #[test]
    fn test_module_section() {
        let (manifest, diags) = parse("[module]\na.dll\nb.dll\na.dll\n");
        assert_eq!(manifest.modules, vec!["a.dll", "b.dll", "a.dll"]);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_verbose_values() {
        assert!(!verbose_of("0"));
        assert!(verbose_of("1"));
        assert!(verbose_of("42"));
        assert!(verbose_of("-3"));
        assert!(verbose_of("1.5"));
        assert!(!verbose_of("0.0"));
    }

    #[test]
    fn test_verbose_malformed_is_false() {
        assert!(!verbose_of("yes"));
        assert!(!verbose_of("1x"));
        assert!(!verbose_of(""));
        assert!(!verbose_of("NaN"));
        assert!(!verbose_of("0x"));
        assert!(!verbose_of("0xZZ"));
        assert!(!verbose_of("0x-1"));
    }

    #[test]
    fn test_verbose_prefixed_and_infinite() {
        assert!(verbose_of("0x10"));
        assert!(verbose_of("0XfF"));
        assert!(!verbose_of("0x0"));
        assert!(!verbose_of("0x0000"));
        assert!(verbose_of("0o7"));
        assert!(verbose_of("0b1"));
        assert!(!verbose_of("0b00"));
        assert!(verbose_of("0x1ffffffffffffffffffffffff"));
        assert!(verbose_of("Infinity"));
        assert!(verbose_of("-Infinity"));
    }

    #[test]
    fn test_verbose_spacing() {
        let (manifest, diags) = parse("[global]\nverbose   =   0\n");
        assert!(!manifest.verbose);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_unterminated_section_header() {
        let (manifest, diags) = parse("[module\nx.dll\n");
        assert_eq!(manifest.modules, vec!["x.dll"]);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_section_trailing_text_ignored() {
        let (manifest, _) = parse("[module] trailing\nx.dll\n");
        assert_eq!(manifest.modules, vec!["x.dll"]);
    }

    #[test]
    fn test_unknown_section_keeps_mode() {
        let (manifest, diags) = parse("[module]\na.dll\n[plugins]\nb.dll\n");
        assert_eq!(manifest.modules, vec!["a.dll", "b.dll"]);
        assert_eq!(
            diags,
            vec![Diagnostic {
                file: MANIFEST_FILE_NAME.into(),
                line: 3,
                kind: DiagnosticKind::UnknownSection("plugins".into()),
            }]
        );
    }

    #[test]
    fn test_comments_skipped() {
        let text = "# full comment\n[module]\n   # indented comment\na.dll # trailing\n#b.dll\n";
        let (manifest, diags) = parse(text);
        assert_eq!(manifest.modules, vec!["a.dll"]);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_bare_entry_outside_module_section() {
        let (manifest, diags) = parse("stray.dll\n");
        assert!(manifest.modules.is_empty());
        assert_eq!(diags[0].kind, DiagnosticKind::UnknownProperty("stray.dll".into()));
        assert_eq!(diags[0].line, 1);
    }

    #[test]
    fn test_unknown_properties() {
        let text = "[global]\ncolor=1\n[module]\nverbose=0\na.dll\n";
        let (manifest, diags) = parse(text);
        assert!(manifest.verbose);
        assert_eq!(manifest.modules, vec!["a.dll"]);
        let names: Vec<_> = diags.iter().map(|d| (d.line, d.kind.clone())).collect();
        assert_eq!(
            names,
            vec![
                (2, DiagnosticKind::UnknownProperty("color".into())),
                (4, DiagnosticKind::UnknownProperty("verbose".into())),
            ]
        );
    }

    #[test]
    fn test_line_numbers_count_blank_lines() {
        let (_, diags) = parse("\n\n[bogus]\n");
        assert_eq!(diags[0].line, 3);
    }

    #[test]
    fn test_crlf_line_endings() {
        let (manifest, _) = parse("[module]\r\na.dll\r\nb.dll\r\n");
        assert_eq!(manifest.modules, vec!["a.dll", "b.dll"]);
    }

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic {
            file: MANIFEST_FILE_NAME.into(),
            line: 7,
            kind: DiagnosticKind::UnknownSection("foo".into()),
        };
        assert_eq!(diag.to_string(), "eminus.ini(7): - unknown section foo");
    }

    #[test]
    fn test_diagnostics_name_the_given_file() {
        let (_, diags) = parse_named("plugins.ini", "[global]\ncolor=1\n");
        assert_eq!(diags[0].file, "plugins.ini");
        assert_eq!(diags[0].to_string(), "plugins.ini(2): - unknown property color");
    }

    proptest! {
        #[test]
        fn prop_module_list_round_trip(
            modules in prop::collection::vec("[A-Za-z0-9_][A-Za-z0-9_.-]{0,12}\\.dll", 0..12)
        ) {
            let mut text = String::from("[module]\n");
            for module in &modules {
                text.push_str(module);
                text.push('\n');
            }
            let (manifest, diags) = parse(&text);
            prop_assert_eq!(manifest.modules, modules);
            prop_assert!(diags.is_empty());
        }
    }
}
