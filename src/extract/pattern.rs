//! Regex + brace-matching extractor
//!
//! Each language has a small table of declaration patterns. A match gives the
//! symbol's name, kind and start line; the end line is found separately by
//! scanning the body:
//! - brace languages: balance `{`/`}` from the declared name onward
//! - Python: offside rule, the block ends before the next line indented at
//!   or left of the declaration
//!
//! Declarations without a body are under-extracted on purpose.

use super::{finalize, ExtractorId, SymbolExtractor};
use crate::symbol::{ExtractedSymbol, SymbolKind};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;

/// Longest signature kept from a match, in characters.
const MAX_SIGNATURE_CHARS: usize = 100;

/// Languages that get no symbols at all.
const NON_CODE_LANGUAGES: &[&str] = &["text", "json", "yaml", "toml", "markdown"];

/// Rule table used for code languages without their own table.
const FALLBACK_RULES: &str = "javascript";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyStyle {
    Braces,
    Indentation,
}

struct Rule {
    pattern: Regex,
    kind: SymbolKind,
}

struct LanguageRules {
    body: BodyStyle,
    rules: Vec<Rule>,
}

impl LanguageRules {
    fn new(body: BodyStyle, specs: &[(&str, SymbolKind)]) -> Self {
        let rules = specs
            .iter()
            .filter_map(|(pattern, kind)| match Regex::new(pattern) {
                Ok(pattern) => Some(Rule { pattern, kind: *kind }),
                Err(e) => {
                    tracing::warn!("Skipping malformed extractor pattern {}: {}", pattern, e);
                    None
                }
            })
            .collect();
        Self { body, rules }
    }
}

fn default_rules() -> HashMap<&'static str, LanguageRules> {
    use BodyStyle::*;
    use SymbolKind::*;

    let mut table = HashMap::new();
    table.insert(
        "c",
        LanguageRules::new(Braces, &[
            (r"(?m)^[\s\w\*]+\s+(\w+)\s*\([^)]*\)\s*\{", Function),
            (r"\btypedef\s+struct\s+(\w+)", Struct),
            (r"\bstruct\s+(\w+)\s*\{", Struct),
        ]),
    );
    table.insert(
        "cpp",
        LanguageRules::new(Braces, &[
            (r"(?m)^[\w\s\*&:<>,]+\s+(\w+)\s*\([^)]*\)\s*(?:const\s*)?\{", Function),
            (r"\bclass\s+(\w+)", Class),
            (r"\bstruct\s+(\w+)", Struct),
            (r"\benum\s+(?:class\s+)?(\w+)", Enum),
        ]),
    );
    table.insert(
        "python",
        LanguageRules::new(Indentation, &[
            (r"(?m)^[ \t]*(?:async[ \t]+)?def[ \t]+(\w+)[ \t]*\(", Function),
            (r"(?m)^[ \t]*class[ \t]+(\w+)", Class),
        ]),
    );
    table.insert(
        "javascript",
        LanguageRules::new(Braces, &[
            (r"\bfunction\s*\*?\s+(\w+)\s*\(", Function),
            (r"\b(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s+)?\([^)]*\)\s*=>", Function),
            (r"(\w+)\s*\([^)]*\)\s*\{", Function),
            (r"\bclass\s+(\w+)", Class),
        ]),
    );
    table.insert(
        "typescript",
        LanguageRules::new(Braces, &[
            (r"\bfunction\s*\*?\s+(\w+)\s*[<(]", Function),
            (r"\b(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s+)?\([^)]*\)\s*(?::|=>)", Function),
            (r"(\w+)\s*\([^)]*\)\s*[:{]", Function),
            (r"\binterface\s+(\w+)", Interface),
            (r"\bclass\s+(\w+)", Class),
            (r"\btype\s+(\w+)\s*(?:<[^>]*>)?\s*=", Type),
            (r"\benum\s+(\w+)", Enum),
        ]),
    );
    table.insert(
        "rust",
        LanguageRules::new(Braces, &[
            (r"\bfn\s+(\w+)\s*[<(]", Function),
            (r"\bstruct\s+(\w+)", Struct),
            (r"\benum\s+(\w+)", Enum),
            (r"\btrait\s+(\w+)", Interface),
            (r"\btype\s+(\w+)\s*(?:<[^>]*>)?\s*=", Type),
        ]),
    );
    table.insert(
        "go",
        LanguageRules::new(Braces, &[
            (r"\bfunc\s+(?:\(\w+\s+\*?\w+\)\s+)?(\w+)\s*[\[(]", Function),
            (r"\btype\s+(\w+)\s+interface\b", Interface),
            (r"\btype\s+(\w+)\s+struct\b", Struct),
        ]),
    );
    table.insert(
        "java",
        LanguageRules::new(Braces, &[
            (r"\b(?:public\s+)?class\s+(\w+)", Class),
            (r"\binterface\s+(\w+)", Interface),
            (r"\benum\s+(\w+)", Enum),
            (r"(?:public|private|protected)?\s*(?:static\s+)?\w+\s+(\w+)\s*\(", Function),
        ]),
    );
    table
}

/// Regex-based, brace-matching symbol extractor.
pub struct RegexExtractor {
    languages: HashMap<&'static str, LanguageRules>,
}

impl Default for RegexExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl RegexExtractor {
    pub const ID: ExtractorId = ExtractorId::new("regex", 1);

    pub fn new() -> Self {
        Self {
            languages: default_rules(),
        }
    }

    /// Whether this extractor has anything to say about `language`.
    pub fn supports(&self, language: &str) -> bool {
        !NON_CODE_LANGUAGES.contains(&language)
    }

    fn rules_for(&self, language: &str) -> Option<&LanguageRules> {
        if !self.supports(language) {
            return None;
        }
        self.languages
            .get(language)
            .or_else(|| self.languages.get(FALLBACK_RULES))
    }

    /// Raw matches, one per rule hit, in rule order.
    pub fn extract_symbols(&self, content: &str, language: &str) -> Vec<ExtractedSymbol> {
        let Some(table) = self.rules_for(language) else {
            return Vec::new();
        };

        let lines: Vec<&str> = content.split('\n').collect();
        let line_starts = line_offsets(content);
        let mut symbols = Vec::new();

        for rule in &table.rules {
            for caps in rule.pattern.captures_iter(content) {
                let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };

                let start_line = line_of(&line_starts, name.start());
                let start_col = name.start() - line_starts[start_line - 1];
                let end_line = match table.body {
                    BodyStyle::Braces => brace_block_end(&lines, start_line, start_col),
                    BodyStyle::Indentation => indented_block_end(&lines, start_line),
                };

                symbols.push(
                    ExtractedSymbol::new(name.as_str(), rule.kind, start_line, end_line)
                        .with_signature(signature_of(whole.as_str())),
                );
            }
        }

        symbols
    }

    /// Extract and post-filter synchronously.
    pub fn extract_now(&self, content: &str, language: &str) -> Vec<ExtractedSymbol> {
        finalize(self.extract_symbols(content, language), content)
    }
}

#[async_trait]
impl SymbolExtractor for RegexExtractor {
    fn id(&self) -> ExtractorId {
        Self::ID
    }

    async fn extract_raw(&self, content: &str, language: &str) -> Vec<ExtractedSymbol> {
        self.extract_symbols(content, language)
    }
}

/// Byte offset at which each line starts.
fn line_offsets(content: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(content.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

/// 1-indexed line containing byte offset `pos`.
fn line_of(line_starts: &[usize], pos: usize) -> usize {
    line_starts.partition_point(|&start| start <= pos)
}

fn signature_of(matched: &str) -> String {
    let trimmed = matched.trim().trim_end_matches('{').trim_end();
    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_SIGNATURE_CHARS).collect()
}

/// Brace scan state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BraceScan {
    /// No `{` seen yet; `nesting` counts open `(` and `[`
    Unseen { nesting: usize },
    /// Inside a body at this depth (> 0)
    Open(usize),
}

/// End line of the block declared at `start_line` (1-indexed), scanning from
/// byte column `start_col` of that line.
///
/// Counting starts at the first `{` after the declaration; the end is the
/// line where the depth first returns to zero. A `;` before any brace and
/// outside `(`/`[` marks a bodiless declaration ending on that line. No brace
/// at all gives a single-line range; an unbalanced body runs to the last line.
pub(crate) fn brace_block_end(lines: &[&str], start_line: usize, start_col: usize) -> usize {
    let mut state = BraceScan::Unseen { nesting: 0 };
    let first = start_line.saturating_sub(1);

    for (idx, line) in lines.iter().enumerate().skip(first) {
        let rest = if idx == first { line.get(start_col..).unwrap_or("") } else { line };
        for ch in rest.chars() {
            state = match (state, ch) {
                (BraceScan::Unseen { .. }, '{') => BraceScan::Open(1),
                (BraceScan::Unseen { nesting: 0 }, ';') => return idx + 1,
                (BraceScan::Unseen { nesting }, '(' | '[') => BraceScan::Unseen { nesting: nesting + 1 },
                (BraceScan::Unseen { nesting }, ')' | ']') => BraceScan::Unseen {
                    nesting: nesting.saturating_sub(1),
                },
                (BraceScan::Open(depth), '{') => BraceScan::Open(depth + 1),
                (BraceScan::Open(1), '}') => return idx + 1,
                (BraceScan::Open(depth), '}') => BraceScan::Open(depth - 1),
                (state, _) => state,
            };
        }
    }

    match state {
        BraceScan::Unseen { .. } => start_line,
        BraceScan::Open(_) => lines.len().max(start_line),
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// End line of an indentation block starting at `start_line` (1-indexed).
///
/// Trailing blank lines are not part of the block.
pub(crate) fn indented_block_end(lines: &[&str], start_line: usize) -> usize {
    let Some(first) = lines.get(start_line.saturating_sub(1)) else {
        return start_line;
    };
    let base = indent_of(first);
    let mut end = start_line;

    for (idx, line) in lines.iter().enumerate().skip(start_line) {
        if line.trim().is_empty() {
            continue;
        }
        if indent_of(line) <= base {
            break;
        }
        end = idx + 1;
    }

    end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(content: &str, language: &str) -> Vec<ExtractedSymbol> {
        RegexExtractor::new().extract_now(content, language)
    }

    fn find<'a>(symbols: &'a [ExtractedSymbol], name: &str) -> &'a ExtractedSymbol {
        symbols
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("symbol {} not extracted: {:?}", name, symbols))
    }

    #[test]
    fn test_brace_matching_single_line() {
        let symbols = extract("func f() { if (x) { } }", "go");
        let f = find(&symbols, "f");
        assert_eq!((f.start_line, f.end_line), (1, 1));
    }

    #[test]
    fn test_brace_matching_skips_inner_close() {
        let content = "func f() {\n    if (x) {\n    }\n}\n";
        let symbols = extract(content, "go");
        let f = find(&symbols, "f");
        assert_eq!(f.start_line, 1);
        assert_eq!(f.end_line, 4);
    }

    #[test]
    fn test_python_two_one_liners() {
        let symbols = extract("def foo(): pass\ndef bar(): pass", "python");
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "foo");
        assert_eq!(symbols[1].name, "bar");
        for s in &symbols {
            assert_eq!(s.kind, SymbolKind::Function);
            assert_eq!(s.start_line, s.end_line);
        }
        assert_eq!(symbols[0].start_line, 1);
        assert_eq!(symbols[1].start_line, 2);
    }

    #[test]
    fn test_python_class_with_methods() {
        let content = "class Greeter:\n    def hello(self):\n        return 1\n\n    async def bye(self):\n        pass\n\n\ndef main():\n    Greeter()\n";
        let symbols = extract(content, "python");

        let class = find(&symbols, "Greeter");
        assert_eq!(class.kind, SymbolKind::Class);
        assert_eq!((class.start_line, class.end_line), (1, 6));

        let hello = find(&symbols, "hello");
        assert_eq!(hello.kind, SymbolKind::Method);
        assert_eq!(hello.parent.as_deref(), Some("Greeter"));
        assert_eq!((hello.start_line, hello.end_line), (2, 3));

        let bye = find(&symbols, "bye");
        assert_eq!(bye.kind, SymbolKind::Method);

        let main = find(&symbols, "main");
        assert_eq!(main.kind, SymbolKind::Function);
        assert_eq!((main.start_line, main.end_line), (9, 10));
    }

    #[test]
    fn test_rust_kinds() {
        let content = "pub struct Point {\n    x: i32,\n}\n\npub enum Shape {\n    Dot,\n}\n\npub trait Draw {\n    fn draw(&self);\n}\n\nfn render<T: Draw>(item: T) {\n    item.draw();\n}\n";
        let symbols = extract(content, "rust");

        assert_eq!(find(&symbols, "Point").kind, SymbolKind::Struct);
        assert_eq!(find(&symbols, "Shape").kind, SymbolKind::Enum);
        let draw_trait = find(&symbols, "Draw");
        assert_eq!(draw_trait.kind, SymbolKind::Interface);
        assert_eq!((draw_trait.start_line, draw_trait.end_line), (9, 11));

        let render = find(&symbols, "render");
        assert_eq!((render.start_line, render.end_line), (13, 15));

        // bodiless trait method ends at its semicolon
        let draw = find(&symbols, "draw");
        assert_eq!((draw.start_line, draw.end_line), (10, 10));
    }

    #[test]
    fn test_javascript_control_flow_is_not_a_symbol() {
        let content = "function run(items) {\n  for (const i of items) {\n    if (i) {\n      log(i);\n    }\n  }\n}\n";
        let symbols = extract(content, "javascript");
        let names: Vec<_> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"run"));
        assert!(!names.contains(&"for"));
        assert!(!names.contains(&"if"));

        // `function run(` and the method rule both hit line 1; only one survives
        assert_eq!(names.iter().filter(|n| **n == "run").count(), 1);
        assert_eq!(find(&symbols, "run").end_line, 7);
    }

    #[test]
    fn test_typescript_types() {
        let content = "interface Props {\n  id: number;\n}\n\ntype Id = string;\n\nexport class Widget {\n  render(): void {\n  }\n}\n";
        let symbols = extract(content, "typescript");
        assert_eq!(find(&symbols, "Props").kind, SymbolKind::Interface);

        let id = find(&symbols, "Id");
        assert_eq!(id.kind, SymbolKind::Type);
        assert_eq!((id.start_line, id.end_line), (5, 5));

        let render = find(&symbols, "render");
        assert_eq!(render.kind, SymbolKind::Method);
        assert_eq!(render.parent.as_deref(), Some("Widget"));
    }

    #[test]
    fn test_unknown_code_language_uses_fallback_rules() {
        let symbols = extract("function greet() {\n}\n", "kotlin");
        assert_eq!(find(&symbols, "greet").end_line, 2);
    }

    #[test]
    fn test_non_code_language_yields_nothing() {
        assert!(extract("function greet() {}", "markdown").is_empty());
        assert!(extract("{\"a\": 1}", "json").is_empty());
    }

    #[test]
    fn test_signature_is_trimmed_and_bounded() {
        let long_args = (0..60).map(|i| format!("a{}", i)).collect::<Vec<_>>().join(", ");
        let content = format!("function wide({}) {{\n}}\n", long_args);
        let symbols = extract(&content, "javascript");
        let sig = find(&symbols, "wide").signature.clone().unwrap();
        assert!(sig.starts_with("function wide("));
        assert!(sig.chars().count() <= MAX_SIGNATURE_CHARS);
    }

    #[test]
    fn test_ranges_stay_within_file() {
        let content = "class Open {\n  method() {\n";
        let symbols = extract(content, "javascript");
        let line_count = content.split('\n').count();
        for s in &symbols {
            assert!(s.start_line <= s.end_line);
            assert!(s.end_line <= line_count);
        }
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let content = "struct A {\n};\nint main(void) {\n  return 0;\n}\n";
        assert_eq!(extract(content, "c"), extract(content, "c"));
    }

    #[test]
    fn test_brace_scan_states() {
        let lines = vec!["x", "y {", "}"];
        assert_eq!(brace_block_end(&lines, 1, 0), 3);
        assert_eq!(brace_block_end(&["no braces here"], 1, 0), 1);
        assert_eq!(brace_block_end(&["} stray {", "}"], 1, 0), 2);
        // scanning starts at the declaration, not the line start
        assert_eq!(brace_block_end(&["a; f() {", "}"], 1, 3), 2);
        assert_eq!(brace_block_end(&["a; f();"], 1, 3), 1);
    }

    #[test]
    fn test_semicolon_in_array_type_is_not_a_body_end() {
        let content = "fn digest() -> [u8; 32] {\n    let x = 1;\n    [0; 32]\n}\n";
        let symbols = extract(content, "rust");
        let digest = find(&symbols, "digest");
        assert_eq!((digest.start_line, digest.end_line), (1, 4));
    }

    #[test]
    fn test_semicolon_earlier_on_line_is_ignored() {
        let content = "let a = 1; function later(x) {\n  return x;\n}\n";
        let symbols = extract(content, "javascript");
        assert_eq!(find(&symbols, "later").end_line, 3);
    }

    #[test]
    fn test_default_argument_with_semicolon_in_parens() {
        let content = "function pick(x = (a, b)) {\n  for (;;) { break; }\n}\n";
        let symbols = extract(content, "javascript");
        assert_eq!(find(&symbols, "pick").end_line, 3);
    }
}
