//! Language detection and line utilities
//!
//! The extension table decides both which remote files are worth indexing
//! and which extractor rule set applies to them.

/// Extensions the sync engine indexes. Everything else in the remote tree is ignored.
pub const INDEXABLE_EXTENSIONS: &[&str] = &[
    "c", "cpp", "cc", "cxx", "h", "hpp",
    "py", "js", "jsx", "ts", "tsx",
    "rs", "go", "java", "kt", "cs",
    "php", "rb", "swift", "scala", "sh",
];

/// Language tag assigned to files with an unknown extension.
pub const FALLBACK_LANGUAGE: &str = "text";

fn extension(path: &str) -> Option<&str> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// Whether a remote path should be indexed, judged by extension only.
pub fn is_indexable(path: &str) -> bool {
    extension(path)
        .map(|ext| INDEXABLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Map a path to its language tag via the fixed extension table.
pub fn detect_language(path: &str) -> &'static str {
    let Some(ext) = extension(path) else {
        return FALLBACK_LANGUAGE;
    };
    match ext.to_ascii_lowercase().as_str() {
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "kt" => "kotlin",
        "cs" => "csharp",
        "php" => "php",
        "rb" => "ruby",
        "swift" => "swift",
        "scala" => "scala",
        "sh" => "bash",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "md" => "markdown",
        _ => FALLBACK_LANGUAGE,
    }
}

/// Number of newline-separated lines. An empty string counts as one line.
pub fn count_lines(content: &str) -> usize {
    content.split('\n').count()
}

/// Lines `start..=end` (1-indexed, inclusive), clamped to the content.
pub fn extract_line_range(content: &str, start: usize, end: usize) -> String {
    let start = start.max(1);
    if end < start {
        return String::new();
    }
    content
        .split('\n')
        .skip(start - 1)
        .take(end - start + 1)
        .collect::<Vec<_>>()
        .join("\n")
}
