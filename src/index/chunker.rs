//! Source parsing into class-overview and method chunks.
//!
//! A lightweight brace-matching scanner over Java-style sources. It is a
//! heuristic, not a grammar: good enough to extract one class-overview
//! chunk per class (signature + fields + method signatures) and one
//! method chunk per method body, which is all the index needs.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::EngineError;
use crate::vector::{
    CHUNK_TYPE_CLASS, CHUNK_TYPE_METHOD, Document, META_CHUNK_TYPE, META_CLASS, META_FILENAME,
    META_METHOD, META_PACKAGE,
};

/// Method bodies shorter than this are skipped (trivial getters).
pub const MIN_METHOD_CHARS: usize = 50;
/// Maximum characters of file content forwarded to the summarizer.
pub const SUMMARY_TRUNCATE_CHARS: usize = 4_000;

static PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(r"(?m)^\s*package\s+([\w.]+)\s*;").unwrap();
    re
});

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(r"(?m)^\s*import\s+(?:static\s+)?([\w.]+)\s*;").unwrap();
    re
});

static CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(
        r"(?m)^[ \t]*(?:(?:public|protected|private|static|final|abstract)\s+)*(?:class|interface|enum)\s+(\w+)[^{;]*\{",
    )
    .unwrap();
    re
});

static METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    let re = Regex::new(
        r"(?m)^[ \t]*(?:(?:public|protected|private|static|final|synchronized|native|default)\s+)+[\w<>\[\],.?\s]*?(\w+)\s*\(([^;{}]*)\)\s*(?:throws\s+[\w.,\s]+)?\{",
    )
    .unwrap();
    re
});

/// A parsed method.
#[derive(Debug, Clone)]
pub struct ParsedMethod {
    /// Method name.
    pub name: String,
    /// Declaration line up to the opening brace.
    pub signature: String,
    /// Full body including braces.
    pub body: String,
}

/// A parsed class, interface, or enum.
#[derive(Debug, Clone)]
pub struct ParsedClass {
    /// Type name.
    pub name: String,
    /// Declaration line up to the opening brace.
    pub signature: String,
    /// Field declaration lines.
    pub fields: Vec<String>,
    /// Methods in declaration order.
    pub methods: Vec<ParsedMethod>,
}

/// A parsed source file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    /// File basename (e.g. `CacheManager.java`).
    pub filename: String,
    /// Declared package, if any.
    pub package: Option<String>,
    /// Fully qualified imports.
    pub imports: Vec<String>,
    /// Top-level types.
    pub classes: Vec<ParsedClass>,
}

impl ParsedFile {
    /// All method names across every class.
    #[must_use]
    pub fn method_names(&self) -> Vec<&str> {
        self.classes
            .iter()
            .flat_map(|c| c.methods.iter().map(|m| m.name.as_str()))
            .collect()
    }
}

/// Parses Java-style source content.
///
/// # Errors
///
/// Returns [`EngineError::Parse`] when no type declaration is found;
/// callers skip such files with a debug record.
pub fn parse_source(filename: &str, content: &str) -> Result<ParsedFile, EngineError> {
    let package = PACKAGE_RE
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    let imports: Vec<String> = IMPORT_RE
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect();

    let mut classes = Vec::new();
    for cap in CLASS_RE.captures_iter(content) {
        let Some(whole) = cap.get(0) else { continue };
        let Some(name) = cap.get(1) else { continue };
        let open = whole.end() - 1;
        let Some(close) = matching_brace(content, open) else {
            continue;
        };
        let body = &content[open + 1..close];
        let signature = whole.as_str().trim_end_matches('{').trim().to_string();
        classes.push(ParsedClass {
            name: name.as_str().to_string(),
            signature,
            fields: extract_fields(body),
            methods: extract_methods(body),
        });
    }

    if classes.is_empty() {
        return Err(EngineError::Parse {
            path: filename.to_string(),
            message: "no type declaration found".to_string(),
        });
    }

    Ok(ParsedFile {
        filename: filename.to_string(),
        package,
        imports,
        classes,
    })
}

/// Builds index documents for a parsed file: one class-overview chunk per
/// class and one method chunk per method with a body of at least
/// [`MIN_METHOD_CHARS`].
#[must_use]
pub fn chunk_documents(parsed: &ParsedFile) -> Vec<Document> {
    let mut docs = Vec::new();
    let package = parsed.package.clone().unwrap_or_default();

    for class in &parsed.classes {
        let mut overview = String::with_capacity(256);
        overview.push_str(&class.signature);
        overview.push('\n');
        for field in &class.fields {
            overview.push_str("  ");
            overview.push_str(field);
            overview.push('\n');
        }
        for method in &class.methods {
            overview.push_str("  ");
            overview.push_str(&method.signature);
            overview.push('\n');
        }
        docs.push(Document::new(
            overview,
            [
                (META_FILENAME, parsed.filename.as_str()),
                (META_CHUNK_TYPE, CHUNK_TYPE_CLASS),
                (META_CLASS, class.name.as_str()),
                (META_PACKAGE, package.as_str()),
            ],
        ));

        for method in &class.methods {
            if method.body.len() < MIN_METHOD_CHARS {
                continue;
            }
            let text = format!("{}\n{}", method.signature, method.body);
            docs.push(Document::new(
                text,
                [
                    (META_FILENAME, parsed.filename.as_str()),
                    (META_CHUNK_TYPE, CHUNK_TYPE_METHOD),
                    (META_CLASS, class.name.as_str()),
                    (META_METHOD, method.name.as_str()),
                    (META_PACKAGE, package.as_str()),
                ],
            ));
        }
    }
    docs
}

/// Truncates file content for the summarizer at [`SUMMARY_TRUNCATE_CHARS`],
/// preferring a close-brace boundary so the tail is not mid-statement.
#[must_use]
pub fn truncate_for_summary(content: &str) -> &str {
    if content.len() <= SUMMARY_TRUNCATE_CHARS {
        return content;
    }
    let mut cut = SUMMARY_TRUNCATE_CHARS;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    let window = &content[..cut];
    window
        .rfind('}')
        .map_or(window, |idx| &window[..=idx])
}

/// Finds the matching close brace for the open brace at `open`.
///
/// Skips string/char literals and comments so literal braces in those do
/// not unbalance the scan.
fn matching_brace(content: &str, open: usize) -> Option<usize> {
    let bytes = content.as_bytes();
    if bytes.get(open) != Some(&b'{') {
        return None;
    }
    let mut depth: usize = 0;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            b'"' | b'\'' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn extract_methods(class_body: &str) -> Vec<ParsedMethod> {
    let mut methods = Vec::new();
    for cap in METHOD_RE.captures_iter(class_body) {
        let Some(whole) = cap.get(0) else { continue };
        let Some(name) = cap.get(1) else { continue };
        // Constructor-style control keywords slip through the regex.
        if matches!(name.as_str(), "if" | "for" | "while" | "switch" | "catch") {
            continue;
        }
        let open = whole.end() - 1;
        let Some(close) = matching_brace(class_body, open) else {
            continue;
        };
        methods.push(ParsedMethod {
            name: name.as_str().to_string(),
            signature: whole.as_str().trim_end_matches('{').trim().to_string(),
            body: class_body[open..=close].to_string(),
        });
    }
    methods
}

fn extract_fields(class_body: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut depth: usize = 0;
    for line in class_body.lines() {
        let trimmed = line.trim();
        let at_top = depth == 0;
        depth = depth
            .saturating_add(line.matches('{').count())
            .saturating_sub(line.matches('}').count());
        if at_top
            && trimmed.ends_with(';')
            && !trimmed.contains('(')
            && !trimmed.starts_with("import ")
            && !trimmed.starts_with("package ")
            && !trimmed.starts_with("//")
            && trimmed.split_whitespace().count() >= 2
        {
            fields.push(trimmed.to_string());
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"package com.example.cache;

import com.example.util.Clock;
import java.util.Map;

public class CacheManager {
    private final Map<String, String> entries;
    private int capacity;

    public CacheManager(int capacity) {
        this.capacity = capacity;
        this.entries = new java.util.HashMap<>();
    }

    public String lookup(String key) {
        if (entries.containsKey(key)) {
            return entries.get(key);
        }
        return null;
    }

    public int size() { return 0; }
}
"#;

    #[test]
    fn test_parse_package_and_imports() {
        let parsed = parse_source("CacheManager.java", SAMPLE)
            .unwrap_or_else(|e| unreachable!("parse: {e}"));
        assert_eq!(parsed.package.as_deref(), Some("com.example.cache"));
        assert_eq!(
            parsed.imports,
            vec!["com.example.util.Clock", "java.util.Map"]
        );
    }

    #[test]
    fn test_parse_class_and_methods() {
        let parsed = parse_source("CacheManager.java", SAMPLE)
            .unwrap_or_else(|e| unreachable!("parse: {e}"));
        assert_eq!(parsed.classes.len(), 1);
        let class = &parsed.classes[0];
        assert_eq!(class.name, "CacheManager");
        assert_eq!(class.fields.len(), 2);
        let names: Vec<&str> = class.methods.iter().map(|m| m.name.as_str()).collect();
        assert!(names.contains(&"CacheManager"));
        assert!(names.contains(&"lookup"));
        assert!(names.contains(&"size"));
    }

    #[test]
    fn test_overview_contains_every_method_signature() {
        let parsed = parse_source("CacheManager.java", SAMPLE)
            .unwrap_or_else(|e| unreachable!("parse: {e}"));
        let docs = chunk_documents(&parsed);
        let overview = docs
            .iter()
            .find(|d| d.meta(META_CHUNK_TYPE) == Some(CHUNK_TYPE_CLASS))
            .map(|d| d.text.clone())
            .unwrap_or_default();
        for method in &parsed.classes[0].methods {
            assert!(
                overview.contains(&method.signature),
                "overview missing {}",
                method.name
            );
        }
    }

    #[test]
    fn test_short_method_bodies_skipped() {
        let parsed = parse_source("CacheManager.java", SAMPLE)
            .unwrap_or_else(|e| unreachable!("parse: {e}"));
        let docs = chunk_documents(&parsed);
        let method_chunks: Vec<&Document> = docs
            .iter()
            .filter(|d| d.meta(META_CHUNK_TYPE) == Some(CHUNK_TYPE_METHOD))
            .collect();
        // `size()` has a tiny body and is skipped.
        assert!(
            method_chunks
                .iter()
                .all(|d| d.meta(META_METHOD) != Some("size"))
        );
        assert!(
            method_chunks
                .iter()
                .any(|d| d.meta(META_METHOD) == Some("lookup"))
        );
    }

    #[test]
    fn test_parse_failure_on_non_source() {
        let result = parse_source("README.md", "# Not java at all");
        assert!(result.is_err());
    }

    #[test]
    fn test_braces_in_strings_do_not_unbalance() {
        let source = r#"
public class Weird {
    public String render() {
        String template = "{ \"key\": \"}{value}\" }";
        // a comment with a brace }
        return template;
    }
}
"#;
        let parsed =
            parse_source("Weird.java", source).unwrap_or_else(|e| unreachable!("parse: {e}"));
        assert_eq!(parsed.classes[0].methods.len(), 1);
        assert!(parsed.classes[0].methods[0].body.contains("template"));
    }

    #[test]
    fn test_truncate_short_content_untouched() {
        assert_eq!(truncate_for_summary("short"), "short");
    }

    #[test]
    fn test_truncate_prefers_close_brace() {
        let mut content = String::new();
        for _ in 0..200 {
            content.push_str("void m() { body(); }\n");
        }
        let truncated = truncate_for_summary(&content);
        assert!(truncated.len() <= SUMMARY_TRUNCATE_CHARS);
        assert!(truncated.ends_with('}'));
    }
}
