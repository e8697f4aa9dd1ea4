//! Rewrites data-access table references in application source to the
//! namespaced form.
//!
//! A reference is a whole quoted token whose body is a known table name, with
//! zero or more copies of the prefix in front. Inside a call to a recognized
//! accessor (`from("tasks")`), the token is normalized to exactly one prefix.
//! Anywhere else a bare table name is reported as ambiguous and left alone.
//! Running the rewrite twice changes nothing the second time.
//!
//! Literals are found by a small scanner that skips comments and honours
//! backslash escapes. A line holding a quote that never closes cannot be
//! tokenized reliably: its table tokens are reported, never rewritten.

use crate::core::error::TodoportError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::iter;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const DEFAULT_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "target",
    "dist",
    "build",
    ".next",
    "coverage",
];
pub const DEFAULT_ACCESSORS: &[&str] = &["from", "access", "table"];

#[derive(Debug, Clone)]
pub struct RewriteOptions {
    pub tables: Vec<String>,
    /// Prepended verbatim, e.g. `TODOAAPP.`.
    pub prefix: String,
    pub accessors: Vec<String>,
    pub extensions: Vec<String>,
    pub excluded_dirs: Vec<String>,
    pub dry_run: bool,
}

impl RewriteOptions {
    pub fn new(tables: Vec<String>, prefix: &str) -> Self {
        Self {
            tables,
            prefix: prefix.to_string(),
            accessors: DEFAULT_ACCESSORS.iter().map(|s| s.to_string()).collect(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
            dry_run: false,
        }
    }
}

/// A table-name token outside any recognized data-access call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewriteAmbiguity {
    pub file: String,
    pub line: usize,
    pub table: String,
    pub context: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewriteSummary {
    pub files_scanned: usize,
    pub files_modified: usize,
    pub references_rewritten: usize,
    /// Subset of `references_rewritten` that collapsed a repeated prefix.
    pub prefixes_collapsed: usize,
    pub modified_files: Vec<String>,
    pub ambiguities: Vec<RewriteAmbiguity>,
    /// Files with a source extension that are not valid UTF-8. Never rewritten.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_files: Vec<String>,
    pub dry_run: bool,
}

/// Result of rewriting one file's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRewrite {
    pub content: String,
    pub rewritten: usize,
    pub collapsed: usize,
    /// `(line, table, context)` for each ambiguous token.
    pub ambiguous: Vec<(usize, String, String)>,
}

/// A closed string literal, by byte offset of its opening and closing quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Literal {
    open: usize,
    close: usize,
    quote: u8,
    /// False when the body holds an escape, an interpolation or a line break.
    plain: bool,
}

#[derive(Debug, Default)]
struct Scan {
    literals: Vec<Literal>,
    /// Offsets of opening quotes that never closed.
    unterminated: Vec<usize>,
}

/// Walks the source once, skipping `//` and `/* */` comments.
fn scan_literals(content: &str) -> Scan {
    let bytes = content.as_bytes();
    let mut scan = Scan::default();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = content[i..].find('\n').map_or(bytes.len(), |p| i + p);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = content[i + 2..]
                    .find("*/")
                    .map_or(bytes.len(), |p| i + 2 + p + 2);
            }
            quote @ (b'"' | b'\'' | b'`') => {
                let mut plain = true;
                let mut close = None;
                let mut j = i + 1;
                while j < bytes.len() {
                    match bytes[j] {
                        b'\\' => {
                            plain = false;
                            j += 2;
                            continue;
                        }
                        b if b == quote => {
                            close = Some(j);
                            break;
                        }
                        b'\n' if quote != b'`' => break,
                        b'\n' => plain = false,
                        b'$' if bytes.get(j + 1) == Some(&b'{') => plain = false,
                        _ => {}
                    }
                    j += 1;
                }
                match close {
                    Some(close) => {
                        scan.literals.push(Literal {
                            open: i,
                            close,
                            quote,
                            plain,
                        });
                        i = close + 1;
                    }
                    None => {
                        scan.unterminated.push(i);
                        i = j;
                    }
                }
            }
            _ => i += 1,
        }
    }
    scan
}

/// Quoted tokens without whitespace. Only used to report on lines the scanner gave up on.
fn loose_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""(?P<dq>[^"\s]+)"|'(?P<sq>[^'\s]+)'|`(?P<bq>[^`\s]+)`"#)
            .expect("static token regex")
    })
}

/// The identifier called with `(` immediately before `open`, if any.
fn callee_before(content: &str, open: usize) -> Option<&str> {
    let head = content[..open].trim_end().strip_suffix('(')?.trim_end();
    let start = head
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
        .last()
        .map(|(idx, _)| idx)?;
    let name = &head[start..];
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Some(name)
}

/// 1-based line holding byte `offset`.
fn line_of(line_starts: &[usize], offset: usize) -> usize {
    line_starts.partition_point(|&s| s <= offset)
}

/// Rewrites a single file's contents. Pure; does not touch the filesystem.
pub fn rewrite_source(content: &str, options: &RewriteOptions) -> FileRewrite {
    let tables: BTreeSet<&str> = options.tables.iter().map(String::as_str).collect();
    let line_starts: Vec<usize> = iter::once(0)
        .chain(content.match_indices('\n').map(|(i, _)| i + 1))
        .collect();
    let context_of = |line: usize| {
        content
            .lines()
            .nth(line - 1)
            .unwrap_or_default()
            .trim()
            .to_string()
    };

    let scan = scan_literals(content);
    let unbalanced: BTreeSet<usize> = scan
        .unterminated
        .iter()
        .map(|&offset| line_of(&line_starts, offset))
        .collect();

    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    let mut rewritten = 0;
    let mut collapsed = 0;
    let mut ambiguous = Vec::new();

    for lit in scan.literals.iter().filter(|l| l.plain) {
        let line = line_of(&line_starts, lit.open);
        if unbalanced.contains(&line) {
            continue;
        }
        let (copies, table) = strip_prefixes(&content[lit.open + 1..lit.close], &options.prefix);
        if !tables.contains(table) {
            continue;
        }

        let is_access = callee_before(content, lit.open)
            .is_some_and(|callee| options.accessors.iter().any(|a| a == callee));

        if !is_access {
            if copies == 0 {
                ambiguous.push((line, table.to_string(), context_of(line)));
            }
            continue;
        }
        if copies == 1 {
            continue;
        }

        let quote = char::from(lit.quote);
        out.push_str(&content[last..lit.open]);
        out.push(quote);
        out.push_str(&options.prefix);
        out.push_str(table);
        out.push(quote);
        last = lit.close + 1;
        rewritten += 1;
        if copies > 1 {
            collapsed += 1;
        }
    }
    out.push_str(&content[last..]);

    for &line in &unbalanced {
        let text = context_of(line);
        for caps in loose_token_regex().captures_iter(&text) {
            let Some(body) = caps.name("dq").or(caps.name("sq")).or(caps.name("bq")) else {
                continue;
            };
            let (copies, table) = strip_prefixes(body.as_str(), &options.prefix);
            if copies != 1 && tables.contains(table) {
                ambiguous.push((line, table.to_string(), text.clone()));
            }
        }
    }
    ambiguous.sort_by_key(|a| a.0);

    FileRewrite {
        content: out,
        rewritten,
        collapsed,
        ambiguous,
    }
}

/// Counts and removes leading copies of `prefix`.
fn strip_prefixes<'a>(body: &'a str, prefix: &str) -> (usize, &'a str) {
    if prefix.is_empty() {
        return (0, body);
    }
    let mut rest = body;
    let mut copies = 0;
    while let Some(stripped) = rest.strip_prefix(prefix) {
        rest = stripped;
        copies += 1;
    }
    (copies, rest)
}

pub fn rewrite_references(
    root: &Path,
    options: &RewriteOptions,
) -> Result<RewriteSummary, TodoportError> {
    if !root.is_dir() {
        return Err(TodoportError::NotFound(format!(
            "source root {} is not a directory",
            root.display()
        )));
    }
    if options.prefix.is_empty() {
        return Err(TodoportError::ValidationError(
            "namespace prefix must not be empty".to_string(),
        ));
    }

    let mut files = Vec::new();
    collect_source_files(root, options, &mut files)?;
    files.sort();

    let mut summary = RewriteSummary {
        dry_run: options.dry_run,
        ..RewriteSummary::default()
    };
    for path in files {
        let rel = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                summary.skipped_files.push(rel);
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        summary.files_scanned += 1;

        let result = rewrite_source(&content, options);
        for (line, table, context) in result.ambiguous {
            summary.ambiguities.push(RewriteAmbiguity {
                file: rel.clone(),
                line,
                table,
                context,
            });
        }
        if result.rewritten == 0 {
            continue;
        }

        summary.references_rewritten += result.rewritten;
        summary.prefixes_collapsed += result.collapsed;
        summary.files_modified += 1;
        summary.modified_files.push(rel);
        if !options.dry_run {
            fs::write(&path, result.content)?;
        }
    }
    Ok(summary)
}

fn collect_source_files(
    dir: &Path,
    options: &RewriteOptions,
    out: &mut Vec<PathBuf>,
) -> Result<(), TodoportError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
            if options.excluded_dirs.iter().any(|d| d == name) {
                continue;
            }
            collect_source_files(&path, options, out)?;
        } else if path.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| options.extensions.iter().any(|x| x == e))
        {
            out.push(path);
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "rewrite",
        "version": "0.1.0",
        "description": "Namespace data-access table references in application source",
        "commands": [
            { "name": "rewrite", "parameters": ["root", "prefix", "table", "accessor", "dry_run"] }
        ],
        "storage": []
    })
}
