pub mod javascript;
mod js_shared;
pub mod typescript;

use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tree_sitter::Node;

use crate::config::ProjectConfig;
use crate::error::PipelineError;
use crate::resolver::resolve_specifier;
use crate::types::{FunctionDecl, ImportRecord};

/// An import as written in source, before specifier resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    pub clause: String,
    pub specifier: String,
}

/// Result of extracting imports and top-level functions from a source file.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub imports: Vec<ImportSpec>,
    pub functions: Vec<FunctionDecl>,
}

/// Trait implemented by each language extractor.
///
/// `extract` takes `&mut self` so implementations can reuse an internal
/// `tree_sitter::Parser` across calls instead of allocating a new one per file.
pub trait Extractor: Send {
    fn extract(&mut self, source: &str, file_path: &str) -> Result<ExtractionResult>;
}

/// A parsed file with imports resolved to File keys.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedFile {
    pub path: String,
    pub content_hash: String,
    pub imports: Vec<ImportRecord>,
    pub functions: Vec<FunctionDecl>,
}

/// Extract the text of a tree-sitter node from the source.
/// Returns an empty string if byte offsets fall outside the source or on a char boundary.
pub(crate) fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

/// Map file extension to language name.
pub fn detect_language(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "ts" | "mts" | "cts" => Some("typescript"),
        "tsx" => Some("tsx"),
        "js" | "jsx" | "mjs" | "cjs" => Some("javascript"),
        _ => None,
    }
}

/// Get the extractor for a language name.
pub fn get_extractor(language: &str) -> Option<Box<dyn Extractor>> {
    match language {
        "typescript" => Some(Box::new(typescript::TypeScriptExtractor::new())),
        "tsx" => Some(Box::new(typescript::TsxExtractor::new())),
        "javascript" => Some(Box::new(javascript::JavaScriptExtractor::new())),
        _ => None,
    }
}

/// Returns `true` if `path` has an extension that is both configured and parseable.
pub fn is_source_file(path: &Path, project: &ProjectConfig) -> bool {
    let allowed = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| project.extensions.iter().any(|e| e == ext))
        .unwrap_or(false);
    allowed && detect_language(path).is_some()
}

pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Read, parse and resolve one file. Blocking; run it off the async executor.
pub fn parse_file(path: &Path, project: &ProjectConfig) -> Result<ParsedFile, PipelineError> {
    let display = path.to_string_lossy().to_string();

    if !is_source_file(path, project) {
        return Err(PipelineError::parse(&display, "unsupported file extension"));
    }
    let language = detect_language(path)
        .ok_or_else(|| PipelineError::parse(&display, "unsupported file extension"))?;

    let source = std::fs::read_to_string(path).map_err(|e| PipelineError::parse(&display, e))?;
    parse_source(path, &source, language, project)
}

/// Parse already-loaded source text for `path`.
pub fn parse_source(
    path: &Path,
    source: &str,
    language: &str,
    project: &ProjectConfig,
) -> Result<ParsedFile, PipelineError> {
    let display = path.to_string_lossy().to_string();

    let mut extractor = get_extractor(language)
        .ok_or_else(|| PipelineError::parse(&display, format!("no extractor for {language}")))?;
    let extraction = extractor
        .extract(source, &display)
        .map_err(|e| PipelineError::parse(&display, e))?;

    let mut imports: Vec<ImportRecord> = Vec::with_capacity(extraction.imports.len());
    for spec in extraction.imports {
        let record = ImportRecord {
            resolved_source: resolve_specifier(
                path,
                &spec.specifier,
                &project.default_extension,
                &project.extensions,
            ),
            clause: spec.clause,
        };
        if !imports.contains(&record) {
            imports.push(record);
        }
    }

    Ok(ParsedFile {
        path: display,
        content_hash: content_hash(source),
        imports,
        functions: extraction.functions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language(Path::new("app.ts")), Some("typescript"));
        assert_eq!(detect_language(Path::new("mod.mts")), Some("typescript"));
        assert_eq!(detect_language(Path::new("App.tsx")), Some("tsx"));
        assert_eq!(detect_language(Path::new("index.js")), Some("javascript"));
        assert_eq!(detect_language(Path::new("util.mjs")), Some("javascript"));
        assert_eq!(detect_language(Path::new("View.jsx")), Some("javascript"));
        assert_eq!(detect_language(Path::new("README.md")), None);
        assert_eq!(detect_language(Path::new("main.py")), None);
        assert_eq!(detect_language(Path::new("Makefile")), None);
    }

    #[test]
    fn test_get_extractor() {
        assert!(get_extractor("typescript").is_some());
        assert!(get_extractor("tsx").is_some());
        assert!(get_extractor("javascript").is_some());
        assert!(get_extractor("python").is_none());
    }

    #[test]
    fn source_file_requires_configured_extension() {
        let mut project = ProjectConfig::default();
        assert!(is_source_file(Path::new("/p/a.ts"), &project));
        project.extensions = vec!["js".to_string()];
        assert!(!is_source_file(Path::new("/p/a.ts"), &project));
        assert!(is_source_file(Path::new("/p/a.js"), &project));
        assert!(!is_source_file(Path::new("/p/a.txt"), &project));
    }

    #[test]
    fn parse_source_resolves_and_dedupes_imports() {
        let project = ProjectConfig::default();
        let source = r#"
import { helper } from './b';
import { helper } from './b';
import React from 'react';
"#;
        let parsed =
            parse_source(Path::new("/p/src/a.ts"), source, "typescript", &project).unwrap();
        assert_eq!(
            parsed.imports,
            vec![
                ImportRecord {
                    clause: "helper".into(),
                    resolved_source: "/p/src/b.ts".into()
                },
                ImportRecord {
                    clause: "React".into(),
                    resolved_source: "react".into()
                },
            ]
        );
        assert_eq!(parsed.content_hash, content_hash(source));
    }

    #[test]
    fn parse_file_reports_unreadable_file() {
        let project = ProjectConfig::default();
        let err = parse_file(Path::new("/definitely/not/here.ts"), &project).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn parse_file_rejects_non_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bin.js");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x81]).unwrap();
        let err = parse_file(&path, &ProjectConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { .. }));
    }

    #[test]
    fn content_hash_is_deterministic() {
        assert_eq!(content_hash("function a() {}"), content_hash("function a() {}"));
        assert_ne!(content_hash("function a() {}"), content_hash("function b() {}"));
    }
}
