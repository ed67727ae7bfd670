use anyhow::Result;
use tree_sitter::{Language, Parser};

use super::{js_shared, ExtractionResult, Extractor};

pub struct JavaScriptExtractor {
    parser: Parser,
}

impl JavaScriptExtractor {
    pub fn new() -> Self {
        let mut parser = Parser::new();
        parser
            .set_language(&Language::new(tree_sitter_javascript::LANGUAGE))
            .expect("JavaScript grammar should always load");
        Self { parser }
    }
}

impl Default for JavaScriptExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for JavaScriptExtractor {
    fn extract(&mut self, source: &str, file_path: &str) -> Result<ExtractionResult> {
        js_shared::extract(&mut self.parser, source, file_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract_js(source: &str) -> ExtractionResult {
        let mut ext = JavaScriptExtractor::new();
        ext.extract(source, "test.js").unwrap()
    }

    #[test]
    fn test_function_declaration() {
        let result = extract_js(
            r#"
function greet(name) {
    return `Hello, ${name}!`;
}
"#,
        );
        assert_eq!(result.functions.len(), 1);
        assert_eq!(result.functions[0].name, "greet");
        assert!(result.functions[0].body.starts_with("function greet(name)"));
        assert!(result.functions[0].body.ends_with('}'));
    }

    #[test]
    fn test_arrow_functions_are_not_declarations() {
        let result = extract_js(
            r#"
const add = (a, b) => a + b;
const mul = function (a, b) { return a * b; };
"#,
        );
        assert!(result.functions.is_empty());
    }

    #[test]
    fn test_class_methods_are_ignored() {
        let result = extract_js(
            r#"
class Repo {
    find(id) { return lookup(id); }
}
"#,
        );
        assert!(result.functions.is_empty());
    }

    #[test]
    fn test_nested_functions_are_ignored() {
        let result = extract_js(
            r#"
function outer() {
    function inner() { return 1; }
    return inner();
}
"#,
        );
        assert_eq!(result.functions.len(), 1);
        assert_eq!(result.functions[0].name, "outer");
        assert_eq!(result.functions[0].callees, vec!["inner".to_string()]);
    }

    #[test]
    fn test_functions_inside_blocks_are_not_top_level() {
        let result = extract_js(
            r#"
if (process.env.DEBUG) {
    function debugOnly() {}
}
"#,
        );
        assert!(result.functions.is_empty());
    }

    #[test]
    fn test_generator_function_declaration() {
        let result = extract_js(
            r#"
import { next } from './source';

export function* items(list) {
    for (const x of list) {
        yield next(x);
    }
}
"#,
        );
        assert_eq!(result.functions.len(), 1);
        assert_eq!(result.functions[0].name, "items");
        assert!(result.functions[0].body.starts_with("function* items(list)"));
        assert_eq!(result.functions[0].callees, vec!["next".to_string()]);
    }

    #[test]
    fn test_exported_function() {
        let result = extract_js(
            r#"
export function load(path) { return read(path); }
export const VERSION = 2;
"#,
        );
        let names: Vec<&str> = result.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["load"]);
        assert_eq!(result.functions[0].callees, vec!["read".to_string()]);
    }

    #[test]
    fn test_import_clauses() {
        let result = extract_js(
            r#"
import { readFile, writeFile as wf } from './fs-utils';
import * as path from 'path';
import express from 'express';
import './polyfill';
"#,
        );
        let pairs: Vec<(&str, &str)> = result
            .imports
            .iter()
            .map(|i| (i.clause.as_str(), i.specifier.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("readFile", "./fs-utils"),
                ("writeFile", "./fs-utils"),
                ("path", "path"),
                ("express", "express"),
            ]
        );
    }

    #[test]
    fn test_default_and_named_in_one_clause() {
        let result = extract_js("import api, { get } from \"./api\";\n");
        let clauses: Vec<&str> = result.imports.iter().map(|i| i.clause.as_str()).collect();
        assert_eq!(clauses, vec!["api", "get"]);
    }

    #[test]
    fn test_require_is_not_an_import() {
        let result = extract_js("const fs = require('fs');\n");
        assert!(result.imports.is_empty());
    }

    #[test]
    fn test_callees_are_direct_identifiers_only() {
        let result = extract_js(
            r#"
function run(items) {
    const a = fetchData();
    helper(a);
    helper(a);
    console.log(a);
    items.forEach((x) => transform(x));
    handlers[0]();
}
"#,
        );
        assert_eq!(
            result.functions[0].callees,
            vec![
                "fetchData".to_string(),
                "helper".to_string(),
                "transform".to_string()
            ]
        );
    }

    #[test]
    fn test_jsx_source_parses() {
        let result = extract_js(
            r#"
import { Button } from './Button';
function App() {
    return <Button onClick={() => track()} />;
}
"#,
        );
        assert_eq!(result.imports.len(), 1);
        assert_eq!(result.functions[0].name, "App");
        assert_eq!(result.functions[0].callees, vec!["track".to_string()]);
    }
}
