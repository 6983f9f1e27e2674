//! Python analyzer.

use super::{find_rejection, node_text, parse_source, SourceAnalyzer, Verdict};
use crate::Language;
use tree_sitter::Node;

/// Identifiers whose direct call is refused.
static DENIED_CALLS: &[&str] = &["eval", "exec", "compile", "__import__"];

/// Modules whose import, or whose attribute chains, are refused.
static DENIED_MODULES: &[&str] = &[
    "os",
    "subprocess",
    "socket",
    "shutil",
    "ctypes",
    "multiprocessing",
    "sys",
    "importlib",
];

lazy_static! {
    /// Shape of an `open()` mode string literal, e.g. "r", "wb", "a+".
    static ref MODE_STRING_RE: regex::Regex =
        regex::Regex::new(r"^[rwxabtU+]+$").expect("could not create mode regex");
}

/// Analyzer for Python sources.
#[derive(Debug, Default)]
pub struct PythonAnalyzer {}

impl SourceAnalyzer for PythonAnalyzer {
    fn language(&self) -> Language {
        Language::Python
    }

    fn analyze(&self, source: &str) -> Verdict {
        let grammar: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
        let tree = match parse_source(&grammar, source) {
            Ok(tree) => tree,
            Err(verdict) => return verdict,
        };

        let rejection = find_rejection(tree.root_node(), &|node| check_node(node, source));
        match rejection {
            Some(reason) => Verdict::reject(reason),
            None => Verdict::accept(),
        }
    }
}

fn check_node(node: Node, source: &str) -> Option<String> {
    match node.kind() {
        "call" => check_call(node, source),
        "import_statement" | "import_from_statement" => check_import(node, source),
        "attribute" => check_attribute(node, source),
        _ => None,
    }
}

fn check_call(node: Node, source: &str) -> Option<String> {
    let function = node.child_by_field_name("function")?;
    if function.kind() != "identifier" {
        return None;
    }
    let name = node_text(function, source);
    if DENIED_CALLS.contains(&name) {
        return Some(format!("use of '{}' is not allowed", name));
    }
    if name == "open" {
        let arguments = node.child_by_field_name("arguments")?;
        if has_write_mode_argument(arguments, source) {
            return Some("opening files for writing is not allowed".to_string());
        }
    }
    None
}

// The mode is matched as any short string literal drawn from the mode
// alphabet that requests writing; a filename like "wb" would match too,
// which is an accepted cost of staying syntactic.
fn has_write_mode_argument(arguments: Node, source: &str) -> bool {
    let mut cursor = arguments.walk();
    for child in arguments.children(&mut cursor) {
        let candidate = match child.kind() {
            "string" => node_text(child, source),
            // mode= keyword argument
            "keyword_argument" => node_text(child, source),
            _ => continue,
        };
        let literal = candidate
            .trim_start_matches("mode")
            .trim_start_matches('=')
            .trim_matches(|c| c == '\'' || c == '"');
        if MODE_STRING_RE.is_match(literal)
            && literal.chars().any(|c| matches!(c, 'w' | 'a' | 'x' | '+'))
        {
            return true;
        }
    }
    false
}

fn check_import(node: Node, source: &str) -> Option<String> {
    // "import a.b as c" / "from a.b import c": the second token carries the
    // dotted module path in both statement forms.
    let text = node_text(node, source);
    let module = text
        .split_whitespace()
        .nth(1)
        .unwrap_or("")
        .split('.')
        .next()
        .unwrap_or("");
    if DENIED_MODULES.contains(&module) {
        return Some(format!("import of module '{}' is not allowed", module));
    }
    None
}

fn check_attribute(node: Node, source: &str) -> Option<String> {
    let object = node.child_by_field_name("object")?;
    if object.kind() != "identifier" {
        return None;
    }
    let name = node_text(object, source);
    if DENIED_MODULES.contains(&name) {
        return Some(format!("reference to module '{}' is not allowed", name));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn analyze(source: &str) -> Verdict {
        PythonAnalyzer::default().analyze(source)
    }

    #[test_case("print(\"hi\")"; "hello world")]
    #[test_case("name = input(\"n:\")\nprint(\"hello\", name)"; "interactive echo")]
    #[test_case("x = [i * i for i in range(10)]\nprint(sum(x))"; "comprehension")]
    #[test_case("import math\nprint(math.sqrt(2))"; "benign import")]
    #[test_case("f = open(\"data.txt\")\nprint(f.read())"; "open for reading")]
    fn accepts(source: &str) {
        let verdict = analyze(source);
        assert!(verdict.accepted, "rejected: {}", verdict.reason);
    }

    #[test_case("eval(\"1+1\")", "eval"; "eval call")]
    #[test_case("exec(\"pass\")", "exec"; "exec call")]
    #[test_case("compile(\"1\", \"s\", \"eval\")", "compile"; "compile call")]
    #[test_case("__import__(\"os\")", "__import__"; "dunder import")]
    #[test_case("import os", "os"; "import os")]
    #[test_case("import os.path", "os"; "import dotted")]
    #[test_case("import subprocess as sp", "subprocess"; "aliased import")]
    #[test_case("from socket import socket", "socket"; "from import")]
    #[test_case("import sys", "sys"; "import sys")]
    #[test_case("os.system(\"ls\")", "os"; "attribute chain")]
    fn rejects(source: &str, offender: &str) {
        let verdict = analyze(source);
        assert!(!verdict.accepted);
        assert!(
            verdict.reason.contains(offender),
            "reason '{}' does not mention '{}'",
            verdict.reason,
            offender
        );
    }

    #[test]
    fn rejects_spec_scenario_import_os_system() {
        let verdict = analyze("import os; os.system(\"ls\")");
        assert!(!verdict.accepted);
        assert!(verdict.reason.contains("os"));
    }

    #[test]
    fn rejects_open_for_writing() {
        for source in &[
            "open(\"x.txt\", \"w\")",
            "open(\"x.txt\", \"a+\")",
            "open(\"x.txt\", mode=\"wb\")",
        ] {
            let verdict = analyze(source);
            assert!(!verdict.accepted, "accepted: {}", source);
            assert!(verdict.reason.contains("writing"));
        }
    }

    #[test]
    fn syntax_error_names_line() {
        let verdict = analyze("print(\"ok\")\ndef broken(:\n");
        assert!(!verdict.accepted);
        assert!(
            verdict.reason.starts_with("syntax error at line"),
            "unexpected reason: {}",
            verdict.reason
        );
    }
}
