//! JavaScript analyzer.

use super::{find_rejection, node_text, parse_source, SourceAnalyzer, Verdict};
use crate::Language;
use tree_sitter::Node;

/// Modules whose `require` is refused.
static DENIED_MODULES: &[&str] = &[
    "fs",
    "child_process",
    "net",
    "dgram",
    "cluster",
    "worker_threads",
    "os",
];

/// Member chains refused wherever they appear.
static DENIED_MEMBERS: &[&str] = &["process.binding", "globalThis.process"];

/// Analyzer for JavaScript sources.
#[derive(Debug, Default)]
pub struct JavascriptAnalyzer {}

impl SourceAnalyzer for JavascriptAnalyzer {
    fn language(&self) -> Language {
        Language::Javascript
    }

    fn analyze(&self, source: &str) -> Verdict {
        let grammar: tree_sitter::Language = tree_sitter_javascript::LANGUAGE.into();
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
        "call_expression" => check_call(node, source),
        "new_expression" => check_new(node, source),
        "member_expression" => check_member(node, source),
        _ => None,
    }
}

fn check_call(node: Node, source: &str) -> Option<String> {
    let function = node.child_by_field_name("function")?;
    match function.kind() {
        "identifier" => {
            let name = node_text(function, source);
            match name {
                "eval" => Some("use of 'eval' is not allowed".to_string()),
                // Function("...") builds code from strings just like `new
                // Function` does.
                "Function" => Some("use of the Function constructor is not allowed".to_string()),
                "require" => check_require(node, source),
                _ => None,
            }
        }
        "member_expression" => {
            let member = node_text(function, source);
            if member == "Reflect.construct" {
                let arguments = node.child_by_field_name("arguments")?;
                if node_text(arguments, source).contains("Function") {
                    return Some(
                        "Reflect.construct of the Function constructor is not allowed".to_string(),
                    );
                }
            }
            None
        }
        _ => None,
    }
}

fn check_require(node: Node, source: &str) -> Option<String> {
    let arguments = node.child_by_field_name("arguments")?;
    let mut cursor = arguments.walk();
    for child in arguments.children(&mut cursor) {
        if child.kind() != "string" {
            continue;
        }
        let module = node_text(child, source)
            .trim_matches(|c| c == '\'' || c == '"' || c == '`')
            .trim_start_matches("node:");
        let root = module.split('/').next().unwrap_or("");
        if DENIED_MODULES.contains(&root) {
            return Some(format!("require of module '{}' is not allowed", root));
        }
    }
    None
}

fn check_new(node: Node, source: &str) -> Option<String> {
    let constructor = node.child_by_field_name("constructor")?;
    if constructor.kind() == "identifier" && node_text(constructor, source) == "Function" {
        return Some("use of the Function constructor is not allowed".to_string());
    }
    None
}

fn check_member(node: Node, source: &str) -> Option<String> {
    let member = node_text(node, source);
    if DENIED_MEMBERS.contains(&member) {
        return Some(format!("use of '{}' is not allowed", member));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn analyze(source: &str) -> Verdict {
        JavascriptAnalyzer::default().analyze(source)
    }

    #[test_case("console.log(\"hi\")"; "hello world")]
    #[test_case("const x = [1, 2, 3].map(n => n * 2);\nconsole.log(x);"; "arrow map")]
    #[test_case("const path = require(\"path\");\nconsole.log(path.sep);"; "benign require")]
    #[test_case("class Point { constructor(x) { this.x = x; } }"; "class")]
    #[test_case("process.stdout.write(\"ok\\n\")"; "process stdout")]
    fn accepts(source: &str) {
        let verdict = analyze(source);
        assert!(verdict.accepted, "rejected: {}", verdict.reason);
    }

    #[test_case("eval(\"1+1\")", "eval"; "eval")]
    #[test_case("new Function(\"return 1\")()", "Function"; "new function")]
    #[test_case("Function(\"return 1\")()", "Function"; "function call")]
    #[test_case("const fs = require(\"fs\");", "fs"; "require fs")]
    #[test_case("require(\"node:fs\")", "fs"; "require node prefixed")]
    #[test_case("require(\"fs/promises\")", "fs"; "require subpath")]
    #[test_case("require(\"child_process\").execSync(\"ls\")", "child_process"; "child process")]
    #[test_case("require(\"worker_threads\")", "worker_threads"; "worker threads")]
    #[test_case("process.binding(\"spawn_sync\")", "process.binding"; "process binding")]
    #[test_case("globalThis.process.exit(1)", "globalThis.process"; "globalthis process")]
    #[test_case("Reflect.construct(Function, [\"return 1\"])", "Function"; "reflect construct")]
    fn rejects(source: &str, offender: &str) {
        let verdict = analyze(source);
        assert!(!verdict.accepted, "accepted: {}", source);
        assert!(
            verdict.reason.contains(offender),
            "reason '{}' does not mention '{}'",
            verdict.reason,
            offender
        );
    }

    #[test]
    fn reflect_construct_of_benign_constructor_is_allowed() {
        let verdict = analyze("Reflect.construct(Date, [])");
        assert!(verdict.accepted, "rejected: {}", verdict.reason);
    }

    #[test]
    fn syntax_error_names_line() {
        let verdict = analyze("console.log(1);\nfunction ( {\n");
        assert!(!verdict.accepted);
        assert!(verdict.reason.starts_with("syntax error at line"));
    }
}
