//! Static source validation.
//!
//! Every snippet is parsed to a syntax tree and refused if a prohibited
//! construct appears. Each language carries its own denylist; allowlisting
//! the useful subset of five languages is prohibitively large, so the
//! analyzers deny known-bad constructs instead.
//!
//! Matching is syntactic, not semantic: rebinding a blocked name defeats
//! the check by design. This validator is a first-line filter that keeps
//! casual misuse out of the hot path and surfaces obvious disallowed
//! intent early; the process-level sandbox is the enforcement boundary.
//! Operators must not treat the denylists as the sole defense.

mod cfamily;
mod javascript;
mod python;
mod rustlang;

pub use self::cfamily::CFamilyAnalyzer;
pub use self::javascript::JavascriptAnalyzer;
pub use self::python::PythonAnalyzer;
pub use self::rustlang::RustAnalyzer;

use crate::Language;
use tree_sitter::{Node, Parser, Tree};

/// Outcome of analyzing one source snippet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Verdict {
    /// Whether the snippet may be executed.
    pub accepted: bool,
    /// Human-readable refusal reason; empty on acceptance.
    pub reason: String,
}

impl Verdict {
    /// Approving verdict.
    pub fn accept() -> Self {
        Self {
            accepted: true,
            reason: String::new(),
        }
    }

    /// Refusing verdict with a reason naming the offending construct.
    pub fn reject<S: Into<String>>(reason: S) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
        }
    }
}

/// A per-language source analyzer.
///
/// Analyzers are pure functions of the source text: deterministic, no I/O,
/// and never raising to the caller.
pub trait SourceAnalyzer: Send + Sync + std::fmt::Debug {
    /// Language handled by this analyzer.
    fn language(&self) -> Language;

    /// Analyze one snippet.
    fn analyze(&self, source: &str) -> Verdict;
}

lazy_static! {
    static ref ANALYZERS: Vec<Box<dyn SourceAnalyzer>> = vec![
        Box::new(PythonAnalyzer::default()),
        Box::new(JavascriptAnalyzer::default()),
        Box::new(CFamilyAnalyzer::c()),
        Box::new(CFamilyAnalyzer::cpp()),
        Box::new(RustAnalyzer::default()),
    ];
}

/// Validate a snippet against a client-supplied language tag.
pub fn validate(language: &str, source: &str) -> Verdict {
    match Language::parse(language) {
        Ok(language) => validate_language(language, source),
        Err(_) => Verdict::reject("unsupported language"),
    }
}

/// Validate a snippet for a known language.
pub fn validate_language(language: Language, source: &str) -> Verdict {
    if source.trim().is_empty() {
        return Verdict::reject("empty source");
    }
    let analyzer = ANALYZERS
        .iter()
        .find(|a| a.language() == language)
        .expect("every language has a registered analyzer");
    let verdict = analyzer.analyze(source);
    if !verdict.accepted {
        debug!("rejected {} snippet: {}", language, verdict.reason);
    }
    verdict
}

/// Parse a snippet with the given grammar, mapping malformed source to a
/// refusing verdict that names the first offending line.
pub(crate) fn parse_source(
    grammar: &tree_sitter::Language,
    source: &str,
) -> Result<Tree, Verdict> {
    let mut parser = Parser::new();
    if parser.set_language(grammar).is_err() {
        // Grammar ABI mismatch. Refuse to run what cannot be analyzed.
        error!("could not load grammar, refusing snippet");
        return Err(Verdict::reject("internal analyzer failure"));
    }
    let tree = match parser.parse(source, None) {
        Some(tree) => tree,
        None => return Err(Verdict::reject("syntax error at line 1")),
    };
    // Only hard parse errors refuse the snippet. Trees that are merely
    // missing a token (say, a truncated closing brace) still carry enough
    // structure to scan, and the compiler or interpreter reports such
    // source with better diagnostics than a tree position.
    if let Some(line) = first_error_line(tree.root_node()) {
        return Err(Verdict::reject(format!("syntax error at line {}", line)));
    }
    Ok(tree)
}

fn first_error_line(node: Node) -> Option<usize> {
    if node.is_error() {
        return Some(node.start_position().row + 1);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(line) = first_error_line(child) {
            return Some(line);
        }
    }
    None
}

/// Walk the tree depth-first, returning the first refusal reason produced
/// by `check`.
pub(crate) fn find_rejection<F>(node: Node, check: &F) -> Option<String>
where
    F: Fn(Node) -> Option<String>,
{
    if let Some(reason) = check(node) {
        return Some(reason);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(reason) = find_rejection(child, check) {
            return Some(reason);
        }
    }
    None
}

/// Text of a node, empty on malformed UTF-8 boundaries.
pub(crate) fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}
