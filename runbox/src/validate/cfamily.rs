//! C and C++ analyzer.
//!
//! Both languages share the denylists; only the grammar differs.

use super::{find_rejection, node_text, parse_source, SourceAnalyzer, Verdict};
use crate::Language;
use tree_sitter::Node;

/// Headers whose inclusion is refused.
static DENIED_HEADERS: &[&str] = &[
    "unistd.h",
    "sys/socket.h",
    "sys/un.h",
    "sys/ptrace.h",
    "sys/syscall.h",
    "netinet/in.h",
    "netinet/tcp.h",
    "arpa/inet.h",
    "netdb.h",
    "net/if.h",
    "dlfcn.h",
];

/// Functions whose call is refused outright.
static DENIED_CALLS: &[&str] = &[
    "system",
    "execl",
    "execlp",
    "execle",
    "execv",
    "execvp",
    "execvpe",
    "execve",
    "fork",
    "vfork",
    "clone",
    "popen",
    "socket",
    "connect",
    "bind",
    "listen",
    "accept",
    "ptrace",
    "syscall",
    "dlopen",
];

/// Functions refused only when asked for executable memory.
static DENIED_EXEC_MAPPINGS: &[&str] = &["mmap", "mprotect"];

/// Analyzer shared by C and C++ sources.
#[derive(Debug)]
pub struct CFamilyAnalyzer {
    language: Language,
}

impl CFamilyAnalyzer {
    /// Analyzer for C sources.
    pub fn c() -> Self {
        Self {
            language: Language::C,
        }
    }

    /// Analyzer for C++ sources.
    pub fn cpp() -> Self {
        Self {
            language: Language::Cpp,
        }
    }

    fn grammar(&self) -> tree_sitter::Language {
        match self.language {
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            _ => tree_sitter_c::LANGUAGE.into(),
        }
    }
}

impl SourceAnalyzer for CFamilyAnalyzer {
    fn language(&self) -> Language {
        self.language
    }

    fn analyze(&self, source: &str) -> Verdict {
        let grammar = self.grammar();
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
        "preproc_include" => check_include(node, source),
        "call_expression" => check_call(node, source),
        _ => None,
    }
}

fn check_include(node: Node, source: &str) -> Option<String> {
    let path = node.child_by_field_name("path")?;
    let header = node_text(path, source).trim_matches(|c| matches!(c, '<' | '>' | '"'));
    if DENIED_HEADERS.contains(&header) {
        return Some(format!("include of '{}' is not allowed", header));
    }
    None
}

fn check_call(node: Node, source: &str) -> Option<String> {
    let function = node.child_by_field_name("function")?;
    if function.kind() != "identifier" {
        return None;
    }
    let name = node_text(function, source);
    if DENIED_CALLS.contains(&name) {
        return Some(format!("call to '{}' is not allowed", name));
    }
    if DENIED_EXEC_MAPPINGS.contains(&name) {
        let arguments = node.child_by_field_name("arguments")?;
        if node_text(arguments, source).contains("PROT_EXEC") {
            return Some(format!(
                "call to '{}' with executable memory is not allowed",
                name
            ));
        }
    }
    None
}
