//! Rust analyzer.

use super::{find_rejection, node_text, parse_source, SourceAnalyzer, Verdict};
use crate::Language;
use tree_sitter::Node;

/// Path prefixes whose mention is refused.
static DENIED_PATH_PREFIXES: &[&str] = &["std::process", "std::net"];

/// Filesystem write APIs; reads stay available.
static DENIED_FS_FRAGMENTS: &[&str] = &[
    "fs::write",
    "fs::remove_file",
    "fs::remove_dir",
    "fs::create_dir",
    "fs::rename",
    "fs::copy",
    "fs::OpenOptions",
    "File::create",
    "OpenOptions::new",
];

/// Inline-assembly macros.
static DENIED_MACROS: &[&str] = &["asm", "global_asm", "llvm_asm"];

/// Attributes that reach into the FFI surface.
static DENIED_ATTRIBUTES: &[&str] = &["no_mangle", "link(", "link_name", "link_section", "export_name"];

/// Analyzer for Rust sources.
#[derive(Debug, Default)]
pub struct RustAnalyzer {}

impl SourceAnalyzer for RustAnalyzer {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn analyze(&self, source: &str) -> Verdict {
        let grammar: tree_sitter::Language = tree_sitter_rust::LANGUAGE.into();
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
        "unsafe_block" => Some("unsafe blocks are not allowed".to_string()),
        "function_modifiers" => {
            if node_text(node, source).contains("unsafe") {
                Some("unsafe functions are not allowed".to_string())
            } else {
                None
            }
        }
        "foreign_mod_item" => Some("extern blocks are not allowed".to_string()),
        "macro_invocation" => check_macro(node, source),
        "attribute_item" => check_attribute(node, source),
        "scoped_identifier" | "use_declaration" => check_path(node, source),
        _ => None,
    }
}

fn check_macro(node: Node, source: &str) -> Option<String> {
    let name = node.child_by_field_name("macro")?;
    if DENIED_MACROS.contains(&node_text(name, source)) {
        return Some("inline assembly is not allowed".to_string());
    }
    None
}

fn check_attribute(node: Node, source: &str) -> Option<String> {
    let text = node_text(node, source);
    for attribute in DENIED_ATTRIBUTES {
        if text.contains(attribute) {
            return Some("FFI attributes are not allowed".to_string());
        }
    }
    None
}

fn check_path(node: Node, source: &str) -> Option<String> {
    let path: String = node_text(node, source)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    for prefix in DENIED_PATH_PREFIXES {
        if path.contains(prefix) {
            return Some(format!("use of '{}' is not allowed", prefix));
        }
    }
    for fragment in DENIED_FS_FRAGMENTS {
        if path.contains(fragment) {
            return Some("filesystem write APIs are not allowed".to_string());
        }
    }
    None
}
