//! Host-side safety screening of a snippet before any side effect.
//!
//! The screen is lexical and pattern based: a blocklist of substrings, a
//! forbidden-module check over the parsed imports, a dunder-attribute scan,
//! and a heuristic against absolute path literals outside /tmp. It is a
//! conservative filter: rejecting benign code is acceptable, letting a
//! listed pattern through is not. The container remains the real sandbox;
//! this is defense-in-depth against the most common generated-code
//! foot-guns.

use crate::imports;

/// Substrings that reject a snippet outright, wherever they appear.
pub const BLOCKED_PATTERNS: &[&str] = &[
    "os.system",
    "subprocess.",
    "eval(",
    "exec(",
    "open(",
    "__import__",
    "importlib",
    "sys.modules",
    "globals()",
    "locals()",
    "delattr",
    "setattr",
    "compile(",
    "rm -rf",
    ".fork",
    ".kill",
];

/// Modules that may not be imported, as whole top-level names. `os` itself
/// stays importable for read-only members; its mutating members are caught
/// by [`BLOCKED_PATTERNS`].
pub const BLOCKED_MODULES: &[&str] = &[
    "subprocess",
    "socket",
    "ctypes",
    "multiprocessing",
    "threading",
    "_thread",
    "pty",
    "resource",
    "signal",
];

/// Dunder attributes that are harmless to read and common in generated
/// code; every other `.__attr` access rejects.
pub const ALLOWED_DUNDER_ATTRS: &[&str] = &["__name__", "__version__", "__doc__"];

/// The only directory snippets may name in absolute path literals.
pub const ALLOWED_PATH_PREFIX: &str = "/tmp";

/// Screens a snippet. Returns `Err` with a descriptive reason when the
/// snippet must not run; the reason is surfaced verbatim to the caller.
pub fn check(source: &str) -> Result<(), String> {
    for pattern in BLOCKED_PATTERNS {
        if source.contains(pattern) {
            return Err(format!("Unsafe code: forbidden pattern {pattern:?}"));
        }
    }

    if let Some(attr) = dunder_attribute_violation(source) {
        return Err(format!("Unsafe code: dunder attribute access {attr:?}"));
    }

    if let Some(path) = path_literal_violation(source) {
        return Err(format!(
            "Unsafe code: path literal {path:?} outside {ALLOWED_PATH_PREFIX}"
        ));
    }

    // A snippet that does not parse carries no import to judge; the
    // interpreter reports the syntax error when it runs.
    if let Some(modules) = imports::imported_modules(source) {
        for module in BLOCKED_MODULES {
            if modules.contains(*module) {
                return Err(format!("Unsafe code: forbidden module import {module:?}"));
            }
        }
    }

    Ok(())
}

/// Finds the first `.__attr` access outside the allowed set.
fn dunder_attribute_violation(source: &str) -> Option<String> {
    for (idx, _) in source.match_indices(".__") {
        let attr: String = source[idx + 1..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if !ALLOWED_DUNDER_ATTRS.contains(&attr.as_str()) {
            return Some(attr);
        }
    }
    None
}

/// Finds the first quoted string literal that names an absolute path
/// outside /tmp. Purely lexical; escapes and prefixes are not interpreted.
fn path_literal_violation(source: &str) -> Option<String> {
    let mut chars = source.char_indices();
    while let Some((_, ch)) = chars.next() {
        if ch != '"' && ch != '\'' {
            continue;
        }
        let quote = ch;
        let mut literal = String::new();
        for (_, inner) in chars.by_ref() {
            if inner == quote || inner == '\n' {
                break;
            }
            literal.push(inner);
        }
        if literal.starts_with('/')
            && literal != ALLOWED_PATH_PREFIX
            && !literal.starts_with("/tmp/")
        {
            return Some(literal);
        }
    }
    None
}
