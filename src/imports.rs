//! Static discovery of third-party imports in a Python snippet.
//!
//! Parses the snippet with RustPython's parser, walks every statement
//! (including nested function, class, and control-flow bodies), and keeps
//! the first dotted segment of each `import X` / `from X import …`. Names
//! belonging to the standard library or starting with an underscore are
//! dropped. Pure with respect to the source text: no filesystem, no
//! network.

use std::collections::BTreeSet;

use rustpython_parser::{ast, Parse};

/// Top-level modules shipped with the Python interpreter. Imports of these
/// never need a package install.
pub const PYTHON_STDLIB: &[&str] = &[
    "abc", "aifc", "argparse", "array", "ast", "asyncio", "atexit", "audioop", "base64", "bdb",
    "binascii", "bisect", "builtins", "bz2", "calendar", "cgi", "cgitb", "cmath", "cmd", "code",
    "codecs", "codeop", "collections", "colorsys", "compileall", "concurrent", "configparser",
    "contextlib", "contextvars", "copy", "copyreg", "cProfile", "csv", "ctypes", "curses",
    "dataclasses", "datetime", "dbm", "decimal", "difflib", "dis", "doctest", "email",
    "encodings", "ensurepip", "enum", "errno", "faulthandler", "fcntl", "filecmp", "fileinput",
    "fnmatch", "fractions", "ftplib", "functools", "gc", "getopt", "getpass", "gettext", "glob",
    "graphlib", "grp", "gzip", "hashlib", "heapq", "hmac", "html", "http", "idlelib", "imaplib",
    "imghdr", "importlib", "inspect", "io", "ipaddress", "itertools", "json", "keyword",
    "linecache", "locale", "logging", "lzma", "mailbox", "mailcap", "marshal", "math",
    "mimetypes", "mmap", "modulefinder", "msvcrt", "multiprocessing", "netrc", "nntplib",
    "ntpath", "numbers", "operator", "optparse", "os", "ossaudiodev", "pathlib", "pdb", "pickle",
    "pickletools", "pipes", "pkgutil", "platform", "plistlib", "poplib", "posix", "posixpath",
    "pprint", "profile", "pstats", "pty", "pwd", "py_compile", "pyclbr", "pydoc", "queue",
    "quopri", "random", "re", "readline", "reprlib", "resource", "rlcompleter", "runpy",
    "sched", "secrets", "select", "selectors", "shelve", "shlex", "shutil", "signal", "site",
    "smtplib", "sndhdr", "socket", "socketserver", "spwd", "sqlite3", "ssl", "stat",
    "statistics", "string", "stringprep", "struct", "subprocess", "sunau", "symtable", "sys",
    "sysconfig", "syslog", "tabnanny", "tarfile", "telnetlib", "tempfile", "termios", "test",
    "textwrap", "this", "threading", "time", "timeit", "tkinter", "token", "tokenize",
    "tomllib", "trace", "traceback", "tracemalloc", "tty", "turtle", "turtledemo", "types",
    "typing", "unicodedata", "unittest", "urllib", "uu", "uuid", "venv", "warnings", "wave",
    "weakref", "webbrowser", "winreg", "winsound", "wsgiref", "xdrlib", "xml", "xmlrpc",
    "zipapp", "zipfile", "zipimport", "zlib", "zoneinfo",
];

/// Returns the set of third-party top-level modules the snippet imports.
///
/// A snippet that fails to parse yields the empty set; the interpreter
/// surfaces the syntax error when the snippet runs.
pub fn extract(source: &str) -> BTreeSet<String> {
    imported_modules(source)
        .unwrap_or_default()
        .into_iter()
        .filter(|name| !is_interpreter_provided(name))
        .collect()
}

/// Returns every top-level module the snippet imports, stdlib included, or
/// `None` if the snippet does not parse.
pub fn imported_modules(source: &str) -> Option<BTreeSet<String>> {
    let program = ast::Suite::parse(source, "<snippet>").ok()?;
    let mut modules = BTreeSet::new();
    collect_imports(&program, &mut modules);
    Some(modules)
}

fn is_interpreter_provided(name: &str) -> bool {
    // Underscore-prefixed names are interpreter internals, not pip packages.
    name.starts_with('_') || PYTHON_STDLIB.contains(&name)
}

fn first_segment(dotted: &str) -> String {
    dotted.split('.').next().unwrap_or(dotted).to_string()
}

fn collect_imports(stmts: &[ast::Stmt], out: &mut BTreeSet<String>) {
    for stmt in stmts {
        match stmt {
            ast::Stmt::Import(import) => {
                for alias in &import.names {
                    out.insert(first_segment(alias.name.as_str()));
                }
            }
            ast::Stmt::ImportFrom(import) => {
                // Relative imports resolve inside the snippet's own package,
                // never to an installable distribution.
                let relative = import
                    .level
                    .as_ref()
                    .map_or(false, |level| level.to_u32() > 0);
                if !relative {
                    if let Some(module) = &import.module {
                        out.insert(first_segment(module.as_str()));
                    }
                }
            }
            ast::Stmt::FunctionDef(inner) => collect_imports(&inner.body, out),
            ast::Stmt::AsyncFunctionDef(inner) => collect_imports(&inner.body, out),
            ast::Stmt::ClassDef(inner) => collect_imports(&inner.body, out),
            ast::Stmt::For(inner) => {
                collect_imports(&inner.body, out);
                collect_imports(&inner.orelse, out);
            }
            ast::Stmt::AsyncFor(inner) => {
                collect_imports(&inner.body, out);
                collect_imports(&inner.orelse, out);
            }
            ast::Stmt::While(inner) => {
                collect_imports(&inner.body, out);
                collect_imports(&inner.orelse, out);
            }
            ast::Stmt::If(inner) => {
                collect_imports(&inner.body, out);
                collect_imports(&inner.orelse, out);
            }
            ast::Stmt::With(inner) => collect_imports(&inner.body, out),
            ast::Stmt::AsyncWith(inner) => collect_imports(&inner.body, out),
            ast::Stmt::Try(inner) => {
                collect_imports(&inner.body, out);
                collect_handlers(&inner.handlers, out);
                collect_imports(&inner.orelse, out);
                collect_imports(&inner.finalbody, out);
            }
            ast::Stmt::TryStar(inner) => {
                collect_imports(&inner.body, out);
                collect_handlers(&inner.handlers, out);
                collect_imports(&inner.orelse, out);
                collect_imports(&inner.finalbody, out);
            }
            ast::Stmt::Match(inner) => {
                for case in &inner.cases {
                    collect_imports(&case.body, out);
                }
            }
            _ => {}
        }
    }
}

fn collect_handlers(handlers: &[ast::ExceptHandler], out: &mut BTreeSet<String>) {
    for handler in handlers {
        let ast::ExceptHandler::ExceptHandler(handler) = handler;
        collect_imports(&handler.body, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extracted(source: &str) -> Vec<String> {
        extract(source).into_iter().collect()
    }

    #[test]
    fn test_plain_import() {
        assert_eq!(extracted("import requests"), vec!["requests"]);
    }

    #[test]
    fn test_from_import() {
        assert_eq!(
            extracted("from bs4 import BeautifulSoup"),
            vec!["bs4"]
        );
    }

    #[test]
    fn test_dotted_import_keeps_first_segment() {
        assert_eq!(
            extracted("import matplotlib.pyplot as plt"),
            vec!["matplotlib"]
        );
        assert_eq!(
            extracted("from scipy.sparse import csr_matrix"),
            vec!["scipy"]
        );
    }

    #[test]
    fn test_stdlib_is_subtracted() {
        assert!(extracted("import json\nimport math\nfrom os import path").is_empty());
    }

    #[test]
    fn test_mixed_imports_deduplicate() {
        let source = "import numpy\nimport numpy.linalg\nfrom numpy import array\nimport json";
        assert_eq!(extracted(source), vec!["numpy"]);
    }

    #[test]
    fn test_nested_imports_are_found() {
        let source = r#"
def fetch():
    import requests
    return requests.get

class Loader:
    def load(self):
        try:
            import yaml
        except ImportError:
            import tomllib

if True:
    import pandas
"#;
        assert_eq!(extracted(source), vec!["pandas", "requests", "yaml"]);
    }

    #[test]
    fn test_relative_imports_are_ignored() {
        assert!(extracted("from . import sibling\nfrom .utils import helper").is_empty());
    }

    #[test]
    fn test_underscore_modules_are_ignored() {
        assert!(extracted("import _thread\nfrom __future__ import annotations").is_empty());
    }

    #[test]
    fn test_syntax_error_yields_empty_set() {
        assert!(extract("import requests\ndef broken(:").is_empty());
        assert!(imported_modules("def broken(:").is_none());
    }

    #[test]
    fn test_imported_modules_includes_stdlib() {
        let modules = imported_modules("import subprocess\nimport requests").unwrap();
        assert!(modules.contains("subprocess"));
        assert!(modules.contains("requests"));
    }

    #[test]
    fn test_empty_source() {
        assert!(extracted("").is_empty());
    }
}
