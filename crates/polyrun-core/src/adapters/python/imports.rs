//! Third-party import detection for Python sources.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::core_types::SourceFile;

static IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*import[ \t]+([^\n#;]+)").unwrap());

static FROM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*from[ \t]+([A-Za-z_][A-Za-z0-9_]*)").unwrap());

static IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

const STDLIB_MODULES: &[&str] = &[
    "abc", "aifc", "argparse", "array", "ast", "asynchat", "asyncio", "asyncore",
    "atexit", "base64", "bdb", "binascii", "binhex", "bisect", "builtins",
    "bz2", "calendar", "cgi", "cgitb", "chunk", "cmath", "cmd", "code",
    "codecs", "codeop", "collections", "colorsys", "compileall", "concurrent",
    "configparser", "contextlib", "contextvars", "copy", "copyreg", "cProfile",
    "csv", "ctypes", "curses", "dataclasses", "datetime", "dbm", "decimal",
    "difflib", "dis", "distutils", "doctest", "email", "encodings", "enum",
    "errno", "faulthandler", "fcntl", "filecmp", "fileinput", "fnmatch",
    "formatter", "fractions", "ftplib", "functools", "gc", "getopt", "getpass",
    "gettext", "glob", "grp", "gzip", "hashlib", "heapq", "hmac", "html",
    "http", "idlelib", "imaplib", "imghdr", "imp", "importlib", "inspect",
    "io", "ipaddress", "itertools", "json", "keyword", "lib2to3", "linecache",
    "locale", "logging", "lzma", "mailbox", "mailcap", "marshal", "math",
    "mimetypes", "mmap", "modulefinder", "multiprocessing", "netrc", "nis",
    "nntplib", "numbers", "operator", "optparse", "os", "ossaudiodev",
    "pathlib", "pdb", "pickle", "pickletools", "pipes", "pkgutil", "platform",
    "plistlib", "poplib", "posix", "posixpath", "pprint", "profile", "pstats",
    "pty", "pwd", "py_compile", "pyclbr", "pydoc", "queue", "quopri",
    "random", "re", "readline", "reprlib", "resource", "rlcompleter", "runpy",
    "sched", "secrets", "select", "selectors", "shelve", "shlex", "shutil",
    "signal", "site", "smtpd", "smtplib", "sndhdr", "socket", "socketserver",
    "sqlite3", "ssl", "stat", "statistics", "string", "stringprep", "struct",
    "subprocess", "sunau", "symtable", "sys", "sysconfig", "syslog", "tabnanny",
    "tarfile", "telnetlib", "tempfile", "termios", "test", "textwrap", "threading",
    "time", "timeit", "tkinter", "token", "tokenize", "trace", "traceback",
    "tracemalloc", "tty", "turtle", "turtledemo", "types", "typing",
    "unicodedata", "unittest", "urllib", "uu", "uuid", "venv", "warnings",
    "wave", "weakref", "webbrowser", "winreg", "winsound", "wsgiref",
    "xdrlib", "xml", "xmlrpc", "zipapp", "zipfile", "zipimport", "zlib",
    "_thread", "__future__",
];

static STDLIB: Lazy<HashSet<&'static str>> = Lazy::new(|| STDLIB_MODULES.iter().copied().collect());

pub fn is_stdlib(module: &str) -> bool {
    STDLIB.contains(module)
}

/// Top-level module names the project itself provides.
fn project_modules(files: &[SourceFile]) -> HashSet<String> {
    files
        .iter()
        .filter_map(|file| {
            let name = file.name.trim_start_matches("./");
            let first = name.split('/').next()?;
            Some(first.strip_suffix(".py").unwrap_or(first).to_string())
        })
        .collect()
}

fn top_level_modules(source: &str) -> Vec<String> {
    let mut found = Vec::new();
    for caps in IMPORT_RE.captures_iter(source) {
        for clause in caps[1].split(',') {
            let name = clause.split_whitespace().next().unwrap_or("");
            let top = name.split('.').next().unwrap_or("");
            if IDENT_RE.is_match(top) {
                found.push(top.to_string());
            }
        }
    }
    // Relative imports start with '.' and never match.
    for caps in FROM_RE.captures_iter(source) {
        found.push(caps[1].to_string());
    }
    found
}

/// Third-party modules imported by `code` or by any auxiliary file, in first-seen order.
pub fn detect_imports(code: &str, files: &[SourceFile]) -> Vec<String> {
    let local = project_modules(files);
    let mut seen = HashSet::new();
    let sources = std::iter::once(code).chain(
        files
            .iter()
            .filter(|f| f.name.ends_with(".py"))
            .map(|f| f.code.as_str()),
    );

    let mut modules = Vec::new();
    for source in sources {
        for module in top_level_modules(source) {
            if is_stdlib(&module) || local.contains(&module) {
                continue;
            }
            if seen.insert(module.clone()) {
                modules.push(module);
            }
        }
    }
    modules
}
