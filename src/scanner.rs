//! Import scanner
//!
//! Best-effort detection of the third-party packages a snippet needs. This
//! is string matching on import statements, not a Python parser: anything
//! it does not understand is skipped.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// Distinct installable package names
pub type PackageSet = BTreeSet<String>;

/// `import a.b, c as d`
static IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*import\s+(.+)$").expect("valid import regex"));

/// `from a.b import x`
static FROM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*from\s+(\S+)\s+import\b").expect("valid from regex"));

/// Import names that differ from the package that provides them
const ALIASES: &[(&str, &str)] = &[
    ("np", "numpy"),
    ("pd", "pandas"),
    ("plt", "matplotlib"),
    ("sns", "seaborn"),
    ("tf", "tensorflow"),
    ("sk", "scikit-learn"),
    ("sklearn", "scikit-learn"),
    ("cv2", "opencv-python"),
    ("PIL", "Pillow"),
    ("yaml", "PyYAML"),
    ("bs4", "beautifulsoup4"),
    ("dateutil", "python-dateutil"),
    ("dotenv", "python-dotenv"),
    ("attr", "attrs"),
    ("jwt", "PyJWT"),
    ("Crypto", "pycryptodome"),
    ("serial", "pyserial"),
    ("skimage", "scikit-image"),
    ("google.generativeai", "google-generativeai"),
];

/// Python 3.11 standard library modules (`sys.stdlib_module_names`, public
/// names) plus the sandbox's own files
const STDLIB: &[&str] = &[
    "__future__", "_thread", "abc", "aifc", "antigravity", "argparse", "array", "ast",
    "asynchat", "asyncio", "asyncore", "atexit", "audioop", "base64", "bdb", "binascii",
    "bisect", "builtins", "bz2", "cProfile", "calendar", "cgi", "cgitb", "chunk", "cmath",
    "cmd", "code", "codecs", "codeop", "collections", "colorsys", "compileall",
    "concurrent", "configparser", "contextlib", "contextvars", "copy", "copyreg", "crypt",
    "csv", "ctypes", "curses", "dataclasses", "datetime", "dbm", "decimal", "difflib",
    "dis", "distutils", "doctest", "email", "encodings", "ensurepip", "enum", "errno",
    "faulthandler", "fcntl", "filecmp", "fileinput", "fnmatch", "fractions", "ftplib",
    "functools", "gc", "genericpath", "getopt", "getpass", "gettext", "glob", "graphlib",
    "grp", "gzip", "hashlib", "heapq", "hmac", "html", "http", "idlelib", "imaplib",
    "imghdr", "imp", "importlib", "inspect", "io", "ipaddress", "itertools", "json",
    "keyword", "lib2to3", "linecache", "locale", "logging", "lzma", "mailbox", "mailcap",
    "marshal", "math", "mimetypes", "mmap", "modulefinder", "msilib", "msvcrt",
    "multiprocessing", "netrc", "nis", "nntplib", "nt", "ntpath", "nturl2path", "numbers",
    "opcode", "operator", "optparse", "os", "ossaudiodev", "pathlib", "pdb", "pickle",
    "pickletools", "pipes", "pkgutil", "platform", "plistlib", "poplib", "posix",
    "posixpath", "pprint", "profile", "pstats", "pty", "pwd", "py_compile", "pyclbr",
    "pydoc", "pydoc_data", "pyexpat", "queue", "quopri", "random", "re", "readline",
    "reprlib", "resource", "rlcompleter", "runpy", "sched", "secrets", "select",
    "selectors", "shelve", "shlex", "shutil", "signal", "site", "smtpd", "smtplib",
    "sndhdr", "socket", "socketserver", "spwd", "sqlite3", "sre_compile", "sre_constants",
    "sre_parse", "ssl", "stat", "statistics", "string", "stringprep", "struct",
    "subprocess", "sunau", "symtable", "sys", "sysconfig", "syslog", "tabnanny", "tarfile",
    "telnetlib", "tempfile", "termios", "textwrap", "this", "threading", "time", "timeit",
    "tkinter", "token", "tokenize", "tomllib", "trace", "traceback", "tracemalloc", "tty",
    "turtle", "turtledemo", "types", "typing", "unicodedata", "unittest", "urllib", "uu",
    "uuid", "venv", "warnings", "wave", "weakref", "webbrowser", "winreg", "winsound",
    "wsgiref", "xdrlib", "xml", "xmlrpc", "zipapp", "zipfile", "zipimport", "zlib",
    "zoneinfo",
    // sandbox files
    "snippet", "test_snippet",
];

/// Scan `source` for imports and return the packages to install.
pub fn scan_imports(source: &str) -> PackageSet {
    let mut packages = PackageSet::new();

    for line in source.lines() {
        let line = strip_comment(line);

        if let Some(caps) = FROM_RE.captures(line) {
            if let Some(name) = resolve(&caps[1]) {
                packages.insert(name);
            }
        } else if let Some(caps) = IMPORT_RE.captures(line) {
            for module in caps[1].split(',') {
                // `numpy as np`: the alias is a local binding, the module is what counts
                let module = module.split_whitespace().next().unwrap_or("");
                if let Some(name) = resolve(module) {
                    packages.insert(name);
                }
            }
        }
    }

    packages
}

fn strip_comment(line: &str) -> &str {
    line.split('#').next().unwrap_or("")
}

/// Map a dotted module path to an installable package name
fn resolve(module: &str) -> Option<String> {
    let module = module.trim().trim_end_matches(|c| c == ';' || c == '(' || c == ')');
    if module.is_empty() || module.starts_with('.') {
        return None;
    }

    if let Some((_, package)) = ALIASES.iter().find(|(alias, _)| *alias == module) {
        return Some(package.to_string());
    }

    let head = module.split('.').next()?;
    if !is_identifier(head) || STDLIB.contains(&head) {
        return None;
    }

    let package = ALIASES
        .iter()
        .find(|(alias, _)| *alias == head)
        .map(|(_, package)| *package)
        .unwrap_or(head);

    Some(package.to_string())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}
