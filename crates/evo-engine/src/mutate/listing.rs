//! Recipes for the directory-listing family of candidates. They key on the
//! top-level `files = ...` assignment and swap it for a denser
//! implementation; the replacement payloads are Python source.

use once_cell::sync::Lazy;
use regex::Regex;

const SCANDIR_BLOCK: &str = r#"paths = []
try:
    for de in os.scandir(p):
        if de.is_file() and de.name.endswith(".csv"):
            paths.append((de.name, de.path))
except Exception:
    from pathlib import Path as _P
    paths = [(f.name, str(f)) for f in _P(p).glob("*.csv")]

def _size(path):
    try:
        return os.stat(path).st_size
    except Exception:
        return -1

files = [name for (name, _path) in sorted(paths, key=lambda t: _size(t[1]), reverse=True)]"#;

const THREADED_STAT_BLOCK: &str = r#"paths = []
try:
    for de in os.scandir(p):
        if de.is_file() and de.name.endswith(".csv"):
            paths.append((de.name, de.path))
except Exception:
    from pathlib import Path as _P
    paths = [(f.name, str(f)) for f in _P(p).glob("*.csv")]

def _size(item):
    name, path = item
    try:
        return (name, os.stat(path).st_size)
    except Exception:
        return (name, -1)

with ThreadPoolExecutor() as ex:
    sized = list(ex.map(_size, paths))

files = [name for (name, _) in sorted(sized, key=lambda t: t[1], reverse=True)]"#;

const MULTIPROCESSING_BLOCK: &str = r#"paths = []
try:
    for de in os.scandir(p):
        if de.is_file() and de.name.endswith(".csv"):
            paths.append((de.name, de.path))
except Exception:
    from pathlib import Path as _P
    paths = [(f.name, str(f)) for f in _P(p).glob("*.csv")]

def _size(path):
    try:
        return os.stat(path).st_size
    except Exception:
        return -1

if sys.platform.startswith("win"):
    exec_cls = ThreadPoolExecutor
else:
    exec_cls = ProcessPoolExecutor

with exec_cls() as ex:
    sized = list(ex.map(lambda t: (t[0], _size(t[1])), paths))

files = [name for (name, _) in sorted(sized, key=lambda t: t[1], reverse=True)]"#;

const ASYNC_GLOB_BLOCK: &str = r#"async def _list_files_async(p):
    loop = asyncio.get_event_loop()
    def _scan():
        out = []
        for de in os.scandir(p):
            if de.is_file() and de.name.endswith(".csv"):
                try:
                    sz = os.stat(de.path).st_size
                except Exception:
                    sz = -1
                out.append((de.name, de.path, sz))
        return out
    return await loop.run_in_executor(None, _scan)

_sized = asyncio.run(_list_files_async(p))
_sized.sort(key=lambda t: t[2], reverse=True)
files = [name for (name, _path, _sz) in _sized]"#;

pub(super) fn use_scandir(code: &str) -> Option<String> {
    replace_files_assignment(code, SCANDIR_BLOCK)
}

pub(super) fn threaded_stat(code: &str) -> Option<String> {
    replace_files_assignment(code, THREADED_STAT_BLOCK)
}

pub(super) fn multiprocessing_sizes(code: &str) -> Option<String> {
    replace_files_assignment(code, MULTIPROCESSING_BLOCK)
}

pub(super) fn async_glob(code: &str) -> Option<String> {
    replace_files_assignment(code, ASYNC_GLOB_BLOCK)
}

/// Swap the first top-level `files = ...` statement (bracket continuations
/// included) for `block`. No such assignment: precondition miss.
fn replace_files_assignment(code: &str, block: &str) -> Option<String> {
    let (start, end) = files_statement_span(code)?;
    let mut out = String::with_capacity(code.len() + block.len());
    out.push_str(&code[..start]);
    out.push_str(block);
    out.push_str(&code[end..]);
    Some(out)
}

/// Byte span of the full `files = ...` statement starting at column zero,
/// extended across continuation lines while brackets stay open. The span
/// excludes the trailing newline.
fn files_statement_span(code: &str) -> Option<(usize, usize)> {
    let mut offset = 0;
    for line in code.split_inclusive('\n') {
        let stripped = line.trim_end_matches('\n');
        if is_files_assignment(stripped) {
            let start = offset;
            let mut end = offset + stripped.len();
            let mut depth = bracket_delta(stripped);
            let mut rest = offset + line.len();
            while depth > 0 {
                let next = code[rest..].split_inclusive('\n').next()?;
                let next_stripped = next.trim_end_matches('\n');
                depth += bracket_delta(next_stripped);
                end = rest + next_stripped.len();
                rest += next.len();
            }
            return Some((start, end));
        }
        offset += line.len();
    }
    None
}

fn is_files_assignment(line: &str) -> bool {
    static FILES_ASSIGN: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^files\s*=[^=]").expect("static pattern"));
    FILES_ASSIGN.is_match(line)
}

fn bracket_delta(line: &str) -> i32 {
    let mut depth = 0;
    let mut in_str: Option<char> = None;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match in_str {
            Some(quote) => match c {
                '\\' => {
                    let _ = chars.next();
                }
                _ if c == quote => in_str = None,
                _ => {}
            },
            None => match c {
                '#' => break,
                '\'' | '"' => in_str = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                _ => {}
            },
        }
    }
    depth
}

/// Memoize the known size-lookup helpers. Idempotent: a helper already
/// carrying an `lru_cache` decorator is left alone.
pub(super) fn add_lru_cache(code: &str) -> Option<String> {
    static TARGET_DEF: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^(\s*)def (get_size|stat_size|size_of|get_stat)\s*\(").expect("static pattern")
    });

    let lines: Vec<&str> = code.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len() + 2);
    let mut applied = false;

    for (idx, line) in lines.iter().enumerate() {
        if let Some(caps) = TARGET_DEF.captures(line) {
            let indent = &caps[1];
            // Walk the decorator stack directly above this def.
            let mut decorated_with_cache = false;
            let mut k = idx;
            while k > 0 {
                let above = lines[k - 1].trim_start();
                if !above.starts_with('@') {
                    break;
                }
                if above.contains("lru_cache") {
                    decorated_with_cache = true;
                }
                k -= 1;
            }
            if !decorated_with_cache {
                // Insert above the whole decorator stack.
                let insert_at = out.len() - (idx - k);
                out.insert(insert_at, format!("{}@lru_cache(maxsize=None)", indent));
                applied = true;
            }
        }
        out.push(line.to_string());
    }

    if applied {
        Some(out.join("\n"))
    } else {
        None
    }
}

/// Add `flush=True` to statement-position `print(...)` calls that fit on one
/// line and do not already pass a flush argument.
pub(super) fn print_flush(code: &str) -> Option<String> {
    let mut out: Vec<String> = Vec::new();
    let mut applied = false;

    for line in code.split('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with("print(") && !trimmed.contains("flush") {
            if let Some(close) = matching_paren(trimmed, 5) {
                let indent = &line[..line.len() - trimmed.len()];
                let inner = &trimmed[6..close];
                let patched = if inner.trim().is_empty() {
                    format!("{}print(flush=True){}", indent, &trimmed[close + 1..])
                } else {
                    format!(
                        "{}print({}, flush=True){}",
                        indent,
                        inner,
                        &trimmed[close + 1..]
                    )
                };
                out.push(patched);
                applied = true;
                continue;
            }
        }
        out.push(line.to_string());
    }

    if applied {
        Some(out.join("\n"))
    } else {
        None
    }
}

/// Byte index of the parenthesis matching the one at byte `open_at`, on a
/// single line, string-aware. Calls spanning multiple lines fail the
/// precondition.
fn matching_paren(line: &str, open_at: usize) -> Option<usize> {
    if line.as_bytes().get(open_at) != Some(&b'(') {
        return None;
    }
    let mut depth = 0;
    let mut in_str: Option<char> = None;
    let mut skip_next = false;
    for (i, c) in line[open_at..].char_indices() {
        if skip_next {
            skip_next = false;
            continue;
        }
        match in_str {
            Some(quote) => match c {
                '\\' => skip_next = true,
                _ if c == quote => in_str = None,
                _ => {}
            },
            None => match c {
                '\'' | '"' => in_str = Some(c),
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(open_at + i);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

/// Non-destructive dependency swap: when the source leans on pandas, offer
/// polars next to it without removing anything.
pub(super) fn pandas_to_polars(code: &str) -> Option<String> {
    let uses_pandas =
        code.contains("import pandas") || code.contains("pd.read_") || code.contains("pandas.");
    if !uses_pandas {
        return None;
    }
    Some(super::ensure_import(code, "import polars as pl"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = r#"from pathlib import Path
import sys

def get_size(f):
    return f.stat().st_size

p = Path(sys.argv[1] if len(sys.argv) > 1 else ".")
files = sorted(f.name for f in p.glob("*.csv"))
for name in files:
    print(name)
"#;

    #[test]
    fn files_span_covers_single_line_statement() {
        let (start, end) = files_statement_span(SEED).expect("span");
        assert_eq!(
            &SEED[start..end],
            r#"files = sorted(f.name for f in p.glob("*.csv"))"#
        );
    }

    #[test]
    fn files_span_extends_over_continuation_lines() {
        let code = "files = sorted(\n    xs,\n    key=len,\n)\nprint(files)\n";
        let (start, end) = files_statement_span(code).expect("span");
        assert_eq!(&code[start..end], "files = sorted(\n    xs,\n    key=len,\n)");
    }

    #[test]
    fn files_span_ignores_equality_comparisons() {
        assert!(files_statement_span("files == other\n").is_none());
        assert!(files_statement_span("    files = nested\n").is_none());
    }

    #[test]
    fn use_scandir_swaps_the_assignment() {
        let out = use_scandir(SEED).expect("applies");
        assert!(out.contains("os.scandir(p)"));
        assert!(!out.contains(r#"files = sorted(f.name for f in p.glob("*.csv"))"#));
        assert!(out.contains("for name in files:"), "tail preserved");
    }

    #[test]
    fn threaded_and_process_variants_apply_to_the_same_key() {
        assert!(threaded_stat(SEED)
            .expect("threaded applies")
            .contains("ThreadPoolExecutor"));
        assert!(multiprocessing_sizes(SEED)
            .expect("mp applies")
            .contains("ProcessPoolExecutor"));
        assert!(async_glob(SEED)
            .expect("async applies")
            .contains("asyncio.run"));
    }

    #[test]
    fn add_lru_cache_decorates_once() {
        let once = add_lru_cache(SEED).expect("applies");
        assert!(once.contains("@lru_cache(maxsize=None)\ndef get_size(f):"));
        // Second application finds the decorator and backs off.
        assert!(add_lru_cache(&once).is_none());
    }

    #[test]
    fn add_lru_cache_goes_above_existing_decorators() {
        let code = "@timed\ndef get_size(f):\n    return 0\n";
        let out = add_lru_cache(code).expect("applies");
        assert!(out.starts_with("@lru_cache(maxsize=None)\n@timed\ndef get_size(f):"));
    }

    #[test]
    fn add_lru_cache_needs_a_known_helper() {
        assert!(add_lru_cache("def other():\n    pass\n").is_none());
    }

    #[test]
    fn print_flush_rewrites_unflushed_calls_only() {
        let code = "print(\"a\")\nprint(\"b\", flush=True)\nprint()\n";
        let out = print_flush(code).expect("applies");
        assert!(out.contains("print(\"a\", flush=True)"));
        assert!(out.contains("print(\"b\", flush=True)"));
        assert!(out.contains("print(flush=True)"));
        assert_eq!(out.matches("flush=True").count(), 3);
    }

    #[test]
    fn print_flush_leaves_multiline_calls_alone() {
        let code = "print(\n    value\n)\n";
        assert!(print_flush(code).is_none());
    }

    #[test]
    fn print_flush_handles_parens_inside_strings() {
        let code = "print(\"a ) b\")\n";
        let out = print_flush(code).expect("applies");
        assert_eq!(out, "print(\"a ) b\", flush=True)\n");
    }

    #[test]
    fn pandas_to_polars_is_additive() {
        let code = "import pandas as pd\ndf = pd.read_csv(\"x.csv\")\n";
        let out = pandas_to_polars(code).expect("applies");
        assert!(out.contains("import polars as pl"));
        assert!(out.contains("import pandas as pd"));
    }
}
