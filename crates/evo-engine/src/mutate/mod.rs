//! Named source-to-source mutation recipes for the candidate programs.
//!
//! Every recipe is total and failure-safe: a recipe whose structural
//! precondition is absent, or that is handed malformed source, returns the
//! input unchanged. The target language of the candidates is Python; with no
//! Python parser at hand the recipes work on exact textual/structural
//! signatures, guarded by a lightweight source shape check.

mod listing;
mod markers;
mod web;

pub use markers::replace_block_between;

/// A catalog entry: the recipe name is part of the external contract.
pub struct RecipeInfo {
    pub name: &'static str,
    pub summary: &'static str,
}

pub const CATALOG: &[RecipeInfo] = &[
    RecipeInfo {
        name: "pandas_to_polars",
        summary: "notice pandas usage and add a polars import alongside it",
    },
    RecipeInfo {
        name: "add_lru_cache",
        summary: "memoize known size-lookup helpers with functools.lru_cache",
    },
    RecipeInfo {
        name: "turbo_inline_print_flush",
        summary: "add flush=True to print calls that lack it",
    },
    RecipeInfo {
        name: "use_scandir",
        summary: "replace the files listing with an os.scandir walk",
    },
    RecipeInfo {
        name: "threaded_stat",
        summary: "stat the listed files through a thread pool",
    },
    RecipeInfo {
        name: "multiprocessing_sizes",
        summary: "stat the listed files through a process pool",
    },
    RecipeInfo {
        name: "async_glob",
        summary: "run the directory scan on an asyncio executor",
    },
    RecipeInfo {
        name: "threaded_fetch",
        summary: "parallelize the marked fetch loop with a thread pool",
    },
    RecipeInfo {
        name: "aiohttp_fetch",
        summary: "replace the marked fetch loop with an aiohttp client",
    },
    RecipeInfo {
        name: "add_retry_headers",
        summary: "route fetch_one through a shared session with bounded retries",
    },
    RecipeInfo {
        name: "disk_cache",
        summary: "consult an on-disk page cache before any network call",
    },
];

/// Apply one recipe by name. Unknown names, unmet preconditions and
/// malformed input all degrade to returning `code` unchanged.
pub fn mutate(code: &str, recipe: &str) -> String {
    let transformed = match recipe {
        "pandas_to_polars" => safe_transform(code, listing::pandas_to_polars, &[]),
        "add_lru_cache" => safe_transform(
            code,
            listing::add_lru_cache,
            &["from functools import lru_cache"],
        ),
        "turbo_inline_print_flush" => safe_transform(code, listing::print_flush, &[]),
        "use_scandir" => safe_transform(code, listing::use_scandir, &["import os"]),
        "threaded_stat" => safe_transform(
            code,
            listing::threaded_stat,
            &["from concurrent.futures import ThreadPoolExecutor", "import os"],
        ),
        "multiprocessing_sizes" => safe_transform(
            code,
            listing::multiprocessing_sizes,
            &[
                "from concurrent.futures import ProcessPoolExecutor, ThreadPoolExecutor",
                "import os",
                "import sys",
            ],
        ),
        "async_glob" => safe_transform(
            code,
            listing::async_glob,
            &["import asyncio", "import os"],
        ),
        "threaded_fetch" => safe_transform(code, web::threaded_fetch, &[]),
        "aiohttp_fetch" => safe_transform(code, web::aiohttp_fetch, &[]),
        "add_retry_headers" => safe_transform(code, web::add_retry_headers, &[]),
        "disk_cache" => safe_transform(code, web::disk_cache, &[]),
        _ => None,
    };
    transformed.unwrap_or_else(|| code.to_string())
}

/// The single funnel every recipe goes through: reject source that fails the
/// shape check, run the transform, and on success inject the recipe's
/// declared imports exactly once.
fn safe_transform(
    code: &str,
    transform: fn(&str) -> Option<String>,
    imports: &[&str],
) -> Option<String> {
    if !python_shape_ok(code) {
        return None;
    }
    let mut out = transform(code)?;
    for import in imports {
        out = ensure_import(&out, import);
    }
    Some(out)
}

/// Prepend an import line unless it is already textually present.
fn ensure_import(code: &str, import_stmt: &str) -> String {
    if code.contains(import_stmt) {
        return code.to_string();
    }
    format!("{}\n{}", import_stmt, code)
}

/// Cheap stand-in for a parser: balanced brackets outside strings and
/// comments, and no string left open at end of input. Anything that fails
/// this is treated as unparsable and left untouched by every recipe.
fn python_shape_ok(code: &str) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Str {
        None,
        Single(char),
        Triple(char),
    }

    let bytes: Vec<char> = code.chars().collect();
    let mut depth: i32 = 0;
    let mut state = Str::None;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match state {
            Str::None => match c {
                '#' => {
                    while i < bytes.len() && bytes[i] != '\n' {
                        i += 1;
                    }
                }
                '\'' | '"' => {
                    if i + 2 < bytes.len() && bytes[i + 1] == c && bytes[i + 2] == c {
                        state = Str::Triple(c);
                        i += 2;
                    } else {
                        state = Str::Single(c);
                    }
                }
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => {
                    depth -= 1;
                    if depth < 0 {
                        return false;
                    }
                }
                _ => {}
            },
            Str::Single(quote) => match c {
                '\\' => i += 1,
                '\n' => return false,
                _ if c == quote => state = Str::None,
                _ => {}
            },
            Str::Triple(quote) => {
                if c == '\\' {
                    i += 1;
                } else if c == quote
                    && i + 2 < bytes.len()
                    && bytes[i + 1] == quote
                    && bytes[i + 2] == quote
                {
                    state = Str::None;
                    i += 2;
                }
            }
        }
        i += 1;
    }
    depth == 0 && state == Str::None
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV_SEED: &str = r#"from pathlib import Path
import sys

def main(root: str) -> None:
    p = Path(root)
    print("start")

p = Path(sys.argv[1] if len(sys.argv) > 1 else ".")
files = sorted(f.name for f in p.glob("*.csv"))
for name in files:
    print(name)
"#;

    const BROKEN: &str = "def f(:\n    files = [1, 2\nprint('unclosed\n";

    #[test]
    fn every_recipe_returns_invalid_source_unchanged() {
        for info in CATALOG {
            assert_eq!(
                mutate(BROKEN, info.name),
                BROKEN,
                "recipe {} must not touch malformed input",
                info.name
            );
        }
    }

    #[test]
    fn unknown_recipe_is_a_no_op() {
        assert_eq!(mutate(CSV_SEED, "no_such_recipe"), CSV_SEED);
    }

    #[test]
    fn recipe_without_precondition_is_a_no_op() {
        // No fetch loop markers in the CSV seed.
        assert_eq!(mutate(CSV_SEED, "threaded_fetch"), CSV_SEED);
        // No pandas usage either.
        assert_eq!(mutate(CSV_SEED, "pandas_to_polars"), CSV_SEED);
    }

    #[test]
    fn applied_recipe_injects_imports_exactly_once() {
        let once = mutate(CSV_SEED, "use_scandir");
        assert_ne!(once, CSV_SEED);
        assert_eq!(once.matches("import os\n").count(), 1);
        let twice = mutate(&once, "use_scandir");
        assert_eq!(twice.matches("import os\n").count(), 1);
    }

    #[test]
    fn shape_check_accepts_real_source() {
        assert!(python_shape_ok(CSV_SEED));
        assert!(python_shape_ok("x = \"a # not a comment\"\n"));
        assert!(python_shape_ok("s = '''multi\nline'''\n"));
    }

    #[test]
    fn shape_check_rejects_unbalanced_and_unterminated() {
        assert!(!python_shape_ok("files = [1, 2\n"));
        assert!(!python_shape_ok("x = )\n"));
        assert!(!python_shape_ok("s = 'open\n"));
        assert!(!python_shape_ok("s = '''never closed\n"));
    }

    #[test]
    fn ensure_import_is_idempotent() {
        let with = ensure_import(CSV_SEED, "import os");
        assert!(with.starts_with("import os\n"));
        assert_eq!(ensure_import(&with, "import os"), with);
        // Already-present imports are detected textually.
        assert_eq!(ensure_import(CSV_SEED, "import sys"), CSV_SEED);
    }
}
