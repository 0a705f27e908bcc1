//! Recipes for the web-fetch family of candidates. The fetch loop lives
//! between BEGIN_FETCH_LOOP / END_FETCH_LOOP markers; `fetch_one` is located
//! by its exact textual signature.

use super::markers::replace_block_between;
use once_cell::sync::Lazy;
use regex::Regex;

const FETCH_ONE_SIG: &str =
    "def fetch_one(url: str, *, timeout: float = 10.0) -> tuple[str, str]:";

const THREADED_FETCH_BLOCK: &str = r#"    from concurrent.futures import ThreadPoolExecutor
    workers = min(8, max(1, len(urls)))
    with ThreadPoolExecutor(max_workers=workers) as ex:
        for url, title in ex.map(fetch_one, urls):
            print(f"{url},{title}")"#;

const AIOHTTP_FETCH_BLOCK: &str = r#"    import asyncio, aiohttp

    async def _run_async(urls):
        timeout = aiohttp.ClientTimeout(total=10)
        connector = aiohttp.TCPConnector(limit=16, ssl=False)
        async with aiohttp.ClientSession(timeout=timeout, connector=connector, headers=DEFAULT_HEADERS) as sess:

            async def one(u: str):
                try:
                    async with sess.get(u) as resp:
                        resp.raise_for_status()
                        html = await resp.text()
                        return u, extract_title(html)
                except Exception:
                    return u, ""

            tasks = [asyncio.create_task(one(u)) for u in urls]
            for coro in asyncio.as_completed(tasks):
                url, title = await coro
                print(f"{url},{title}")

    asyncio.run(_run_async(urls))"#;

/// Parallelize the marked fetch loop, preserving input order via `ex.map`.
pub(super) fn threaded_fetch(code: &str) -> Option<String> {
    replace_marked_fetch_loop(code, THREADED_FETCH_BLOCK)
}

/// Swap the marked fetch loop for a concurrent aiohttp client session.
pub(super) fn aiohttp_fetch(code: &str) -> Option<String> {
    replace_marked_fetch_loop(code, AIOHTTP_FETCH_BLOCK)
}

/// Both accepted marker spellings: with and without the annotation.
fn replace_marked_fetch_loop(code: &str, block: &str) -> Option<String> {
    let mut out = replace_block_between(
        "BEGIN_FETCH_LOOP (mutation anchor)",
        "END_FETCH_LOOP",
        block,
        code,
    );
    if out == code {
        out = replace_block_between("BEGIN_FETCH_LOOP", "END_FETCH_LOOP", block, code);
    }
    if out == code {
        None
    } else {
        Some(out)
    }
}

const BUILD_SESSION_HELPER: &str = r#"
def _build_session() -> requests.Session:
    s = requests.Session()
    retry = Retry(
        total=2, backoff_factor=0.3,
        status_forcelist=(429, 500, 502, 503, 504),
        allowed_methods=frozenset(["GET"])
    )
    s.mount("http://", HTTPAdapter(max_retries=retry))
    s.mount("https://", HTTPAdapter(max_retries=retry))
    s.headers.update(DEFAULT_HEADERS)
    return s
"#;

static NAIVE_FETCH_BODY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)def fetch_one\(url: str, \*, timeout: float = 10\.0\) -> tuple\[str, str\]:\s*\n\s*try:\s*\n\s*r = requests\.get\(url, headers=DEFAULT_HEADERS, timeout=timeout\)\s*\n\s*r\.raise_for_status\(\)\s*\n\s*return url, extract_title\(r\.text\)\s*\n\s*except Exception:\s*\n\s*return url, "".*?\n"#,
    )
    .expect("static pattern")
});

const SESSION_FETCH_BODY: &str = r#"def fetch_one(url: str, *, timeout: float = 10.0) -> tuple[str, str]:
    global _SESSION
    try:
        if _SESSION is None:
            _SESSION = _build_session()
        r = _SESSION.get(url, timeout=timeout)
        r.raise_for_status()
        return url, extract_title(r.text)
    except Exception:
        return url, ""
"#;

/// Route `fetch_one` through one shared session carrying a bounded retry
/// policy (exponential backoff on the retryable status codes) and the
/// default headers. Each step checks for its own previous application, so
/// re-running the recipe converges instead of stacking.
pub(super) fn add_retry_headers(code: &str) -> Option<String> {
    let mut out = code.to_string();

    if !out.contains("from requests.adapters import HTTPAdapter") {
        out = out.replacen(
            "import requests",
            "import requests\nfrom requests.adapters import HTTPAdapter",
            1,
        );
    }
    if !out.contains("from urllib3.util.retry import Retry") {
        out = out.replacen(
            "from requests.adapters import HTTPAdapter",
            "from requests.adapters import HTTPAdapter\nfrom urllib3.util.retry import Retry",
            1,
        );
    }
    if !out.contains("_build_session()") {
        let with_helper = format!("{}\n{}", BUILD_SESSION_HELPER, FETCH_ONE_SIG);
        out = out.replacen(FETCH_ONE_SIG, &with_helper, 1);
    }
    if !out.contains("_SESSION = None") {
        out = out.replacen(
            "DEFAULT_HEADERS = {",
            "_SESSION = None\n\nDEFAULT_HEADERS = {",
            1,
        );
    }
    out = NAIVE_FETCH_BODY
        .replacen(&out, 1, regex::NoExpand(SESSION_FETCH_BODY))
        .into_owned();

    if out == code {
        None
    } else {
        Some(out)
    }
}

const CACHE_HELPER: &str = r#"
def _cache_path_for(url: str) -> Path:
    root = Path(".cache_web")
    root.mkdir(exist_ok=True)
    h = hashlib.sha1(url.encode("utf-8")).hexdigest()
    return root / f"{h}.html"
"#;

static FETCH_BODY_ANY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)def fetch_one\(url: str, \*, timeout: float = 10\.0\) -> tuple\[str, str\]:\s*\n\s*try:\s*\n\s*(.*?)\n\s*except Exception:\s*\n\s*return url, """#,
    )
    .expect("static pattern")
});

const CACHED_FETCH_BODY: &str = r#"def fetch_one(url: str, *, timeout: float = 10.0) -> tuple[str, str]:
    try:
        cp = _cache_path_for(url)
        if cp.exists():
            html = cp.read_text(encoding="utf-8", errors="ignore")
            return url, extract_title(html)
        sess = globals().get('_SESSION', None)
        if sess is not None:
            r = sess.get(url, timeout=timeout)
        else:
            r = requests.get(url, headers=DEFAULT_HEADERS, timeout=timeout)
        r.raise_for_status()
        html = r.text
        try:
            cp.write_text(html, encoding="utf-8")
        except Exception:
            pass
        return url, extract_title(html)
    except Exception:
        return url, """#;

/// Content-addressed on-disk cache, keyed by a stable hash of the URL and
/// consulted before any network call. Falls back to the shared session when
/// a previous recipe installed one.
pub(super) fn disk_cache(code: &str) -> Option<String> {
    let mut out = code.to_string();

    if !out.contains("hashlib") {
        out = out.replacen("import sys, re", "import sys, re, hashlib, os", 1);
    }
    if !out.contains("_cache_path_for(") {
        let with_helper = format!("{}\n{}", CACHE_HELPER, FETCH_ONE_SIG);
        out = out.replacen(FETCH_ONE_SIG, &with_helper, 1);
    }
    if !out.contains("cp = _cache_path_for(url)") {
        out = FETCH_BODY_ANY
            .replacen(&out, 1, regex::NoExpand(CACHED_FETCH_BODY))
            .into_owned();
    }

    if out == code {
        None
    } else {
        Some(out)
    }
}
