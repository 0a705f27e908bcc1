use regex::Regex;

/// Replace the body between a pair of marker comment lines,
///
/// ```text
///     # === BEGIN_NAME ===
///         ...body...
///     # === END_NAME ===
/// ```
///
/// keeping both marker lines verbatim. At most one region is rewritten; a
/// missing marker pair leaves the source unchanged.
pub fn replace_block_between(
    mark_start: &str,
    mark_end: &str,
    new_block: &str,
    src: &str,
) -> String {
    let pattern = format!(
        r"(?s)(\s*#\s*===\s*{}\s*===.*?\n)(.*?)(\s*#\s*===\s*{}\s*===.*?\n)",
        regex::escape(mark_start),
        regex::escape(mark_end)
    );
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(_) => return src.to_string(),
    };
    match re.captures(src) {
        Some(caps) => {
            let whole = caps.get(0).map(|m| (m.start(), m.end()));
            let (start, end) = match whole {
                Some(span) => span,
                None => return src.to_string(),
            };
            let mut out = String::with_capacity(src.len());
            out.push_str(&src[..start]);
            out.push_str(&caps[1]);
            out.push_str(new_block);
            out.push('\n');
            out.push_str(&caps[3]);
            out.push_str(&src[end..]);
            out
        }
        None => src.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKED: &str = "\
head()
    # === BEGIN_FETCH_LOOP (mutation anchor) ===
    old_body()
    # === END_FETCH_LOOP ===
tail()
";

    #[test]
    fn keeps_marker_lines_and_swaps_body() {
        let out = replace_block_between(
            "BEGIN_FETCH_LOOP (mutation anchor)",
            "END_FETCH_LOOP",
            "    new_body()",
            MARKED,
        );
        assert!(out.contains("# === BEGIN_FETCH_LOOP (mutation anchor) ==="));
        assert!(out.contains("# === END_FETCH_LOOP ==="));
        assert!(out.contains("new_body()"));
        assert!(!out.contains("old_body()"));
        assert!(out.starts_with("head()\n"));
        assert!(out.ends_with("tail()\n"));
    }

    #[test]
    fn missing_markers_leave_source_unchanged() {
        let out = replace_block_between("BEGIN_NOPE", "END_NOPE", "x()", MARKED);
        assert_eq!(out, MARKED);
    }

    #[test]
    fn replacement_reaches_a_fixed_point() {
        let once = replace_block_between(
            "BEGIN_FETCH_LOOP (mutation anchor)",
            "END_FETCH_LOOP",
            "    new_body()",
            MARKED,
        );
        let twice = replace_block_between(
            "BEGIN_FETCH_LOOP (mutation anchor)",
            "END_FETCH_LOOP",
            "    new_body()",
            &once,
        );
        assert_eq!(once, twice, "re-application must not drift the markers");
    }

    #[test]
    fn only_the_first_region_is_rewritten() {
        let doubled = format!("{}{}", MARKED, MARKED);
        let out = replace_block_between(
            "BEGIN_FETCH_LOOP (mutation anchor)",
            "END_FETCH_LOOP",
            "    new_body()",
            &doubled,
        );
        assert_eq!(out.matches("old_body()").count(), 1);
        assert_eq!(out.matches("new_body()").count(), 1);
    }
}
