use regex::Regex;
use std::sync::LazyLock;

const MAX_FILENAME_CHARS: usize = 200;

static ILLEGAL_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|\x00-\x1f\x7f]"#).unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static UNDERSCORE_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_{2,}").unwrap());

/// Makes a name safe to use as a single path component
///
/// Illegal and control characters become `_`, whitespace runs become a single
/// `_`, underscore runs collapse, leading dots are stripped and the result is
/// capped in length. Never returns an empty string.
pub fn sanitize_filename(name: &str) -> String {
    let name = ILLEGAL_CHARS_RE.replace_all(name.trim(), "_");
    let name = WHITESPACE_RE.replace_all(&name, "_");
    let name = UNDERSCORE_RUN_RE.replace_all(&name, "_");
    let name = name.trim_start_matches('.');

    let capped: String = name.chars().take(MAX_FILENAME_CHARS).collect();
    if capped.is_empty() || capped == "_" {
        "download".to_string()
    } else {
        capped
    }
}
