//! Path glob matching for include/exclude filters
//!
//! Supports literal paths, `*` (matches any run of characters, including
//! `/`), and `**` as a leading, trailing or middle path segment. Matching is
//! case-sensitive and treats `\` as `/`.

/// Test `path` against `pattern`
pub fn matches(pattern: &str, path: &str) -> bool {
    let pattern = pattern.replace('\\', "/");
    let path = path.replace('\\', "/");
    matches_normalized(&pattern, &path)
}

/// True when `path` matches at least one of `patterns`
pub fn matches_any(patterns: &[String], path: &str) -> bool {
    patterns.iter().any(|pattern| matches(pattern, path))
}

fn matches_normalized(pattern: &str, path: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == path;
    }

    if let Some(suffix) = pattern.strip_prefix("**/") {
        return path_suffixes(path).any(|tail| matches_normalized(suffix, tail));
    }

    if let Some((prefix, suffix)) = pattern.split_once("/**/") {
        let Some(remainder) = strip_dir_prefix(path, prefix) else {
            return false;
        };
        return path_suffixes(remainder).any(|tail| simple_match(suffix, tail));
    }

    if let Some(prefix) = pattern.strip_suffix("/**") {
        return strip_dir_prefix(path, prefix).is_some();
    }

    simple_match(pattern, path)
}

/// `path` itself followed by every tail that starts after a `/`
fn path_suffixes(path: &str) -> impl Iterator<Item = &str> {
    std::iter::once(path).chain(
        path.match_indices('/')
            .map(move |(idx, _)| &path[idx + 1..]),
    )
}

/// Remainder of `path` below directory `prefix`; empty when `path == prefix`
fn strip_dir_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if path == prefix {
        return Some("");
    }
    path.strip_prefix(prefix)?.strip_prefix('/')
}

/// Fragments between `*` must appear in order; the first anchors at the
/// start and the last at the end
fn simple_match(pattern: &str, path: &str) -> bool {
    let fragments: Vec<&str> = pattern.split('*').collect();
    if fragments.len() == 1 {
        return pattern == path;
    }

    let first = fragments[0];
    let last = fragments[fragments.len() - 1];

    if !path.starts_with(first) {
        return false;
    }
    let mut pos = first.len();

    for fragment in &fragments[1..fragments.len() - 1] {
        if fragment.is_empty() {
            continue;
        }
        match path[pos..].find(fragment) {
            Some(idx) => pos += idx + fragment.len(),
            None => return false,
        }
    }

    path.len() >= pos + last.len() && path.ends_with(last)
}
