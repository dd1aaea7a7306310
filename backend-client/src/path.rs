use std::borrow::Cow;

/// Root of every canonical backend resource path.
pub const ADT_ROOT: &str = "/sap/bc/adt";

/// Segment that separates the IDE project name from the resource path in a
/// workspace URI such as `/DEV_100/.adt/programs/programs/zfoo/zfoo.asprog`.
const WORKSPACE_MARKER: &str = ".adt";

const WORKSPACE_SCHEMES: [&str; 2] = ["adt://", "semanticfs:"];

/// Rewrite an IDE-workspace URI to the canonical backend path.
///
/// Canonical paths and absolute URLs are returned unchanged. The result is
/// always canonical, so `normalize_path(normalize_path(p)) == normalize_path(p)`.
pub fn normalize_path(path: &str) -> Cow<'_, str> {
    let (resource, query) = match path.split_once('?') {
        Some((resource, query)) => (resource, Some(query)),
        None => (path, None),
    };

    if resource.starts_with(ADT_ROOT)
        || resource.starts_with("http://")
        || resource.starts_with("https://")
    {
        return Cow::Borrowed(path);
    }

    let rest = WORKSPACE_SCHEMES
        .iter()
        .find_map(|scheme| resource.strip_prefix(scheme))
        .unwrap_or(resource);

    // `adt://DEV/sap/bc/adt/...` carries the canonical path behind a project.
    if let Some(idx) = rest.find(ADT_ROOT) {
        return Cow::Owned(with_query(rest[idx..].to_string(), query));
    }

    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    let Some(marker) = segments.iter().position(|s| *s == WORKSPACE_MARKER) else {
        return Cow::Borrowed(path);
    };
    if marker == 0 {
        return Cow::Borrowed(path);
    }

    let mut tail: Vec<&str> = segments[marker + 1..].to_vec();
    if let Some(last) = tail.last().copied()
        && let Some((stem, _extension)) = last.split_once('.')
        && !stem.is_empty()
    {
        let duplicated = tail.len() >= 2 && tail[tail.len() - 2].eq_ignore_ascii_case(stem);
        tail.pop();
        if !duplicated {
            tail.push(stem);
        }
    }

    let canonical = if tail.is_empty() {
        ADT_ROOT.to_string()
    } else {
        format!("{ADT_ROOT}/{}", tail.join("/"))
    };
    Cow::Owned(with_query(canonical, query))
}

fn with_query(path: String, query: Option<&str>) -> String {
    match query {
        Some(query) => format!("{path}?{query}"),
        None => path,
    }
}
