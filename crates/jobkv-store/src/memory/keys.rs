pub(super) const ROOT: &str = "/";

/// Canonical form of a key: leading slash, no empty or trailing components.
pub(super) fn normalize(key: &str) -> String {
    let parts: Vec<&str> = key.split('/').filter(|p| !p.is_empty()).collect();
    format!("/{}", parts.join("/"))
}

/// Proper ancestors of a canonical key, outermost first, root excluded.
pub(super) fn ancestors(key: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut end = 0;
    while let Some(pos) = key[end + 1..].find('/') {
        end += pos + 1;
        out.push(key[..end].to_string());
    }
    out
}

/// Prefix shared by every descendant of `key`.
pub(super) fn child_prefix(key: &str) -> String {
    if key == ROOT {
        ROOT.to_string()
    } else {
        format!("{key}/")
    }
}

pub(super) fn is_descendant(key: &str, ancestor: &str) -> bool {
    key != ancestor && key.starts_with(&child_prefix(ancestor))
}
