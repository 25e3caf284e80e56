//! Server-style path handling.
//!
//! Paths on the wire and in both databases are forward-slash strings with a
//! leading `/`. The server discards case entirely, so every lookup key goes
//! through [`clean_path`] or [`normalize_path`] first; [`only_clean_path`]
//! keeps the original case for display names.

/// Lexically simplify a forward-slash path: drop `.` components, resolve
/// `..`, and collapse duplicate slashes. A rooted input stays rooted; an
/// empty result becomes `.` (or `/` when rooted).
pub fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|c| *c != "..") {
                    out.pop();
                } else if !rooted {
                    out.push("..");
                }
            }
            c => out.push(c),
        }
    }
    let joined = out.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Clean and lowercase. This is the canonical form for database keys.
pub fn clean_path(path: &str) -> String {
    clean(path).to_lowercase()
}

/// Clean without touching case. Used where the basename must keep the case
/// the client sent, e.g. revision names.
pub fn only_clean_path(path: &str) -> String {
    clean(path)
}

/// Lowercase only.
pub fn normalize_path(path: &str) -> String {
    path.to_lowercase()
}

/// Directory portion of a path, with `.` mapped to `/` so that top-level
/// entries always parent onto the root.
pub fn parent_dir(path: &str) -> String {
    let dir = match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    };
    let cleaned = clean(dir);
    if cleaned == "." {
        "/".to_string()
    } else {
        cleaned
    }
}

/// Final path component; the whole input if it has no slash.
pub fn basename(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => trimmed[idx + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_collapses_dots_and_slashes() {
        assert_eq!(clean("/a//b"), "/a/b");
        assert_eq!(clean("/a/./b"), "/a/b");
        assert_eq!(clean("/a/b/../c"), "/a/c");
        assert_eq!(clean("/../a"), "/a");
        assert_eq!(clean("/"), "/");
        assert_eq!(clean(""), ".");
        assert_eq!(clean("a/.."), ".");
        assert_eq!(clean("../a"), "../a");
    }

    #[test]
    fn clean_path_lowercases() {
        assert_eq!(clean_path("/Docs//Report.TXT"), "/docs/report.txt");
        assert_eq!(only_clean_path("/Docs//Report.TXT"), "/Docs/Report.TXT");
        assert_eq!(normalize_path("/Docs/Report.TXT"), "/docs/report.txt");
    }

    #[test]
    fn parent_dir_maps_to_root() {
        assert_eq!(parent_dir("/a.txt"), "/");
        assert_eq!(parent_dir("/dir/x"), "/dir");
        assert_eq!(parent_dir("/dir/sub/x"), "/dir/sub");
        assert_eq!(parent_dir("a.txt"), "/");
        assert_eq!(parent_dir("/"), "/");
    }

    #[test]
    fn basename_takes_last_component() {
        assert_eq!(basename("/dir/x.txt"), "x.txt");
        assert_eq!(basename("/x"), "x");
        assert_eq!(basename("x"), "x");
        assert_eq!(basename("/dir/"), "dir");
    }
}
