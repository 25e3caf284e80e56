//! Mapping between local filesystem paths and server paths.

use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use models::Metadata;
use toolkit::{normalize_path, parent_dir};

/// Server form of a local path under `work_dir`: forward slashes, leading
/// `/`, lowercased. `None` when the path is not under the work dir.
pub fn server_rel_path(work_dir: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(work_dir).ok()?;
    let mut out = String::new();
    for comp in rel.components() {
        out.push('/');
        out.push_str(&comp.as_os_str().to_string_lossy());
    }
    if out.is_empty() {
        return None;
    }
    Some(normalize_path(&out))
}

/// Local path a server entry materializes at: the work dir, the server
/// parent's components, then the display name (which keeps original case).
pub fn local_path(work_dir: &Path, server_path: &str, name: &str) -> PathBuf {
    let parent = parent_dir(server_path);
    let mut out = work_dir.to_path_buf();
    for comp in parent.split('/').filter(|c| !c.is_empty()) {
        out.push(comp);
    }
    out.push(name);
    out
}

/// Wire path that keeps the display name's case while the parent components
/// stay in their normalized form.
pub fn wire_path_with_name(server_path: &str, name: &str) -> String {
    let parent = parent_dir(server_path);
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Read size, mtime and content hash for a local file into wire metadata.
/// `rev` stays 0; the server assigns it.
pub fn local_metadata(work_dir: &Path, path: &Path) -> io::Result<Metadata> {
    let md = std::fs::metadata(path)?;
    let rel = server_rel_path(work_dir, path).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is outside the work dir", path.display()),
        )
    })?;
    let modified = md
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let hash = if md.is_dir() {
        String::new()
    } else {
        toolkit::hash_file(path)?
    };
    Ok(Metadata {
        size: if md.is_dir() { 0 } else { md.len() as i64 },
        rev: 0,
        name,
        is_dir: md.is_dir(),
        modified,
        is_removed: false,
        path: rel,
        hash,
    })
}
