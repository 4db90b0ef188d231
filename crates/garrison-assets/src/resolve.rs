//! Request path resolution with single-page-application fallback.

use std::path::{Path, PathBuf};

const INDEX: &str = "index.html";

/// Outcome of resolving a request path against the asset root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// An existing file under the root.
    File(PathBuf),
    /// An existing directory; redirect to its index.
    Redirect(String),
    /// Nothing matched; serve the root index so the client router can take over.
    Fallback(PathBuf),
    /// Nothing matched and there is no root index either.
    NotFound,
}

/// Resolve a raw (percent-encoded) request path.
pub async fn resolve(root: &Path, request_path: &str) -> Resolved {
    let root_index = root.join(INDEX);

    let Some(decoded) = percent_decode(request_path) else {
        return Resolved::NotFound;
    };

    let mut relative = PathBuf::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Resolved::NotFound,
            s if s.contains('\\') || s.contains('\0') => return Resolved::NotFound,
            s => relative.push(s),
        }
    }

    if relative.as_os_str().is_empty() {
        return if is_file(&root_index).await {
            Resolved::File(root_index)
        } else {
            Resolved::NotFound
        };
    }

    let candidate = root.join(&relative);
    match tokio::fs::metadata(&candidate).await {
        Ok(meta) if meta.is_file() => return Resolved::File(candidate),
        Ok(meta) if meta.is_dir() => {
            let base = request_path.trim_end_matches('/');
            return Resolved::Redirect(format!("{}/{}", base, INDEX));
        }
        _ => {}
    }

    if is_file(&root_index).await {
        Resolved::Fallback(root_index)
    } else {
        Resolved::NotFound
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Decode `%XX` escapes. Returns `None` for malformed escapes or non-UTF-8 output.
pub fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = hex_value(*bytes.get(i + 1)?)?;
            let lo = hex_value(*bytes.get(i + 2)?)?;
            out.push(hi << 4 | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).ok()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
