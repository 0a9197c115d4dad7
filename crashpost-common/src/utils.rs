// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::borrow::Cow;
use std::path::Path;

use tracing::trace;

/// Get the final component of a path, with either `/` or `\` separators.
pub fn basename(f: &str) -> &str {
    match f.rfind(|c| c == '/' || c == '\\') {
        None => f,
        Some(index) => &f[(index + 1)..],
    }
}

/// Replace the first occurrence of `home` in `path` with `$HOME`.
///
/// Reports must not leak the user name through file paths.
pub fn mangle_home<'a>(path: &'a str, home: Option<&str>) -> Cow<'a, str> {
    match home {
        Some(home) if !home.is_empty() && path.contains(home) => {
            Cow::Owned(path.replacen(home, "$HOME", 1))
        }
        _ => Cow::Borrowed(path),
    }
}

/// Resolve symlinks in `path`, falling back to the path as given.
pub fn canonical_path(path: &str) -> String {
    match std::fs::canonicalize(Path::new(path)) {
        Ok(resolved) => resolved.to_string_lossy().into_owned(),
        Err(e) => {
            trace!("utils: cannot canonicalize {path}: {e}");
            path.to_string()
        }
    }
}

/// Lowercase `0x`-prefixed hex, without padding.
pub fn hex_address(address: u64) -> String {
    format!("{address:#x}")
}
