use std::fs::Metadata;
use std::path::Path;

/// Lowercased, separator-normalised view of a path for pattern matching.
#[derive(Debug)]
pub(crate) struct PathContext {
    lower: String,
}

impl PathContext {
    pub(crate) fn new(path: &Path) -> Self {
        let lower = path.to_string_lossy().replace('\\', "/").to_lowercase();
        Self { lower }
    }

    /// Substring match of any pattern against the lowercased path.
    pub(crate) fn contains_any<S: AsRef<str>>(&self, patterns: &[S]) -> bool {
        patterns
            .iter()
            .any(|pattern| self.lower.contains(&pattern.as_ref().to_lowercase()))
    }
}

/// `ls`-style mode string such as `-rw-r--r--` or `drwxr-xr-x`.
#[cfg(unix)]
pub(crate) fn permission_string(metadata: &Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;

    let mode = metadata.permissions().mode();
    let file_type = metadata.file_type();
    let kind = if file_type.is_dir() {
        'd'
    } else if file_type.is_symlink() {
        'l'
    } else {
        '-'
    };
    let mut out = String::with_capacity(10);
    out.push(kind);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

#[cfg(not(unix))]
pub(crate) fn permission_string(metadata: &Metadata) -> String {
    let kind = if metadata.is_dir() { 'd' } else { '-' };
    if metadata.permissions().readonly() {
        format!("{kind}r--r--r--")
    } else {
        format!("{kind}rw-rw-rw-")
    }
}
