use std::path::{Component, Path, PathBuf};

// Never deletable, even with force.
const CRITICAL_PREFIXES: &[&str] = &[
    "/System",
    "/usr",
    "/bin",
    "/sbin",
    "/etc",
    "/var",
    "/private/etc",
    "/private/var",
    "/Library/System",
    "/Library/Application Support",
    "/Applications",
];

// Per-user scratch areas that live under a protected prefix.
const EXEMPT_PREFIXES: &[&str] = &[
    "/var/folders",
    "/var/tmp",
    "/private/var/folders",
    "/private/var/tmp",
];

/// The protected prefix `path` falls under, matched per component and
/// case-insensitively after resolving `.` and `..` lexically.
pub fn critical_prefix_for(path: &Path) -> Option<&'static str> {
    let normalized = lowercase_normalized(path);
    let under = |prefix: &str| normalized.starts_with(prefix.to_lowercase());
    if EXEMPT_PREFIXES.iter().any(|prefix| under(prefix)) {
        return None;
    }
    CRITICAL_PREFIXES.iter().copied().find(|prefix| under(prefix))
}

pub fn is_hard_protected(path: &Path) -> bool {
    critical_prefix_for(path).is_some()
}

fn lowercase_normalized(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part.to_string_lossy().to_lowercase()),
            other => out.push(other.as_os_str()),
        }
    }
    out
}
