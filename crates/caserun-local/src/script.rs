use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Bundle subdirectories searched for case scripts, in order.
pub const SCRIPT_ROOTS: &[&str] = &["scripts", "cases"];

/// File name a case number maps to, e.g. `TC001` -> `TC001.py`.
pub fn script_file_name(number: &str, extension: &str) -> String {
    let extension = extension.trim_start_matches('.');
    let suffix = format!(".{}", extension);
    if extension.is_empty() || number.ends_with(&suffix) {
        number.to_string()
    } else {
        format!("{}{}", number, suffix)
    }
}

/// Find the script for `number` anywhere below the bundle's script roots.
/// Exact file-name match; walk order is sorted so the result is stable.
pub fn resolve_script(bundle: &Path, number: &str, extension: &str) -> Option<PathBuf> {
    let file_name = script_file_name(number, extension);

    for root in SCRIPT_ROOTS {
        let dir = bundle.join(root);
        if !dir.is_dir() {
            continue;
        }
        let found = WalkDir::new(&dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                    None
                }
            })
            .find(|entry| entry.file_type().is_file() && entry.file_name() == file_name.as_str());

        if let Some(entry) = found {
            debug!(script = %entry.path().display(), "script resolved");
            return Some(entry.into_path());
        }
    }

    debug!(bundle = %bundle.display(), file = %file_name, "no matching script");
    None
}
