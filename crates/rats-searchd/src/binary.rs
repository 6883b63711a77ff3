//! Locating the searchd executable

use std::path::{Path, PathBuf};

use rats_core::prelude::*;

/// File name of the daemon binary on this platform
pub fn searchd_file_name() -> String {
    format!("searchd{}", std::env::consts::EXE_SUFFIX)
}

/// Resolve the searchd binary.
///
/// Lookup order:
/// 1. An explicit path (settings or `--searchd`)
/// 2. Next to the running executable
/// 3. In a `resources/` directory next to the running executable
/// 4. `searchd` on `PATH`
pub fn resolve_searchd(explicit: Option<&Path>) -> Result<PathBuf> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    resolve_searchd_from(explicit, exe_dir.as_deref())
}

/// Same as [`resolve_searchd`] with the executable directory supplied by the caller
pub fn resolve_searchd_from(explicit: Option<&Path>, exe_dir: Option<&Path>) -> Result<PathBuf> {
    let mut searched = Vec::new();

    if let Some(path) = explicit {
        if path.is_file() {
            return canonical(path);
        }
        searched.push(path.display().to_string());
        warn!("Configured searchd path does not exist: {}", path.display());
    }

    if let Some(dir) = exe_dir {
        for candidate in [
            dir.join(searchd_file_name()),
            dir.join("resources").join(searchd_file_name()),
        ] {
            if candidate.is_file() {
                return canonical(&candidate);
            }
            searched.push(candidate.display().to_string());
        }
    }

    match which::which("searchd") {
        Ok(path) => canonical(&path),
        Err(_) => {
            searched.push("PATH".to_string());
            Err(Error::SearchdNotFound {
                searched: searched.join(", "),
            })
        }
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    // dunce avoids `\\?\` verbatim paths on Windows, which searchd cannot parse
    let path = dunce::canonicalize(path)?;
    debug!("Using searchd binary: {}", path.display());
    Ok(path)
}
