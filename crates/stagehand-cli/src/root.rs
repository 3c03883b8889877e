use stagehand_core::config::CONFIG_FILE;
use std::path::{Path, PathBuf};

/// Project root resolution, in priority order: the `--root` flag or
/// `STAGEHAND_ROOT` (passed in as `explicit`), then the nearest ancestor
/// of the current directory holding a `stagehand.yaml`, then the nearest
/// ancestor holding `.git/`, then the current directory itself.
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    nearest_ancestor(&cwd, |d| d.join(CONFIG_FILE).is_file())
        .or_else(|| nearest_ancestor(&cwd, |d| d.join(".git").is_dir()))
        .unwrap_or(cwd)
}

fn nearest_ancestor(start: &Path, has_marker: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|d| has_marker(d))
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        let result = resolve_root(Some(dir.path()));
        assert_eq!(result, dir.path());
    }

    #[test]
    fn config_file_marks_the_root() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "version: 1\n").unwrap();
        let deep = dir.path().join("tsa-coach-backend/handlers");
        std::fs::create_dir_all(&deep).unwrap();

        let found = nearest_ancestor(&deep, |d| d.join(CONFIG_FILE).is_file());
        assert_eq!(found.as_deref(), Some(dir.path()));
    }

    #[test]
    fn git_dir_marks_the_root() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let deep = dir.path().join("src");
        std::fs::create_dir_all(&deep).unwrap();

        let found = nearest_ancestor(&deep, |d| d.join(".git").is_dir());
        assert_eq!(found.as_deref(), Some(dir.path()));
    }

    #[test]
    fn no_marker_resolves_to_none() {
        let dir = TempDir::new().unwrap();
        let found = nearest_ancestor(dir.path(), |d| d.join(CONFIG_FILE).is_file());
        assert_eq!(found, None);
    }
}
