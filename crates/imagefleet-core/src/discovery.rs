//! イメージレジストリ発見ロジック
//!
//! images.kdl を自動的に発見する（環境変数 → 上方向探索）。

use crate::error::{RegistryError, RegistryResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Registry設定ファイルの候補（優先順）
pub const REGISTRY_FILENAMES: &[&str] = &[
    "images.kdl",
    ".imagefleet/images.kdl",
    "images.yml",
    "images.yaml",
];

/// Registry設定ファイルの環境変数
pub const REGISTRY_PATH_ENV: &str = "IMAGEFLEET_REGISTRY";

/// イメージレジストリを発見する
///
/// 検索順序:
/// 1. IMAGEFLEET_REGISTRY 環境変数
/// 2. カレントディレクトリの候補ファイル
/// 3. 上方向探索
#[tracing::instrument]
pub fn find_registry() -> Option<PathBuf> {
    // 1. 環境変数
    if let Ok(path_str) = std::env::var(REGISTRY_PATH_ENV) {
        let path = PathBuf::from(&path_str);
        debug!(env_path = %path_str, "Checking IMAGEFLEET_REGISTRY");
        if path.exists() {
            info!(registry_path = %path.display(), "Found registry from environment variable");
            return Some(path);
        }
        warn!(env_path = %path_str, "IMAGEFLEET_REGISTRY is set but file does not exist");
    }

    // 2. カレントディレクトリから上に向かって探す
    let start_dir = std::env::current_dir().ok()?;
    find_registry_from(&start_dir)
}

/// 指定ディレクトリから上方向にレジストリファイルを探す
pub fn find_registry_from(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();
    debug!(start_dir = %start_dir.display(), "Searching for image registry");

    loop {
        for filename in REGISTRY_FILENAMES {
            let registry_file = current.join(filename);
            if registry_file.is_file() {
                info!(registry_path = %registry_file.display(), "Found registry file");
                return Some(registry_file);
            }
        }

        if !current.pop() {
            break;
        }
    }

    debug!("Registry file not found");
    None
}

/// 明示指定があればそれを、なければ自動発見したパスを返す
pub fn resolve_registry_path(explicit: Option<&Path>) -> RegistryResult<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => find_registry().ok_or(RegistryError::NotFound),
    }
}

/// Registry ファイルのパスからプロジェクトルートを推定
///
/// `.imagefleet/` 配下に置かれている場合はその親を返す。
pub fn registry_root(registry_path: &Path) -> Option<&Path> {
    let parent = registry_path.parent()?;
    if parent.file_name().is_some_and(|name| name == ".imagefleet") {
        parent.parent()
    } else {
        Some(parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_find_registry_from_with_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();

        std::fs::write(root.join("images.kdl"), "").unwrap();

        let result = find_registry_from(root);
        assert!(result.is_some());
        assert!(result.unwrap().ends_with("images.kdl"));
    }

    #[test]
    fn test_find_registry_from_subdirectory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();

        std::fs::write(root.join("images.kdl"), "").unwrap();

        let sub_dir = root.join("crates").join("matrix-sed");
        std::fs::create_dir_all(&sub_dir).unwrap();

        let result = find_registry_from(&sub_dir);
        assert_eq!(result, Some(root.join("images.kdl")));
    }

    #[test]
    fn test_find_registry_from_hidden_dir_and_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();

        std::fs::create_dir(root.join(".imagefleet")).unwrap();
        std::fs::write(root.join(".imagefleet/images.kdl"), "").unwrap();
        std::fs::write(root.join("images.yml"), "{}").unwrap();

        // KDL が YAML より優先される
        let result = find_registry_from(root).unwrap();
        assert!(result.ends_with(".imagefleet/images.kdl"));
    }

    #[test]
    fn test_find_registry_from_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = find_registry_from(temp_dir.path());
        assert!(result.is_none());
    }

    #[test]
    #[serial]
    fn test_find_registry_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("custom-images.kdl");
        std::fs::write(&path, "").unwrap();

        temp_env::with_var(REGISTRY_PATH_ENV, Some(&path), || {
            assert_eq!(find_registry(), Some(path.clone()));
        });
    }

    #[test]
    #[serial]
    fn test_resolve_registry_path_explicit() {
        let explicit = PathBuf::from("/does/not/matter.kdl");
        let resolved = resolve_registry_path(Some(&explicit)).unwrap();
        assert_eq!(resolved, explicit);
    }

    #[test]
    fn test_registry_root() {
        let path = PathBuf::from("/home/user/repo/images.kdl");
        assert_eq!(registry_root(&path), Some(Path::new("/home/user/repo")));

        let hidden = PathBuf::from("/home/user/repo/.imagefleet/images.kdl");
        assert_eq!(registry_root(&hidden), Some(Path::new("/home/user/repo")));
    }
}
