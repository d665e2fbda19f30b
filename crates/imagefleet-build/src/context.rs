use crate::error::{BuildError, BuildResult};
use flate2::Compression;
use flate2::write::GzEncoder;
use glob::Pattern;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tar::Builder;

/// 常に除外するディレクトリ（リポジトリルートをコンテキストにするため）
const DEFAULT_EXCLUDES: &[&str] = &[".git", "target", "node_modules"];

/// コンテキスト外の Dockerfile を格納するアーカイブ内パス
const INJECTED_DOCKERFILE: &str = ".imagefleet/Dockerfile";

/// tar.gz 化したビルドコンテキスト
#[derive(Debug)]
pub struct BuildContext {
    /// アーカイブ本体
    pub data: Vec<u8>,

    /// アーカイブ内での Dockerfile のパス
    pub dockerfile: String,
}

pub struct ContextBuilder;

impl ContextBuilder {
    /// ビルドコンテキストをtar.gzアーカイブとして作成
    ///
    /// `.dockerignore` と既定の除外ディレクトリを反映する。
    /// Dockerfile がコンテキスト内にあればそのパスを、なければ
    /// アーカイブに注入したパスを返す。
    pub fn create_context(context_path: &Path, dockerfile_path: &Path) -> BuildResult<BuildContext> {
        tracing::debug!("Creating build context from: {}", context_path.display());

        let ignore = IgnoreRules::load(context_path)?;

        let mut archive_data = Vec::new();
        let dockerfile;
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);

            append_dir(&mut tar, context_path, Path::new(""), &ignore)?;

            // コンテキスト内かつ除外されていなければそのまま参照する
            dockerfile = match dockerfile_path
                .strip_prefix(context_path)
                .ok()
                .filter(|rel| !ignore.is_excluded(rel))
            {
                Some(rel) => archive_path(rel),
                None => {
                    let content = fs::read(dockerfile_path)?;
                    let mut header = tar::Header::new_gnu();
                    header.set_path(INJECTED_DOCKERFILE).map_err(|e| {
                        BuildError::InvalidConfig(format!("Failed to set Dockerfile path: {}", e))
                    })?;
                    header.set_size(content.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();
                    tar.append(&header, &content[..])?;
                    INJECTED_DOCKERFILE.to_string()
                }
            };

            let mut encoder = tar.into_inner()?;
            encoder.flush()?;
            encoder.finish()?;
        }

        tracing::debug!(
            dockerfile = %dockerfile,
            "Build context created: {} bytes",
            archive_data.len()
        );

        Self::check_context_size(archive_data.len());

        Ok(BuildContext {
            data: archive_data,
            dockerfile,
        })
    }

    /// コンテキストサイズのチェックと警告
    fn check_context_size(size: usize) {
        const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "警告: ビルドコンテキストが大きすぎます（{}MB）\n\
                 .dockerignoreファイルで不要なファイルを除外することを推奨します。",
                size / 1024 / 1024
            );
        }
    }
}

/// コンテキストの除外ルール
struct IgnoreRules {
    patterns: Vec<Pattern>,
}

impl IgnoreRules {
    fn load(context_path: &Path) -> BuildResult<Self> {
        let mut patterns: Vec<Pattern> = DEFAULT_EXCLUDES
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .collect();

        let ignore_file = context_path.join(".dockerignore");
        if ignore_file.is_file() {
            for line in fs::read_to_string(&ignore_file)?.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if line.starts_with('!') {
                    tracing::warn!(rule = line, ".dockerignore exceptions are not supported, ignoring");
                    continue;
                }
                let line = line.trim_start_matches('/').trim_end_matches('/');
                match Pattern::new(line) {
                    Ok(pattern) => patterns.push(pattern),
                    Err(e) => tracing::warn!(rule = line, "Invalid .dockerignore pattern: {}", e),
                }
            }
        }

        Ok(Self { patterns })
    }

    /// 相対パス自身または祖先がいずれかのパターンに一致するか
    fn is_excluded(&self, rel: &Path) -> bool {
        rel.ancestors()
            .filter(|a| !a.as_os_str().is_empty())
            .any(|a| {
                let path = archive_path(a);
                self.patterns.iter().any(|p| p.matches(&path))
            })
    }
}

fn append_dir<W: Write>(
    tar: &mut Builder<W>,
    root: &Path,
    rel_dir: &Path,
    ignore: &IgnoreRules,
) -> BuildResult<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(root.join(rel_dir))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    entries.sort();

    for path in entries {
        let Some(name) = path.file_name() else {
            continue;
        };
        let rel = rel_dir.join(name);
        if ignore.is_excluded(&rel) {
            tracing::trace!(path = %rel.display(), "Excluded from build context");
            continue;
        }

        if path.is_dir() {
            tar.append_dir(&rel, &path)?;
            append_dir(tar, root, &rel, ignore)?;
        } else {
            tar.append_path_with_name(&path, &rel)?;
        }
    }

    Ok(())
}

/// アーカイブ内パス（区切りは常に /）
fn archive_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn archive_entries(context: &BuildContext) -> HashSet<String> {
        let decoder = flate2::read::GzDecoder::new(&context.data[..]);
        let mut archive = tar::Archive::new(decoder);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn test_create_context_with_nested_dockerfile() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();

        fs::write(root.join("Cargo.toml"), "[workspace]").unwrap();
        let app_dir = root.join("crates/matrix-sed");
        fs::create_dir_all(&app_dir).unwrap();
        fs::write(app_dir.join("Dockerfile"), "FROM alpine").unwrap();

        let context =
            ContextBuilder::create_context(root, &app_dir.join("Dockerfile")).unwrap();

        assert_eq!(context.dockerfile, "crates/matrix-sed/Dockerfile");
        let entries = archive_entries(&context);
        assert!(entries.contains("Cargo.toml"));
        assert!(entries.contains("crates/matrix-sed/Dockerfile"));
    }

    #[test]
    fn test_create_context_excludes_defaults_and_dockerignore() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();

        fs::create_dir_all(root.join("target/release")).unwrap();
        fs::write(root.join("target/release/big.bin"), "x").unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), "ref").unwrap();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("docs/index.md"), "# docs").unwrap();
        fs::write(root.join("secret.env"), "TOKEN=1").unwrap();
        fs::write(root.join("main.rs"), "fn main() {}").unwrap();
        fs::write(root.join(".dockerignore"), "# comment\n/docs/\n*.env\n!keep.env\n").unwrap();
        fs::write(root.join("Dockerfile"), "FROM alpine").unwrap();

        let context = ContextBuilder::create_context(root, &root.join("Dockerfile")).unwrap();
        let entries = archive_entries(&context);

        assert!(entries.contains("main.rs"));
        assert!(entries.contains("Dockerfile"));
        assert!(!entries.iter().any(|e| e.starts_with("target")));
        assert!(!entries.iter().any(|e| e.starts_with(".git/") || e == ".git"));
        assert!(!entries.iter().any(|e| e.starts_with("docs")));
        assert!(!entries.contains("secret.env"));
    }

    #[test]
    fn test_create_context_injects_outside_dockerfile() {
        let context_dir = tempdir().unwrap();
        let other_dir = tempdir().unwrap();
        fs::write(context_dir.path().join("file.txt"), "content").unwrap();
        let dockerfile = other_dir.path().join("Dockerfile.release");
        fs::write(&dockerfile, "FROM alpine").unwrap();

        let context = ContextBuilder::create_context(context_dir.path(), &dockerfile).unwrap();

        assert_eq!(context.dockerfile, INJECTED_DOCKERFILE);
        assert!(archive_entries(&context).contains(INJECTED_DOCKERFILE));
    }

    #[test]
    fn test_create_context_empty_dir() {
        let temp_dir = tempdir().unwrap();
        let dockerfile = temp_dir.path().join("Dockerfile");
        fs::write(&dockerfile, "FROM alpine").unwrap();

        let result = ContextBuilder::create_context(temp_dir.path(), &dockerfile);
        assert!(result.is_ok());
    }
}
