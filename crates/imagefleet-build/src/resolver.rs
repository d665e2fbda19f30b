use crate::error::{BuildError, BuildResult};
use imagefleet_core::BuildJob;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// ビルドジョブのパスとビルド引数を解決する
#[derive(Debug, Clone)]
pub struct BuildResolver {
    project_root: PathBuf,
}

impl BuildResolver {
    pub fn new(project_root: PathBuf) -> Self {
        Self { project_root }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Dockerfileのパスを解決
    ///
    /// レジストリの file はリポジトリルートからの相対パス。
    /// 絶対パスが書かれていればそのまま使う。
    pub fn resolve_dockerfile(&self, job: &BuildJob) -> BuildResult<PathBuf> {
        let path = self.project_root.join(&job.dockerfile_path);
        if !path.is_file() {
            return Err(BuildError::DockerfileNotFound(path));
        }

        tracing::debug!(
            "Resolved Dockerfile for '{}' at: {}",
            job.id(),
            path.display()
        );
        Ok(path)
    }

    /// ビルドコンテキストのパスを解決
    ///
    /// 常にプロジェクトルート（Dockerfile はワークスペース全体を COPY しうる）
    pub fn resolve_context(&self) -> BuildResult<PathBuf> {
        let context = &self.project_root;

        if !context.exists() {
            return Err(BuildError::ContextNotFound(context.clone()));
        }

        if !context.is_dir() {
            return Err(BuildError::InvalidConfig(format!(
                "Build context is not a directory: {}",
                context.display()
            )));
        }

        Ok(context.clone())
    }

    /// ジョブから渡すビルド引数
    pub fn build_args(&self, job: &BuildJob) -> HashMap<String, String> {
        HashMap::from([
            ("APP_NAME".to_string(), job.app_name.clone()),
            ("APP_VERSION".to_string(), job.app_version.clone()),
        ])
    }

    /// イメージに付与する OCI アノテーションラベル
    pub fn labels(&self, job: &BuildJob) -> HashMap<String, String> {
        HashMap::from([
            (
                "org.opencontainers.image.title".to_string(),
                job.image_name.clone(),
            ),
            (
                "org.opencontainers.image.version".to_string(),
                job.app_version.clone(),
            ),
            (
                "org.opencontainers.image.description".to_string(),
                job.display_name.clone(),
            ),
        ])
    }
}
