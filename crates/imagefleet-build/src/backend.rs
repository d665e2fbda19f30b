//! ビルド・プッシュ・SBOM・証明を実際に行うバックエンド
//!
//! `ReleaseExecutor` はこのトレイトだけに依存し、Docker Engine を使う
//! `DockerBackend` と、何も実行しない `DryRunBackend` を差し替えられる。

use crate::builder::ImageBuilder;
use crate::context::ContextBuilder;
use crate::error::{BuildError, BuildResult};
use crate::provenance::{ImageSubject, Provenance};
use crate::pusher::{ImagePusher, PushedImage};
use crate::resolver::BuildResolver;
use crate::tool::ExternalTool;
use async_trait::async_trait;
use bollard::Docker;
use imagefleet_core::BuildJob;
use std::path::{Path, PathBuf};

/// 成果物（SBOM / provenance）の既定の出力先
pub const DEFAULT_OUTPUT_DIR: &str = "imagefleet-out";

/// ダイジェストが取れないドライラン用のプレースホルダ
pub const DRY_RUN_DIGEST: &str =
    "sha256:0000000000000000000000000000000000000000000000000000000000000000";

#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// バックエンド名（ログ・レポート用）
    fn name(&self) -> &str;

    /// ジョブのイメージをビルドし、すべての参照でタグ付けする
    async fn build(&self, job: &BuildJob, references: &[String]) -> BuildResult<()>;

    /// タグ付き参照を1つプッシュする
    async fn push(&self, reference: &str) -> BuildResult<PushedImage>;

    /// プッシュ済みイメージの SBOM を生成し、ファイルパスを返す
    async fn generate_sbom(&self, subject: &ImageSubject) -> BuildResult<PathBuf>;

    /// provenance を書き出してイメージに証明を付け、predicate のパスを返す
    async fn attest(&self, provenance: &Provenance) -> BuildResult<PathBuf>;
}

fn sbom_path(output_dir: &Path, subject: &ImageSubject) -> PathBuf {
    output_dir.join(format!("{}.spdx.json", subject.file_stem()))
}

/// Docker Engine + syft + cosign によるバックエンド
pub struct DockerBackend {
    resolver: BuildResolver,
    builder: ImageBuilder,
    pusher: ImagePusher,
    syft: ExternalTool,
    cosign: ExternalTool,
    cosign_key: Option<PathBuf>,
    output_dir: PathBuf,
}

impl DockerBackend {
    /// ローカルの Docker Engine に接続し、疎通を確認する
    pub async fn connect(project_root: PathBuf, output_dir: PathBuf) -> BuildResult<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        Ok(Self::new(docker, project_root, output_dir))
    }

    pub fn new(docker: Docker, project_root: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            resolver: BuildResolver::new(project_root),
            builder: ImageBuilder::new(docker.clone()),
            pusher: ImagePusher::new(docker),
            syft: ExternalTool::new("syft"),
            cosign: ExternalTool::new("cosign"),
            cosign_key: None,
            output_dir,
        }
    }

    /// 鍵ファイルで署名する（未指定なら cosign のキーレス署名）
    pub fn with_cosign_key(mut self, key: Option<PathBuf>) -> Self {
        self.cosign_key = key;
        self
    }
}

#[async_trait]
impl ImageBackend for DockerBackend {
    fn name(&self) -> &str {
        "docker"
    }

    async fn build(&self, job: &BuildJob, references: &[String]) -> BuildResult<()> {
        let dockerfile = self.resolver.resolve_dockerfile(job)?;
        let context_path = self.resolver.resolve_context()?;

        tracing::info!(
            job = %job.id(),
            dockerfile = %dockerfile.display(),
            context = %context_path.display(),
            "Creating build context"
        );

        // tar.gz 化は同期 I/O なのでランタイムのワーカーを塞がない
        let context = tokio::task::spawn_blocking(move || {
            ContextBuilder::create_context(&context_path, &dockerfile)
        })
        .await
        .map_err(|e| BuildError::BuildFailed(format!("Context task failed: {}", e)))??;

        self.builder
            .build_image(
                context,
                references,
                &self.resolver.build_args(job),
                &self.resolver.labels(job),
            )
            .await
    }

    async fn push(&self, reference: &str) -> BuildResult<PushedImage> {
        self.pusher.push(reference).await
    }

    async fn generate_sbom(&self, subject: &ImageSubject) -> BuildResult<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = sbom_path(&self.output_dir, subject);

        self.syft
            .run([
                "scan".to_string(),
                format!("registry:{}", subject.reference()),
                "-o".to_string(),
                format!("spdx-json={}", path.display()),
            ])
            .await?;

        tracing::info!(sbom = %path.display(), "Generated SBOM for {}", subject.reference());
        Ok(path)
    }

    async fn attest(&self, provenance: &Provenance) -> BuildResult<PathBuf> {
        let predicate = {
            let provenance = provenance.clone();
            let output_dir = self.output_dir.clone();
            tokio::task::spawn_blocking(move || provenance.write_predicate(&output_dir))
                .await
                .map_err(|e| BuildError::Io(std::io::Error::other(e)))??
        };

        let mut args = vec![
            "attest".to_string(),
            "--yes".to_string(),
            "--type".to_string(),
            "slsaprovenance1".to_string(),
            "--predicate".to_string(),
            predicate.display().to_string(),
        ];
        if let Some(key) = &self.cosign_key {
            args.push("--key".to_string());
            args.push(key.display().to_string());
        }
        args.push(provenance.subject.reference());

        self.cosign.run(args).await?;

        tracing::info!("Attested {}", provenance.subject.reference());
        Ok(predicate)
    }
}

/// 何も実行せず、実行されるはずの内容をログに出すバックエンド
#[derive(Debug, Clone)]
pub struct DryRunBackend {
    output_dir: PathBuf,
}

impl DryRunBackend {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }
}

impl Default for DryRunBackend {
    fn default() -> Self {
        Self::new(PathBuf::from(DEFAULT_OUTPUT_DIR))
    }
}

#[async_trait]
impl ImageBackend for DryRunBackend {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn build(&self, job: &BuildJob, references: &[String]) -> BuildResult<()> {
        tracing::info!(
            job = %job.id(),
            dockerfile = %job.dockerfile_path.display(),
            "[dry-run] would build {}",
            references.join(", ")
        );
        Ok(())
    }

    async fn push(&self, reference: &str) -> BuildResult<PushedImage> {
        tracing::info!("[dry-run] would push {}", reference);
        Ok(PushedImage {
            reference: reference.to_string(),
            digest: Some(DRY_RUN_DIGEST.to_string()),
        })
    }

    async fn generate_sbom(&self, subject: &ImageSubject) -> BuildResult<PathBuf> {
        let path = sbom_path(&self.output_dir, subject);
        tracing::info!("[dry-run] would write SBOM to {}", path.display());
        Ok(path)
    }

    async fn attest(&self, provenance: &Provenance) -> BuildResult<PathBuf> {
        let path = self
            .output_dir
            .join(format!("{}.provenance.json", provenance.subject.file_stem()));
        tracing::info!(
            "[dry-run] would attest {} with {}",
            provenance.subject.reference(),
            path.display()
        );
        Ok(path)
    }
}
