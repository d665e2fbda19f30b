//! ビルドジョブの並列実行
//!
//! 各ジョブは独立したパイプライン（タグ計算 → ビルド → プッシュ → SBOM → 証明）
//! として実行される。1ジョブの失敗は他のジョブを止めず、すべてのジョブが
//! 終わった時点で結果を `ReleaseReport` にまとめる。

use crate::backend::ImageBackend;
use crate::error::BuildError;
use crate::progress::{BuildProgress, ReleaseProgress};
use crate::provenance::{ImageSubject, Provenance};
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use imagefleet_core::{BuildJob, DEFAULT_REGISTRY_HOST, ImageTags, compute_tags};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// 既定の同時実行数
pub const DEFAULT_CONCURRENCY: usize = 4;

/// provenance に記録するビルダー ID の既定値
pub const DEFAULT_BUILDER_ID: &str = concat!("imagefleet/", env!("CARGO_PKG_VERSION"));

/// 実行設定
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// プッシュ先のレジストリホスト
    pub host: String,

    /// 同時に実行するジョブ数の上限
    pub concurrency: usize,

    /// プッシュ・SBOM・証明の再試行ポリシー
    pub retry: RetryPolicy,

    /// SBOM を生成するか
    pub sbom: bool,

    /// provenance 証明を付けるか
    pub attest: bool,

    pub builder_id: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_REGISTRY_HOST.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
            sbom: true,
            attest: true,
            builder_id: DEFAULT_BUILDER_ID.to_string(),
        }
    }
}

/// ジョブ内のステージ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Tag,
    Build,
    Push,
    Sbom,
    Attest,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStage::Tag => "tag",
            JobStage::Build => "build",
            JobStage::Push => "push",
            JobStage::Sbom => "sbom",
            JobStage::Attest => "attest",
        };
        f.write_str(name)
    }
}

/// 公開に成功したイメージ
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedImage {
    pub tags: ImageTags,
    pub references: Vec<String>,
    pub digest: Option<String>,
    pub sbom: Option<PathBuf>,
    pub provenance: Option<PathBuf>,
}

/// 失敗したステージと原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub stage: JobStage,
    pub message: String,
}

impl JobFailure {
    fn at(stage: JobStage) -> impl FnOnce(BuildError) -> JobFailure {
        move |e| JobFailure {
            stage,
            message: e.user_message(),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded(PublishedImage),
    Failed(JobFailure),
}

/// 1ジョブの結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub job: BuildJob,
    #[serde(flatten)]
    pub status: JobStatus,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded(_))
    }
}

/// リリース全体の結果（ジョブはマトリクスの順）
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseReport {
    pub backend: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<JobOutcome>,
}

impl ReleaseReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// 全ジョブが成功したか（ジョブ0件も成功とみなす）
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&BuildJob, &JobFailure)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            JobStatus::Failed(failure) => Some((&o.job, failure)),
            JobStatus::Succeeded(_) => None,
        })
    }
}

/// ビルドジョブを並列に実行する
pub struct ReleaseExecutor<B> {
    backend: B,
    config: ExecutorConfig,
    progress: Option<ReleaseProgress>,
}

impl<B: ImageBackend> ReleaseExecutor<B> {
    pub fn new(backend: B, config: ExecutorConfig) -> Self {
        Self {
            backend,
            config,
            progress: None,
        }
    }

    /// ジョブごとのスピナーを表示する
    pub fn with_progress(mut self, progress: ReleaseProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// すべてのジョブを実行し、結果をまとめる
    ///
    /// 失敗したジョブがあっても残りのジョブは最後まで実行される。
    #[tracing::instrument(skip(self, jobs), fields(jobs = jobs.len(), backend = self.backend.name()))]
    pub async fn run(&self, jobs: Vec<BuildJob>) -> ReleaseReport {
        let started_at = Utc::now();
        let concurrency = self.config.concurrency.max(1);

        let mut outcomes: Vec<(usize, JobOutcome)> = stream::iter(jobs.into_iter().enumerate())
            .map(|(index, job)| async move {
                let status = match self.run_job(&job).await {
                    Ok(published) => JobStatus::Succeeded(published),
                    Err(failure) => JobStatus::Failed(failure),
                };
                (index, JobOutcome { job, status })
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let report = ReleaseReport {
            backend: self.backend.name().to_string(),
            started_at,
            finished_at: Utc::now(),
            outcomes: outcomes.into_iter().map(|(_, outcome)| outcome).collect(),
        };

        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Release finished"
        );
        report
    }

    async fn run_job(&self, job: &BuildJob) -> Result<PublishedImage, JobFailure> {
        let progress = self.progress.as_ref().map(|p| p.job(&job.id()));
        let result = self.run_stages(job, progress.as_ref()).await;

        match &result {
            Ok(published) => {
                tracing::info!(job = %job.id(), digest = ?published.digest, "Job succeeded");
                if let Some(p) = &progress {
                    p.finish_success(published.digest.as_deref().unwrap_or("pushed"));
                }
            }
            Err(failure) => {
                tracing::error!(job = %job.id(), stage = %failure.stage, "Job failed: {}", failure.message);
                if let Some(p) = &progress {
                    p.finish_error(&failure.to_string());
                }
            }
        }

        result
    }

    async fn run_stages(
        &self,
        job: &BuildJob,
        progress: Option<&BuildProgress>,
    ) -> Result<PublishedImage, JobFailure> {
        let stage = |name: JobStage| {
            tracing::debug!(job = %job.id(), stage = %name, "Entering stage");
            if let Some(p) = progress {
                p.stage(&name.to_string());
            }
        };
        let started_on = Utc::now();
        let retry = &self.config.retry;

        stage(JobStage::Tag);
        let tags = compute_tags(&job.app_version)
            .map_err(|e| JobFailure::at(JobStage::Tag)(e.into()))?;
        let references = job.references(&self.config.host, &tags);

        // ビルドの失敗は決定的なので再試行しない
        stage(JobStage::Build);
        self.backend
            .build(job, &references)
            .await
            .map_err(JobFailure::at(JobStage::Build))?;

        stage(JobStage::Push);
        let mut digest: Option<String> = None;
        for reference in &references {
            let pushed = retry
                .run("push", || self.backend.push(reference))
                .await
                .map_err(JobFailure::at(JobStage::Push))?;
            match (&digest, pushed.digest) {
                (None, found) => digest = found,
                (Some(first), Some(other)) if *first != other => {
                    tracing::warn!(
                        job = %job.id(),
                        "Digest for {} differs from the first tag: {} != {}",
                        reference,
                        other,
                        first
                    );
                }
                _ => {}
            }
        }

        let needs_subject = self.config.sbom || self.config.attest;
        let subject = match (&digest, needs_subject) {
            (Some(digest), true) => Some(ImageSubject::new(
                job.repository(&self.config.host),
                digest.clone(),
            )),
            (None, true) => {
                return Err(JobFailure::at(JobStage::Push)(BuildError::DigestUnavailable(
                    references.first().cloned().unwrap_or_else(|| job.id()),
                )));
            }
            (_, false) => None,
        };

        let mut sbom = None;
        if let Some(subject) = subject.as_ref().filter(|_| self.config.sbom) {
            stage(JobStage::Sbom);
            sbom = Some(
                retry
                    .run("sbom", || self.backend.generate_sbom(subject))
                    .await
                    .map_err(JobFailure::at(JobStage::Sbom))?,
            );
        }

        let mut provenance_path = None;
        if let Some(subject) = subject.filter(|_| self.config.attest) {
            stage(JobStage::Attest);
            let provenance = Provenance::new(
                job,
                &tags,
                subject,
                &self.config.builder_id,
                started_on,
                Utc::now(),
            )
            .map_err(JobFailure::at(JobStage::Attest))?;
            provenance_path = Some(
                retry
                    .run("attest", || self.backend.attest(&provenance))
                    .await
                    .map_err(JobFailure::at(JobStage::Attest))?,
            );
        }

        Ok(PublishedImage {
            tags,
            references,
            digest,
            sbom,
            provenance: provenance_path,
        })
    }
}
