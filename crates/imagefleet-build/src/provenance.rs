//! SLSA v1 provenance（in-toto Statement v1）の生成

use crate::error::{BuildError, BuildResult};
use chrono::{DateTime, SecondsFormat, Utc};
use imagefleet_core::{BuildJob, ImageTags};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const STATEMENT_TYPE: &str = "https://in-toto.io/Statement/v1";
pub const PREDICATE_TYPE: &str = "https://slsa.dev/provenance/v1";
pub const BUILD_TYPE: &str = "https://github.com/chronista-club/imagefleet/buildtypes/docker/v1";

/// プッシュ済みイメージ（リポジトリ + マニフェストダイジェスト）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSubject {
    /// タグなしのリポジトリ参照（例: ghcr.io/org/app）
    pub repository: String,

    /// `sha256:<hex>` 形式のダイジェスト
    pub digest: String,
}

impl ImageSubject {
    pub fn new(repository: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            digest: digest.into(),
        }
    }

    /// ダイジェスト固定の参照（`repo@sha256:...`）
    pub fn reference(&self) -> String {
        format!("{}@{}", self.repository, self.digest)
    }

    /// 成果物ファイル名に使える形（`/` と `:` を置換）
    pub fn file_stem(&self) -> String {
        self.repository.replace(['/', ':'], "_")
    }

    fn digest_set(&self) -> BuildResult<BTreeMap<String, String>> {
        let (algorithm, hex) = self
            .digest
            .split_once(':')
            .filter(|(alg, hex)| !alg.is_empty() && !hex.is_empty())
            .ok_or_else(|| BuildError::DigestUnavailable(self.reference()))?;
        Ok(BTreeMap::from([(algorithm.to_string(), hex.to_string())]))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    #[serde(rename = "_type")]
    pub statement_type: &'static str,
    pub subject: Vec<ResourceDescriptor>,
    #[serde(rename = "predicateType")]
    pub predicate_type: &'static str,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceDescriptor {
    pub name: String,
    pub digest: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    pub build_definition: BuildDefinition,
    pub run_details: RunDetails,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDefinition {
    pub build_type: &'static str,
    pub external_parameters: ExternalParameters,
}

/// ビルドジョブから取った外部パラメータ
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalParameters {
    pub app_name: String,
    pub app_version: String,
    pub image_name: String,
    pub dockerfile: String,
    pub tags: ImageTags,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    pub builder: Builder,
    pub metadata: RunMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct Builder {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    #[serde(serialize_with = "rfc3339")]
    pub started_on: DateTime<Utc>,
    #[serde(serialize_with = "rfc3339")]
    pub finished_on: DateTime<Utc>,
}

fn rfc3339<S: serde::Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// 1イメージ分の provenance
#[derive(Debug, Clone)]
pub struct Provenance {
    pub subject: ImageSubject,
    pub statement: Statement,
}

impl Provenance {
    pub fn new(
        job: &BuildJob,
        tags: &ImageTags,
        subject: ImageSubject,
        builder_id: &str,
        started_on: DateTime<Utc>,
        finished_on: DateTime<Utc>,
    ) -> BuildResult<Self> {
        let statement = Statement {
            statement_type: STATEMENT_TYPE,
            subject: vec![ResourceDescriptor {
                name: subject.repository.clone(),
                digest: subject.digest_set()?,
            }],
            predicate_type: PREDICATE_TYPE,
            predicate: Predicate {
                build_definition: BuildDefinition {
                    build_type: BUILD_TYPE,
                    external_parameters: ExternalParameters {
                        app_name: job.app_name.clone(),
                        app_version: job.app_version.clone(),
                        image_name: job.image_name.clone(),
                        dockerfile: job.dockerfile_path.to_string_lossy().into_owned(),
                        tags: tags.clone(),
                    },
                },
                run_details: RunDetails {
                    builder: Builder {
                        id: builder_id.to_string(),
                    },
                    metadata: RunMetadata {
                        started_on,
                        finished_on,
                    },
                },
            },
        };

        Ok(Self { subject, statement })
    }

    /// predicate を出力ディレクトリに書き出し、そのパスを返す
    ///
    /// cosign は predicate のみを受け取り、Statement で包んで署名する。
    pub fn write_predicate(&self, output_dir: &Path) -> BuildResult<PathBuf> {
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join(format!("{}.provenance.json", self.subject.file_stem()));
        let json = serde_json::to_vec_pretty(&self.statement.predicate)?;
        std::fs::write(&path, json)?;
        tracing::debug!(path = %path.display(), "Wrote provenance predicate");
        Ok(path)
    }
}
