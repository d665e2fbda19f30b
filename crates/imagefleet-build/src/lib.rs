//! imagefleet Build Executor
//!
//! ビルドマトリクスの各ジョブについて、イメージのビルド・タグ付け・プッシュ、
//! SBOM 生成、SLSA provenance の証明を行います。ジョブは並列に実行され、
//! 失敗はジョブ単位に閉じ込められます。

pub mod auth;
pub mod backend;
pub mod builder;
pub mod context;
pub mod error;
pub mod executor;
pub mod progress;
pub mod provenance;
pub mod pusher;
pub mod resolver;
pub mod retry;
pub mod tool;

pub use auth::{RegistryAuth, extract_registry};
pub use backend::{DEFAULT_OUTPUT_DIR, DockerBackend, DryRunBackend, ImageBackend};
pub use builder::ImageBuilder;
pub use context::{BuildContext, ContextBuilder};
pub use error::{BuildError, BuildResult};
pub use executor::{
    DEFAULT_BUILDER_ID, DEFAULT_CONCURRENCY, ExecutorConfig, JobFailure, JobOutcome, JobStage,
    JobStatus, PublishedImage, ReleaseExecutor, ReleaseReport,
};
pub use progress::{BuildProgress, ReleaseProgress};
pub use provenance::{ImageSubject, Provenance};
pub use pusher::{ImagePusher, PushedImage, parse_push_digest, split_image_tag};
pub use resolver::BuildResolver;
pub use retry::RetryPolicy;
pub use tool::ExternalTool;
