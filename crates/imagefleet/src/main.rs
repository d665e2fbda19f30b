mod commands;

use clap::{Parser, Subcommand};
use commands::matrix::MatrixFormat;
use commands::release::ReleaseOptions;
use imagefleet_build::{DEFAULT_BUILDER_ID, DEFAULT_CONCURRENCY, DEFAULT_OUTPUT_DIR};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "imagefleet")]
#[command(about = "リリース計画から、公開すべきコンテナイメージをビルド・プッシュ・証明する", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// リリース計画とレジストリからビルドマトリクスを出力
    Matrix {
        /// リリース計画の JSON（- で標準入力）
        #[arg(short, long, env = "IMAGEFLEET_PLAN")]
        plan: PathBuf,
        /// イメージレジストリ（省略時は images.kdl を自動検出）
        #[arg(short, long, env = "IMAGEFLEET_REGISTRY")]
        registry: Option<PathBuf>,
        /// 出力形式
        #[arg(short, long, value_enum, default_value_t = MatrixFormat::Json)]
        format: MatrixFormat,
    },
    /// イメージレジストリを検証
    Validate {
        /// イメージレジストリ（省略時は images.kdl を自動検出）
        #[arg(short, long, env = "IMAGEFLEET_REGISTRY")]
        registry: Option<PathBuf>,
    },
    /// バージョンから付与されるタグを表示
    Tags {
        /// セマンティックバージョン（例: 1.4.0）
        version: String,
    },
    /// マトリクスの全イメージをビルド・プッシュ・証明
    Release {
        /// リリース計画の JSON（- で標準入力）
        #[arg(short, long, env = "IMAGEFLEET_PLAN")]
        plan: PathBuf,
        /// イメージレジストリ（省略時は images.kdl を自動検出）
        #[arg(short, long, env = "IMAGEFLEET_REGISTRY")]
        registry: Option<PathBuf>,
        /// ビルドコンテキストのルート（省略時はレジストリのあるディレクトリ）
        #[arg(long)]
        project_root: Option<PathBuf>,
        /// 同時に実行するジョブ数
        #[arg(short = 'j', long, env = "IMAGEFLEET_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,
        /// SBOM を生成しない
        #[arg(long)]
        no_sbom: bool,
        /// provenance 証明を付けない
        #[arg(long)]
        no_attest: bool,
        /// プッシュ・SBOM・証明の再試行回数
        #[arg(long, default_value_t = 2)]
        retries: u32,
        /// SBOM と provenance の出力先
        #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
        output_dir: PathBuf,
        /// 結果を JSON で書き出すファイル
        #[arg(long)]
        report: Option<PathBuf>,
        /// ビルド・プッシュを行わず実行内容だけを表示
        #[arg(long)]
        dry_run: bool,
        /// provenance に記録するビルダー ID
        #[arg(long, env = "IMAGEFLEET_BUILDER_ID", default_value = DEFAULT_BUILDER_ID)]
        builder_id: String,
        /// cosign の署名鍵（省略時はキーレス署名）
        #[arg(long, env = "COSIGN_KEY")]
        cosign_key: Option<PathBuf>,
        /// 進捗表示を無効にする
        #[arg(long)]
        no_progress: bool,
    },
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout はマトリクス JSON などの機械可読出力に使うため、ログは stderr へ
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Matrix {
            plan,
            registry,
            format,
        } => {
            commands::matrix::handle(&plan, registry.as_deref(), format)?;
        }
        Commands::Validate { registry } => {
            commands::validate::handle(registry.as_deref())?;
        }
        Commands::Tags { version } => {
            commands::tags::handle(&version)?;
        }
        Commands::Release {
            plan,
            registry,
            project_root,
            concurrency,
            no_sbom,
            no_attest,
            retries,
            output_dir,
            report,
            dry_run,
            builder_id,
            cosign_key,
            no_progress,
        } => {
            commands::release::handle(ReleaseOptions {
                plan,
                registry,
                project_root,
                concurrency,
                no_sbom,
                no_attest,
                retries,
                output_dir,
                report,
                dry_run,
                builder_id,
                cosign_key,
                no_progress,
            })
            .await?;
        }
        Commands::Version => {
            println!("imagefleet {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
