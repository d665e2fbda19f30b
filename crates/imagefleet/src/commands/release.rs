use super::load_matrix;
use colored::Colorize;
use imagefleet_build::{
    DockerBackend, DryRunBackend, ExecutorConfig, ImageBackend, JobStatus, ReleaseExecutor,
    ReleaseProgress, ReleaseReport, RetryPolicy,
};
use imagefleet_core::{BuildJob, registry_root};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

pub struct ReleaseOptions {
    pub plan: PathBuf,
    pub registry: Option<PathBuf>,
    pub project_root: Option<PathBuf>,
    pub concurrency: usize,
    pub no_sbom: bool,
    pub no_attest: bool,
    pub retries: u32,
    pub output_dir: PathBuf,
    pub report: Option<PathBuf>,
    pub dry_run: bool,
    pub builder_id: String,
    pub cosign_key: Option<PathBuf>,
    pub no_progress: bool,
}

pub async fn handle(options: ReleaseOptions) -> anyhow::Result<()> {
    let loaded = load_matrix(&options.plan, options.registry.as_deref())?;

    println!("{}", "リリースを開始します".green());
    println!(
        "レジストリ: {}",
        loaded.registry_path.display().to_string().cyan()
    );
    println!("リリース対象アプリ: {}個", loaded.plan.len());

    if loaded.matrix.is_empty() {
        println!(
            "{}",
            "ビルド対象のイメージがありません（レジストリに該当アプリがありません）".yellow()
        );
        return Ok(());
    }

    println!();
    println!(
        "{}",
        format!("ビルド対象イメージ ({} 個):", loaded.matrix.len()).bold()
    );
    for job in &loaded.matrix.jobs {
        println!(
            "  • {} {}",
            job.repository(loaded.registry.host()).cyan(),
            job.app_version
        );
    }

    let project_root = match &options.project_root {
        Some(root) => root.clone(),
        None => match registry_root(&loaded.registry_path) {
            Some(root) if !root.as_os_str().is_empty() => root.to_path_buf(),
            _ => std::env::current_dir()?,
        },
    };
    tracing::debug!(project_root = %project_root.display(), "Resolved project root");

    let config = ExecutorConfig {
        host: loaded.registry.host().to_string(),
        concurrency: options.concurrency,
        retry: RetryPolicy::default().with_max_attempts(options.retries.saturating_add(1)),
        sbom: !options.no_sbom,
        attest: !options.no_attest,
        builder_id: options.builder_id.clone(),
    };

    let progress = (!options.no_progress && std::io::stderr().is_terminal())
        .then(ReleaseProgress::new);
    let jobs = loaded.matrix.jobs;

    println!();
    let report = if options.dry_run {
        println!("{}", "ドライラン: ビルド・プッシュは実行しません".yellow());
        let backend = DryRunBackend::new(options.output_dir.clone());
        execute(backend, config, progress, jobs).await
    } else {
        println!("{}", "Dockerに接続中...".blue());
        let backend = connect_docker(&project_root, &options).await?;
        execute(backend, config, progress, jobs).await
    };

    print_report(&report);

    if let Some(path) = &options.report {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!("レポート: {}", path.display().to_string().cyan());
    }

    if !report.is_success() {
        std::process::exit(1);
    }

    Ok(())
}

async fn execute<B: ImageBackend>(
    backend: B,
    config: ExecutorConfig,
    progress: Option<ReleaseProgress>,
    jobs: Vec<BuildJob>,
) -> ReleaseReport {
    let mut executor = ReleaseExecutor::new(backend, config);
    if let Some(progress) = progress {
        executor = executor.with_progress(progress);
    }
    executor.run(jobs).await
}

async fn connect_docker(
    project_root: &Path,
    options: &ReleaseOptions,
) -> anyhow::Result<DockerBackend> {
    match DockerBackend::connect(project_root.to_path_buf(), options.output_dir.clone()).await {
        Ok(backend) => Ok(backend.with_cosign_key(options.cosign_key.clone())),
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Docker接続エラー".red().bold());
            eprintln!();
            eprintln!("{}", "原因:".yellow());
            eprintln!("  {}", e);
            eprintln!();
            eprintln!("{}", "解決方法:".yellow());
            eprintln!("  • Dockerが起動しているか確認してください");
            eprintln!("  • docker ps コマンドが正常に動作するか確認してください");
            eprintln!("  • --dry-run で実行内容だけを確認できます");
            Err(anyhow::anyhow!("Docker接続に失敗しました"))
        }
    }
}

fn print_report(report: &ReleaseReport) {
    println!();
    println!("{}", "結果:".bold());
    for outcome in &report.outcomes {
        match &outcome.status {
            JobStatus::Succeeded(published) => {
                println!("  {} {}", "✓".green(), outcome.job.id().cyan());
                for reference in &published.references {
                    println!("      {}", reference);
                }
                if let Some(digest) = &published.digest {
                    println!("      {}", digest.dimmed());
                }
            }
            JobStatus::Failed(failure) => {
                println!(
                    "  {} {} ({})",
                    "✗".red().bold(),
                    outcome.job.id().cyan(),
                    failure.stage
                );
                for line in failure.message.lines() {
                    println!("      {}", line);
                }
            }
        }
    }

    println!();
    let summary = format!("成功: {} / 失敗: {}", report.succeeded(), report.failed());
    if report.is_success() {
        println!("{}", summary.green().bold());
    } else {
        println!("{}", summary.red().bold());
    }
}
