use super::load_matrix;
use clap::ValueEnum;
use colored::Colorize;
use imagefleet_core::Matrix;
use std::path::Path;

/// matrix コマンドの出力形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MatrixFormat {
    /// ビルドジョブの JSON 配列
    Json,
    /// CI のマトリクス形式 `{"include": [...]}`（1行）
    Github,
    /// 人間向けの表
    Table,
}

pub fn handle(
    plan_path: &Path,
    registry_path: Option<&Path>,
    format: MatrixFormat,
) -> anyhow::Result<()> {
    let loaded = load_matrix(plan_path, registry_path)?;

    match format {
        MatrixFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&loaded.matrix.jobs)?);
        }
        MatrixFormat::Github => {
            println!("{}", serde_json::to_string(&loaded.matrix.to_github_matrix())?);
        }
        MatrixFormat::Table => print_table(&loaded.matrix, loaded.registry.host()),
    }

    Ok(())
}

fn print_table(matrix: &Matrix, host: &str) {
    if matrix.is_empty() {
        println!("{}", "ビルド対象のイメージはありません".dimmed());
    } else {
        println!(
            "{}",
            format!("ビルドジョブ ({} 個):", matrix.len()).bold()
        );
        for job in &matrix.jobs {
            println!(
                "  {:<20} {:<12} {} {}",
                job.app_name.green(),
                job.app_version,
                job.repository(host).cyan(),
                job.dockerfile_path.display().to_string().dimmed()
            );
        }
    }

    if !matrix.unmatched.is_empty() {
        println!();
        println!(
            "{} {}",
            "イメージなし:".yellow(),
            matrix.unmatched.join(", ")
        );
    }
}
