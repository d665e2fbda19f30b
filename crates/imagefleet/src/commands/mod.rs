pub mod matrix;
pub mod release;
pub mod tags;
pub mod validate;

use imagefleet_core::{
    ImageRegistry, Matrix, ReleasePlan, compute_matrix, load_release_plan, parse_registry_file,
    resolve_registry_path,
};
use std::path::{Path, PathBuf};

/// 計画とレジストリを読み込み、マトリクスを計算した結果
pub struct LoadedMatrix {
    pub registry_path: PathBuf,
    pub registry: ImageRegistry,
    pub plan: ReleasePlan,
    pub matrix: Matrix,
}

/// レジストリ → 計画の順に読み込み、マトリクスを計算する
///
/// どちらかの読み込みに失敗した場合、ジョブは1件も計算しない。
pub fn load_matrix(plan_path: &Path, registry_path: Option<&Path>) -> anyhow::Result<LoadedMatrix> {
    let registry_path = resolve_registry_path(registry_path)?;
    tracing::debug!(registry = %registry_path.display(), "Using image registry");

    let registry = parse_registry_file(&registry_path)?;
    let plan = load_release_plan(plan_path)?;
    let matrix = compute_matrix(&plan, &registry);

    // イメージを持たないアプリは正常だが、タイプミスの可能性もある
    for app_name in &matrix.unmatched {
        tracing::warn!(
            app = %app_name,
            "No images registered for '{}', skipping",
            app_name
        );
    }

    Ok(LoadedMatrix {
        registry_path,
        registry,
        plan,
        matrix,
    })
}
