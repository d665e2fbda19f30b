//! ビルドマトリクスの導出
//!
//! リリース計画（動的）とイメージレジストリ（静的）を app_name で結合し、
//! ビルド・プッシュ・アテステーションすべき最小のジョブ集合を求める。

use crate::model::{BuildJob, ImageRegistry};
use crate::plan::ReleasePlan;
use serde::Serialize;

/// マトリクス計算の結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Matrix {
    /// ビルドジョブ（順序は保証しない）
    pub jobs: Vec<BuildJob>,

    /// レジストリに記述子がなく除外された app_name
    ///
    /// コンテナイメージを持たないアプリは正常に除外される。
    /// タイプミスの検出のため呼び出し側で警告を出せるよう保持する。
    pub unmatched: Vec<String>,
}

impl Matrix {
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// 指定 app のジョブ
    pub fn jobs_for<'a>(&'a self, app_name: &'a str) -> impl Iterator<Item = &'a BuildJob> {
        self.jobs.iter().filter(move |job| job.app_name == app_name)
    }

    /// CI のマトリクス形式 `{"include": [...]}` に変換
    pub fn to_github_matrix(&self) -> serde_json::Value {
        serde_json::json!({ "include": self.jobs })
    }
}

/// リリース計画とイメージレジストリからビルドジョブを計算
///
/// 副作用のない純粋関数。同じ入力には常に同じ結果を返す。
/// 計画の各エントリについて、レジストリに記述子があれば記述子ごとに1ジョブ、
/// なければジョブを生成しない。
pub fn compute_matrix(plan: &ReleasePlan, registry: &ImageRegistry) -> Matrix {
    let jobs = plan
        .entries()
        .iter()
        .flat_map(|entry| {
            registry
                .descriptors(&entry.app_name)
                .unwrap_or_default()
                .iter()
                .map(move |descriptor| BuildJob::new(entry, descriptor))
        })
        .collect();

    let unmatched = plan
        .entries()
        .iter()
        .filter(|entry| !registry.contains_app(&entry.app_name))
        .map(|entry| entry.app_name.clone())
        .collect();

    Matrix { jobs, unmatched }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ImageDescriptor, ReleasePlanEntry};
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn descriptor(app: &str, image: &str) -> ImageDescriptor {
        ImageDescriptor {
            app_name: app.to_string(),
            image_name: image.to_string(),
            display_name: image.to_string(),
            dockerfile_path: PathBuf::from("Dockerfile"),
            owner: "chronista-club".to_string(),
        }
    }

    fn plan(entries: &[(&str, &str)]) -> ReleasePlan {
        ReleasePlan::new(
            entries
                .iter()
                .map(|(name, version)| ReleasePlanEntry::new(*name, *version))
                .collect(),
        )
        .unwrap()
    }

    fn sample_registry() -> ImageRegistry {
        let mut registry = ImageRegistry::default();
        registry
            .insert_app("sed-tool", vec![descriptor("sed-tool", "matrix-sed")])
            .unwrap();
        registry
            .insert_app(
                "multi",
                vec![descriptor("multi", "multi-a"), descriptor("multi", "multi-b")],
            )
            .unwrap();
        registry
            .insert_app("idle", vec![descriptor("idle", "idle")])
            .unwrap();
        registry
    }

    #[test]
    fn test_single_image() {
        let mut registry = ImageRegistry::default();
        registry
            .insert_app("sed-tool", vec![descriptor("sed-tool", "matrix-sed")])
            .unwrap();

        let matrix = compute_matrix(&plan(&[("sed-tool", "1.2.3")]), &registry);

        assert_eq!(matrix.len(), 1);
        let job = &matrix.jobs[0];
        assert_eq!(job.app_name, "sed-tool");
        assert_eq!(job.app_version, "1.2.3");
        assert_eq!(job.image_name, "matrix-sed");
        assert_eq!(job.dockerfile_path, PathBuf::from("Dockerfile"));
        assert_eq!(job.owner, "chronista-club");
        assert!(matrix.unmatched.is_empty());
    }

    #[test]
    fn test_unlisted_app_is_skipped() {
        let matrix = compute_matrix(
            &plan(&[("unlisted-tool", "0.1.0")]),
            &ImageRegistry::default(),
        );
        assert!(matrix.is_empty());
        assert_eq!(matrix.unmatched, vec!["unlisted-tool"]);
    }

    #[test]
    fn test_multiple_images_per_app() {
        let matrix = compute_matrix(&plan(&[("multi", "2.0.0")]), &sample_registry());

        assert_eq!(matrix.len(), 2);
        let images: HashSet<_> = matrix.jobs.iter().map(|j| j.image_name.as_str()).collect();
        assert_eq!(images, HashSet::from(["multi-a", "multi-b"]));
        assert!(matrix.jobs.iter().all(|j| j.app_version == "2.0.0"));
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let matrix = compute_matrix(&plan(&[("Sed-Tool", "1.0.0")]), &sample_registry());
        assert!(matrix.is_empty());
        assert_eq!(matrix.unmatched, vec!["Sed-Tool"]);
    }

    #[test]
    fn test_registry_apps_not_in_plan_produce_nothing() {
        let matrix = compute_matrix(&plan(&[("sed-tool", "1.0.0")]), &sample_registry());
        assert!(matrix.jobs.iter().all(|j| j.app_name == "sed-tool"));
        assert_eq!(matrix.jobs_for("idle").count(), 0);
    }

    #[test]
    fn test_every_job_app_exists_in_registry_and_plan() {
        let plan = plan(&[
            ("sed-tool", "1.0.0"),
            ("multi", "2.0.0"),
            ("docs", "3.0.0"),
            ("cli", "0.4.0"),
        ]);
        let registry = sample_registry();
        let matrix = compute_matrix(&plan, &registry);

        for job in &matrix.jobs {
            assert!(registry.contains_app(&job.app_name));
            assert_eq!(plan.get(&job.app_name).unwrap().app_version, job.app_version);
        }
        assert_eq!(matrix.unmatched, vec!["docs", "cli"]);
    }

    #[test]
    fn test_job_count_matches_descriptor_count() {
        let plan = plan(&[("sed-tool", "1.0.0"), ("multi", "2.0.0"), ("idle", "0.1.0")]);
        let registry = sample_registry();
        let matrix = compute_matrix(&plan, &registry);

        for (app, descriptors) in registry.apps() {
            assert_eq!(matrix.jobs_for(app).count(), descriptors.len());
            let images: HashSet<_> = matrix.jobs_for(app).map(|j| &j.image_name).collect();
            let expected: HashSet<_> = descriptors.iter().map(|d| &d.image_name).collect();
            assert_eq!(images, expected);
        }
    }

    #[test]
    fn test_deterministic() {
        let plan = plan(&[("multi", "2.0.0"), ("sed-tool", "1.0.0")]);
        let registry = sample_registry();

        let first = compute_matrix(&plan, &registry);
        let second = compute_matrix(&plan.clone(), &registry.clone());
        let as_set = |m: &Matrix| m.jobs.iter().cloned().collect::<HashSet<_>>();
        assert_eq!(as_set(&first), as_set(&second));
        assert_eq!(first, second);
    }

    #[test]
    fn test_removing_plan_entry_never_increases_jobs() {
        let full = plan(&[("sed-tool", "1.0.0"), ("multi", "2.0.0"), ("docs", "1.0.0")]);
        let registry = sample_registry();
        let full_count = compute_matrix(&full, &registry).len();

        for entry in full.entries() {
            let reduced = full.without(&entry.app_name);
            assert!(compute_matrix(&reduced, &registry).len() <= full_count);
        }
    }

    #[test]
    fn test_adding_descriptor_adds_exactly_one_job() {
        let plan = plan(&[("sed-tool", "1.0.0"), ("multi", "2.0.0")]);
        let mut registry = sample_registry();
        let before = compute_matrix(&plan, &registry);

        registry
            .push_descriptor(descriptor("multi", "multi-c"))
            .unwrap();
        let after = compute_matrix(&plan, &registry);

        assert_eq!(after.len(), before.len() + 1);
        assert_eq!(after.jobs_for("multi").count(), 3);
        assert_eq!(after.jobs_for("sed-tool").count(), 1);
    }

    #[test]
    fn test_github_matrix_shape() {
        let matrix = compute_matrix(&plan(&[("sed-tool", "1.2.3")]), &sample_registry());
        let value = matrix.to_github_matrix();

        let include = value["include"].as_array().unwrap();
        assert_eq!(include.len(), 1);
        assert_eq!(include[0]["app_version"], "1.2.3");
        assert_eq!(include[0]["image_name"], "matrix-sed");
        assert_eq!(include[0]["dockerfile_path"], "Dockerfile");
    }
}
