//! リリース計画の読み込みと検証
//!
//! リリース計画は `releases` キー配下に `{app_name, app_version}` を並べた JSON。
//! それ以外のキー（dist-manifest.json の残りの部分など）は無視する。
//! 検証は全件に対して行い、1件でも不正なら計画全体をエラーにする。

use crate::error::{PlanError, PlanResult};
use crate::model::ReleasePlanEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

/// 標準入力から読み込むことを示すパス
pub const STDIN_PATH: &str = "-";

/// 検証済みのリリース計画
///
/// 検証を通らない限り構築できないため、保持している限り全エントリが有効。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleasePlan {
    releases: Vec<ReleasePlanEntry>,
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    releases: Option<Vec<RawEntry>>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    app_name: Option<String>,
    #[serde(default)]
    app_version: Option<String>,
}

impl ReleasePlan {
    /// エントリ列から計画を作成（空値・重複を検証）
    pub fn new(entries: Vec<ReleasePlanEntry>) -> PlanResult<Self> {
        let mut seen = HashSet::new();
        for (index, entry) in entries.iter().enumerate() {
            if entry.app_name.trim().is_empty() {
                return Err(PlanError::MissingField {
                    index,
                    field: "app_name",
                });
            }
            if entry.app_version.trim().is_empty() {
                return Err(PlanError::MissingField {
                    index,
                    field: "app_version",
                });
            }
            if !seen.insert(entry.app_name.as_str()) {
                return Err(PlanError::DuplicateApp {
                    index,
                    app_name: entry.app_name.clone(),
                });
            }
        }
        Ok(Self { releases: entries })
    }

    /// JSON 文字列からパース
    pub fn from_json(content: &str) -> PlanResult<Self> {
        let raw: RawPlan = serde_json::from_str(content)?;
        Self::from_raw(raw)
    }

    /// Reader からパース
    pub fn from_reader(reader: impl Read) -> PlanResult<Self> {
        let raw: RawPlan = serde_json::from_reader(reader)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawPlan) -> PlanResult<Self> {
        let releases = raw.releases.ok_or(PlanError::MissingReleases)?;

        let entries = releases
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                let app_name = entry.app_name.ok_or(PlanError::MissingField {
                    index,
                    field: "app_name",
                })?;
                let app_version = entry.app_version.ok_or(PlanError::MissingField {
                    index,
                    field: "app_version",
                })?;
                Ok(ReleasePlanEntry {
                    app_name,
                    app_version,
                })
            })
            .collect::<PlanResult<Vec<_>>>()?;

        Self::new(entries)
    }

    pub fn entries(&self) -> &[ReleasePlanEntry] {
        &self.releases
    }

    pub fn get(&self, app_name: &str) -> Option<&ReleasePlanEntry> {
        self.releases.iter().find(|e| e.app_name == app_name)
    }

    pub fn len(&self) -> usize {
        self.releases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }

    /// 指定 app を除いた計画
    pub fn without(&self, app_name: &str) -> Self {
        Self {
            releases: self
                .releases
                .iter()
                .filter(|e| e.app_name != app_name)
                .cloned()
                .collect(),
        }
    }
}

/// ファイル（`-` は標準入力）からリリース計画を読み込む
#[tracing::instrument(skip(path), fields(path = %path.display()))]
pub fn load_release_plan(path: &Path) -> PlanResult<ReleasePlan> {
    if path == Path::new(STDIN_PATH) {
        tracing::debug!("Reading release plan from stdin");
        return ReleasePlan::from_reader(std::io::stdin().lock());
    }

    let content = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let plan = ReleasePlan::from_json(&content)?;
    tracing::debug!(entries = plan.len(), "Loaded release plan");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan() {
        let plan = ReleasePlan::from_json(
            r#"{
                "announcement_tag": "v1.2.3",
                "releases": [
                    {"app_name": "sed-tool", "app_version": "1.2.3", "artifacts": ["x.tar.gz"]},
                    {"app_name": "other", "app_version": "0.1.0"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.entries()[0], ReleasePlanEntry::new("sed-tool", "1.2.3"));
        assert_eq!(plan.get("other").unwrap().app_version, "0.1.0");
        assert!(plan.get("Other").is_none());
    }

    #[test]
    fn test_empty_releases_is_valid() {
        let plan = ReleasePlan::from_json(r#"{"releases": []}"#).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_missing_releases_key() {
        let err = ReleasePlan::from_json(r#"{"apps": []}"#).unwrap_err();
        assert!(matches!(err, PlanError::MissingReleases));
    }

    #[test]
    fn test_missing_app_version() {
        let err = ReleasePlan::from_json(
            r#"{"releases": [
                {"app_name": "ok", "app_version": "1.0.0"},
                {"app_name": "broken"}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PlanError::MissingField {
                index: 1,
                field: "app_version"
            }
        ));
    }

    #[test]
    fn test_missing_app_name() {
        let err =
            ReleasePlan::from_json(r#"{"releases": [{"app_version": "1.0.0"}]}"#).unwrap_err();
        assert!(matches!(
            err,
            PlanError::MissingField {
                index: 0,
                field: "app_name"
            }
        ));
    }

    #[test]
    fn test_blank_fields_are_missing() {
        let err = ReleasePlan::from_json(r#"{"releases": [{"app_name": " ", "app_version": "1"}]}"#)
            .unwrap_err();
        assert!(matches!(err, PlanError::MissingField { field: "app_name", .. }));

        let err = ReleasePlan::from_json(r#"{"releases": [{"app_name": "a", "app_version": ""}]}"#)
            .unwrap_err();
        assert!(matches!(err, PlanError::MissingField { field: "app_version", .. }));
    }

    #[test]
    fn test_duplicate_app_name() {
        let err = ReleasePlan::from_json(
            r#"{"releases": [
                {"app_name": "a", "app_version": "1.0.0"},
                {"app_name": "a", "app_version": "1.0.1"}
            ]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::DuplicateApp { index: 1, .. }));
    }

    #[test]
    fn test_wrong_type_is_json_error() {
        let err = ReleasePlan::from_json(r#"{"releases": [{"app_name": 3, "app_version": "1"}]}"#)
            .unwrap_err();
        assert!(matches!(err, PlanError::Json(_)));
    }

    #[test]
    fn test_load_release_plan_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(
            &path,
            r#"{"releases": [{"app_name": "sed-tool", "app_version": "1.2.3"}]}"#,
        )
        .unwrap();

        let plan = load_release_plan(&path).unwrap();
        assert_eq!(plan.len(), 1);

        let err = load_release_plan(&dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, PlanError::Read { .. }));
    }

    #[test]
    fn test_without() {
        let plan = ReleasePlan::new(vec![
            ReleasePlanEntry::new("a", "1.0.0"),
            ReleasePlanEntry::new("b", "1.0.0"),
        ])
        .unwrap();
        let reduced = plan.without("a");
        assert_eq!(reduced.len(), 1);
        assert!(reduced.get("a").is_none());
    }
}
