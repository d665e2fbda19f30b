//! リリース計画・イメージレジストリ・ビルドジョブのデータモデル

use crate::error::{RegistryError, RegistryResult};
use crate::tags::ImageTags;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::LazyLock;

/// レジストリで hosting.host が省略されたときのコンテナレジストリ
pub const DEFAULT_REGISTRY_HOST: &str = "ghcr.io";

/// OCI リポジトリ名の構成規則
static IMAGE_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:\.|_|__|-+)[a-z0-9]+)*)*$")
        .expect("image name pattern is valid")
});

/// リリース対象の1アプリケーション
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleasePlanEntry {
    /// アプリケーション名（計画内で一意）
    pub app_name: String,

    /// リリースバージョン（セマンティックバージョン文字列）
    pub app_version: String,
}

impl ReleasePlanEntry {
    pub fn new(app_name: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }
}

/// 1アプリケーションに対応するビルド可能なイメージ
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// 結合キー（ReleasePlanEntry::app_name と一致）
    pub app_name: String,

    /// イメージ名（オーナー名前空間配下のリポジトリ名）
    pub image_name: String,

    /// 表示名
    pub display_name: String,

    /// リポジトリルートからの Dockerfile パス
    pub dockerfile_path: PathBuf,

    /// プッシュ先の名前空間
    pub owner: String,
}

impl ImageDescriptor {
    /// `owner/image_name` 形式の参照（大文字小文字はオーナー側のみ正規化）
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.owner.to_lowercase(), self.image_name)
    }
}

/// イメージレジストリ: app_name → イメージ記述子リストの明示的なマップ
///
/// 同一 app の複数イメージはリストで保持し、キーの重複からは推測しない。
/// 参照は完全一致（大文字小文字を区別）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRegistry {
    /// コンテナレジストリのホスト（例: ghcr.io）
    host: String,

    apps: BTreeMap<String, Vec<ImageDescriptor>>,
}

impl Default for ImageRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_HOST)
    }
}

impl ImageRegistry {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            apps: BTreeMap::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// app を記述子リストごと登録する
    ///
    /// 同名 app の再定義・空リスト・重複イメージはエラー。
    pub fn insert_app(
        &mut self,
        app_name: impl Into<String>,
        descriptors: Vec<ImageDescriptor>,
    ) -> RegistryResult<()> {
        let app_name = app_name.into();
        if self.apps.contains_key(&app_name) {
            return Err(RegistryError::DuplicateApp(app_name));
        }
        if descriptors.is_empty() {
            return Err(RegistryError::EmptyApp(app_name));
        }

        let mut seen: HashSet<String> = self.qualified_names();
        for descriptor in &descriptors {
            validate_descriptor(&app_name, descriptor)?;
            if !seen.insert(descriptor.qualified_name()) {
                return Err(RegistryError::DuplicateImage {
                    reference: descriptor.qualified_name(),
                });
            }
        }

        self.apps.insert(app_name, descriptors);
        Ok(())
    }

    /// 記述子を1件追加する（app が未登録なら作成）
    pub fn push_descriptor(&mut self, descriptor: ImageDescriptor) -> RegistryResult<()> {
        validate_descriptor(&descriptor.app_name, &descriptor)?;
        if self.qualified_names().contains(&descriptor.qualified_name()) {
            return Err(RegistryError::DuplicateImage {
                reference: descriptor.qualified_name(),
            });
        }
        self.apps
            .entry(descriptor.app_name.clone())
            .or_default()
            .push(descriptor);
        Ok(())
    }

    /// app_name に対応する記述子（完全一致）
    pub fn descriptors(&self, app_name: &str) -> Option<&[ImageDescriptor]> {
        self.apps.get(app_name).map(Vec::as_slice)
    }

    pub fn contains_app(&self, app_name: &str) -> bool {
        self.apps.contains_key(app_name)
    }

    /// 登録済み app を名前順に列挙
    pub fn apps(&self) -> impl Iterator<Item = (&str, &[ImageDescriptor])> {
        self.apps
            .iter()
            .map(|(name, descriptors)| (name.as_str(), descriptors.as_slice()))
    }

    pub fn app_count(&self) -> usize {
        self.apps.len()
    }

    pub fn image_count(&self) -> usize {
        self.apps.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    fn qualified_names(&self) -> HashSet<String> {
        self.apps
            .values()
            .flatten()
            .map(ImageDescriptor::qualified_name)
            .collect()
    }
}

fn validate_descriptor(app_name: &str, descriptor: &ImageDescriptor) -> RegistryResult<()> {
    if descriptor.app_name != app_name {
        return Err(RegistryError::InvalidConfig(format!(
            "イメージ '{}' の app_name '{}' が app '{}' と一致しません",
            descriptor.image_name, descriptor.app_name, app_name
        )));
    }
    if !IMAGE_NAME_PATTERN.is_match(&descriptor.image_name) {
        return Err(RegistryError::InvalidImageName {
            app: app_name.to_string(),
            image: descriptor.image_name.clone(),
        });
    }
    if descriptor.owner.trim().is_empty() {
        return Err(RegistryError::MissingField {
            app: app_name.to_string(),
            image: descriptor.image_name.clone(),
            field: "hosting.owner",
        });
    }
    if descriptor.dockerfile_path.as_os_str().is_empty() {
        return Err(RegistryError::MissingField {
            app: app_name.to_string(),
            image: descriptor.image_name.clone(),
            field: "file",
        });
    }
    Ok(())
}

/// ビルドジョブ: ReleasePlanEntry と ImageDescriptor の結合結果
///
/// 1回のリリース実行の間だけ存在し、Build Executor が1度だけ消費する。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildJob {
    pub app_name: String,
    pub app_version: String,
    pub image_name: String,
    pub display_name: String,
    pub dockerfile_path: PathBuf,
    pub owner: String,
}

impl BuildJob {
    pub fn new(entry: &ReleasePlanEntry, descriptor: &ImageDescriptor) -> Self {
        Self {
            app_name: entry.app_name.clone(),
            app_version: entry.app_version.clone(),
            image_name: descriptor.image_name.clone(),
            display_name: descriptor.display_name.clone(),
            dockerfile_path: descriptor.dockerfile_path.clone(),
            owner: descriptor.owner.clone(),
        }
    }

    /// ログ・レポート用の識別子
    pub fn id(&self) -> String {
        format!("{}/{}", self.app_name, self.image_name)
    }

    /// タグなしのリポジトリ参照（例: ghcr.io/org/app）
    ///
    /// GHCR は名前空間に小文字しか受け付けないためオーナーは小文字化する。
    pub fn repository(&self, host: &str) -> String {
        format!(
            "{}/{}/{}",
            host.trim_end_matches('/'),
            self.owner.to_lowercase(),
            self.image_name
        )
    }

    /// タグごとの完全なイメージ参照
    pub fn references(&self, host: &str, tags: &ImageTags) -> Vec<String> {
        let repository = self.repository(host);
        tags.iter()
            .map(|tag| format!("{}:{}", repository, tag))
            .collect()
    }
}
