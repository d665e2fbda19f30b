//! imagefleet-core エラー型

use std::path::PathBuf;

/// リリース計画の読み込み・検証エラー
///
/// どのエラーも致命的で、ジョブ計算の前に返される。
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("リリース計画の JSON が不正です: {0}")]
    Json(#[from] serde_json::Error),

    #[error("リリース計画に releases キーがありません")]
    MissingReleases,

    #[error("releases[{index}] に {field} がありません")]
    MissingField { index: usize, field: &'static str },

    #[error("releases[{index}]: app_name '{app_name}' が重複しています")]
    DuplicateApp { index: usize, app_name: String },

    #[error("リリース計画を読み込めません: {path}\n理由: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// イメージレジストリ設定のエラー
///
/// 静的設定の不整合を表すため、ロード時に致命的エラーとして扱う。
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(
        "イメージレジストリが見つかりません\nヒント: images.kdl を置くか IMAGEFLEET_REGISTRY でパスを指定してください"
    )]
    NotFound,

    #[error("KDL パースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("YAML パースエラー: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("イメージレジストリを読み込めません: {path}\n理由: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("不正なレジストリ定義: {0}")]
    InvalidConfig(String),

    #[error("app '{0}' が複数回定義されています")]
    DuplicateApp(String),

    #[error("app '{0}' にイメージが定義されていません")]
    EmptyApp(String),

    #[error("app '{app}' のイメージ '{image}' に {field} がありません")]
    MissingField {
        app: String,
        image: String,
        field: &'static str,
    },

    #[error("app '{app}' のイメージ名 '{image}' は不正です（小文字英数字と . _ - / のみ）")]
    InvalidImageName { app: String, image: String },

    #[error("イメージ '{reference}' が複数回定義されています")]
    DuplicateImage { reference: String },
}

/// バージョン・タグ計算のエラー
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TagError {
    #[error("セマンティックバージョンではありません: '{0}'")]
    InvalidVersion(String),

    #[error("不正なイメージタグ: {0}")]
    InvalidTag(String),
}

pub type PlanResult<T> = std::result::Result<T, PlanError>;
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
pub type TagResult<T> = std::result::Result<T, TagError>;
