//! イメージプッシュ処理
//!
//! ビルドしたイメージをコンテナレジストリにプッシュし、
//! レジストリが返したマニフェストダイジェストを取り出します。

use crate::auth::RegistryAuth;
use crate::error::{BuildError, BuildResult};
use bollard::Docker;
use bollard::models::PushImageInfo;
use futures_util::StreamExt;
use imagefleet_core::validate_tag;
use std::sync::Arc;

/// プッシュ結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedImage {
    /// プッシュした完全な参照（タグ付き）
    pub reference: String,

    /// レジストリが報告したマニフェストダイジェスト
    pub digest: Option<String>,
}

/// イメージプッシュを実行するハンドラ
#[derive(Clone)]
pub struct ImagePusher {
    docker: Docker,
    auth: Arc<RegistryAuth>,
}

impl ImagePusher {
    /// 新しい ImagePusher を作成
    pub fn new(docker: Docker) -> Self {
        Self::with_auth(docker, RegistryAuth::new())
    }

    /// 認証情報マネージャーを指定して作成
    pub fn with_auth(docker: Docker, auth: RegistryAuth) -> Self {
        Self {
            docker,
            auth: Arc::new(auth),
        }
    }

    /// タグ付き参照をレジストリにプッシュ
    pub async fn push(&self, reference: &str) -> BuildResult<PushedImage> {
        let (image, tag) = split_image_tag(reference);
        validate_tag(&tag).map_err(|_| BuildError::InvalidTag { tag: tag.clone() })?;

        let credentials = Arc::clone(&self.auth).fetch_credentials(reference).await?;

        #[allow(deprecated)]
        let options = bollard::image::PushImageOptions::<String> { tag: tag.clone() };

        tracing::info!("Pushing {}", reference);

        #[allow(deprecated)]
        let mut stream = self.docker.push_image(&image, Some(options), credentials);

        let mut digest = None;
        let mut last_status = String::new();

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    // レジストリが返したエラー（権限・認証など）は再試行しても変わらない
                    if let Some(err) = &info.error {
                        return Err(BuildError::PushRejected {
                            message: err.clone(),
                        });
                    }
                    if let Some(found) = info.status.as_deref().and_then(parse_push_digest) {
                        digest = Some(found);
                    }
                    log_progress(reference, &info, &mut last_status);
                }
                Err(e) => {
                    return Err(BuildError::PushFailed {
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(digest = ?digest, "Pushed {}", reference);

        Ok(PushedImage {
            reference: reference.to_string(),
            digest,
        })
    }
}

/// プッシュ進捗をログに出す（レイヤーごとの進捗は状態が変わったときだけ）
fn log_progress(reference: &str, info: &PushImageInfo, last_status: &mut String) {
    let Some(status) = &info.status else {
        return;
    };

    match status.as_str() {
        "Preparing" | "Waiting" | "Pushing" => {}
        _ if *status != *last_status => {
            tracing::debug!(image = reference, "{}", status);
            *last_status = status.clone();
        }
        _ => {}
    }
}

/// プッシュ完了ステータスからダイジェストを取り出す
///
/// 例: `1.4.0: digest: sha256:abcd... size: 1570`
pub fn parse_push_digest(status: &str) -> Option<String> {
    let (_, rest) = status.split_once("digest: ")?;
    let digest = rest.split_whitespace().next()?;
    let (algorithm, hex) = digest.split_once(':')?;
    let valid = !algorithm.is_empty()
        && !hex.is_empty()
        && hex.chars().all(|c| c.is_ascii_hexdigit());
    valid.then(|| digest.to_string())
}

/// イメージ名とタグを分離
///
/// # Examples
/// - `ghcr.io/org/app:v1.0` -> `("ghcr.io/org/app", "v1.0")`
/// - `ghcr.io/org/app` -> `("ghcr.io/org/app", "latest")`
/// - `localhost:5000/app:dev` -> `("localhost:5000/app", "dev")`
/// - `ghcr.io/org/app:1` -> `("ghcr.io/org/app", "1")`
pub fn split_image_tag(image: &str) -> (String, String) {
    // 最後の / より後ろにある : だけがタグの区切り（それ以外はポート番号）
    let name_start = image.rfind('/').map_or(0, |pos| pos + 1);
    if let Some(pos) = image[name_start..].rfind(':') {
        let pos = name_start + pos;
        return (image[..pos].to_string(), image[pos + 1..].to_string());
    }

    (image.to_string(), "latest".to_string())
}
