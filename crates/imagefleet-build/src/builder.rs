use crate::context::BuildContext;
use crate::error::{BuildError, BuildResult};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;

/// Docker Engine でイメージをビルドしタグ付けする
#[derive(Clone)]
pub struct ImageBuilder {
    docker: Docker,
}

impl ImageBuilder {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// イメージをビルドし、すべての参照でタグ付けする
    ///
    /// 最初の参照でビルドし、残りは同じイメージへの追加タグとする。
    pub async fn build_image(
        &self,
        context: BuildContext,
        references: &[String],
        build_args: &HashMap<String, String>,
        labels: &HashMap<String, String>,
    ) -> BuildResult<()> {
        let Some((primary, aliases)) = references.split_first() else {
            return Err(BuildError::InvalidConfig(
                "No image reference to build".to_string(),
            ));
        };

        tracing::info!("Building image: {}", primary);

        let build_args_refs: HashMap<&str, &str> = build_args
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let label_refs: HashMap<&str, &str> = labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        #[allow(deprecated)]
        let options = bollard::image::BuildImageOptions {
            dockerfile: context.dockerfile.as_str(),
            t: primary.as_str(),
            buildargs: build_args_refs,
            labels: label_refs,
            rm: true,      // 中間コンテナを削除
            forcerm: true, // ビルド失敗時も中間コンテナを削除
            pull: true,    // ベースイメージを常にpull
            ..Default::default()
        };

        tracing::debug!("Build args: {:?}", build_args);

        use bytes::Bytes;
        use http_body_util::{Either, Full};
        let body = Full::new(Bytes::from(context.data));
        #[allow(deprecated)]
        let mut stream = self
            .docker
            .build_image(options, None, Some(Either::Left(body)));

        while let Some(msg) = stream.next().await {
            match msg {
                Ok(output) => handle_build_output(primary, output)?,
                Err(e) => return Err(BuildError::DockerConnection(e)),
            }
        }

        for alias in aliases {
            self.tag_image(primary, alias).await?;
        }

        tracing::info!("Successfully built: {}", primary);
        Ok(())
    }

    /// 既存イメージに別の参照を付ける
    async fn tag_image(&self, source: &str, target: &str) -> BuildResult<()> {
        let (repo, tag) = crate::pusher::split_image_tag(target);
        tracing::debug!("Tagging {} as {}", source, target);

        #[allow(deprecated)]
        let options = bollard::image::TagImageOptions {
            repo: repo.as_str(),
            tag: tag.as_str(),
        };
        #[allow(deprecated)]
        self.docker.tag_image(source, Some(options)).await?;
        Ok(())
    }
}

/// ビルド出力の処理
fn handle_build_output(image: &str, output: bollard::models::BuildInfo) -> BuildResult<()> {
    if let Some(stream) = output.stream {
        let line = stream.trim_end();
        if !line.is_empty() {
            tracing::debug!(image, "{}", line);
        }
    }

    if let Some(error) = output.error {
        return Err(BuildError::BuildFailed(error));
    }

    if let Some(error_detail) = output.error_detail {
        let error_msg = error_detail
            .message
            .unwrap_or_else(|| "Unknown build error".to_string());
        return Err(BuildError::BuildFailed(error_msg));
    }

    if let Some(status) = output.status {
        tracing::trace!(image, "{}", status);
    }

    Ok(())
}
