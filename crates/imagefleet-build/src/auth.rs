//! レジストリ認証処理
//!
//! Docker config.json（`auths` / `credHelpers` / `credsStore`）から認証情報を取得し、
//! Bollard の DockerCredentials に変換します。並列プッシュで同じレジストリを
//! 何度も引かないよう、レジストリ単位でキャッシュします。

use crate::error::{BuildError, BuildResult};
use base64::Engine;
use bollard::auth::DockerCredentials;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

/// Docker Hub の正規名と、config.json に現れる別名
const DOCKER_HUB: &str = "docker.io";
const DOCKER_HUB_ALIASES: &[&str] = &["https://index.docker.io/v1/", "index.docker.io"];

/// Docker config.json の構造
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,

    /// レジストリごとの credential helper
    #[serde(default)]
    cred_helpers: HashMap<String, String>,

    /// 既定の credential helper（例: "osxkeychain", "desktop"）
    #[serde(default)]
    creds_store: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthEntry {
    /// Base64エンコードされた "username:password"
    auth: Option<String>,

    /// OAuth トークン（ACR などが使う）
    #[serde(rename = "identitytoken")]
    identity_token: Option<String>,
}

/// credential helper からのレスポンス
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialResponse {
    username: String,
    secret: String,
}

/// レジストリ認証を管理
#[derive(Debug)]
pub struct RegistryAuth {
    config_path: PathBuf,
    cache: Mutex<HashMap<String, Option<DockerCredentials>>>,
}

impl Default for RegistryAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryAuth {
    /// `$DOCKER_CONFIG/config.json`、なければ `~/.docker/config.json` を使用
    pub fn new() -> Self {
        let config_path = std::env::var("DOCKER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".docker"))
                    .unwrap_or_else(|| PathBuf::from(".docker"))
            })
            .join("config.json");

        Self::with_config_path(config_path)
    }

    pub fn with_config_path(config_path: PathBuf) -> Self {
        Self {
            config_path,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// イメージ参照からレジストリの認証情報を取得
    ///
    /// * `Ok(None)` - config.json がない、または該当レジストリの認証情報がない
    pub fn get_credentials(&self, image: &str) -> BuildResult<Option<DockerCredentials>> {
        let registry = extract_registry(image);

        if let Ok(cache) = self.cache.lock()
            && let Some(cached) = cache.get(&registry)
        {
            return Ok(cached.clone());
        }

        let credentials = self.lookup(&registry)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(registry, credentials.clone());
        }
        Ok(credentials)
    }

    /// `get_credentials` をブロッキング用スレッドで実行
    ///
    /// config.json の読み込みと credential helper の起動は同期 I/O なので、
    /// 並列に進むほかのジョブのポーリングを止めないよう非同期経路からはこちらを使う。
    pub async fn fetch_credentials(
        self: Arc<Self>,
        image: &str,
    ) -> BuildResult<Option<DockerCredentials>> {
        let image = image.to_string();
        tokio::task::spawn_blocking(move || self.get_credentials(&image))
            .await
            .map_err(|e| BuildError::AuthFailed {
                registry: "credential lookup".to_string(),
                message: e.to_string(),
            })?
    }

    fn lookup(&self, registry: &str) -> BuildResult<Option<DockerCredentials>> {
        if !self.config_path.exists() {
            tracing::debug!("Docker config.json not found at {:?}", self.config_path);
            return Ok(None);
        }

        let config = self.load_docker_config()?;

        // 1. auths セクション
        if let Some(entry) = find_auth_entry(&config, registry)
            && let Some(creds) = decode_entry(entry, registry)?
        {
            tracing::debug!("Found credentials in auths for {}", registry);
            return Ok(Some(creds));
        }

        // 2. レジストリ専用の helper、なければ既定の helper
        let helper = config
            .cred_helpers
            .get(registry)
            .or(config.creds_store.as_ref());
        if let Some(helper) = helper {
            tracing::debug!("Trying credential helper: {}", helper);
            match get_from_helper(helper, registry) {
                Ok(Some(creds)) => return Ok(Some(creds)),
                Ok(None) => {}
                Err(e) => tracing::debug!("Credential helper unavailable: {}", e),
            }
        }

        tracing::debug!("No credentials found for {}", registry);
        Ok(None)
    }

    fn load_docker_config(&self) -> BuildResult<DockerConfig> {
        let content =
            std::fs::read_to_string(&self.config_path).map_err(|e| BuildError::AuthFailed {
                registry: self.config_path.display().to_string(),
                message: format!("Failed to read config.json: {}", e),
            })?;

        serde_json::from_str(&content).map_err(|e| BuildError::AuthFailed {
            registry: self.config_path.display().to_string(),
            message: format!("Failed to parse config.json: {}", e),
        })
    }
}

/// イメージ参照からレジストリを抽出
///
/// # Examples
/// - `ghcr.io/org/app:tag` -> `ghcr.io`
/// - `myuser/app:tag` -> `docker.io`
/// - `localhost:5000/app` -> `localhost:5000`
pub fn extract_registry(image: &str) -> String {
    match image.split_once('/') {
        // 先頭要素が . か : を含むか localhost ならレジストリ
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            first.to_string()
        }
        _ => DOCKER_HUB.to_string(),
    }
}

fn find_auth_entry<'a>(config: &'a DockerConfig, registry: &str) -> Option<&'a AuthEntry> {
    if let Some(entry) = config.auths.get(registry) {
        return Some(entry);
    }
    if let Some(entry) = config.auths.get(&format!("https://{}", registry)) {
        return Some(entry);
    }
    if registry == DOCKER_HUB {
        return DOCKER_HUB_ALIASES
            .iter()
            .find_map(|alias| config.auths.get(*alias));
    }
    None
}

fn decode_entry(entry: &AuthEntry, registry: &str) -> BuildResult<Option<DockerCredentials>> {
    if let Some(token) = &entry.identity_token {
        return Ok(Some(DockerCredentials {
            identitytoken: Some(token.clone()),
            serveraddress: Some(registry.to_string()),
            ..Default::default()
        }));
    }

    let Some(auth_b64) = &entry.auth else {
        return Ok(None);
    };

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth_b64)
        .map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Failed to decode auth: {}", e),
        })?;

    let auth_str = String::from_utf8(decoded).map_err(|e| BuildError::AuthFailed {
        registry: registry.to_string(),
        message: format!("Invalid UTF-8 in auth: {}", e),
    })?;

    Ok(auth_str
        .split_once(':')
        .map(|(username, password)| DockerCredentials {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            serveraddress: Some(registry.to_string()),
            ..Default::default()
        }))
}

/// credential helper から認証情報を取得
fn get_from_helper(helper: &str, registry: &str) -> BuildResult<Option<DockerCredentials>> {
    let helper_cmd = format!("docker-credential-{}", helper);

    let mut child = Command::new(&helper_cmd)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Failed to run {}: {}", helper_cmd, e),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(registry.as_bytes()).ok();
    }

    let output = child
        .wait_with_output()
        .map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Credential helper failed: {}", e),
        })?;

    if !output.status.success() {
        tracing::debug!(
            "Credential helper returned error for {}: {}",
            registry,
            String::from_utf8_lossy(&output.stderr)
        );
        return Ok(None);
    }

    let response: CredentialResponse =
        serde_json::from_slice(&output.stdout).map_err(|e| BuildError::AuthFailed {
            registry: registry.to_string(),
            message: format!("Failed to parse credential helper response: {}", e),
        })?;

    // identity token は username "<token>" で返される
    let credentials = if response.username == "<token>" {
        DockerCredentials {
            identitytoken: Some(response.secret),
            serveraddress: Some(registry.to_string()),
            ..Default::default()
        }
    } else {
        DockerCredentials {
            username: Some(response.username),
            password: Some(response.secret),
            serveraddress: Some(registry.to_string()),
            ..Default::default()
        }
    };
    Ok(Some(credentials))
}
