use imagefleet_core::TagError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Dockerfile not found: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid tag: {tag}")]
    InvalidTag { tag: String },

    #[error("Push failed: {message}")]
    PushFailed { message: String },

    #[error("Push rejected by registry: {message}")]
    PushRejected { message: String },

    #[error("Registry authentication failed for {registry}: {message}")]
    AuthFailed { registry: String, message: String },

    #[error("Pushed digest not reported for {0}")]
    DigestUnavailable(String),

    #[error("External tool not found: {program}")]
    ToolNotFound { program: String },

    #[error("{program} exited with {}: {stderr}", exit_label(.code))]
    ToolFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// 再試行で回復しうる（ネットワーク起因の）エラーか
    ///
    /// ビルド失敗・設定エラー・レジストリの拒否は何度やり直しても同じ結果になるため含めない。
    /// 外部ツールはシグナルで終了したか、標準エラーがネットワーク障害を示すときだけ対象。
    pub fn is_transient(&self) -> bool {
        match self {
            BuildError::DockerConnection(_) | BuildError::PushFailed { .. } => true,
            BuildError::ToolFailed { code, stderr, .. } => {
                code.is_none() || is_network_failure(stderr)
            }
            _ => false,
        }
    }

    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::DockerfileNotFound(path) => {
                format!(
                    "Dockerfileが見つかりません: {}\n\
                     \n\
                     解決方法:\n\
                     1. images.kdl の file がリポジトリルートからの相対パスか確認してください\n\
                     2. --project-root でリポジトリルートを指定してください",
                    path.display()
                )
            }
            BuildError::BuildFailed(msg) => {
                format!(
                    "ビルドに失敗しました: {}\n\
                     \n\
                     Dockerfileの内容を確認してください。",
                    msg
                )
            }
            BuildError::ContextNotFound(path) => {
                format!(
                    "ビルドコンテキストが見つかりません: {}\n\
                     \n\
                     --project-root を確認してください。",
                    path.display()
                )
            }
            BuildError::AuthFailed { registry, message } => {
                format!(
                    "レジストリ {} の認証情報を読み込めません: {}\n\
                     \n\
                     docker login {} を実行してください。",
                    registry, message, registry
                )
            }
            BuildError::PushRejected { message } => {
                format!(
                    "レジストリがプッシュを拒否しました: {}\n\
                     \n\
                     プッシュ権限とログイン状態（docker login）を確認してください。",
                    message
                )
            }
            BuildError::ToolNotFound { program } => {
                format!(
                    "{} が見つかりません。\n\
                     \n\
                     インストールするか、--no-sbom / --no-attest で該当ステップを無効にしてください。",
                    program
                )
            }
            _ => format!("{}", self),
        }
    }
}

/// ネットワーク起因の失敗を示す標準エラーの断片（小文字）
const NETWORK_FAILURE_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "temporary failure",
    "tls handshake",
    "unexpected eof",
    "too many requests",
    "502 bad gateway",
    "503 service unavailable",
    "504 gateway timeout",
];

fn is_network_failure(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    NETWORK_FAILURE_PATTERNS
        .iter()
        .any(|pattern| stderr.contains(pattern))
}

fn exit_label(code: &Option<i32>) -> String {
    code.map(|c| format!("code {}", c))
        .unwrap_or_else(|| "signal".to_string())
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(
            BuildError::PushFailed {
                message: "connection reset".to_string()
            }
            .is_transient()
        );
        assert!(
            !BuildError::PushRejected {
                message: "denied: permission_denied".to_string()
            }
            .is_transient()
        );
        assert!(!BuildError::BuildFailed("exit 1".to_string()).is_transient());
        assert!(
            !BuildError::ToolNotFound {
                program: "syft".to_string()
            }
            .is_transient()
        );
        assert!(!BuildError::DockerfileNotFound(PathBuf::from("Dockerfile")).is_transient());
    }

    fn tool_failed(code: Option<i32>, stderr: &str) -> BuildError {
        BuildError::ToolFailed {
            program: "cosign".to_string(),
            code,
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_tool_failure_classification() {
        assert!(tool_failed(Some(1), "Post https://rekor.sigstore.dev: i/o timeout").is_transient());
        assert!(tool_failed(Some(1), "GET ghcr.io: 503 Service Unavailable").is_transient());
        assert!(tool_failed(None, "").is_transient());
        assert!(!tool_failed(Some(1), "error: reading key: invalid password").is_transient());
        assert!(!tool_failed(Some(1), "UNAUTHORIZED: authentication required").is_transient());
    }

    #[test]
    fn test_push_rejected_user_message() {
        let message = BuildError::PushRejected {
            message: "denied: permission_denied".to_string(),
        }
        .user_message();
        assert!(message.contains("denied: permission_denied"));
        assert!(message.contains("docker login"));
    }

    #[test]
    fn test_tool_failed_message() {
        let err = BuildError::ToolFailed {
            program: "cosign".to_string(),
            code: None,
            stderr: "killed".to_string(),
        };
        assert_eq!(err.to_string(), "cosign exited with signal: killed");
    }
}
