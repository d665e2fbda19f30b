//! 外部ツール（syft / cosign）の起動

use crate::error::{BuildError, BuildResult};
use std::ffi::OsStr;
use std::process::Stdio;
use tokio::process::Command;

/// 標準エラーをエラーメッセージに含める最大長
const MAX_STDERR_LEN: usize = 4096;

/// PATH 上の外部コマンド
#[derive(Debug, Clone)]
pub struct ExternalTool {
    program: String,
}

impl ExternalTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// コマンドを実行し、標準出力を返す
    ///
    /// 起動できなければ `ToolNotFound`、非ゼロ終了なら `ToolFailed`。
    pub async fn run<I, S>(&self, args: I) -> BuildResult<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(program = %self.program, "Running {:?}", command.as_std());

        let output = command.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BuildError::ToolNotFound {
                    program: self.program.clone(),
                }
            } else {
                BuildError::Io(e)
            }
        })?;

        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.len() > MAX_STDERR_LEN {
                let mut cut = MAX_STDERR_LEN;
                while !stderr.is_char_boundary(cut) {
                    cut -= 1;
                }
                stderr.truncate(cut);
            }
            return Err(BuildError::ToolFailed {
                program: self.program.clone(),
                code: output.status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
