use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// リリース全体の進捗表示（ジョブごとに1スピナー）
#[derive(Clone)]
pub struct ReleaseProgress {
    multi: MultiProgress,
}

impl ReleaseProgress {
    /// 標準エラーに描画する
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
        }
    }

    /// 何も描画しない（非対話環境・テスト用）
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
        }
    }

    /// ジョブ用のスピナーを追加
    pub fn job(&self, job_id: &str) -> BuildProgress {
        let pb = self.multi.add(ProgressBar::new_spinner());
        BuildProgress::with_bar(pb, job_id)
    }
}

impl Default for ReleaseProgress {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BuildProgress {
    progress_bar: ProgressBar,
    job_id: String,
}

impl BuildProgress {
    fn with_bar(pb: ProgressBar, job_id: &str) -> Self {
        if let Ok(style) =
            ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
        {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message(format!("{}: waiting", job_id));

        Self {
            progress_bar: pb,
            job_id: job_id.to_string(),
        }
    }

    /// 現在のステージを表示
    pub fn stage(&self, stage: &str) {
        self.progress_bar
            .set_message(format!("{}: {}", self.job_id, stage));
    }

    pub fn finish_success(&self, detail: &str) {
        self.progress_bar
            .finish_with_message(format!("{} ✓ {}", self.job_id, detail));
    }

    pub fn finish_error(&self, error: &str) {
        self.progress_bar
            .finish_with_message(format!("{} ✗ {}", self.job_id, error));
    }

    pub fn message(&self) -> String {
        self.progress_bar.message()
    }

    pub fn is_finished(&self) -> bool {
        self.progress_bar.is_finished()
    }
}
