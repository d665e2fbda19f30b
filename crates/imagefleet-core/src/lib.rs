//! imagefleet core: リリース計画からコンテナイメージのビルドマトリクスを導出
//!
//! # 概要
//!
//! - **Release plan**: 今回リリースされるアプリとバージョン（動的・JSON）
//! - **Image registry**: app ごとのビルド可能なイメージ（静的・KDL/YAML）
//! - **Matrix**: 両者を app_name で結合したビルドジョブの集合
//!
//! マトリクス計算は副作用のない純粋関数で、ビルドの実行は
//! `imagefleet-build` が担う。

pub mod discovery;
pub mod error;
pub mod matrix;
pub mod model;
pub mod parser;
pub mod plan;
pub mod tags;

pub use discovery::*;
pub use error::*;
pub use matrix::*;
pub use model::*;
pub use parser::*;
pub use plan::*;
pub use tags::*;
