use thiserror::Error;

/// 実行全体のエラー分類
///
/// Configuring段階の失敗（Configuration / DataShape）は計算資源の確保前に
/// 即座に確定させる。訓練中の失敗（Run)はこの層では回復しない。
#[derive(Debug, Error)]
pub enum TrainerError {
    /// 未対応のデータセット識別子や不正なデバイス指定
    #[error("設定エラー: {0}")]
    Configuration(String),

    /// 例数の不一致や語彙と埋め込みの不整合
    #[error("データ形状エラー: {0}")]
    DataShape(String),

    /// 訓練ステップやワーカーの失敗
    #[error("実行エラー: {0}")]
    Run(String),

    #[error("入出力エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TrainerError>;
