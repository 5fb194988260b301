use crate::config::{self, RunConfig, SRC_SEQ_LEN, TGT_SEQ_LEN};
use crate::data::{CorpusSplit, Dataset};
use crate::error::{Result, TrainerError};
use crate::model::Seq2SeqModel;
use crate::vocabulary::Vocabulary;
use burn::prelude::*;
use burn::tensor::Int;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

// ===== 訓練メトリクスの永続化 =====

/// 訓練メトリクス
#[derive(Serialize, Deserialize, Debug)]
pub struct TrainingMetrics {
    /// 訓練曲線（エポックごとの損失）
    pub loss_history: Vec<f32>,
    /// 検証損失の履歴（分散モードでは空）
    pub val_loss_history: Vec<f32>,
    /// 最終損失
    pub final_loss: f32,
    /// エポック数
    pub epochs: usize,
    /// 基準学習率
    pub learning_rate: f64,
    /// バッチサイズ
    pub batch_size: usize,
}

/// モデル設定
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ModelConfigFile {
    pub dataset: String,
    pub d_model: usize,
    pub n_heads: usize,
    pub n_encoder_layers: usize,
    pub n_decoder_layers: usize,
    pub d_ff: usize,
    pub src_vocab_size: usize,
    pub tgt_vocab_size: usize,
    pub src_seq_len: usize,
    pub tgt_seq_len: usize,
}

/// メタデータ
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Metadata {
    pub crate_version: String,
    pub trained_at: String,
}

/// 統合メトリクスファイル
#[derive(Serialize, Deserialize, Debug)]
pub struct MetricsFile {
    pub model_config: ModelConfigFile,
    pub training: TrainingMetrics,
    pub metadata: Metadata,
}

/// メトリクスと設定を保存
pub fn save_metrics(
    save_dir: &Path,
    training_metrics: &TrainingMetrics,
    config: &RunConfig,
) -> Result<()> {
    fs::create_dir_all(save_dir)?;

    let model_config = ModelConfigFile {
        dataset: config.dataset.id().to_string(),
        d_model: config::D_MODEL,
        n_heads: config::NUM_HEADS,
        n_encoder_layers: config::NUM_ENCODER_LAYERS,
        n_decoder_layers: config::NUM_DECODER_LAYERS,
        d_ff: config::D_FF,
        src_vocab_size: config.source_vocab_size(),
        tgt_vocab_size: config.target_vocab_size(),
        src_seq_len: SRC_SEQ_LEN,
        tgt_seq_len: TGT_SEQ_LEN,
    };

    let metadata = Metadata {
        crate_version: env!("CARGO_PKG_VERSION").to_string(),
        trained_at: chrono::Local::now().to_rfc3339(),
    };

    let metrics_file = MetricsFile {
        model_config,
        training: TrainingMetrics {
            loss_history: training_metrics.loss_history.clone(),
            val_loss_history: training_metrics.val_loss_history.clone(),
            final_loss: training_metrics.final_loss,
            epochs: training_metrics.epochs,
            learning_rate: training_metrics.learning_rate,
            batch_size: training_metrics.batch_size,
        },
        metadata,
    };

    let metrics_json = serde_json::to_string_pretty(&metrics_file)
        .map_err(|e| TrainerError::Run(format!("メトリクスのシリアライズに失敗: {}", e)))?;
    fs::write(save_dir.join("metrics.json"), metrics_json)?;
    println!(
        "メトリクスを保存: {}",
        save_dir.join("metrics.json").display()
    );

    Ok(())
}

// ===== 評価 =====

/// 評価時の文脈
///
/// 有効なデータセットとターゲット語彙を明示的に受け渡し、
/// プロセス全域の可変状態には依存しない。
pub struct EvalContext<'a> {
    pub dataset: Dataset,
    pub target_vocab: &'a Vocabulary,
}

/// 翻訳品質メトリクスの能力境界
///
/// 仮説文と参照文の組からコーパス全体のスコアを出す。アルゴリズムの中身は
/// この境界の外側で、差し替え可能。
pub trait QualityMetric {
    fn name(&self) -> &'static str;
    fn corpus_score(&self, hypotheses: &[String], references: &[String]) -> f32;
}

/// 既定のコーパスBLEU（4グラムまで、加算平滑化、簡潔度ペナルティ）
pub struct Bleu {
    max_order: usize,
}

impl Default for Bleu {
    fn default() -> Self {
        Bleu { max_order: 4 }
    }
}

impl QualityMetric for Bleu {
    fn name(&self) -> &'static str {
        "BLEU"
    }

    fn corpus_score(&self, hypotheses: &[String], references: &[String]) -> f32 {
        let mut hyp_len = 0usize;
        let mut ref_len = 0usize;
        let mut matches = vec![0usize; self.max_order];
        let mut totals = vec![0usize; self.max_order];

        for (hypothesis, reference) in hypotheses.iter().zip(references.iter()) {
            let hyp_tokens = Vocabulary::tokenize(hypothesis);
            let ref_tokens = Vocabulary::tokenize(reference);
            hyp_len += hyp_tokens.len();
            ref_len += ref_tokens.len();

            for order in 1..=self.max_order {
                let hyp_counts = ngram_counts(&hyp_tokens, order);
                let ref_counts = ngram_counts(&ref_tokens, order);
                totals[order - 1] += hyp_tokens.len().saturating_sub(order - 1);

                // 参照側の出現数でクリップした一致数
                for (gram, count) in hyp_counts {
                    let clipped = ref_counts.get(&gram).copied().unwrap_or(0).min(count);
                    matches[order - 1] += clipped;
                }
            }
        }

        if hyp_len == 0 {
            return 0.0;
        }

        let mut log_precision_sum = 0.0;
        for order in 0..self.max_order {
            let precision = (matches[order] as f32 + 1.0) / (totals[order] as f32 + 1.0);
            log_precision_sum += precision.ln();
        }
        let geometric_mean = (log_precision_sum / self.max_order as f32).exp();

        let brevity_penalty = if hyp_len >= ref_len {
            1.0
        } else {
            (1.0 - ref_len as f32 / hyp_len as f32).exp()
        };

        brevity_penalty * geometric_mean
    }
}

fn ngram_counts(tokens: &[String], order: usize) -> HashMap<Vec<String>, usize> {
    let mut counts = HashMap::new();
    if tokens.len() < order {
        return counts;
    }
    for gram in tokens.windows(order) {
        *counts.entry(gram.to_vec()).or_insert(0) += 1;
    }
    counts
}

/// 評価結果（データセット識別子とターゲット語彙でキー付け）
#[derive(Serialize, Deserialize, Debug)]
pub struct EvaluationReport {
    pub dataset: String,
    pub metric: String,
    pub score: f32,
    pub target_vocab_size: usize,
    pub example_count: usize,
}

/// testスプリットを自己回帰デコードし、生の参照文と比較する
pub fn evaluate<B: Backend>(
    model: &Seq2SeqModel<B>,
    test: &CorpusSplit,
    context: &EvalContext<'_>,
    metric: &dyn QualityMetric,
    batch_size: usize,
) -> Result<EvaluationReport> {
    let references = test.raw_target.as_ref().ok_or_else(|| {
        TrainerError::DataShape("testスプリットに生のターゲット文がありません".to_string())
    })?;
    if references.len() != test.encoder_input.len() {
        return Err(TrainerError::DataShape(format!(
            "符号化列と生ターゲット文の例数が一致しません: {} vs {}",
            test.encoder_input.len(),
            references.len()
        )));
    }

    let vocab = context.target_vocab;
    let encoder_device = model.encoder_device();
    let mut hypotheses = Vec::with_capacity(test.len());

    for chunk in test.encoder_input.chunks(batch_size) {
        let chunk_size = chunk.len();
        let flattened: Vec<i32> = chunk.iter().flatten().copied().collect();
        let src_tokens = Tensor::<B, 1, Int>::from_data(flattened.as_slice(), encoder_device)
            .reshape([chunk_size, SRC_SEQ_LEN]);

        let generated = model.generate(
            src_tokens,
            None,
            vocab.sos_id,
            vocab.eos_id,
            TGT_SEQ_LEN,
            vocab.vocab_size,
        );

        let [_, generated_len] = generated.dims();
        let generated_data: Vec<i32> = generated.to_data().to_vec().unwrap();
        for row in generated_data.chunks(generated_len) {
            // 最初のEOSまでをデコード（特殊トークンは落ちる）
            let cut = row
                .iter()
                .position(|&id| id == vocab.eos_id as i32)
                .unwrap_or(row.len());
            hypotheses.push(vocab.decode(&row[..cut]));
        }
    }

    let score = metric.corpus_score(&hypotheses, references);
    println!(
        "評価完了 [{}]: {} = {:.4}（{}例）",
        context.dataset.id(),
        metric.name(),
        score,
        references.len()
    );

    Ok(EvaluationReport {
        dataset: context.dataset.id().to_string(),
        metric: metric.name().to_string(),
        score,
        target_vocab_size: vocab.vocab_size,
        example_count: references.len(),
    })
}

/// 評価結果を保存
pub fn save_report(save_dir: &Path, report: &EvaluationReport) -> Result<()> {
    fs::create_dir_all(save_dir)?;
    let report_json = serde_json::to_string_pretty(report)
        .map_err(|e| TrainerError::Run(format!("評価結果のシリアライズに失敗: {}", e)))?;
    fs::write(save_dir.join("evaluation.json"), report_json)?;
    println!(
        "評価結果を保存: {}",
        save_dir.join("evaluation.json").display()
    );
    Ok(())
}
