use crate::checkpoint::save_model;
use crate::config::{RunConfig, LR_DECAY_START_EPOCH, SRC_SEQ_LEN};
use crate::data::CorpusSplit;
use crate::error::{Result, TrainerError};
use crate::generator::{Batch, BatchSequence};
use crate::metrics::TrainingMetrics;
use crate::model::{causal_mask, Seq2SeqModel};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use burn::tensor::Int;
use std::path::PathBuf;
use std::sync::Arc;

/// 訓練モードの共通能力
///
/// ローカル（ジェネレーター駆動）と分散アンサンブルの両方がこれを実装し、
/// コントローラーは実装の選択以外で分岐しない。
pub trait Trainer<B: AutodiffBackend> {
    fn fit(&mut self, model: Seq2SeqModel<B>) -> Result<(Seq2SeqModel<B>, TrainingMetrics)>;
}

/// エポックごとの学習率（序盤は一定、以降は指数減衰）
pub fn scheduled_learning_rate(base: f64, epoch: usize) -> f64 {
    if epoch < LR_DECAY_START_EPOCH {
        base
    } else {
        base * (-0.1 * (epoch - LR_DECAY_START_EPOCH) as f64).exp()
    }
}

/// バッチをテンソル3つ組へ変換する
///
/// エンコーダー入力はエンコーダー側デバイス、デコーダー入力／ターゲットは
/// デコーダー側デバイスに置く。
pub fn batch_tensors<B: Backend>(
    batch: &Batch,
    encoder_device: &B::Device,
    decoder_device: &B::Device,
) -> (Tensor<B, 2, Int>, Tensor<B, 2, Int>, Tensor<B, 2, Int>) {
    let batch_size = batch.len();
    let target_len = batch.target_len();

    let flattened_inputs: Vec<i32> = batch.encoder_input.iter().flatten().copied().collect();
    let src_tokens = Tensor::<B, 1, Int>::from_data(flattened_inputs.as_slice(), encoder_device)
        .reshape([batch_size, SRC_SEQ_LEN]);

    let flattened_decoder_input: Vec<i32> =
        batch.decoder_input.iter().flatten().copied().collect();
    let tgt_input =
        Tensor::<B, 1, Int>::from_data(flattened_decoder_input.as_slice(), decoder_device)
            .reshape([batch_size, target_len]);

    let flattened_targets: Vec<i32> = batch.decoder_target.iter().flatten().copied().collect();
    let tgt_output = Tensor::<B, 1, Int>::from_data(flattened_targets.as_slice(), decoder_device)
        .reshape([batch_size, target_len]);

    (src_tokens, tgt_input, tgt_output)
}

/// 位置ごとのクロスエントロピー損失の合計（パディング位置は無視）
pub fn sequence_loss<B: Backend>(
    logits: &Tensor<B, 3>,
    tgt_output: &Tensor<B, 2, Int>,
    tgt_vocab_size: usize,
    pad_id: usize,
    device: &B::Device,
) -> Tensor<B, 1> {
    let [batch_size, target_len, _] = logits.dims();
    let mut total_position_loss = Tensor::<B, 1>::from_data([0.0], device);

    for pos in 0..target_len {
        let logits_at_pos = logits
            .clone()
            .slice([0..batch_size, pos..pos + 1, 0..tgt_vocab_size])
            .reshape([batch_size, tgt_vocab_size]);

        let targets_at_pos = tgt_output
            .clone()
            .slice([0..batch_size, pos..pos + 1])
            .reshape([batch_size]);

        let loss_at_pos = burn::nn::loss::CrossEntropyLoss::new(Some(pad_id), device)
            .forward(logits_at_pos, targets_at_pos);

        total_position_loss = total_position_loss + loss_at_pos;
    }

    total_position_loss
}

/// 単一プロセスのジェネレーター駆動訓練
///
/// 実行中に変化するモデル状態はちょうど1つ。エポックごとに検証損失を測り、
/// 保存先が指定されていればチェックポイントを書き出す。
pub struct LocalTrainer<B: AutodiffBackend> {
    config: Arc<RunConfig>,
    train: CorpusSplit,
    dev: CorpusSplit,
    encoder_device: B::Device,
    decoder_device: B::Device,
    save_dir: Option<PathBuf>,
}

impl<B: AutodiffBackend> LocalTrainer<B> {
    pub fn new(
        config: Arc<RunConfig>,
        train: CorpusSplit,
        dev: CorpusSplit,
        encoder_device: B::Device,
        decoder_device: B::Device,
        save_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            config,
            train,
            dev,
            encoder_device,
            decoder_device,
            save_dir,
        }
    }

    /// 検証スプリットの平均損失（勾配は取らない）
    fn validation_loss(&self, model: &Seq2SeqModel<B>, batches: &BatchSequence<'_>) -> f32 {
        let mut total_loss = 0.0;
        let mut batch_count = 0;

        for batch in batches.batches() {
            let (src_tokens, tgt_input, tgt_output) =
                batch_tensors::<B>(&batch, &self.encoder_device, &self.decoder_device);
            let tgt_mask = causal_mask::<B>(batch.target_len(), &self.decoder_device);
            let logits = model.forward(src_tokens, tgt_input, None, Some(tgt_mask));
            let loss = sequence_loss(
                &logits,
                &tgt_output,
                self.config.target_vocab_size(),
                self.config.target_vocab.pad_id,
                &self.decoder_device,
            );
            total_loss += loss.into_scalar().elem::<f32>();
            batch_count += 1;
        }

        if batch_count == 0 {
            0.0
        } else {
            total_loss / batch_count as f32
        }
    }
}

impl<B: AutodiffBackend> Trainer<B> for LocalTrainer<B> {
    fn fit(&mut self, model: Seq2SeqModel<B>) -> Result<(Seq2SeqModel<B>, TrainingMetrics)> {
        let training_batches = BatchSequence::new(&self.train, &self.config)?;
        let validation_batches = BatchSequence::new(&self.dev, &self.config)?;

        let mut optimizer = AdamConfig::new()
            .with_beta_1(0.9)
            .with_beta_2(0.999)
            .with_epsilon(1e-8)
            .init();

        let mut model = model;
        let mut loss_history = Vec::new();
        let mut val_loss_history = Vec::new();

        println!(
            "訓練開始: {}エポック（{}バッチ/エポック）",
            self.config.epochs,
            training_batches.batch_count()
        );

        for epoch in 0..self.config.epochs {
            let learning_rate = scheduled_learning_rate(self.config.learning_rate, epoch);
            let mut total_loss = 0.0;
            let mut batch_count = 0;

            for batch in training_batches.batches() {
                let (src_tokens, tgt_input, tgt_output) =
                    batch_tensors::<B>(&batch, &self.encoder_device, &self.decoder_device);

                let tgt_mask = causal_mask::<B>(batch.target_len(), &self.decoder_device);
                let logits = model.forward(src_tokens, tgt_input, None, Some(tgt_mask));

                let loss = sequence_loss(
                    &logits,
                    &tgt_output,
                    self.config.target_vocab_size(),
                    self.config.target_vocab.pad_id,
                    &self.decoder_device,
                );

                let grads = loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optimizer.step(learning_rate, model, grads);

                total_loss += loss.into_scalar().elem::<f32>();
                batch_count += 1;
            }

            if batch_count == 0 {
                return Err(TrainerError::Run(
                    "訓練バッチが空です".to_string(),
                ));
            }

            let avg_loss = total_loss / batch_count as f32;
            let val_loss = self.validation_loss(&model, &validation_batches);
            loss_history.push(avg_loss);
            val_loss_history.push(val_loss);

            println!(
                "Epoch {}/{}: Loss = {:.6}, Val Loss = {:.6} (lr = {:.2e})",
                epoch + 1,
                self.config.epochs,
                avg_loss,
                val_loss,
                learning_rate
            );

            // エポックごとのチェックポイント（再開用）
            if let Some(save_dir) = &self.save_dir {
                save_model(&model, save_dir)?;
            }
        }

        let metrics = TrainingMetrics {
            final_loss: *loss_history.last().unwrap_or(&0.0),
            loss_history,
            val_loss_history,
            epochs: self.config.epochs,
            learning_rate: self.config.learning_rate,
            batch_size: self.config.batch_size,
        };

        Ok((model, metrics))
    }
}
