use crate::config::RunConfig;
use crate::data::CorpusSplit;
use crate::error::{Result, TrainerError};
use crate::generator::Batch;
use crate::metrics::TrainingMetrics;
use crate::model::{causal_mask, Seq2SeqModel};
use crate::training::{batch_tensors, scheduled_learning_rate, sequence_loss, Trainer};
use burn::module::{Module, ModuleMapper, ModuleVisitor, ParamId};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{ElementConversion, TensorData};
use crossbeam::channel::{unbounded, Receiver, Sender};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// ワーカーへ分配する1訓練例
///
/// Teacher Forcingのシフトは変換時に適用済み（デコーダー入力は<SOS>始まり、
/// ターゲットは<SOS>を落とした列）。
#[derive(Debug, Clone)]
pub struct TrainingRecord {
    pub encoder_input: Vec<i32>,
    pub decoder_input: Vec<i32>,
    pub decoder_target: Vec<i32>,
}

/// 訓練コーパスを分配用レコード列へ一括変換する（シード固定シャッフル込み）
///
/// ジェネレーターの遅延バッチとは別系統の一括変換で、バッチ境界の一致は
/// 保証しない。
pub fn to_records(split: &CorpusSplit, seed: u64) -> Result<Vec<TrainingRecord>> {
    if split.encoder_input.len() != split.decoder_target.len() {
        return Err(TrainerError::DataShape(format!(
            "エンコーダー側とデコーダー側の例数が一致しません: {} vs {}",
            split.encoder_input.len(),
            split.decoder_target.len()
        )));
    }

    let mut records: Vec<TrainingRecord> = split
        .encoder_input
        .iter()
        .zip(split.decoder_target.iter())
        .map(|(source, full_target)| TrainingRecord {
            encoder_input: source.clone(),
            decoder_input: full_target[..full_target.len() - 1].to_vec(),
            decoder_target: full_target[1..].to_vec(),
        })
        .collect();

    let mut rng = StdRng::seed_from_u64(seed);
    records.shuffle(&mut rng);

    Ok(records)
}

// ===== パラメータスナップショット =====

/// モデルの訓練可能パラメータの写し（モジュール訪問順）
///
/// 同じRunConfigから構築したモデル同士は訪問順が一致するため、
/// ParamIdではなく順序で対応づける（レプリカはワーカー側で新規構築される）。
#[derive(Debug, Clone)]
pub struct ParamSnapshot {
    tensors: Vec<(Vec<usize>, Vec<f32>)>,
}

impl ParamSnapshot {
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// 全パラメータの総要素数
    pub fn element_count(&self) -> usize {
        self.tensors.iter().map(|(_, values)| values.len()).sum()
    }

    /// 形状と値の組を訪問順で返す
    pub fn tensors(&self) -> &[(Vec<usize>, Vec<f32>)] {
        &self.tensors
    }
}

struct SnapshotCollector {
    tensors: Vec<(Vec<usize>, Vec<f32>)>,
}

impl<B: Backend> ModuleVisitor<B> for SnapshotCollector {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        let shape = tensor.dims().to_vec();
        let values: Vec<f32> = tensor.to_data().to_vec().unwrap();
        self.tensors.push((shape, values));
    }
}

struct SnapshotRestorer<'a> {
    snapshot: &'a ParamSnapshot,
    cursor: usize,
}

impl<'a, B: Backend> ModuleMapper<B> for SnapshotRestorer<'a> {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let (shape, values) = &self.snapshot.tensors[self.cursor];
        self.cursor += 1;
        let device = tensor.device();
        Tensor::from_data(TensorData::new(values.clone(), shape.clone()), &device).require_grad()
    }
}

/// モデルの浮動小数点パラメータをスナップショットへ写し取る
pub fn capture<B: Backend, M: Module<B>>(module: &M) -> ParamSnapshot {
    let mut collector = SnapshotCollector {
        tensors: Vec::new(),
    };
    module.visit(&mut collector);
    ParamSnapshot {
        tensors: collector.tensors,
    }
}

/// スナップショットをモデルへ書き戻す
///
/// モジュールはスナップショットと同一構成であること（同じRunConfigから
/// 構築されたモデルであれば満たされる）。
pub fn restore<B: Backend, M: Module<B>>(module: M, snapshot: &ParamSnapshot) -> M {
    let mut restorer = SnapshotRestorer {
        snapshot,
        cursor: 0,
    };
    let module = module.map(&mut restorer);
    debug_assert_eq!(restorer.cursor, snapshot.len());
    module
}

// ===== マージ戦略 =====

/// エポック境界でレプリカを正準状態へ統合する戦略
///
/// 平均以外（同期型、有界遅延型）へ差し替えられるよう能力として切り出す。
pub trait MergeStrategy: Send + Sync {
    fn merge(&self, replicas: Vec<ParamSnapshot>) -> Result<ParamSnapshot>;
}

/// 要素ごとの単純平均
pub struct ParameterAveraging;

impl MergeStrategy for ParameterAveraging {
    fn merge(&self, replicas: Vec<ParamSnapshot>) -> Result<ParamSnapshot> {
        let first = replicas.first().ok_or_else(|| {
            TrainerError::Run("マージ対象のレプリカがありません".to_string())
        })?;

        let mut merged = first.clone();
        for replica in replicas.iter().skip(1) {
            if replica.len() != merged.len() {
                return Err(TrainerError::DataShape(format!(
                    "レプリカのパラメータ数が一致しません: {} vs {}",
                    replica.len(),
                    merged.len()
                )));
            }
            for (accumulated, incoming) in merged.tensors.iter_mut().zip(replica.tensors.iter()) {
                if accumulated.0 != incoming.0 {
                    return Err(TrainerError::DataShape(format!(
                        "レプリカのパラメータ形状が一致しません: {:?} vs {:?}",
                        accumulated.0, incoming.0
                    )));
                }
                for (a, b) in accumulated.1.iter_mut().zip(incoming.1.iter()) {
                    *a += b;
                }
            }
        }

        let count = replicas.len() as f32;
        for (_, values) in merged.tensors.iter_mut() {
            for value in values.iter_mut() {
                *value /= count;
            }
        }

        Ok(merged)
    }
}

// ===== 分散アンサンブル訓練 =====

struct EpochTask {
    snapshot: ParamSnapshot,
    learning_rate: f64,
}

type EpochOutcome = std::result::Result<(ParamSnapshot, f32), String>;

struct Worker {
    task_tx: Sender<EpochTask>,
    result_rx: Receiver<EpochOutcome>,
    handle: JoinHandle<()>,
}

/// 固定ワーカープールによる非同期パラメータ平均訓練
///
/// 訓練コーパスは構築時に一度だけレコード列へ変換・分割する。各エポックで
/// 正準パラメータのスナップショットを全ワーカーへ配り、各ワーカーは互いに
/// ブロックせず自分のパーティションでレプリカを訓練する。全ワーカーの更新を
/// 回収した後（バリア）、マージ戦略がエポックにつき1回だけ正準状態を更新する。
/// ワーカーの喪失は実行エラーとして即座に打ち切る。
pub struct EnsembleTrainer<B: AutodiffBackend> {
    config: Arc<RunConfig>,
    records: Vec<TrainingRecord>,
    encoder_device: B::Device,
    decoder_device: B::Device,
    merge: Box<dyn MergeStrategy>,
}

impl<B: AutodiffBackend + 'static> EnsembleTrainer<B> {
    pub fn new(
        config: Arc<RunConfig>,
        train: &CorpusSplit,
        encoder_device: B::Device,
        decoder_device: B::Device,
        merge: Box<dyn MergeStrategy>,
    ) -> Result<Self> {
        if config.num_workers == 0 {
            return Err(TrainerError::Configuration(
                "ワーカー数は1以上が必要です".to_string(),
            ));
        }
        if config.num_workers > train.len() {
            return Err(TrainerError::Configuration(format!(
                "ワーカー数{}が訓練例数{}を超えています",
                config.num_workers,
                train.len()
            )));
        }

        // 一括変換はここで1回だけ行う
        let records = to_records(train, config.shuffle_seed)?;

        Ok(Self {
            config,
            records,
            encoder_device,
            decoder_device,
            merge,
        })
    }

    fn spawn_workers(&self) -> Vec<Worker> {
        let partitions = partition_records(&self.records, self.config.num_workers);

        partitions
            .into_iter()
            .map(|records| {
                let (task_tx, task_rx) = unbounded::<EpochTask>();
                let (result_tx, result_rx) = unbounded::<EpochOutcome>();
                let config = Arc::clone(&self.config);
                let encoder_device = self.encoder_device.clone();
                let decoder_device = self.decoder_device.clone();

                let handle = thread::spawn(move || {
                    while let Ok(task) = task_rx.recv() {
                        let outcome = train_partition::<B>(
                            &config,
                            &records,
                            &encoder_device,
                            &decoder_device,
                            task,
                        );
                        if result_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });

                Worker {
                    task_tx,
                    result_rx,
                    handle,
                }
            })
            .collect()
    }

    fn run_epochs(
        &self,
        workers: &[Worker],
        model: Seq2SeqModel<B>,
    ) -> Result<(Seq2SeqModel<B>, TrainingMetrics)> {
        let mut model = model;
        let mut loss_history = Vec::new();

        for epoch in 0..self.config.epochs {
            let learning_rate = scheduled_learning_rate(self.config.learning_rate, epoch);
            let snapshot = capture(&model);

            for (worker_id, worker) in workers.iter().enumerate() {
                worker
                    .task_tx
                    .send(EpochTask {
                        snapshot: snapshot.clone(),
                        learning_rate,
                    })
                    .map_err(|_| {
                        TrainerError::Run(format!("ワーカー{}を喪失しました", worker_id))
                    })?;
            }

            // エポック境界バリア: 全レプリカの更新を回収してからマージへ進む
            let mut replicas = Vec::with_capacity(workers.len());
            let mut epoch_loss = 0.0;
            for (worker_id, worker) in workers.iter().enumerate() {
                match worker.result_rx.recv() {
                    Ok(Ok((replica, loss))) => {
                        replicas.push(replica);
                        epoch_loss += loss;
                    }
                    Ok(Err(message)) => {
                        return Err(TrainerError::Run(format!(
                            "ワーカー{}の訓練が失敗しました: {}",
                            worker_id, message
                        )));
                    }
                    Err(_) => {
                        return Err(TrainerError::Run(format!(
                            "ワーカー{}を喪失しました",
                            worker_id
                        )));
                    }
                }
            }

            // マージはエポックにつきちょうど1回
            let merged = self.merge.merge(replicas)?;
            model = restore(model, &merged);

            let avg_loss = epoch_loss / workers.len() as f32;
            loss_history.push(avg_loss);
            println!(
                "Epoch {}/{}: Loss = {:.6}（ワーカー平均, lr = {:.2e}）",
                epoch + 1,
                self.config.epochs,
                avg_loss,
                learning_rate
            );
        }

        let metrics = TrainingMetrics {
            final_loss: *loss_history.last().unwrap_or(&0.0),
            loss_history,
            val_loss_history: Vec::new(),
            epochs: self.config.epochs,
            learning_rate: self.config.learning_rate,
            batch_size: self.config.batch_size,
        };

        Ok((model, metrics))
    }
}

impl<B: AutodiffBackend + 'static> Trainer<B> for EnsembleTrainer<B> {
    fn fit(&mut self, model: Seq2SeqModel<B>) -> Result<(Seq2SeqModel<B>, TrainingMetrics)> {
        println!(
            "分散訓練開始: ワーカー{}台 / {}例",
            self.config.num_workers,
            self.records.len()
        );

        // プールは実行中固定。成否にかかわらず必ず停止してから戻る
        let workers = self.spawn_workers();
        let outcome = self.run_epochs(&workers, model);

        let mut worker_panicked = false;
        for worker in workers {
            drop(worker.task_tx);
            drop(worker.result_rx);
            if worker.handle.join().is_err() {
                worker_panicked = true;
            }
        }
        if worker_panicked && outcome.is_ok() {
            return Err(TrainerError::Run(
                "ワーカースレッドが異常終了しました".to_string(),
            ));
        }

        outcome
    }
}

/// レコードをラウンドロビンでワーカー数ぶんのパーティションへ分ける
fn partition_records(records: &[TrainingRecord], num_workers: usize) -> Vec<Vec<TrainingRecord>> {
    let mut partitions = vec![Vec::new(); num_workers];
    for (i, record) in records.iter().enumerate() {
        partitions[i % num_workers].push(record.clone());
    }
    partitions
}

/// パーティション上のチャンクをパディング済みバッチへ組み立てる
fn record_batch(records: &[TrainingRecord], pad_id: i32) -> Batch {
    let max_len = records
        .iter()
        .map(|r| r.decoder_input.len())
        .max()
        .unwrap_or(0);

    let mut encoder_input = Vec::with_capacity(records.len());
    let mut decoder_input = Vec::with_capacity(records.len());
    let mut decoder_target = Vec::with_capacity(records.len());

    for record in records {
        encoder_input.push(record.encoder_input.clone());
        let mut input = record.decoder_input.clone();
        let mut target = record.decoder_target.clone();
        input.resize(max_len, pad_id);
        target.resize(max_len, pad_id);
        decoder_input.push(input);
        decoder_target.push(target);
    }

    Batch {
        encoder_input,
        decoder_input,
        decoder_target,
    }
}

/// 1ワーカーの1エポック: スナップショットからレプリカを起こし、
/// 自分のパーティションで訓練して更新後のスナップショットを返す
fn train_partition<B: AutodiffBackend>(
    config: &RunConfig,
    records: &[TrainingRecord],
    encoder_device: &B::Device,
    decoder_device: &B::Device,
    task: EpochTask,
) -> EpochOutcome {
    if records.is_empty() {
        return Ok((task.snapshot, 0.0));
    }

    let replica = Seq2SeqModel::<B>::new(config, encoder_device, decoder_device);
    let mut replica = restore(replica, &task.snapshot);

    let mut optimizer = AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.999)
        .with_epsilon(1e-8)
        .init();

    let pad_id = config.target_vocab.pad_id;
    let mut total_loss = 0.0;
    let mut batch_count = 0;

    for chunk in records.chunks(config.batch_size) {
        let batch = record_batch(chunk, pad_id as i32);
        let (src_tokens, tgt_input, tgt_output) =
            batch_tensors::<B>(&batch, encoder_device, decoder_device);

        let tgt_mask = causal_mask::<B>(batch.target_len(), decoder_device);
        let logits = replica.forward(src_tokens, tgt_input, None, Some(tgt_mask));

        let loss = sequence_loss(
            &logits,
            &tgt_output,
            config.target_vocab_size(),
            pad_id,
            decoder_device,
        );

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &replica);
        replica = optimizer.step(task.learning_rate, replica, grads);

        total_loss += loss.into_scalar().elem::<f32>();
        batch_count += 1;
    }

    Ok((capture(&replica), total_loss / batch_count as f32))
}
