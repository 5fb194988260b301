use crate::checkpoint::{load_model, save_model};
use crate::config::{DevicePlacement, DeviceSpec, RunConfig, D_MODEL};
use crate::data::{self, CorpusSplit, Dataset, Split};
use crate::embedding::embedding_matrix;
use crate::ensemble::{EnsembleTrainer, ParameterAveraging};
use crate::error::Result;
use crate::metrics::{evaluate, save_metrics, save_report, Bleu, EvalContext, EvaluationReport};
use crate::model::Seq2SeqModel;
use crate::training::{LocalTrainer, Trainer};
use burn::tensor::backend::AutodiffBackend;
use std::path::PathBuf;
use std::sync::Arc;

/// 1回の実行のリクエスト（CLI引数を型付けした写し）
pub struct RunRequest {
    pub dataset: String,
    pub dataset_path: PathBuf,
    pub embedding_path: PathBuf,
    pub dataset_size: Option<usize>,
    pub source_vocab_size: usize,
    pub target_vocab_size: usize,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub devices: String,
    pub cpu: bool,
    pub ensemble: bool,
    pub num_workers: usize,
    pub shuffle: bool,
    pub seed: u64,
    pub save: Option<PathBuf>,
    pub load: Option<PathBuf>,
}

/// Configuringの成果物
///
/// RunConfigはここで完成し、以後は読み取り専用で共有される。
pub struct ConfiguredRun {
    pub config: Arc<RunConfig>,
    pub train: CorpusSplit,
    pub dev: CorpusSplit,
    pub test: CorpusSplit,
}

/// Configuring: データセット解決 → コーパスと語彙 → 埋め込み整列 → 実行設定
///
/// 識別子とデバイス指定の検証はコーパスI/Oより先に行い、失敗はここで
/// 即座に確定する（計算資源はまだ確保していない）。
pub fn configure(request: &RunRequest) -> Result<ConfiguredRun> {
    let dataset = Dataset::parse(&request.dataset)?;
    let placement = DevicePlacement::parse(&request.devices, request.cpu)?;

    let (train, source_vocab, target_vocab) = data::fetch_train(
        dataset,
        &request.dataset_path,
        request.source_vocab_size,
        request.target_vocab_size,
        request.dataset_size,
    )?;
    let dev = data::fetch_eval(
        dataset,
        &request.dataset_path,
        Split::Dev,
        &source_vocab,
        &target_vocab,
        false,
    )?;
    // testは生のターゲット文とone-hotターゲットを併せて保持する
    let test = data::fetch_eval(
        dataset,
        &request.dataset_path,
        Split::Test,
        &source_vocab,
        &target_vocab,
        true,
    )?;

    // 埋め込みは語彙と同じ世代でここで整列する
    let source_embedding = embedding_matrix(
        &request.embedding_path.join(dataset.source_embedding_file()),
        &source_vocab,
        D_MODEL,
    )?;
    let target_embedding = embedding_matrix(
        &request.embedding_path.join(dataset.target_embedding_file()),
        &target_vocab,
        D_MODEL,
    )?;

    let config = RunConfig {
        dataset,
        batch_size: request.batch_size,
        epochs: request.epochs,
        learning_rate: request.learning_rate,
        placement,
        num_workers: request.num_workers,
        shuffle: request.shuffle,
        shuffle_seed: request.seed,
        source_vocab,
        target_vocab,
        source_embedding,
        target_embedding,
    };

    Ok(ConfiguredRun {
        config: Arc::new(config),
        train,
        dev,
        test,
    })
}

/// 実行全体を駆動する: Configuring → 訓練（ローカル/分散） → 評価
///
/// resolve_deviceがバックエンド固有のデバイス構築を引き受ける。
/// どの段階の失敗もこの実行にとって終端で、エポック単位の再試行はしない。
pub fn run<B, F>(request: &RunRequest, resolve_device: F) -> Result<EvaluationReport>
where
    B: AutodiffBackend + 'static,
    F: Fn(DeviceSpec) -> B::Device,
{
    // ===== Configuring =====
    let ConfiguredRun {
        config,
        train,
        dev,
        test,
    } = configure(request)?;

    let encoder_device = resolve_device(config.placement.encoder());
    let decoder_device = resolve_device(config.placement.decoder());

    // モデルの初期化または読み込み（継続訓練）
    let model = if let Some(load_dir) = &request.load {
        load_model::<B>(load_dir, &config, &encoder_device, &decoder_device)?
    } else {
        Seq2SeqModel::<B>::new(&config, &encoder_device, &decoder_device)
    };

    // ===== 訓練（モード選択はTrainer実装の選択だけ） =====
    let mut trainer: Box<dyn Trainer<B>> = if request.ensemble {
        Box::new(EnsembleTrainer::new(
            Arc::clone(&config),
            &train,
            encoder_device.clone(),
            decoder_device.clone(),
            Box::new(ParameterAveraging),
        )?)
    } else {
        Box::new(LocalTrainer::new(
            Arc::clone(&config),
            train,
            dev,
            encoder_device.clone(),
            decoder_device.clone(),
            request.save.clone(),
        ))
    };

    let (model, training_metrics) = trainer.fit(model)?;
    println!("訓練完了！");

    if let Some(save_dir) = &request.save {
        save_model(&model, save_dir)?;
        save_metrics(save_dir, &training_metrics, &config)?;
    }

    // ===== Evaluating =====
    let eval_context = EvalContext {
        dataset: config.dataset,
        target_vocab: &config.target_vocab,
    };
    let report = evaluate(&model, &test, &eval_context, &Bleu::default(), config.batch_size)?;

    if let Some(save_dir) = &request.save {
        save_report(save_dir, &report)?;
    }

    Ok(report)
}
