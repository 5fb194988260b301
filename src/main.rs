#![recursion_limit = "256"]

use burn::backend::wgpu::{Wgpu, WgpuDevice};
use burn::backend::Autodiff;
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tardis::config::DeviceSpec;
use tardis::controller::{self, RunRequest};

// 訓練用バックエンド（GPU, Autodiff対応）
type TrainingBackend = Autodiff<Wgpu>;

/// ニューラル機械翻訳（英独・英越）の訓練パイプライン
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// データセット識別子（en_de, de_en, en_vi, vi_en）
    #[arg(long, default_value = "en_de")]
    dataset: String,

    /// コーパスのルートディレクトリ
    #[arg(long, default_value = "data")]
    dataset_path: PathBuf,

    /// 事前学習埋め込み（wiki.*.vec）のディレクトリ
    #[arg(long, default_value = "data/embeddings")]
    embedding_path: PathBuf,

    /// 訓練ペア数の上限
    #[arg(long)]
    dataset_size: Option<usize>,

    /// ソース語彙サイズの上限
    #[arg(long, default_value_t = 20000)]
    source_vocab_size: usize,

    /// ターゲット語彙サイズの上限
    #[arg(long, default_value_t = 20000)]
    target_vocab_size: usize,

    /// バッチサイズ
    #[arg(long, default_value_t = 64)]
    batch_size: usize,

    /// エポック数
    #[arg(long, default_value_t = 20)]
    epochs: usize,

    /// 基準学習率
    #[arg(long, default_value_t = 0.0001)]
    learning_rate: f64,

    /// 使用デバイス（"0" または "0,1" でエンコーダー/デコーダーを分離）
    #[arg(long, default_value = "0")]
    devices: String,

    /// CPUのみで実行
    #[arg(long)]
    cpu: bool,

    /// 分散アンサンブル訓練を有効化
    #[arg(long)]
    ensemble: bool,

    /// アンサンブルのワーカー数
    #[arg(long, default_value_t = 4)]
    num_workers: usize,

    /// バッチ順のシャッフルを無効化
    #[arg(long)]
    no_shuffle: bool,

    /// シャッフルのシード
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// モデルを保存するディレクトリ
    #[arg(long)]
    save: Option<PathBuf>,

    /// モデルを読み込むディレクトリ（継続訓練）
    #[arg(long)]
    load: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let start_time = Instant::now();

    let args = Args::parse();
    let request = RunRequest {
        dataset: args.dataset,
        dataset_path: args.dataset_path,
        embedding_path: args.embedding_path,
        dataset_size: args.dataset_size,
        source_vocab_size: args.source_vocab_size,
        target_vocab_size: args.target_vocab_size,
        batch_size: args.batch_size,
        epochs: args.epochs,
        learning_rate: args.learning_rate,
        devices: args.devices,
        cpu: args.cpu,
        ensemble: args.ensemble,
        num_workers: args.num_workers,
        shuffle: !args.no_shuffle,
        seed: args.seed,
        save: args.save,
        load: args.load,
    };

    let report = controller::run::<TrainingBackend, _>(&request, |spec| match spec {
        DeviceSpec::Cpu => WgpuDevice::Cpu,
        DeviceSpec::Gpu(index) => WgpuDevice::DiscreteGpu(index),
    })?;

    println!(
        "\n結果 [{}]: {} = {:.4}（{}例）",
        report.dataset, report.metric, report.score, report.example_count
    );

    let duration = start_time.elapsed();
    println!("実行時間: {:.2}秒", duration.as_secs_f64());

    Ok(())
}
