use crate::config::RunConfig;
use crate::error::{Result, TrainerError};
use crate::model::Seq2SeqModel;
use burn::prelude::*;
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use std::fs;
use std::path::Path;

/// モデルを保存（Burnバイナリ形式）
pub fn save_model<B: Backend>(model: &Seq2SeqModel<B>, save_dir: &Path) -> Result<()> {
    fs::create_dir_all(save_dir)?;

    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model_path = save_dir.join("model");

    model
        .clone()
        .save_file(model_path, &recorder)
        .map_err(|e| TrainerError::Run(format!("モデル保存エラー: {:?}", e)))?;

    println!("モデルを保存: {}", save_dir.display());
    Ok(())
}

/// 保存済みモデルを読み込む
///
/// 構成はRunConfigから再構築するため、保存時と同じ語彙・埋め込み世代の
/// 設定で呼ぶこと。
pub fn load_model<B: Backend>(
    load_dir: &Path,
    config: &RunConfig,
    encoder_device: &B::Device,
    decoder_device: &B::Device,
) -> Result<Seq2SeqModel<B>> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model_path = load_dir.join("model");

    let model = Seq2SeqModel::<B>::new(config, encoder_device, decoder_device);

    let record = recorder
        .load(model_path, decoder_device)
        .map_err(|e| TrainerError::Run(format!("モデル読み込みエラー: {:?}", e)))?;

    println!("モデルを読み込み: {}", load_dir.display());
    Ok(model.load_record(record))
}
