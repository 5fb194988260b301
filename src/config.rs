use crate::data::Dataset;
use crate::embedding::EmbeddingMatrix;
use crate::error::TrainerError;
use crate::vocabulary::Vocabulary;

// モデルハイパーパラメーター
pub const D_MODEL: usize = 64; // 埋め込み次元（事前学習ベクトルと一致させる）
pub const NUM_HEADS: usize = 4; // Multi-head Attentionのヘッド数
pub const D_HEAD: usize = D_MODEL / NUM_HEADS; // 各ヘッドの次元数
pub const D_FF: usize = D_MODEL * 4; // Feed-forward中間層の次元数
pub const SRC_SEQ_LEN: usize = 30; // ソースシーケンス長（固定長パディング）
pub const TGT_SEQ_LEN: usize = 30; // ターゲットシーケンス長の上限
pub const NUM_ENCODER_LAYERS: usize = 2; // Encoderレイヤー数
pub const NUM_DECODER_LAYERS: usize = 2; // Decoderレイヤー数

// 訓練設定
pub const LR_DECAY_START_EPOCH: usize = 10; // このエポック以降は学習率を指数減衰

/// 物理アクセラレーターの指定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSpec {
    Cpu,
    Gpu(usize),
}

/// エンコーダー／デコーダーのアクセラレーター配置
///
/// 単一指定なら両者を同居させ、ペア指定ならエンコーダーとデコーダーを
/// 別デバイスへ置く（境界で隠れ状態の転送が発生する）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePlacement {
    Single(DeviceSpec),
    Pair {
        encoder: DeviceSpec,
        decoder: DeviceSpec,
    },
}

impl DevicePlacement {
    /// デバイス指定文字列（"0" または "0,1"）を型付きの配置へ解決する
    pub fn parse(devices: &str, cpu_only: bool) -> Result<Self, TrainerError> {
        if cpu_only {
            return Ok(DevicePlacement::Single(DeviceSpec::Cpu));
        }

        let parts: Vec<&str> = devices.split(',').map(|p| p.trim()).collect();
        match parts.as_slice() {
            [single] => Ok(DevicePlacement::Single(parse_device(single)?)),
            [encoder, decoder] => Ok(DevicePlacement::Pair {
                encoder: parse_device(encoder)?,
                decoder: parse_device(decoder)?,
            }),
            _ => Err(TrainerError::Configuration(format!(
                "不正なデバイス指定です（単一またはカンマ区切りペア）: {}",
                devices
            ))),
        }
    }

    pub fn encoder(&self) -> DeviceSpec {
        match *self {
            DevicePlacement::Single(device) => device,
            DevicePlacement::Pair { encoder, .. } => encoder,
        }
    }

    pub fn decoder(&self) -> DeviceSpec {
        match *self {
            DevicePlacement::Single(device) => device,
            DevicePlacement::Pair { decoder, .. } => decoder,
        }
    }
}

fn parse_device(spec: &str) -> Result<DeviceSpec, TrainerError> {
    if spec.eq_ignore_ascii_case("cpu") {
        return Ok(DeviceSpec::Cpu);
    }
    spec.parse::<usize>()
        .map(DeviceSpec::Gpu)
        .map_err(|_| TrainerError::Configuration(format!("不正なデバイス番号: {}", spec)))
}

/// 実行設定のスナップショット
///
/// Configuring段階で一度だけ組み立て、以後は読み取り専用で
/// ジェネレーターとモデル構築へ渡す。語彙と埋め込み行列は常に
/// 同じ世代のものを対で保持する。
pub struct RunConfig {
    pub dataset: Dataset,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub placement: DevicePlacement,
    pub num_workers: usize,
    pub shuffle: bool,
    pub shuffle_seed: u64,
    pub source_vocab: Vocabulary,
    pub target_vocab: Vocabulary,
    pub source_embedding: EmbeddingMatrix,
    pub target_embedding: EmbeddingMatrix,
}

impl RunConfig {
    pub fn source_vocab_size(&self) -> usize {
        self.source_vocab.vocab_size
    }

    pub fn target_vocab_size(&self) -> usize {
        self.target_vocab.vocab_size
    }
}
