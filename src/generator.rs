use crate::config::RunConfig;
use crate::data::CorpusSplit;
use crate::error::{Result, TrainerError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// 1訓練ステップ分のパディング済みバッチ
///
/// 3つのフィールドは同じバッチ次元を持つ。デコーダー入力はターゲットを
/// 1ステップ右シフトした列（先頭は<SOS>）で、エンコーダー入力に
/// ターゲットのトークンが混ざることはない。
pub struct Batch {
    pub encoder_input: Vec<Vec<i32>>,
    pub decoder_input: Vec<Vec<i32>>,
    pub decoder_target: Vec<Vec<i32>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.encoder_input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoder_input.is_empty()
    }

    /// バッチ内のデコーダー側シーケンス長（入力とターゲットで共通）
    pub fn target_len(&self) -> usize {
        self.decoder_input.first().map(|s| s.len()).unwrap_or(0)
    }
}

/// 1エポック分のバッチ列（遅延生成・再開始可能）
///
/// batches()は有限のイテレーターを返し、使い切った後に再度呼べば
/// 同じ順序・同じバッチ数でエポックをやり直せる。順序はシャッフル有効時も
/// シード固定で決定的になる（評価メトリクスの再現性に効く）。
pub struct BatchSequence<'a> {
    encoder_input: &'a [Vec<i32>],
    decoder_target: &'a [Vec<i32>],
    batch_size: usize,
    pad_id: i32,
    order: Vec<usize>,
}

impl<'a> BatchSequence<'a> {
    pub fn new(split: &'a CorpusSplit, config: &RunConfig) -> Result<Self> {
        if split.encoder_input.len() != split.decoder_target.len() {
            return Err(TrainerError::DataShape(format!(
                "エンコーダー側とデコーダー側の例数が一致しません: {} vs {}",
                split.encoder_input.len(),
                split.decoder_target.len()
            )));
        }
        if config.batch_size == 0 {
            return Err(TrainerError::Configuration(
                "バッチサイズは1以上が必要です".to_string(),
            ));
        }

        let mut order: Vec<usize> = (0..split.encoder_input.len()).collect();
        if config.shuffle {
            let mut rng = StdRng::seed_from_u64(config.shuffle_seed);
            order.shuffle(&mut rng);
        }

        Ok(BatchSequence {
            encoder_input: &split.encoder_input,
            decoder_target: &split.decoder_target,
            batch_size: config.batch_size,
            pad_id: config.target_vocab.pad_id as i32,
            order,
        })
    }

    /// 1エポックに含まれるバッチ数 ⌈N/batch_size⌉
    pub fn batch_count(&self) -> usize {
        (self.order.len() + self.batch_size - 1) / self.batch_size
    }

    pub fn example_count(&self) -> usize {
        self.order.len()
    }

    /// 1エポック分のバッチを遅延生成する
    pub fn batches(&self) -> impl Iterator<Item = Batch> + '_ {
        self.order
            .chunks(self.batch_size)
            .map(move |indices| self.assemble(indices))
    }

    /// Teacher Forcingのシフトとパディングを適用してバッチを組み立てる
    fn assemble(&self, indices: &[usize]) -> Batch {
        // バッチ内の最大ターゲット長（SOS/EOS込み）
        let max_len = indices
            .iter()
            .map(|&i| self.decoder_target[i].len())
            .max()
            .unwrap_or(0);

        let mut encoder_input = Vec::with_capacity(indices.len());
        let mut decoder_input = Vec::with_capacity(indices.len());
        let mut decoder_target = Vec::with_capacity(indices.len());

        for &i in indices {
            encoder_input.push(self.encoder_input[i].clone());

            // デコーダー入力は [SOS, w1, ..., wN]、ターゲットは [w1, ..., wN, EOS]
            let full = &self.decoder_target[i];
            let mut input = full[..full.len() - 1].to_vec();
            let mut target = full[1..].to_vec();
            input.resize(max_len - 1, self.pad_id);
            target.resize(max_len - 1, self.pad_id);
            decoder_input.push(input);
            decoder_target.push(target);
        }

        Batch {
            encoder_input,
            decoder_input,
            decoder_target,
        }
    }
}
