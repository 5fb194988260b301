use crate::config::{SRC_SEQ_LEN, TGT_SEQ_LEN};
use crate::error::{Result, TrainerError};
use crate::vocabulary::Vocabulary;
use std::fs;
use std::path::Path;

/// 対応する言語ペア
///
/// de_en / vi_en は同じコーパスの方向反転で、列の役割交換だけで導出する。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    EnDe,
    DeEn,
    EnVi,
    ViEn,
}

impl Dataset {
    /// 識別子を解決する。未対応ならコーパスI/Oの前に設定エラーで落とす。
    pub fn parse(id: &str) -> Result<Self> {
        match id {
            "en_de" => Ok(Dataset::EnDe),
            "de_en" => Ok(Dataset::DeEn),
            "en_vi" => Ok(Dataset::EnVi),
            "vi_en" => Ok(Dataset::ViEn),
            _ => Err(TrainerError::Configuration(format!(
                "未対応のデータセット: {}",
                id
            ))),
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Dataset::EnDe => "en_de",
            Dataset::DeEn => "de_en",
            Dataset::EnVi => "en_vi",
            Dataset::ViEn => "vi_en",
        }
    }

    /// コーパスファイルの置き場所（反転ペアは同じディレクトリを共有）
    pub fn pair_dir(&self) -> &'static str {
        match self {
            Dataset::EnDe | Dataset::DeEn => "en_de",
            Dataset::EnVi | Dataset::ViEn => "en_vi",
        }
    }

    /// ソース・ターゲットの役割を反転して読むか
    pub fn reverse(&self) -> bool {
        matches!(self, Dataset::DeEn | Dataset::ViEn)
    }

    pub fn source_embedding_file(&self) -> &'static str {
        match self {
            Dataset::EnDe | Dataset::EnVi => "wiki.en.vec",
            Dataset::DeEn => "wiki.de.vec",
            Dataset::ViEn => "wiki.vi.vec",
        }
    }

    pub fn target_embedding_file(&self) -> &'static str {
        match self {
            Dataset::EnDe => "wiki.de.vec",
            Dataset::EnVi => "wiki.vi.vec",
            Dataset::DeEn | Dataset::ViEn => "wiki.en.vec",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Dev,
    Test,
}

impl Split {
    fn file_name(&self) -> &'static str {
        match self {
            Split::Train => "train.tsv",
            Split::Dev => "dev.tsv",
            Split::Test => "test.tsv",
        }
    }
}

/// 1スプリット分のインデックス符号化済みコーパス
///
/// エンコーダー入力はソース長へパディング済み。デコーダーターゲットは
/// [SOS, w1, ..., wN, EOS] の可変長で持ち、シフトはジェネレーター側で行う。
pub struct CorpusSplit {
    pub encoder_input: Vec<Vec<i32>>,
    pub decoder_target: Vec<Vec<i32>>,
    /// 生のターゲット文（testのみ、評価専用。符号化列と同じ例を同じ順で持つ）
    pub raw_target: Option<Vec<String>>,
    /// One-hot化したターゲット（評価スプリットで要求された場合のみ）
    pub one_hot_target: Option<Vec<Vec<Vec<f32>>>>,
}

impl CorpusSplit {
    pub fn len(&self) -> usize {
        self.encoder_input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoder_input.is_empty()
    }
}

/// trainスプリットを読み込み、語彙を新規構築して返す
///
/// dataset_sizeを指定すると訓練ペア数を先頭から制限する（語彙も制限後の
/// ペアから構築する）。
pub fn fetch_train(
    dataset: Dataset,
    dataset_path: &Path,
    source_vocab_size: usize,
    target_vocab_size: usize,
    dataset_size: Option<usize>,
) -> Result<(CorpusSplit, Vocabulary, Vocabulary)> {
    let mut pairs = read_pairs(dataset, dataset_path, Split::Train)?;
    if let Some(limit) = dataset_size {
        pairs.truncate(limit);
    }

    let source_sentences: Vec<String> = pairs.iter().map(|(s, _)| s.clone()).collect();
    let target_sentences: Vec<String> = pairs.iter().map(|(_, t)| t.clone()).collect();
    let source_vocab = Vocabulary::from_corpus(&source_sentences, source_vocab_size);
    let target_vocab = Vocabulary::from_corpus(&target_sentences, target_vocab_size);

    let split = encode_pairs(&pairs, &source_vocab, &target_vocab, false, false);
    println!(
        "訓練サンプル数: {}（語彙: ソース{} / ターゲット{}）",
        split.len(),
        source_vocab.vocab_size,
        target_vocab.vocab_size
    );

    Ok((split, source_vocab, target_vocab))
}

/// dev/testスプリットを読み込む（trainで構築済みの語彙を再利用）
///
/// testでは生のターゲット文を保持し、one_hot指定でターゲットを
/// one-hot行列として材料化する。
pub fn fetch_eval(
    dataset: Dataset,
    dataset_path: &Path,
    split: Split,
    source_vocab: &Vocabulary,
    target_vocab: &Vocabulary,
    one_hot: bool,
) -> Result<CorpusSplit> {
    let pairs = read_pairs(dataset, dataset_path, split)?;
    let keep_raw = matches!(split, Split::Test);
    let corpus = encode_pairs(&pairs, source_vocab, target_vocab, keep_raw, one_hot);
    Ok(corpus)
}

/// TSVコーパスを読み込む。形式: ソース文[TAB]ターゲット文
fn read_pairs(dataset: Dataset, dataset_path: &Path, split: Split) -> Result<Vec<(String, String)>> {
    let path = dataset_path.join(dataset.pair_dir()).join(split.file_name());
    let content = fs::read_to_string(&path).map_err(|e| {
        TrainerError::Configuration(format!(
            "コーパスファイルが読み込めません {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();

        // 空行とコメント行をスキップ
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != 2 {
            eprintln!("Warning: 無効な行形式 (TAB区切りではありません): {}", line);
            continue;
        }

        let (source, target) = if dataset.reverse() {
            (parts[1].trim(), parts[0].trim())
        } else {
            (parts[0].trim(), parts[1].trim())
        };
        pairs.push((source.to_string(), target.to_string()));
    }

    Ok(pairs)
}

fn encode_pairs(
    pairs: &[(String, String)],
    source_vocab: &Vocabulary,
    target_vocab: &Vocabulary,
    keep_raw: bool,
    one_hot_targets: bool,
) -> CorpusSplit {
    let mut encoder_input = Vec::new();
    let mut decoder_target = Vec::new();
    let mut raw_target = Vec::new();

    for (source, target) in pairs {
        let source_tokens = source_vocab.encode(source);
        let target_tokens = target_vocab.encode(target);
        if source_tokens.is_empty() || target_tokens.is_empty() {
            eprintln!("Warning: 符号化が空のペアをスキップ: {}\t{}", source, target);
            continue;
        }

        encoder_input.push(source_vocab.pad_sequence(&source_tokens, SRC_SEQ_LEN));

        // ターゲットシーケンス: [SOS, w1, ..., wN, EOS]（上限超過はEOSを残して切り詰め）
        let mut sequence = Vec::with_capacity(target_tokens.len() + 2);
        sequence.push(target_vocab.sos_id as i32);
        sequence.extend(&target_tokens);
        sequence.push(target_vocab.eos_id as i32);
        if sequence.len() > TGT_SEQ_LEN {
            sequence.truncate(TGT_SEQ_LEN - 1);
            sequence.push(target_vocab.eos_id as i32);
        }
        decoder_target.push(sequence);

        if keep_raw {
            raw_target.push(target.clone());
        }
    }

    let one_hot_target = if one_hot_targets {
        Some(
            decoder_target
                .iter()
                .map(|sequence| one_hot(sequence, target_vocab.vocab_size))
                .collect(),
        )
    } else {
        None
    };

    CorpusSplit {
        encoder_input,
        decoder_target,
        raw_target: if keep_raw { Some(raw_target) } else { None },
        one_hot_target,
    }
}

/// インデックス列をone-hot行列へ展開する
pub fn one_hot(sequence: &[i32], vocab_size: usize) -> Vec<Vec<f32>> {
    sequence
        .iter()
        .map(|&id| {
            let mut row = vec![0.0; vocab_size];
            if id >= 0 && (id as usize) < vocab_size {
                row[id as usize] = 1.0;
            }
            row
        })
        .collect()
}
