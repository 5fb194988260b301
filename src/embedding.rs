use crate::error::{Result, TrainerError};
use crate::vocabulary::Vocabulary;
use std::fs;
use std::path::Path;

/// 語彙インデックス順に整列した埋め込み行列（行優先）
///
/// 行iは語彙ID iの単語のベクトル。語彙と同じ世代で再計算され、
/// 単独でモデル構築へ渡ることはない。
#[derive(Debug, Clone)]
pub struct EmbeddingMatrix {
    pub data: Vec<f32>,
    pub rows: usize,
    pub cols: usize,
}

impl EmbeddingMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        EmbeddingMatrix {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    fn set_row(&mut self, i: usize, values: &[f32]) {
        self.data[i * self.cols..(i + 1) * self.cols].copy_from_slice(values);
    }
}

/// 事前学習ベクトルファイルを語彙に整列した行列へ変換する
///
/// ファイル形式は1行1単語の「単語 v1 ... vD」。先頭に「件数 次元」の
/// ヘッダー行があれば読み飛ばす。語彙にあってファイルにない単語は
/// 零ベクトルで埋める（実行間で決定的なフォールバック）。
pub fn embedding_matrix(path: &Path, vocab: &Vocabulary, dim: usize) -> Result<EmbeddingMatrix> {
    let content = fs::read_to_string(path).map_err(|e| {
        TrainerError::Configuration(format!(
            "埋め込みファイルが読み込めません {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut matrix = EmbeddingMatrix::zeros(vocab.vocab_size, dim);
    let mut aligned = 0usize;

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        // ヘッダー行（「件数 次元」の2フィールド）をスキップ
        if line_no == 0 {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() == 2 && fields.iter().all(|f| f.parse::<usize>().is_ok()) {
                continue;
            }
        }

        let mut fields = line.split_whitespace();
        let word = match fields.next() {
            Some(word) => word,
            None => continue,
        };

        // 語彙外の単語は解析せず読み飛ばす
        let id = match vocab.word_to_id.get(word) {
            Some(&id) => id,
            None => continue,
        };

        let values: Vec<f32> = fields
            .map(|v| {
                v.parse::<f32>().map_err(|_| {
                    TrainerError::DataShape(format!(
                        "埋め込みベクトルの数値が不正です（{}行目: {}）",
                        line_no + 1,
                        word
                    ))
                })
            })
            .collect::<Result<Vec<f32>>>()?;

        if values.len() != dim {
            return Err(TrainerError::DataShape(format!(
                "埋め込み次元の不一致: {}は{}次元（期待: {}次元）",
                word,
                values.len(),
                dim
            )));
        }

        matrix.set_row(id, &values);
        aligned += 1;
    }

    println!(
        "埋め込み整列: {}/{}語（残りは零ベクトル）",
        aligned, vocab.vocab_size
    );

    Ok(matrix)
}
