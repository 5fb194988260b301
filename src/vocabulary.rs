use std::collections::HashMap;

// 特殊トークンのID割り当て（0はパディング予約）
pub const PAD_ID: usize = 0;
pub const UNK_ID: usize = 1;
pub const SOS_ID: usize = 2;
pub const EOS_ID: usize = 3;

const SPECIAL_TOKENS: [&str; 4] = ["<PAD>", "<UNK>", "<SOS>", "<EOS>"];

/// 有界語彙（単語→ID）
///
/// trainスプリットから一度だけ構築し、dev/testでは同じ語彙を再利用する。
/// IDの割り当ては実行をまたいで安定（頻度降順、同頻度はアルファベット順）。
pub struct Vocabulary {
    pub word_to_id: HashMap<String, usize>,
    pub id_to_word: Vec<String>,
    pub vocab_size: usize,
    pub pad_id: usize,
    pub unk_id: usize,
    pub sos_id: usize,
    pub eos_id: usize,
}

impl Vocabulary {
    /// コーパスから語彙を構築（サイズ上限つき）
    ///
    /// 上限には特殊トークン4つを含む。上限を超える低頻度語は<UNK>に落ちる。
    pub fn from_corpus(sentences: &[String], size_bound: usize) -> Self {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for sentence in sentences {
            for word in Self::tokenize(sentence) {
                *counts.entry(word).or_insert(0) += 1;
            }
        }

        // 頻度降順、同頻度はアルファベット順（再現性のため）
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(size_bound.saturating_sub(SPECIAL_TOKENS.len()));

        let mut words: Vec<String> = SPECIAL_TOKENS.iter().map(|s| s.to_string()).collect();
        words.extend(ranked.into_iter().map(|(word, _)| word));

        let mut word_to_id = HashMap::new();
        for (id, word) in words.iter().enumerate() {
            word_to_id.insert(word.clone(), id);
        }

        let vocab_size = words.len();

        Vocabulary {
            word_to_id,
            id_to_word: words,
            vocab_size,
            pad_id: PAD_ID,
            unk_id: UNK_ID,
            sos_id: SOS_ID,
            eos_id: EOS_ID,
        }
    }

    /// 単語単位のトークン化（小文字化、句読点の分離）
    pub fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .replace(",", " ,")
            .replace(".", " .")
            .replace("!", " !")
            .replace("?", " ?")
            .split_whitespace()
            .map(|s| s.to_string())
            .collect()
    }

    /// 文をトークンIDに変換（未知語は<UNK>）
    pub fn encode(&self, text: &str) -> Vec<i32> {
        Self::tokenize(text)
            .iter()
            .map(|word| self.word_to_id.get(word).copied().unwrap_or(self.unk_id) as i32)
            .collect()
    }

    /// トークンIDを文に戻す（特殊トークンは出力しない）
    pub fn decode(&self, token_ids: &[i32]) -> String {
        token_ids
            .iter()
            .filter_map(|&id| {
                if id >= 0 && (id as usize) < self.vocab_size {
                    let word = &self.id_to_word[id as usize];
                    if SPECIAL_TOKENS.contains(&word.as_str()) {
                        None
                    } else {
                        Some(word.clone())
                    }
                } else {
                    None
                }
            })
            .collect::<Vec<String>>()
            .join(" ")
    }

    /// シーケンスを指定長でパディング（超過分は切り詰め）
    pub fn pad_sequence(&self, tokens: &[i32], seq_len: usize) -> Vec<i32> {
        let mut padded = tokens.to_vec();
        padded.resize(seq_len, self.pad_id as i32);
        padded.truncate(seq_len);
        padded
    }

    pub fn contains(&self, word: &str) -> bool {
        self.word_to_id.contains_key(word)
    }
}
