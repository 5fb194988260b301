use std::fs;
use std::path::PathBuf;
use tardis::config::SRC_SEQ_LEN;
use tardis::data::{fetch_eval, fetch_train, Dataset, Split};
use tardis::embedding::embedding_matrix;
use tardis::error::TrainerError;
use tardis::vocabulary::{Vocabulary, EOS_ID, PAD_ID, SOS_ID, UNK_ID};

/// テスト用の一時ディレクトリを作成
fn create_test_dir(name: &str) -> PathBuf {
    let test_dir = PathBuf::from(format!("tests/temp_{}", name));
    if test_dir.exists() {
        fs::remove_dir_all(&test_dir).ok();
    }
    fs::create_dir_all(&test_dir).unwrap();
    test_dir
}

fn cleanup_test_dir(test_dir: &PathBuf) {
    if test_dir.exists() {
        fs::remove_dir_all(test_dir).ok();
    }
}

/// 英独のテスト用コーパスを書き出す
fn write_test_corpus(root: &PathBuf) {
    let pair_dir = root.join("en_de");
    fs::create_dir_all(&pair_dir).unwrap();

    let train = "\
# コメント行はスキップされる
good morning\tguten morgen
good evening\tguten abend
the cat sleeps\tdie katze schlaeft
the dog runs\tder hund rennt
thank you\tdanke schoen
";
    let dev = "good morning\tguten morgen\nthank you\tdanke schoen\n";
    let test = "good evening\tguten abend\nthe cat sleeps\tdie katze schlaeft\n";

    fs::write(pair_dir.join("train.tsv"), train).unwrap();
    fs::write(pair_dir.join("dev.tsv"), dev).unwrap();
    fs::write(pair_dir.join("test.tsv"), test).unwrap();
}

#[test]
fn test_unsupported_dataset_fails_before_io() {
    // 存在しないパスでもI/Oの前に設定エラーで落ちる
    let result = Dataset::parse("en_fr");
    assert!(matches!(result, Err(TrainerError::Configuration(_))));
}

#[test]
fn test_vocabulary_bound_and_specials() {
    let sentences: Vec<String> = vec![
        "the cat and the dog".to_string(),
        "the cat sleeps".to_string(),
        "a bird".to_string(),
    ];
    let vocab = Vocabulary::from_corpus(&sentences, 7);

    // 上限は特殊トークン込み
    assert!(vocab.vocab_size <= 7);
    assert_eq!(vocab.id_to_word[PAD_ID], "<PAD>");
    assert_eq!(vocab.id_to_word[UNK_ID], "<UNK>");
    assert_eq!(vocab.id_to_word[SOS_ID], "<SOS>");
    assert_eq!(vocab.id_to_word[EOS_ID], "<EOS>");

    // 最頻出語は残り、低頻度語は<UNK>へ落ちる
    assert!(vocab.contains("the"));
    let encoded = vocab.encode("bird the");
    assert_eq!(encoded[0], UNK_ID as i32);
    assert_ne!(encoded[1], UNK_ID as i32);
}

#[test]
fn test_fetch_train_builds_aligned_split() {
    let test_dir = create_test_dir("fetch_train");
    write_test_corpus(&test_dir);

    let (split, source_vocab, target_vocab) =
        fetch_train(Dataset::EnDe, &test_dir, 50, 50, None).expect("train読み込み失敗");

    assert_eq!(split.encoder_input.len(), split.decoder_target.len());
    assert_eq!(split.len(), 5);

    // エンコーダー入力は固定長、ターゲットは<SOS>始まり<EOS>終わり
    for source in &split.encoder_input {
        assert_eq!(source.len(), SRC_SEQ_LEN);
    }
    for target in &split.decoder_target {
        assert_eq!(target[0], SOS_ID as i32);
        assert_eq!(*target.last().unwrap(), EOS_ID as i32);
    }

    // 語彙は各言語側から構築される
    assert!(source_vocab.contains("morning"));
    assert!(target_vocab.contains("morgen"));
    assert!(!source_vocab.contains("morgen"));

    cleanup_test_dir(&test_dir);
}

#[test]
fn test_reverse_swaps_language_roles() {
    let test_dir = create_test_dir("reverse");
    write_test_corpus(&test_dir);

    let (_, source_vocab, target_vocab) =
        fetch_train(Dataset::DeEn, &test_dir, 50, 50, None).expect("train読み込み失敗");

    // de_enではドイツ語がソース側になる
    assert!(source_vocab.contains("morgen"));
    assert!(target_vocab.contains("morning"));

    cleanup_test_dir(&test_dir);
}

#[test]
fn test_dataset_size_limits_training_pairs() {
    let test_dir = create_test_dir("dataset_size");
    write_test_corpus(&test_dir);

    let (split, _, _) =
        fetch_train(Dataset::EnDe, &test_dir, 50, 50, Some(3)).expect("train読み込み失敗");
    assert_eq!(split.len(), 3);

    cleanup_test_dir(&test_dir);
}

#[test]
fn test_test_split_keeps_raw_targets_and_one_hot() {
    let test_dir = create_test_dir("test_split");
    write_test_corpus(&test_dir);

    let (_, source_vocab, target_vocab) =
        fetch_train(Dataset::EnDe, &test_dir, 50, 50, None).expect("train読み込み失敗");
    let test_split = fetch_eval(
        Dataset::EnDe,
        &test_dir,
        Split::Test,
        &source_vocab,
        &target_vocab,
        true,
    )
    .expect("test読み込み失敗");

    // 生ターゲット文は符号化列と同じ例を同じ順で持つ
    let raw = test_split.raw_target.as_ref().expect("生ターゲット文がない");
    assert_eq!(raw.len(), test_split.len());
    assert_eq!(raw[0], "guten abend");

    // One-hotターゲットは（例数, シーケンス長, 語彙サイズ）に展開される
    let one_hot = test_split.one_hot_target.as_ref().expect("one-hotがない");
    assert_eq!(one_hot.len(), test_split.len());
    for (rows, sequence) in one_hot.iter().zip(test_split.decoder_target.iter()) {
        assert_eq!(rows.len(), sequence.len());
        for (row, &id) in rows.iter().zip(sequence.iter()) {
            assert_eq!(row.len(), target_vocab.vocab_size);
            assert_eq!(row[id as usize], 1.0);
            assert_eq!(row.iter().sum::<f32>(), 1.0);
        }
    }

    // devは生ターゲット文を持たない
    let dev_split = fetch_eval(
        Dataset::EnDe,
        &test_dir,
        Split::Dev,
        &source_vocab,
        &target_vocab,
        false,
    )
    .expect("dev読み込み失敗");
    assert!(dev_split.raw_target.is_none());
    assert!(dev_split.one_hot_target.is_none());

    cleanup_test_dir(&test_dir);
}

#[test]
fn test_embedding_alignment_with_oov_fallback() {
    let test_dir = create_test_dir("embedding");

    // 「morning」を意図的にファイルから外してOOVにする
    let sentences: Vec<String> = vec!["good morning world".to_string()];
    let vocab = Vocabulary::from_corpus(&sentences, 50);

    let dim = 4;
    let vec_file = test_dir.join("wiki.en.vec");
    let content = "\
3 4
good 0.1 0.2 0.3 0.4
world 0.5 0.6 0.7 0.8
unrelated 9.0 9.0 9.0 9.0
";
    fs::write(&vec_file, content).unwrap();

    let matrix = embedding_matrix(&vec_file, &vocab, dim).expect("埋め込み整列失敗");

    // 形状は (語彙サイズ, 次元)
    assert_eq!(matrix.rows, vocab.vocab_size);
    assert_eq!(matrix.cols, dim);

    // 行iは語彙ID iの単語のベクトル
    let good_id = vocab.word_to_id["good"];
    assert_eq!(matrix.row(good_id), &[0.1, 0.2, 0.3, 0.4]);
    let world_id = vocab.word_to_id["world"];
    assert_eq!(matrix.row(world_id), &[0.5, 0.6, 0.7, 0.8]);

    // OOVの「morning」は零ベクトル（決定的フォールバック）
    let morning_id = vocab.word_to_id["morning"];
    assert_eq!(matrix.row(morning_id), &[0.0, 0.0, 0.0, 0.0]);

    cleanup_test_dir(&test_dir);
}

#[test]
fn test_embedding_dimension_mismatch_fails() {
    let test_dir = create_test_dir("embedding_dim");

    let sentences: Vec<String> = vec!["good morning".to_string()];
    let vocab = Vocabulary::from_corpus(&sentences, 50);

    let vec_file = test_dir.join("wiki.en.vec");
    fs::write(&vec_file, "good 0.1 0.2\n").unwrap();

    let result = embedding_matrix(&vec_file, &vocab, 4);
    assert!(matches!(result, Err(TrainerError::DataShape(_))));

    cleanup_test_dir(&test_dir);
}
