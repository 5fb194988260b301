use burn::backend::ndarray::{NdArray, NdArrayDevice};
use burn::backend::Autodiff;
use std::fs;
use std::path::PathBuf;
use tardis::config::D_MODEL;
use tardis::controller::{self, RunRequest};

type TestBackend = Autodiff<NdArray>;

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

/// 10ペアの対訳トイコーパスと埋め込みファイルを書き出す
fn write_toy_dataset(root: &PathBuf) {
    let pair_dir = root.join("en_de");
    fs::create_dir_all(&pair_dir).unwrap();

    let pairs = [
        ("good morning", "guten morgen"),
        ("good evening", "guten abend"),
        ("good night", "gute nacht"),
        ("thank you", "danke schoen"),
        ("the cat sleeps", "die katze schlaeft"),
        ("the dog runs", "der hund rennt"),
        ("the bird sings", "der vogel singt"),
        ("i like tea", "ich mag tee"),
        ("i like coffee", "ich mag kaffee"),
        ("see you tomorrow", "bis morgen"),
    ];

    let mut train = String::new();
    for (source, target) in &pairs {
        train.push_str(&format!("{}\t{}\n", source, target));
    }
    fs::write(pair_dir.join("train.tsv"), &train).unwrap();

    let dev = "good morning\tguten morgen\nthank you\tdanke schoen\n";
    fs::write(pair_dir.join("dev.tsv"), dev).unwrap();

    // testはtrainと同じ10ペア
    fs::write(pair_dir.join("test.tsv"), &train).unwrap();

    // 一部の単語だけベクトルを持つ埋め込みファイル（残りは零フォールバック）
    let embedding_dir = root.join("embeddings");
    fs::create_dir_all(&embedding_dir).unwrap();
    write_vec_file(
        &embedding_dir.join("wiki.en.vec"),
        &["good", "the", "i", "you", "morning", "cat"],
    );
    write_vec_file(
        &embedding_dir.join("wiki.de.vec"),
        &["guten", "der", "die", "ich", "morgen", "katze"],
    );
}

fn write_vec_file(path: &PathBuf, words: &[&str]) {
    let mut content = format!("{} {}\n", words.len(), D_MODEL);
    for (word_index, word) in words.iter().enumerate() {
        content.push_str(word);
        for dim in 0..D_MODEL {
            let value = (((word_index * D_MODEL + dim) as f32) * 0.13).sin() * 0.1;
            content.push_str(&format!(" {:.5}", value));
        }
        content.push('\n');
    }
    fs::write(path, content).unwrap();
}

fn toy_request(root: &PathBuf, ensemble: bool, num_workers: usize) -> RunRequest {
    RunRequest {
        dataset: "en_de".to_string(),
        dataset_path: root.clone(),
        embedding_path: root.join("embeddings"),
        dataset_size: None,
        source_vocab_size: 50,
        target_vocab_size: 50,
        batch_size: 4,
        epochs: 2,
        learning_rate: 0.001,
        devices: "0".to_string(),
        cpu: true,
        ensemble,
        num_workers,
        shuffle: true,
        seed: 42,
        save: None,
        load: None,
    }
}

#[test]
fn test_local_pipeline_end_to_end() {
    let test_dir = create_test_dir("pipeline_local");
    write_toy_dataset(&test_dir);

    let mut request = toy_request(&test_dir, false, 1);
    request.save = Some(test_dir.join("model_out"));

    let report = controller::run::<TestBackend, _>(&request, |_| NdArrayDevice::default())
        .expect("ローカル訓練パイプラインが失敗");

    // 10例すべてが評価され、メトリクス値が得られる
    assert_eq!(report.example_count, 10);
    assert_eq!(report.dataset, "en_de");
    assert!(report.score.is_finite());
    assert!(report.score >= 0.0);

    // チェックポイントとメトリクス・評価結果が書き出される
    let save_dir = test_dir.join("model_out");
    assert!(save_dir.join("model.bin").exists());
    assert!(save_dir.join("metrics.json").exists());
    assert!(save_dir.join("evaluation.json").exists());

    cleanup_test_dir(&test_dir);
}

#[test]
fn test_ensemble_pipeline_end_to_end() {
    let test_dir = create_test_dir("pipeline_ensemble");
    write_toy_dataset(&test_dir);

    let request = toy_request(&test_dir, true, 2);

    // ワーカー2台で訓練し、エポックごとに単一の正準状態へマージされた
    // モデルが評価まで到達する
    let report = controller::run::<TestBackend, _>(&request, |_| NdArrayDevice::default())
        .expect("分散訓練パイプラインが失敗");

    assert_eq!(report.example_count, 10);
    assert_eq!(report.dataset, "en_de");
    assert!(report.score.is_finite());
    assert!(report.score >= 0.0);

    cleanup_test_dir(&test_dir);
}

#[test]
fn test_unknown_dataset_aborts_during_configuring() {
    let test_dir = create_test_dir("pipeline_bad_dataset");
    // コーパスを書き出さない: I/Oの前に落ちることの確認
    let mut request = toy_request(&test_dir, false, 1);
    request.dataset = "en_fr".to_string();

    let result = controller::configure(&request);
    assert!(result.is_err());

    cleanup_test_dir(&test_dir);
}
