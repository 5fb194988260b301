use burn::backend::ndarray::{NdArray, NdArrayDevice};
use burn::backend::Autodiff;
use burn::prelude::*;
use burn::tensor::Int;
use tardis::config::{DevicePlacement, DeviceSpec, RunConfig, D_MODEL, SRC_SEQ_LEN};
use tardis::data::CorpusSplit;
use tardis::embedding::EmbeddingMatrix;
use tardis::ensemble::{capture, restore, to_records, MergeStrategy, ParameterAveraging};
use tardis::model::Seq2SeqModel;
use tardis::vocabulary::{Vocabulary, EOS_ID, PAD_ID, SOS_ID};

type TestBackend = Autodiff<NdArray>;

/// 決定的な非零パターンの埋め込み行列
fn patterned_embedding(rows: usize, cols: usize) -> EmbeddingMatrix {
    let data = (0..rows * cols)
        .map(|i| ((i as f32) * 0.37).sin() * 0.1)
        .collect();
    EmbeddingMatrix { data, rows, cols }
}

fn test_config() -> RunConfig {
    let sentences: Vec<String> = vec![
        "the cat sat on the mat".to_string(),
        "a dog ran far away".to_string(),
    ];
    let source_vocab = Vocabulary::from_corpus(&sentences, 30);
    let target_vocab = Vocabulary::from_corpus(&sentences, 30);
    let source_rows = source_vocab.vocab_size;
    let target_rows = target_vocab.vocab_size;

    RunConfig {
        dataset: tardis::data::Dataset::EnDe,
        batch_size: 2,
        epochs: 1,
        learning_rate: 0.001,
        placement: DevicePlacement::Single(DeviceSpec::Cpu),
        num_workers: 2,
        shuffle: false,
        shuffle_seed: 7,
        source_vocab,
        target_vocab,
        source_embedding: patterned_embedding(source_rows, D_MODEL),
        target_embedding: patterned_embedding(target_rows, D_MODEL),
    }
}

fn test_split(num_examples: usize) -> CorpusSplit {
    let mut encoder_input = Vec::new();
    let mut decoder_target = Vec::new();

    for i in 0..num_examples {
        let mut source = vec![(i % 5 + 4) as i32; (i % 3) + 1];
        source.resize(SRC_SEQ_LEN, PAD_ID as i32);
        encoder_input.push(source);

        let mut target = vec![SOS_ID as i32];
        for j in 0..(i % 3) + 1 {
            target.push(((i + j) % 6 + 4) as i32);
        }
        target.push(EOS_ID as i32);
        decoder_target.push(target);
    }

    CorpusSplit {
        encoder_input,
        decoder_target,
        raw_target: None,
        one_hot_target: None,
    }
}

#[test]
fn test_to_records_applies_shift() {
    let split = test_split(8);
    let records = to_records(&split, 7).expect("レコード変換失敗");

    assert_eq!(records.len(), 8);
    for record in &records {
        assert_eq!(record.decoder_input[0], SOS_ID as i32);
        assert_eq!(*record.decoder_target.last().unwrap(), EOS_ID as i32);
        assert_eq!(record.decoder_input.len(), record.decoder_target.len());

        // 入力の位置j+1とターゲットの位置jが一致する
        for j in 0..record.decoder_input.len() - 1 {
            assert_eq!(record.decoder_input[j + 1], record.decoder_target[j]);
        }
    }
}

#[test]
fn test_to_records_shuffle_is_deterministic() {
    let split = test_split(8);
    let records_a = to_records(&split, 7).expect("レコード変換失敗");
    let records_b = to_records(&split, 7).expect("レコード変換失敗");

    for (a, b) in records_a.iter().zip(records_b.iter()) {
        assert_eq!(a.encoder_input, b.encoder_input);
        assert_eq!(a.decoder_target, b.decoder_target);
    }
}

#[test]
fn test_parameter_averaging_is_elementwise_mean() {
    let device = NdArrayDevice::default();
    let config = test_config();

    // 初期化の乱数が異なる2つのレプリカ
    let model_a = Seq2SeqModel::<TestBackend>::new(&config, &device, &device);
    let model_b = Seq2SeqModel::<TestBackend>::new(&config, &device, &device);
    let snapshot_a = capture(&model_a);
    let snapshot_b = capture(&model_b);

    let merged = ParameterAveraging
        .merge(vec![snapshot_a.clone(), snapshot_b.clone()])
        .expect("マージ失敗");

    assert_eq!(merged.len(), snapshot_a.len());
    for ((merged_shape, merged_values), ((shape_a, values_a), (_, values_b))) in merged
        .tensors()
        .iter()
        .zip(snapshot_a.tensors().iter().zip(snapshot_b.tensors().iter()))
    {
        assert_eq!(merged_shape, shape_a);
        for (m, (a, b)) in merged_values.iter().zip(values_a.iter().zip(values_b.iter())) {
            let expected = (a + b) / 2.0;
            assert!(
                (m - expected).abs() < 1e-6,
                "要素平均が一致しません: {} vs {}",
                m,
                expected
            );
        }
    }
}

#[test]
fn test_capture_restore_roundtrip() {
    let device = NdArrayDevice::default();
    let config = test_config();

    let model_a = Seq2SeqModel::<TestBackend>::new(&config, &device, &device);
    let model_b = Seq2SeqModel::<TestBackend>::new(&config, &device, &device);

    // model_aのパラメータをmodel_bへ書き戻すと同じ出力になる
    let snapshot = capture(&model_a);
    let model_b = restore(model_b, &snapshot);

    let src_tokens = Tensor::<TestBackend, 1, Int>::from_data(
        vec![4i32; SRC_SEQ_LEN].as_slice(),
        &device,
    )
    .reshape([1, SRC_SEQ_LEN]);
    let tgt_tokens =
        Tensor::<TestBackend, 1, Int>::from_data(vec![SOS_ID as i32, 4, 5].as_slice(), &device)
            .reshape([1, 3]);

    let output_a = model_a.forward(src_tokens.clone(), tgt_tokens.clone(), None, None);
    let output_b = model_b.forward(src_tokens, tgt_tokens, None, None);

    let data_a: Vec<f32> = output_a.to_data().to_vec().unwrap();
    let data_b: Vec<f32> = output_b.to_data().to_vec().unwrap();
    let max_diff = data_a
        .iter()
        .zip(data_b.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0_f32, f32::max);
    assert!(
        max_diff < 1e-5,
        "書き戻し後の出力が一致しません（最大差: {}）",
        max_diff
    );
}
