//! Поиск по лексическому дереву: трифонная модель, межсловные контексты.

use std::sync::Arc;

use acoustic::hmm::left_to_right;
use acoustic::{AcousticModel, HmmPool, HmmPosition, PrecomputedScores, SenoneId, TiedStateModel};
use asr_core::{DecoderConfig, LogMath, VecFrameSource};
use decoder::{BreadthFirstSearchManager, SimpleAcousticScorer, SimplePruner};
use linguist::{Dictionary, LexTreeLinguist, LexicalTree, UnigramModel};

/// Юниты модели; сенон юнита совпадает с его индексом во всех контекстах.
const PHONES: [&str; 4] = ["SIL", "K", "AE", "T"];
const SELF_LOOP: f32 = -0.1;
const FORWARD: f32 = -2.3;
const HIT: f32 = -1.0;
const MISS: f32 = -10.0;

const KAT: f32 = -1.0;
const TAK: f32 = -1.5;
const WORD_INSERTION: f64 = 0.5;
const SILENCE_INSERTION: f64 = 0.25;

fn triphone_model() -> Arc<dyn AcousticModel> {
    let mut b = TiedStateModel::builder("kat-tak");
    let ids: Vec<_> = PHONES.iter().map(|p| b.ci_unit(p, false).unwrap()).collect();
    let hmm = || left_to_right(1, SELF_LOOP, FORWARD);

    b.add_hmm(ids[0], HmmPosition::Undefined, vec![SenoneId(0)], hmm())
        .unwrap();
    for (senone, &base) in ids.iter().enumerate().skip(1) {
        for &left in &ids {
            for &right in &ids {
                let unit = b.context_unit(base, left, right).unwrap();
                for position in HmmPosition::POOLED {
                    b.add_hmm(unit, position, vec![SenoneId(senone as u32)], hmm())
                        .unwrap();
                }
            }
        }
    }
    Arc::new(b.build().unwrap())
}

fn config() -> DecoderConfig {
    let mut config = DecoderConfig::small_grammar();
    config.log_base = std::f32::consts::E;
    config.use_add_table = false;
    config.lextree.word_insertion_probability = WORD_INSERTION;
    config.lextree.silence_insertion_probability = SILENCE_INSERTION;
    config
}

fn manager() -> BreadthFirstSearchManager<LexTreeLinguist> {
    let config = config();
    let pool = Arc::new(HmmPool::new(triphone_model()).unwrap());
    let mut dictionary = Dictionary::new();
    dictionary
        .add_word_by_names("KAT", &["K", "AE", "T"], pool.units(), false)
        .unwrap();
    dictionary
        .add_word_by_names("TAK", &["T", "AE", "K"], pool.units(), false)
        .unwrap();
    dictionary.add_sentence_markers(pool.units()).unwrap();
    let lm = UnigramModel::from_log_probabilities([("KAT", KAT), ("TAK", TAK)]);

    let tree = LexicalTree::compile(pool, &dictionary, &lm, &config.lextree).unwrap();
    assert!(tree.missing_hmms().is_empty());
    let linguist =
        LexTreeLinguist::new(Arc::new(tree), &config.lextree, &config.log_math().unwrap()).unwrap();
    BreadthFirstSearchManager::new(
        linguist,
        Box::new(SimpleAcousticScorer::new(PrecomputedScores::new(PHONES.len()))),
        Box::new(SimplePruner),
        &config,
    )
    .unwrap()
}

/// Кадр, в котором выигрывает сенон юнита `phone`.
fn frame(phone: &str) -> Vec<f32> {
    PHONES
        .iter()
        .map(|p| if *p == phone { HIT } else { MISS })
        .collect()
}

fn frames(phones: &[&str]) -> Vec<Vec<f32>> {
    phones.iter().map(|p| frame(p)).collect()
}

fn log(linear: f64) -> f32 {
    LogMath::natural().linear_to_log(linear).unwrap()
}

#[test]
fn test_word_beats_silence_through_lexical_tree() {
    let mut m = manager();
    m.start_recognition().unwrap();
    let mut source = VecFrameSource::from_frames(frames(&["K", "AE", "T", "SIL"]));
    let result = m.recognize(&mut source, usize::MAX).unwrap().unwrap();
    assert!(result.is_final());
    assert_eq!(result.frame(), 4);

    let best = result.best_final_token().unwrap();
    assert_eq!(result.word_path(true), vec!["<s>", "KAT", "</s>"]);
    assert_eq!(result.word_path(false), vec!["KAT"]);

    // Четыре кадра по одному юниту, выход из каждой HMM, униграмма KAT,
    // вставка слова перед K и тишины перед SIL.
    let expected = 4.0 * HIT + 4.0 * FORWARD + KAT + log(WORD_INSERTION) + log(SILENCE_INSERTION);
    let score = result.arena().get(best).score();
    assert!((score - expected).abs() < 1e-4, "{score} != {expected}");
}

#[test]
fn test_cross_word_context_reaches_second_word() {
    let mut m = manager();
    let mut source =
        VecFrameSource::from_frames(frames(&["K", "AE", "T", "T", "AE", "K", "SIL"]));
    let hyp = m.decode(&mut source).unwrap();
    assert!(hyp.is_final);
    assert_eq!(hyp.words, vec!["KAT", "TAK"]);

    // KAT выходит через T(AE,T), TAK входит через T(T,AE).
    let expected = 7.0 * HIT
        + 7.0 * FORWARD
        + KAT
        + TAK
        + 2.0 * log(WORD_INSERTION)
        + log(SILENCE_INSERTION);
    assert!((hyp.score - expected).abs() < 1e-4, "{} != {expected}", hyp.score);

    let spelled: Vec<&str> = hyp.segments.iter().map(|s| s.word.as_str()).collect();
    assert_eq!(spelled, vec!["<s>", "KAT", "TAK", "</s>"]);
}

#[test]
fn test_silence_only_input_yields_empty_hypothesis() {
    let mut m = manager();
    let mut source = VecFrameSource::from_frames(frames(&["SIL", "SIL"]));
    let hyp = m.decode(&mut source).unwrap();
    assert!(hyp.is_final);
    assert!(hyp.words.is_empty());
}
