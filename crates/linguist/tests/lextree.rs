//! Интеграционные тесты лексического дерева на полной трифонной модели.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use acoustic::hmm::left_to_right;
use acoustic::{AcousticModel, HmmPool, HmmPosition, SenoneId, TiedStateModel, UnitId};
use asr_core::{LexTreeConfig, LogMath};
use linguist::{
    Dictionary, LexNode, LexTreeLinguist, LexTreeState, LexicalTree, NodeId, SearchGraph, SearchState,
    UnigramModel,
};

/// `ZH` зарегистрирован, но HMM для него нет.
const PHONES: [&str; 9] = ["SIL", "K", "AE", "T", "AX", "S", "P", "IH", "ZH"];

fn full_triphone_model() -> Arc<dyn AcousticModel> {
    let mut b = TiedStateModel::builder("triphones");
    let ids: Vec<UnitId> = PHONES.iter().map(|p| b.ci_unit(p, false).unwrap()).collect();
    let mut senone = 0u32;
    let mut next_senone = || {
        senone += 1;
        vec![SenoneId(senone - 1)]
    };

    let sil = ids[0];
    b.add_hmm(sil, HmmPosition::Undefined, next_senone(), left_to_right(1, -0.1, -2.3))
        .unwrap();
    for &base in &ids[1..ids.len() - 1] {
        for &left in &ids {
            for &right in &ids {
                let unit = b.context_unit(base, left, right).unwrap();
                for position in HmmPosition::POOLED {
                    b.add_hmm(unit, position, next_senone(), left_to_right(1, -0.1, -2.3))
                        .unwrap();
                }
            }
        }
    }
    Arc::new(b.build().unwrap())
}

struct Fixture {
    pool: Arc<HmmPool>,
    dictionary: Dictionary,
    lm: UnigramModel,
}

impl Fixture {
    fn new(words: &[(&str, &str, f32)]) -> Self {
        let model = full_triphone_model();
        let pool = Arc::new(HmmPool::new(model).unwrap());
        let mut dictionary = Dictionary::new();
        for (spelling, phones, _) in words {
            let names: Vec<&str> = phones.split_whitespace().collect();
            dictionary
                .add_word_by_names(spelling, &names, pool.units(), false)
                .unwrap();
        }
        dictionary.add_sentence_markers(pool.units()).unwrap();
        let lm = UnigramModel::from_log_probabilities(words.iter().map(|(w, _, p)| (*w, *p)));
        Self {
            pool,
            dictionary,
            lm,
        }
    }

    fn compile(&self) -> LexicalTree {
        let config = LexTreeConfig {
            language_weight: 1.0,
            ..LexTreeConfig::default()
        };
        LexicalTree::compile(self.pool.clone(), &self.dictionary, &self.lm, &config).unwrap()
    }

    fn unit(&self, name: &str) -> UnitId {
        self.pool.units().ci_unit(name).unwrap()
    }

    fn units_of(&self, spelling: &str) -> Vec<UnitId> {
        self.dictionary.pronunciations(spelling)[0].units().to_vec()
    }
}

#[test]
fn test_shared_prefix_reaches_identical_nodes() {
    let f = Fixture::new(&[
        ("KATAX", "K AE T AX", -1.0),
        ("KATS", "K AE T S", -1.5),
        ("KAPIH", "K AE P IH", -2.0),
    ]);
    let tree = f.compile();
    let sil = f.unit("SIL");

    let a = tree.find_path(sil, &f.units_of("KATAX")).unwrap();
    let b = tree.find_path(sil, &f.units_of("KATS")).unwrap();
    let c = tree.find_path(sil, &f.units_of("KAPIH")).unwrap();
    assert_eq!(a.len(), 4);

    // K(SIL,AE) и AE(K,T) общие у первых двух слов.
    assert_eq!(a[0], b[0]);
    assert_eq!(a[1], b[1]);
    assert_ne!(a[2], b[2]);
    // У третьего слова общий только начальный юнит.
    assert_eq!(a[0], c[0]);
    assert_ne!(a[1], c[1]);

    // Оптимистичная вероятность общего узла — максимум по словам.
    assert_eq!(tree.probability(a[1]), -1.0);
    assert_eq!(tree.probability(c[1]), -2.0);
    assert!(tree.missing_hmms().is_empty());
}

#[test]
fn test_homophones_share_end_node_and_end_hmms_are_cached() {
    let f = Fixture::new(&[
        ("KAT", "K AE T", -1.0),
        ("CAT", "K AE T", -1.2),
        ("PAT", "P AE T", -1.4),
    ]);
    let tree = f.compile();
    let sil = f.unit("SIL");

    let kat = tree.find_path(sil, &f.units_of("KAT")).unwrap();
    let cat = tree.find_path(sil, &f.units_of("CAT")).unwrap();
    assert_eq!(kat, cat);

    let end = *kat.last().unwrap();
    let words: Vec<_> = tree.successors(end).collect();
    let kat_node = tree
        .word_node(f.dictionary.pronunciations("KAT")[0].id())
        .unwrap();
    let cat_node = tree
        .word_node(f.dictionary.pronunciations("CAT")[0].id())
        .unwrap();
    assert_eq!(words.len(), 2);
    assert!(words.contains(&kat_node) && words.contains(&cat_node));

    // Конечный юнит T после AE: один набор HMM на (base, lc).
    let pat = tree.find_path(sil, &f.units_of("PAT")).unwrap();
    let pat_end = *pat.last().unwrap();
    let (t, ae) = (f.unit("T"), f.unit("AE"));
    for node in [end, pat_end] {
        match tree.node(node) {
            Some(LexNode::End { base, left_context }) => {
                assert_eq!((*base, *left_context), (t, ae));
            }
            other => panic!("ожидался End, получено {other:?}"),
        }
    }

    let first = tree.end_hmms(t, ae);
    let second = tree.end_hmms(t, ae);
    assert!(Arc::ptr_eq(&first, &second));
    // По одной HMM на каждый правый контекст из входных юнитов (K, P, SIL).
    assert_eq!(first.len(), tree.entry_units().len());
    assert_eq!(tree.entry_units().len(), 3);
    let rights: HashSet<UnitId> = first
        .iter()
        .flat_map(|e| e.right_contexts.iter().copied())
        .collect();
    assert_eq!(rights.len(), 3);
}

#[test]
fn test_freeze_twice_keeps_successors() {
    let f = Fixture::new(&[("KAT", "K AE T", -1.0), ("KAP", "K AE P", -1.0)]);
    let mut tree = f.compile();
    assert!(tree.is_frozen());

    let snapshot = |tree: &LexicalTree| -> Vec<Vec<NodeId>> {
        (0..tree.stats().nodes as u32)
            .map(|i| tree.successors(NodeId(i)).collect())
            .collect()
    };
    let before = snapshot(&tree);
    tree.freeze();
    tree.freeze();
    assert!(tree.is_frozen());
    assert_eq!(before, snapshot(&tree));
}

#[test]
fn test_missing_interior_hmm_is_reported_and_word_skipped() {
    let f = Fixture::new(&[("KAT", "K AE T", -1.0), ("KZT", "K ZH T", -1.0)]);
    let tree = f.compile();
    let sil = f.unit("SIL");

    assert!(tree.find_path(sil, &f.units_of("KAT")).is_some());
    assert!(tree.find_path(sil, &f.units_of("KZT")).is_none());
    let report = tree
        .missing_hmms()
        .iter()
        .find(|r| r.words == ["KZT"])
        .unwrap();
    assert_eq!(report.unit, "ZH(K,T)");
    assert_eq!(report.position, HmmPosition::Internal);
    assert!(report.skipped);
    assert_eq!(tree.stats().missing_hmms, tree.missing_hmms().len());
}

#[test]
fn test_missing_end_hmm_is_reported_and_word_skipped() {
    let f = Fixture::new(&[("KAT", "K AE T", -1.0), ("KAZH", "K AE ZH", -1.0)]);
    let tree = f.compile();
    let sil = f.unit("SIL");

    assert!(tree.find_path(sil, &f.units_of("KAT")).is_some());
    assert!(tree.find_path(sil, &f.units_of("KAZH")).is_none());
    assert!(
        tree.word_node(f.dictionary.pronunciations("KAZH")[0].id())
            .is_none()
    );

    // По отчёту на каждый правый контекст; слово названо.
    let reports: Vec<_> = tree
        .missing_hmms()
        .iter()
        .filter(|r| r.position == HmmPosition::End)
        .collect();
    assert_eq!(reports.len(), tree.entry_units().len());
    for report in &reports {
        assert_eq!(report.words, ["KAZH"]);
        assert!(report.skipped);
        assert!(report.unit.starts_with("ZH(AE,"));
    }
    assert!(reports.iter().any(|r| r.unit == "ZH(AE,K)"));
    assert!(reports[0].to_string().contains("KAZH"));
    assert_eq!(tree.stats().missing_hmms, tree.missing_hmms().len());
}

#[test]
fn test_missing_begin_hmm_names_affected_words() {
    let f = Fixture::new(&[("KAT", "K AE T", -1.0), ("ZHAT", "ZH AE T", -1.0)]);
    let tree = f.compile();

    let reports: Vec<_> = tree
        .missing_hmms()
        .iter()
        .filter(|r| r.position == HmmPosition::Begin)
        .collect();
    assert_eq!(reports.len(), tree.exit_units().len());
    for report in &reports {
        assert_eq!(report.words, ["ZHAT"]);
        // Слово в дереве, но недостижимо после этих левых контекстов.
        assert!(!report.skipped);
    }
    assert!(reports.iter().any(|r| r.unit == "ZH(SIL,AE)"));
    assert!(
        tree.word_node(f.dictionary.pronunciations("ZHAT")[0].id())
            .is_some()
    );
}

/// Обход графа до состояний-слов с суммой языковых вероятностей.
fn language_scores(linguist: &LexTreeLinguist) -> HashMap<String, f32> {
    let mut scores = HashMap::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([(linguist.initial_state(), 0.0f32)]);
    while let Some((state, language)) = queue.pop_front() {
        for arc in linguist.successors(&state) {
            let total = language + arc.language_probability;
            if let LexTreeState::Word { pronunciation, .. } = &arc.state {
                scores
                    .entry(pronunciation.word().spelling().to_string())
                    .or_insert(total);
                continue;
            }
            if seen.insert(arc.state.clone()) {
                queue.push_back((arc.state, total));
            }
        }
    }
    scores
}

#[test]
fn test_language_probability_telescopes_to_unigram() {
    let f = Fixture::new(&[
        ("KAT", "K AE T", -1.0),
        ("KAPIH", "K AE P IH", -2.0),
        ("S", "S", -3.0),
    ]);
    let tree = Arc::new(f.compile());
    let linguist =
        LexTreeLinguist::new(tree, &LexTreeConfig::default(), &LogMath::natural()).unwrap();

    let scores = language_scores(&linguist);
    assert!((scores["KAT"] + 1.0).abs() < 1e-5);
    assert!((scores["KAPIH"] + 2.0).abs() < 1e-5);
    assert!((scores["S"] + 3.0).abs() < 1e-5);
    assert!(scores.contains_key("</s>"));
}

#[test]
fn test_unit_state_leads_to_first_hmm_state() {
    let f = Fixture::new(&[("KAT", "K AE T", -1.0)]);
    let linguist = LexTreeLinguist::new(
        Arc::new(f.compile()),
        &LexTreeConfig::default(),
        &LogMath::natural(),
    )
    .unwrap();

    let initial = linguist.initial_state();
    assert!(initial.word().unwrap().is_sentence_start());
    let entries = linguist.successors(&initial);
    assert!(!entries.is_empty());
    for arc in &entries {
        assert!(!arc.state.is_emitting());
        let inner = linguist.successors(&arc.state);
        assert_eq!(inner.len(), 1);
        assert!(inner[0].state.is_emitting());
        assert!(inner[0].state.senone().is_some());
    }
}
