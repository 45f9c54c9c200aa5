//! Лексическое дерево.
//!
//! Компилирует словарь и униграммную LM в общее префиксное дерево
//! контекстно-зависимых юнитов. Структура:
//!
//! ```text
//! entry point (первый юнит слова)
//!   └─ узел по левому контексту ─┬─ Unit(begin HMM, lc, rc) ─ Unit(internal) ─ … ─ End(base, lc) ─ Word
//!                                └─ Unit(single HMM) ─ Word           (однофонемные слова)
//! ```
//!
//! Последний юнит слова представлен узлом `End(base, lc)`: его правый
//! контекст зависит от следующего слова, поэтому HMM для каждого правого
//! контекста подбираются во время поиска и кешируются по `(base, lc)`.
//! Наличие этих HMM проверяется при компиляции: слово без единой конечной
//! HMM в дерево не попадает, пропуски отдельных контекстов попадают в
//! [`LexicalTree::missing_hmms`].
//!
//! Узлы хранятся в арене и адресуются [`NodeId`]. После компиляции дерево
//! замораживается: таблицы наследников превращаются в отсортированные
//! срезы. Вставка в замороженный узел — ошибка программиста (panic).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use acoustic::{Hmm, HmmId, HmmPool, HmmPosition, UnitId, UnitManager};
use asr_core::{AsrError, AsrResult, LOG_ONE, LOG_ZERO, LexTreeConfig};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::dictionary::{Dictionary, Pronunciation, PronunciationId, SENTENCE_START, SILENCE_WORD};
use crate::language_model::LanguageModel;

// ---------------------------------------------------------------------------
// Таблица наследников
// ---------------------------------------------------------------------------

/// Таблица «ключ → значение»: изменяемая при построении, срез после заморозки.
#[derive(Debug, Clone)]
pub enum Slots<K, V> {
    Open(BTreeMap<K, V>),
    Frozen(Box<[(K, V)]>),
}

impl<K, V> Default for Slots<K, V> {
    fn default() -> Self {
        Slots::Open(BTreeMap::new())
    }
}

impl<K: Ord + Copy + fmt::Debug, V: Copy> Slots<K, V> {
    pub fn get(&self, key: &K) -> Option<V> {
        match self {
            Slots::Open(map) => map.get(key).copied(),
            Slots::Frozen(items) => items
                .binary_search_by(|(k, _)| k.cmp(key))
                .ok()
                .map(|i| items[i].1),
        }
    }

    /// Вставить или перезаписать значение.
    ///
    /// # Panics
    ///
    /// Если таблица заморожена.
    pub fn insert(&mut self, key: K, value: V) {
        match self {
            Slots::Open(map) => {
                map.insert(key, value);
            }
            Slots::Frozen(_) => panic!("вставка {key:?} в замороженный узел"),
        }
    }

    /// Превратить таблицу в срез. Повторный вызов ничего не меняет.
    pub fn freeze(&mut self) {
        if let Slots::Open(map) = self {
            let items: Box<[(K, V)]> = std::mem::take(map).into_iter().collect();
            *self = Slots::Frozen(items);
        }
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, Slots::Frozen(_))
    }

    pub fn len(&self) -> usize {
        match self {
            Slots::Open(map) => map.len(),
            Slots::Frozen(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Пары в порядке ключей.
    pub fn iter(&self) -> impl Iterator<Item = (K, V)> + '_ {
        let (open, frozen) = match self {
            Slots::Open(map) => (Some(map.iter().map(|(k, v)| (*k, *v))), None),
            Slots::Frozen(items) => (None, Some(items.iter().copied())),
        };
        open.into_iter().flatten().chain(frozen.into_iter().flatten())
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = V> + '_ {
        self.iter().map(|(_, v)| v)
    }
}

// ---------------------------------------------------------------------------
// Узлы
// ---------------------------------------------------------------------------

/// Индекс узла в арене дерева.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Ключ наследника. Однофонемные слова получают отдельный ключ, чтобы не
/// сливаться с начальными HMM многофонемных слов.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SuccessorKey {
    Hmm(HmmId),
    SingleWord(HmmId),
    End { base: UnitId, left_context: UnitId },
    Word(PronunciationId),
}

/// Роль юнита для вероятности вставки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Simple,
    WordBeginning,
    Silence,
    Filler,
}

/// Вариант узла.
#[derive(Debug, Clone)]
pub enum LexNode {
    /// Вспомогательный узел: точка входа или её вариант по левому контексту.
    Internal,
    /// HMM юнита и наблюдаемые правые контексты.
    Unit {
        hmm: Arc<Hmm>,
        kind: UnitKind,
        right_contexts: Slots<UnitId, ()>,
    },
    /// Выход последнего юнита слова; HMM подбираются при поиске.
    End { base: UnitId, left_context: UnitId },
    /// Слово. Один узел на произношение.
    Word {
        pronunciation: Arc<Pronunciation>,
        is_final: bool,
    },
}

#[derive(Debug, Clone)]
struct NodeData {
    node: LexNode,
    probability: f32,
    successors: Slots<SuccessorKey, NodeId>,
}

/// HMM последнего юнита для группы правых контекстов.
#[derive(Debug, Clone)]
pub struct EndHmm {
    pub hmm: Arc<Hmm>,
    pub right_contexts: Box<[UnitId]>,
}

/// Начальное слово `<s>` с явным родительским юнитом.
///
/// Родитель — HMM тишины, правые контексты которой охватывают все
/// входные юниты словаря.
#[derive(Debug, Clone)]
pub struct InitialWordNode {
    pub pronunciation: Arc<Pronunciation>,
    pub parent: NodeId,
}

impl InitialWordNode {
    /// Левый контекст первого слова.
    pub fn left_context(&self) -> Option<UnitId> {
        self.pronunciation.units().last().copied()
    }
}

#[derive(Debug, Clone)]
struct EntryPoint {
    base_node: NodeId,
    probability: f32,
    by_left_context: BTreeMap<UnitId, NodeId>,
    single_unit_words: Vec<(Arc<Pronunciation>, f32)>,
    /// Многофонемные слова по второму юниту (правому контексту начальной HMM).
    words_by_second: BTreeMap<UnitId, Vec<String>>,
}

/// Отсутствующая HMM, обнаруженная при компиляции.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingHmmReport {
    /// Слова, которые используют юнит в этом контексте.
    pub words: Vec<String>,
    /// Юнит в контексте, например `AE(K,T)`.
    pub unit: String,
    pub position: HmmPosition,
    /// Слова исключены из дерева целиком. Иначе они недостижимы только
    /// в этом контексте.
    pub skipped: bool,
}

impl fmt::Display for MissingHmmReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{:?}]", self.unit, self.position)?;
        if self.words.is_empty() {
            return Ok(());
        }
        let words = self.words.join(", ");
        if self.skipped {
            write!(f, ", пропущено: {words}")
        } else {
            write!(f, ", недостижимо в этом контексте: {words}")
        }
    }
}

/// Размеры скомпилированного дерева.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    pub words: usize,
    pub pronunciations: usize,
    pub nodes: usize,
    pub unit_nodes: usize,
    pub end_nodes: usize,
    pub word_nodes: usize,
    pub entry_units: usize,
    pub exit_units: usize,
    pub missing_hmms: usize,
}

impl fmt::Display for TreeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} слов ({} произношений), {} узлов: {} HMM, {} End, {} Word; входов {}, выходов {}, пропущено HMM {}",
            self.words,
            self.pronunciations,
            self.nodes,
            self.unit_nodes,
            self.end_nodes,
            self.word_nodes,
            self.entry_units,
            self.exit_units,
            self.missing_hmms
        )
    }
}

// ---------------------------------------------------------------------------
// Дерево
// ---------------------------------------------------------------------------

/// Скомпилированное лексическое дерево.
///
/// После [`LexicalTree::compile`] дерево только читается; кеш HMM
/// конечных узлов заполняется лениво под `RwLock`.
#[derive(Debug)]
pub struct LexicalTree {
    pool: Arc<HmmPool>,
    nodes: Vec<NodeData>,
    entry_points: BTreeMap<UnitId, EntryPoint>,
    entry_units: Vec<UnitId>,
    exit_units: Vec<UnitId>,
    word_nodes: HashMap<PronunciationId, NodeId>,
    initial: InitialWordNode,
    end_cache: RwLock<HashMap<(UnitId, UnitId), Arc<[EndHmm]>>>,
    missing: Vec<MissingHmmReport>,
    num_words: usize,
    num_pronunciations: usize,
    frozen: bool,
}

impl LexicalTree {
    /// Скомпилировать дерево.
    ///
    /// Словарь дерева: слова LM, найденные в словаре произношений, плюс
    /// филлеры (все при `add_filler_words`, иначе только `<sil>`) и `</s>`.
    ///
    /// # Ошибки
    ///
    /// `AsrError::Model`, если в словаре нет однофонемного `<s>`;
    /// `AsrError::MissingHmm`, если нет HMM для юнита `<s>`. Отсутствие
    /// HMM для слов ошибкой не является: слово пропускается и попадает в
    /// [`LexicalTree::missing_hmms`].
    pub fn compile(
        pool: Arc<HmmPool>,
        dictionary: &Dictionary,
        lm: &dyn LanguageModel,
        config: &LexTreeConfig,
    ) -> AsrResult<Self> {
        config.validate()?;

        let start = dictionary
            .pronunciations(SENTENCE_START)
            .first()
            .cloned()
            .ok_or_else(|| AsrError::Model(format!("в словаре нет {SENTENCE_START}")))?;
        let &[start_unit] = start.units() else {
            return Err(AsrError::Model(format!(
                "{SENTENCE_START} должно состоять из одного юнита"
            )));
        };

        let words = select_words(dictionary, lm, config);
        let pronunciations: Vec<(Arc<Pronunciation>, f32)> = words
            .iter()
            .flat_map(|(spelling, probability)| {
                dictionary
                    .pronunciations(spelling)
                    .iter()
                    .map(move |p| (p.clone(), *probability))
            })
            .collect();

        let mut entry_units = BTreeSet::new();
        let mut exit_units = BTreeSet::from([start_unit]);
        for (pronunciation, _) in &pronunciations {
            let units = pronunciation.units();
            if let (Some(first), Some(last)) = (units.first(), units.last()) {
                entry_units.insert(*first);
                exit_units.insert(*last);
            }
        }
        let entry_units: Vec<UnitId> = entry_units.into_iter().collect();
        let exit_units: Vec<UnitId> = exit_units.into_iter().collect();

        let start_hmm = pool.get_hmm(start_unit, start_unit, start_unit, HmmPosition::Single)?;
        let parent = NodeData {
            node: LexNode::Unit {
                hmm: start_hmm,
                kind: unit_kind(pool.units(), start_unit, HmmPosition::Single),
                right_contexts: Slots::Open(entry_units.iter().map(|&u| (u, ())).collect()),
            },
            probability: LOG_ONE,
            successors: Slots::default(),
        };

        let mut tree = Self {
            pool,
            nodes: vec![parent],
            entry_points: BTreeMap::new(),
            entry_units,
            exit_units,
            word_nodes: HashMap::new(),
            initial: InitialWordNode {
                pronunciation: start,
                parent: NodeId(0),
            },
            end_cache: RwLock::new(HashMap::new()),
            missing: Vec::new(),
            num_words: words.len(),
            num_pronunciations: pronunciations.len(),
            frozen: false,
        };

        for (pronunciation, probability) in &pronunciations {
            tree.add_pronunciation(pronunciation, *probability);
        }
        tree.create_entry_point_map();
        tree.connect_single_unit_words();
        tree.freeze();

        let stats = tree.stats();
        info!("Лексическое дерево: {stats}");
        if !tree.missing.is_empty() {
            warn!("Лексическое дерево: {} HMM не найдено", tree.missing.len());
        }
        Ok(tree)
    }

    // -----------------------------------------------------------------------
    // Построение
    // -----------------------------------------------------------------------

    fn new_node(&mut self, node: LexNode, probability: f32) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData {
            node,
            probability,
            successors: Slots::default(),
        });
        id
    }

    /// Наследник по ключу; существующий узел получает максимум вероятностей.
    fn add_successor(
        &mut self,
        parent: NodeId,
        key: SuccessorKey,
        probability: f32,
        make: impl FnOnce() -> LexNode,
    ) -> NodeId {
        if let Some(child) = self.nodes[parent.index()].successors.get(&key) {
            let data = &mut self.nodes[child.index()];
            data.probability = data.probability.max(probability);
            return child;
        }
        let child = self.new_node(make(), probability);
        self.nodes[parent.index()].successors.insert(key, child);
        child
    }

    fn add_word_node(&mut self, parent: NodeId, pronunciation: &Arc<Pronunciation>, probability: f32) {
        let key = SuccessorKey::Word(pronunciation.id());
        let node = match self.word_nodes.get(&pronunciation.id()) {
            Some(&node) => {
                let data = &mut self.nodes[node.index()];
                data.probability = data.probability.max(probability);
                node
            }
            None => {
                let node = self.new_node(
                    LexNode::Word {
                        pronunciation: pronunciation.clone(),
                        is_final: pronunciation.word().is_sentence_end(),
                    },
                    probability,
                );
                self.word_nodes.insert(pronunciation.id(), node);
                node
            }
        };
        self.nodes[parent.index()].successors.insert(key, node);
    }

    fn add_right_context(&mut self, node: NodeId, right: UnitId) {
        if let LexNode::Unit { right_contexts, .. } = &mut self.nodes[node.index()].node {
            right_contexts.insert(right, ());
        }
    }

    /// Точка входа для первого юнита; создаётся вместе с базовым узлом.
    fn entry_point(&mut self, unit: UnitId, probability: f32) -> &mut EntryPoint {
        let next = NodeId(self.nodes.len() as u32);
        let entry = self.entry_points.entry(unit).or_insert_with(|| EntryPoint {
            base_node: next,
            probability: LOG_ZERO,
            by_left_context: BTreeMap::new(),
            single_unit_words: Vec::new(),
            words_by_second: BTreeMap::new(),
        });
        if entry.base_node == next {
            self.nodes.push(NodeData {
                node: LexNode::Internal,
                probability: LOG_ZERO,
                successors: Slots::default(),
            });
        }
        entry.probability = entry.probability.max(probability);
        entry
    }

    fn report_missing(
        &mut self,
        words: Vec<String>,
        skipped: bool,
        base: UnitId,
        left: UnitId,
        right: UnitId,
        position: HmmPosition,
    ) {
        let units = self.pool.units();
        let report = MissingHmmReport {
            words,
            unit: format!("{}({},{})", units.name(base), units.name(left), units.name(right)),
            position,
            skipped,
        };
        error!("Нет HMM {report}");
        self.missing.push(report);
    }

    /// Вставить произношение в дерево.
    fn add_pronunciation(&mut self, pronunciation: &Arc<Pronunciation>, probability: f32) {
        let units = pronunciation.units();
        let spelling = pronunciation.word().spelling();
        let Some(&first) = units.first() else { return };

        if units.len() == 1 {
            self.entry_point(first, probability)
                .single_unit_words
                .push((pronunciation.clone(), probability));
            return;
        }

        // Внутренние HMM разрешаются до вставки: слово либо целиком, либо никак.
        let mut interior = Vec::with_capacity(units.len().saturating_sub(2));
        for i in 1..units.len() - 1 {
            match self.pool.get_hmm(units[i], units[i - 1], units[i + 1], HmmPosition::Internal) {
                Ok(hmm) => interior.push(hmm),
                Err(_) => {
                    self.report_missing(
                        vec![spelling.to_string()],
                        true,
                        units[i],
                        units[i - 1],
                        units[i + 1],
                        HmmPosition::Internal,
                    );
                    return;
                }
            }
        }

        // Последний юнит: хотя бы один правый контекст должен разрешаться.
        let base = units[units.len() - 1];
        let left_context = units[units.len() - 2];
        let missing_rights: Vec<UnitId> = self
            .entry_units
            .iter()
            .copied()
            .filter(|&right| {
                self.pool
                    .get_hmm(base, left_context, right, HmmPosition::End)
                    .is_err()
            })
            .collect();
        let skipped = missing_rights.len() == self.entry_units.len();
        for &right in &missing_rights {
            self.report_missing(
                vec![spelling.to_string()],
                skipped,
                base,
                left_context,
                right,
                HmmPosition::End,
            );
        }
        if skipped {
            return;
        }

        let entry = self.entry_point(first, probability);
        entry
            .words_by_second
            .entry(units[1])
            .or_default()
            .push(spelling.to_string());
        let mut current = entry.base_node;
        {
            let data = &mut self.nodes[current.index()];
            data.probability = data.probability.max(probability);
        }
        for hmm in interior {
            let kind = unit_kind(self.pool.units(), hmm.base, HmmPosition::Internal);
            current = self.add_successor(current, SuccessorKey::Hmm(hmm.id), probability, || {
                LexNode::Unit {
                    hmm,
                    kind,
                    right_contexts: Slots::default(),
                }
            });
        }

        current = self.add_successor(
            current,
            SuccessorKey::End { base, left_context },
            probability,
            || LexNode::End { base, left_context },
        );
        self.add_word_node(current, pronunciation, probability);
    }

    /// Для каждой точки входа и каждого левого контекста построить узел с
    /// начальными HMM по правым контекстам (вторым юнитам слов).
    fn create_entry_point_map(&mut self) {
        let exit_units = self.exit_units.clone();
        let entries: Vec<(UnitId, NodeId, f32, BTreeMap<UnitId, Vec<String>>)> = self
            .entry_points
            .iter()
            .map(|(&unit, ep)| (unit, ep.base_node, ep.probability, ep.words_by_second.clone()))
            .collect();

        for (unit, base_node, probability, words_by_second) in entries {
            let right_units: BTreeSet<UnitId> = self.nodes[base_node.index()]
                .successors
                .values()
                .filter_map(|child| self.node_base(child))
                .collect();

            for &left in &exit_units {
                let ep_node = self.new_node(LexNode::Internal, probability);
                for &right in &right_units {
                    match self.pool.get_hmm(unit, left, right, HmmPosition::Begin) {
                        Ok(hmm) => {
                            let kind = unit_kind(self.pool.units(), unit, HmmPosition::Begin);
                            let node = self.add_successor(
                                ep_node,
                                SuccessorKey::Hmm(hmm.id),
                                probability,
                                || LexNode::Unit {
                                    hmm,
                                    kind,
                                    right_contexts: Slots::default(),
                                },
                            );
                            self.add_right_context(node, right);
                        }
                        Err(_) => self.report_missing(
                            words_by_second.get(&right).cloned().unwrap_or_default(),
                            false,
                            unit,
                            left,
                            right,
                            HmmPosition::Begin,
                        ),
                    }
                }
                self.connect_entry_point_node(ep_node, base_node);
                if let Some(ep) = self.entry_points.get_mut(&unit) {
                    ep.by_left_context.insert(left, ep_node);
                }
            }
        }
        debug!(
            "Точки входа: {} юнитов × {} левых контекстов",
            self.entry_points.len(),
            exit_units.len()
        );
    }

    /// Связать начальные HMM с продолжениями, чей юнит совпадает с правым
    /// контекстом HMM.
    fn connect_entry_point_node(&mut self, ep_node: NodeId, base_node: NodeId) {
        let children: Vec<(SuccessorKey, NodeId)> =
            self.nodes[base_node.index()].successors.iter().collect();
        let hmm_nodes: Vec<NodeId> = self.nodes[ep_node.index()].successors.values().collect();
        for hmm_node in hmm_nodes {
            let rights: Vec<UnitId> = self.right_contexts(hmm_node).collect();
            for &(key, child) in &children {
                if self.node_base(child).is_some_and(|b| rights.contains(&b)) {
                    self.nodes[hmm_node.index()].successors.insert(key, child);
                }
            }
        }
    }

    /// Однофонемные слова: отдельная HMM на каждую пару контекстов.
    fn connect_single_unit_words(&mut self) {
        let entry_units = self.entry_units.clone();
        let entries: Vec<(UnitId, Vec<(UnitId, NodeId)>, Vec<(Arc<Pronunciation>, f32)>)> = self
            .entry_points
            .iter()
            .filter(|(_, ep)| !ep.single_unit_words.is_empty())
            .map(|(&unit, ep)| {
                (
                    unit,
                    ep.by_left_context.iter().map(|(&l, &n)| (l, n)).collect(),
                    ep.single_unit_words.clone(),
                )
            })
            .collect();

        for (unit, by_left, words) in entries {
            for (left, ep_node) in by_left {
                for &right in &entry_units {
                    let hmm = match self.pool.get_hmm(unit, left, right, HmmPosition::Single) {
                        Ok(hmm) => hmm,
                        Err(_) => {
                            let spellings = words
                                .iter()
                                .map(|(p, _)| p.word().spelling().to_string())
                                .collect();
                            self.report_missing(
                                spellings,
                                false,
                                unit,
                                left,
                                right,
                                HmmPosition::Single,
                            );
                            continue;
                        }
                    };
                    let kind = unit_kind(self.pool.units(), unit, HmmPosition::Single);
                    for (pronunciation, probability) in &words {
                        let hmm = hmm.clone();
                        let node = self.add_successor(
                            ep_node,
                            SuccessorKey::SingleWord(hmm.id),
                            *probability,
                            || LexNode::Unit {
                                hmm,
                                kind,
                                right_contexts: Slots::default(),
                            },
                        );
                        self.add_right_context(node, right);
                        self.add_word_node(node, pronunciation, *probability);
                    }
                }
            }
        }
    }

    /// Заморозить все таблицы. Идемпотентно.
    pub fn freeze(&mut self) {
        if self.frozen {
            return;
        }
        for data in &mut self.nodes {
            data.successors.freeze();
            if let LexNode::Unit { right_contexts, .. } = &mut data.node {
                right_contexts.freeze();
            }
        }
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    // -----------------------------------------------------------------------
    // Чтение
    // -----------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Option<&LexNode> {
        self.nodes.get(id.index()).map(|d| &d.node)
    }

    /// Оптимистичная вероятность узла (максимум по словам под ним).
    pub fn probability(&self, id: NodeId) -> f32 {
        self.nodes.get(id.index()).map(|d| d.probability).unwrap_or(LOG_ZERO)
    }

    /// Наследники в порядке ключей.
    pub fn successors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .get(id.index())
            .into_iter()
            .flat_map(|d| d.successors.values())
    }

    /// Наследник по ключу.
    pub fn successor(&self, id: NodeId, key: &SuccessorKey) -> Option<NodeId> {
        self.nodes.get(id.index())?.successors.get(key)
    }

    /// Правые контексты узла-юнита (пусто для прочих узлов).
    pub fn right_contexts(&self, id: NodeId) -> impl Iterator<Item = UnitId> + '_ {
        self.nodes
            .get(id.index())
            .into_iter()
            .flat_map(|d| match &d.node {
                LexNode::Unit { right_contexts, .. } => Some(right_contexts.keys()),
                _ => None,
            })
            .flatten()
    }

    /// Базовый юнит узла-юнита или конечного узла.
    pub fn node_base(&self, id: NodeId) -> Option<UnitId> {
        match self.node(id)? {
            LexNode::Unit { hmm, .. } => Some(hmm.base),
            LexNode::End { base, .. } => Some(*base),
            _ => None,
        }
    }

    /// Начальные узлы слов, начинающихся с `first` после `left`.
    pub fn entry_successors(&self, left: UnitId, first: UnitId) -> Vec<NodeId> {
        self.entry_points
            .get(&first)
            .and_then(|ep| ep.by_left_context.get(&left))
            .map(|&ep_node| self.successors(ep_node).collect())
            .unwrap_or_default()
    }

    /// Юниты, с которых начинаются слова (отсортированы).
    pub fn entry_units(&self) -> &[UnitId] {
        &self.entry_units
    }

    /// Юниты, которыми заканчиваются слова (отсортированы).
    pub fn exit_units(&self) -> &[UnitId] {
        &self.exit_units
    }

    /// HMM последнего юнита `base` после `left` для всех правых контекстов.
    ///
    /// Результат кешируется по `(base, left)`; повторный вызов возвращает
    /// тот же `Arc`. Правые контексты с одинаковой HMM объединяются.
    pub fn end_hmms(&self, base: UnitId, left: UnitId) -> Arc<[EndHmm]> {
        if let Some(cached) = self.end_cache.read().get(&(base, left)) {
            return cached.clone();
        }

        let mut grouped: Vec<(Arc<Hmm>, Vec<UnitId>)> = Vec::new();
        for &right in &self.entry_units {
            match self.pool.get_hmm(base, left, right, HmmPosition::End) {
                Ok(hmm) => match grouped.iter_mut().find(|(h, _)| h.id == hmm.id) {
                    Some((_, rights)) => rights.push(right),
                    None => grouped.push((hmm, vec![right])),
                },
                Err(err) => warn!("Конечный юнит: {err}"),
            }
        }
        let hmms: Arc<[EndHmm]> = grouped
            .into_iter()
            .map(|(hmm, rights)| EndHmm {
                hmm,
                right_contexts: rights.into_boxed_slice(),
            })
            .collect();
        self.end_cache.write().entry((base, left)).or_insert(hmms).clone()
    }

    /// Роль юнита в позиции (для вероятности вставки).
    pub fn unit_kind(&self, base: UnitId, position: HmmPosition) -> UnitKind {
        unit_kind(self.pool.units(), base, position)
    }

    pub fn initial(&self) -> &InitialWordNode {
        &self.initial
    }

    /// Канонический узел произношения.
    pub fn word_node(&self, pronunciation: PronunciationId) -> Option<NodeId> {
        self.word_nodes.get(&pronunciation).copied()
    }

    /// Путь узлов многофонемного произношения после левого контекста:
    /// начальная HMM, внутренние HMM, конечный узел.
    pub fn find_path(&self, left: UnitId, units: &[UnitId]) -> Option<Vec<NodeId>> {
        if units.len() < 2 {
            return None;
        }
        let ep_node = *self.entry_points.get(&units[0])?.by_left_context.get(&left)?;
        let begin = self
            .pool
            .get_hmm(units[0], left, units[1], HmmPosition::Begin)
            .ok()?;
        let mut current = self.successor(ep_node, &SuccessorKey::Hmm(begin.id))?;
        let mut path = vec![current];
        for i in 1..units.len() - 1 {
            let hmm = self
                .pool
                .get_hmm(units[i], units[i - 1], units[i + 1], HmmPosition::Internal)
                .ok()?;
            current = self.successor(current, &SuccessorKey::Hmm(hmm.id))?;
            path.push(current);
        }
        let end = SuccessorKey::End {
            base: units[units.len() - 1],
            left_context: units[units.len() - 2],
        };
        path.push(self.successor(current, &end)?);
        Some(path)
    }

    pub fn missing_hmms(&self) -> &[MissingHmmReport] {
        &self.missing
    }

    pub fn units(&self) -> &UnitManager {
        self.pool.units()
    }

    pub fn pool(&self) -> &Arc<HmmPool> {
        &self.pool
    }

    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats {
            words: self.num_words,
            pronunciations: self.num_pronunciations,
            nodes: self.nodes.len(),
            entry_units: self.entry_units.len(),
            exit_units: self.exit_units.len(),
            missing_hmms: self.missing.len(),
            ..TreeStats::default()
        };
        for data in &self.nodes {
            match data.node {
                LexNode::Unit { .. } => stats.unit_nodes += 1,
                LexNode::End { .. } => stats.end_nodes += 1,
                LexNode::Word { .. } => stats.word_nodes += 1,
                LexNode::Internal => {}
            }
        }
        stats
    }
}

fn unit_kind(units: &UnitManager, base: UnitId, position: HmmPosition) -> UnitKind {
    if units.is_silence(base) {
        UnitKind::Silence
    } else if units.is_filler(base) {
        UnitKind::Filler
    } else if position.is_word_beginning() {
        UnitKind::WordBeginning
    } else {
        UnitKind::Simple
    }
}

/// Слова дерева и их вероятности (в порядке LM, затем филлеры).
fn select_words(
    dictionary: &Dictionary,
    lm: &dyn LanguageModel,
    config: &LexTreeConfig,
) -> Vec<(String, f32)> {
    let mut selected: Vec<(String, f32)> = Vec::new();
    let mut seen = BTreeSet::new();
    let mut push = |spelling: &str, probability: f32, selected: &mut Vec<(String, f32)>| {
        if spelling != SENTENCE_START && seen.insert(spelling.to_string()) {
            selected.push((spelling.to_string(), probability));
        }
    };

    for spelling in lm.vocabulary() {
        let Some(word) = dictionary.word(spelling) else {
            warn!("Слово LM {spelling} отсутствует в словаре");
            continue;
        };
        let probability = if word.is_filler() {
            LOG_ONE
        } else {
            lm.unigram(spelling).map_or(LOG_ZERO, |p| p * config.language_weight)
        };
        push(spelling, probability, &mut selected);
    }

    for word in dictionary.filler_words() {
        let wanted = config.add_filler_words
            || word.spelling() == SILENCE_WORD
            || word.is_sentence_end();
        if wanted {
            push(word.spelling(), LOG_ONE, &mut selected);
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_freeze_keeps_order_and_lookup() {
        let mut slots: Slots<u32, char> = Slots::default();
        slots.insert(3, 'c');
        slots.insert(1, 'a');
        slots.insert(2, 'b');
        slots.freeze();
        assert!(slots.is_frozen());
        assert_eq!(slots.values().collect::<String>(), "abc");
        assert_eq!(slots.get(&2), Some('b'));
        assert_eq!(slots.get(&7), None);
        slots.freeze();
        assert_eq!(slots.len(), 3);
    }

    #[test]
    #[should_panic]
    fn test_slots_insert_after_freeze_panics() {
        let mut slots: Slots<u32, ()> = Slots::default();
        slots.freeze();
        slots.insert(1, ());
    }
}
