//! CLI декодера RustASR.
//!
//! - `decode` — распознать кадры признаков по модели, словарю и LM;
//! - `tree` — скомпилировать лексическое дерево и вывести статистику;
//! - `config` — напечатать предустановленную конфигурацию в JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use acoustic::{
    AcousticModel, GaussianMixtureSet, HmmPool, PrecomputedScores, TensorSenoneScorer,
    TiedStateModel,
};
use anyhow::{Context, Result, bail};
use asr_core::{DecoderConfig, LogMath, ScorerStrategy, VecFrameSource};
use clap::{Parser, Subcommand, ValueEnum};
use decoder::{
    AcousticScorer, BatchAcousticScorer, BreadthFirstSearchManager, SimpleAcousticScorer,
    SimplePruner, ThreadedAcousticScorer,
};
use linguist::{Dictionary, LexTreeLinguist, LexicalTree, UnigramModel};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rustasr")]
#[command(author, version, about = "RustASR: поиск в ширину по лексическому дереву", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Предустановленная конфигурация.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum PresetArg {
    /// Большой словарь: лексическое дерево, широкие лучи, многопоточный скоринг
    LargeVocabulary,
    /// Небольшая грамматика: без абсолютного луча
    SmallGrammar,
}

impl PresetArg {
    fn config(self) -> DecoderConfig {
        match self {
            PresetArg::LargeVocabulary => DecoderConfig::large_vocabulary(),
            PresetArg::SmallGrammar => DecoderConfig::small_grammar(),
        }
    }
}

/// Стратегия скоринга (перекрывает конфигурацию).
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum ScorerArg {
    Simple,
    Threaded,
    Batch,
}

impl From<ScorerArg> for ScorerStrategy {
    fn from(v: ScorerArg) -> Self {
        match v {
            ScorerArg::Simple => ScorerStrategy::Simple,
            ScorerArg::Threaded => ScorerStrategy::Threaded,
            ScorerArg::Batch => ScorerStrategy::Batch,
        }
    }
}

/// Входные файлы модели, словаря и LM.
#[derive(clap::Args, Debug)]
struct ModelArgs {
    /// JSON-описание акустической модели
    #[arg(long)]
    model: PathBuf,

    /// Словарь произношений (формат CMU)
    #[arg(long)]
    dict: PathBuf,

    /// Словарь филлеров
    #[arg(long)]
    filler_dict: Option<PathBuf>,

    /// Униграммная LM в формате ARPA
    #[arg(long)]
    lm: PathBuf,

    /// JSON-конфигурация декодера (по умолчанию — пресет)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Пресет, если `--config` не задан
    #[arg(long, value_enum, default_value = "large-vocabulary")]
    preset: PresetArg,
}

#[derive(Subcommand)]
enum Commands {
    /// Распознать кадры признаков
    Decode {
        #[command(flatten)]
        model: ModelArgs,

        /// JSON-массив кадров: `[[f32, ...], ...]`
        #[arg(long)]
        features: PathBuf,

        /// Кадры уже содержат оценки сенонов (гибридная модель)
        #[arg(long, default_value_t = false)]
        precomputed: bool,

        /// Стратегия скоринга
        #[arg(long, value_enum)]
        scorer: Option<ScorerArg>,

        /// Устройство батчевого скорера (cpu, metal, cuda)
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Сохранить гипотезу в JSON
        #[arg(long)]
        out_json: Option<PathBuf>,
    },

    /// Скомпилировать лексическое дерево и вывести статистику
    Tree {
        #[command(flatten)]
        model: ModelArgs,
    },

    /// Напечатать конфигурацию в JSON
    Config {
        #[arg(long, value_enum, default_value = "large-vocabulary")]
        preset: PresetArg,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Decode {
            model,
            features,
            precomputed,
            scorer,
            device,
            out_json,
        } => run_decode(&model, &features, precomputed, scorer, &device, out_json.as_deref()),

        Commands::Tree { model } => {
            let config = load_config(&model)?;
            let loaded = load_models(&model, &config)?;
            let stats = loaded.tree.stats();
            println!("{stats}");
            for report in loaded.tree.missing_hmms() {
                println!("  нет HMM: {report}");
            }
            Ok(())
        }

        Commands::Config { preset } => {
            println!("{}", serde_json::to_string_pretty(&preset.config())?);
            Ok(())
        }
    }
}

fn load_config(args: &ModelArgs) -> Result<DecoderConfig> {
    let config = match &args.config {
        Some(path) => DecoderConfig::from_json_file(path)
            .with_context(|| format!("конфигурация {}", path.display()))?,
        None => args.preset.config(),
    };
    config.validate()?;
    Ok(config)
}

struct LoadedModels {
    model: Arc<TiedStateModel>,
    tree: Arc<LexicalTree>,
    log_math: LogMath,
}

fn load_models(args: &ModelArgs, config: &DecoderConfig) -> Result<LoadedModels> {
    let started = Instant::now();
    let log_math = config.log_math()?;

    let model = Arc::new(
        TiedStateModel::from_json_file(&args.model, &log_math)
            .with_context(|| format!("модель {}", args.model.display()))?,
    );
    let dyn_model: Arc<dyn AcousticModel> = model.clone();
    let pool = Arc::new(HmmPool::new(dyn_model)?);

    let dictionary = Dictionary::from_files(&args.dict, args.filler_dict.as_deref(), pool.units())
        .with_context(|| format!("словарь {}", args.dict.display()))?;
    let lm = UnigramModel::from_arpa_file(&args.lm, &log_math)
        .with_context(|| format!("языковая модель {}", args.lm.display()))?;

    let tree = LexicalTree::compile(pool, &dictionary, &lm, &config.lextree)?;
    info!(
        "Модели загружены за {:.2} с",
        started.elapsed().as_secs_f64()
    );
    Ok(LoadedModels {
        model,
        tree: Arc::new(tree),
        log_math,
    })
}

fn read_features(path: &Path) -> Result<Vec<Vec<f32>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("не удалось прочитать {}", path.display()))?;
    let frames: Vec<Vec<f32>> = serde_json::from_str(&text)?;
    if frames.is_empty() {
        bail!("файл {} не содержит кадров", path.display());
    }
    Ok(frames)
}

fn create_device(device: &str) -> Result<candle_core::Device> {
    match device {
        "metal" => Ok(candle_core::Device::new_metal(0)?),
        "cuda" => Ok(candle_core::Device::new_cuda(0)?),
        _ => Ok(candle_core::Device::Cpu),
    }
}

fn build_scorer(
    config: &DecoderConfig,
    model: &TiedStateModel,
    precomputed: bool,
    device: &str,
) -> Result<Box<dyn AcousticScorer>> {
    let strategy = config.scorer.strategy;
    if precomputed {
        let scores = PrecomputedScores::new(model.num_senones());
        let scorer: Box<dyn AcousticScorer> = match strategy {
            ScorerStrategy::Simple => Box::new(SimpleAcousticScorer::new(scores)),
            ScorerStrategy::Threaded => {
                Box::new(ThreadedAcousticScorer::new(Arc::new(scores), &config.scorer)?)
            }
            ScorerStrategy::Batch => Box::new(BatchAcousticScorer::new(scores)),
        };
        return Ok(scorer);
    }

    let Some(mixtures) = model.senones() else {
        bail!("модель без смесей гауссиан: используйте --precomputed");
    };
    let mixtures: GaussianMixtureSet = mixtures.clone();
    let scorer: Box<dyn AcousticScorer> = match strategy {
        ScorerStrategy::Simple => Box::new(SimpleAcousticScorer::new(mixtures)),
        ScorerStrategy::Threaded => {
            Box::new(ThreadedAcousticScorer::new(Arc::new(mixtures), &config.scorer)?)
        }
        ScorerStrategy::Batch => {
            let device = create_device(device)?;
            Box::new(BatchAcousticScorer::new(TensorSenoneScorer::from_mixtures(
                &mixtures, &device,
            )?))
        }
    };
    Ok(scorer)
}

fn run_decode(
    args: &ModelArgs,
    features: &Path,
    precomputed: bool,
    scorer: Option<ScorerArg>,
    device: &str,
    out_json: Option<&Path>,
) -> Result<()> {
    let mut config = load_config(args)?;
    if let Some(scorer) = scorer {
        config.scorer.strategy = scorer.into();
    }
    let loaded = load_models(args, &config)?;
    let frames = read_features(features)?;
    let n_frames = frames.len();

    let linguist = LexTreeLinguist::new(loaded.tree.clone(), &config.lextree, &loaded.log_math)?;
    let scorer = build_scorer(&config, &loaded.model, precomputed, device)?;
    let mut manager =
        BreadthFirstSearchManager::new(linguist, scorer, Box::new(SimplePruner), &config)?;

    let started = Instant::now();
    let mut source = VecFrameSource::from_frames(frames);
    let hypothesis = manager.decode(&mut source)?;
    let elapsed = started.elapsed().as_secs_f64();

    println!("{}", hypothesis.text());
    info!(
        "Кадров: {n_frames}, оценка {:.2}, {:.3} с ({:.1} кадр/с)",
        hypothesis.score,
        elapsed,
        n_frames as f64 / elapsed.max(1e-9)
    );

    if let Some(path) = out_json {
        let json = serde_json::json!({
            "hypothesis": hypothesis,
            "statistics": manager.statistics(),
        });
        std::fs::write(path, serde_json::to_string_pretty(&json)?)
            .with_context(|| format!("не удалось записать {}", path.display()))?;
        info!("Гипотеза сохранена в {}", path.display());
    }
    manager.deallocate();
    Ok(())
}
