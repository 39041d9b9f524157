mod config;
mod experiment;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use rbank_core::judge;
use rbank_core::retrieval::format_for_prompt;
use rbank_core::{load_problems, Embedder, Problem, Retriever, StrategyStore};
use rbank_llm::{CompletionClient, LlamaServerClient, MathSolver};
use rbank_store::JsonBank;

use config::Config;
use experiment::{print_report, Change, Experiment, ExperimentSettings};

#[derive(Parser)]
#[command(
    name = "rbank",
    version,
    about = "Reasoning bank - does strategy memory help a small model solve math?"
)]
struct Cli {
    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the reasoning bank JSON (overrides [bank].path)
    #[arg(long, global = true)]
    bank: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full experiment: build bank, baseline, with-memory, report
    Run {
        /// Training problems (JSON array)
        #[arg(long)]
        train: Option<PathBuf>,

        /// Test problems (JSON array)
        #[arg(long)]
        test: Option<PathBuf>,

        /// Number of training problems used to build the bank
        #[arg(long)]
        train_limit: Option<usize>,

        /// Number of test problems per arm
        #[arg(long)]
        test_limit: Option<usize>,

        /// Directory for phase1_results.json and phase1_summary.json
        #[arg(long)]
        results_dir: Option<PathBuf>,

        /// Clear the bank before building
        #[arg(long)]
        fresh: bool,
    },

    /// Build (or resume building) the reasoning bank from training problems
    Build {
        #[arg(long)]
        train: Option<PathBuf>,

        #[arg(long)]
        train_limit: Option<usize>,

        /// Clear the bank before building
        #[arg(long)]
        fresh: bool,
    },

    /// Run baseline and with-memory arms against an existing bank
    Evaluate {
        #[arg(long)]
        test: Option<PathBuf>,

        #[arg(long)]
        test_limit: Option<usize>,

        #[arg(long)]
        results_dir: Option<PathBuf>,
    },

    /// Show the hints a question would receive
    Retrieve {
        /// Question text
        query: String,

        /// Expected answer, enables leak filtering
        #[arg(short, long)]
        expected: Option<String>,

        /// Override [retrieval].top_k
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Judge a predicted answer against an expected one
    Judge {
        predicted: String,
        expected: String,
    },

    /// Check that the inference server answers a trivial problem
    Ping,

    /// Inspect or maintain the reasoning bank
    Bank {
        #[command(subcommand)]
        command: BankCommands,
    },

    /// List problems where memory flipped the verdict, from saved results
    Diagnose {
        /// Directory holding phase1_results.json
        #[arg(long)]
        results_dir: Option<PathBuf>,

        /// Maximum rows per section
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Only show regressions (baseline right, memory wrong)
        #[arg(long)]
        regressions_only: bool,
    },

    /// Show the config path and the effective configuration
    Config,
}

#[derive(Subcommand)]
enum BankCommands {
    /// Show bank statistics
    Stats,

    /// List stored memories
    List {
        /// Maximum items to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Delete every memory
    Clear,

    /// Compute missing embeddings
    Embed {
        /// Re-embed items that already have a vector
        #[arg(long)]
        force: bool,

        /// Override [embedding].batch_size
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[cfg(feature = "embeddings")]
fn init_embedder(config: &Config) -> Result<rbank_core::FastEmbedder> {
    let choice: rbank_core::EmbeddingChoice = config
        .embedding
        .model
        .parse()
        .context("parsing [embedding].model")?;
    Ok(rbank_core::FastEmbedder::new(
        choice,
        config.embedding.cache_dir.clone(),
    ))
}

#[cfg(not(feature = "embeddings"))]
fn init_embedder(_config: &Config) -> Result<NoEmbedder> {
    bail!("embeddings feature not enabled; rebuild with `--features embeddings`")
}

#[cfg(not(feature = "embeddings"))]
enum NoEmbedder {}

#[cfg(not(feature = "embeddings"))]
impl Embedder for NoEmbedder {
    fn embed(&self, _text: &str) -> rbank_core::RbankResult<Vec<f32>> {
        match *self {}
    }

    fn embed_batch(&self, _texts: &[&str]) -> rbank_core::RbankResult<Vec<Vec<f32>>> {
        match *self {}
    }

    fn dimensions(&self) -> usize {
        match *self {}
    }
}

fn open_bank(config: &Config, explicit: Option<PathBuf>) -> Result<JsonBank> {
    let path = explicit.unwrap_or_else(|| config.bank.path.clone());
    JsonBank::open(&path).with_context(|| format!("failed to open bank {}", path.display()))
}

fn load_split(path: &Path) -> Result<Vec<Problem>> {
    let problems =
        load_problems(path).with_context(|| format!("loading problems from {}", path.display()))?;
    info!(path = %path.display(), count = problems.len(), "loaded problems");
    Ok(problems)
}

fn experiment_settings(config: &Config) -> ExperimentSettings {
    ExperimentSettings {
        seed: config.experiment.seed,
        fail_fast: config.experiment.fail_fast,
        solve_max_tokens: config.llm.max_tokens,
        solve_temperature: config.llm.solve_temperature,
        extract_max_tokens: config.extraction.max_tokens,
        extract_temperature: config.extraction.temperature,
        extract_max_items: config.extraction.max_items,
        embed_batch_size: config.embedding.batch_size,
        show_progress: true,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            train,
            test,
            train_limit,
            test_limit,
            results_dir,
            fresh,
        } => {
            let train = train.unwrap_or_else(|| config.experiment.train_path.clone());
            let test = test.unwrap_or_else(|| config.experiment.test_path.clone());
            let results_dir = results_dir.unwrap_or_else(|| config.experiment.results_dir.clone());
            cmd_run(
                &config,
                cli.bank,
                &train,
                &test,
                train_limit.unwrap_or(config.experiment.train_limit),
                test_limit.unwrap_or(config.experiment.test_limit),
                &results_dir,
                fresh,
            )
        }
        Commands::Build {
            train,
            train_limit,
            fresh,
        } => {
            let train = train.unwrap_or_else(|| config.experiment.train_path.clone());
            cmd_build(
                &config,
                cli.bank,
                &train,
                train_limit.unwrap_or(config.experiment.train_limit),
                fresh,
            )
        }
        Commands::Evaluate {
            test,
            test_limit,
            results_dir,
        } => {
            let test = test.unwrap_or_else(|| config.experiment.test_path.clone());
            let results_dir = results_dir.unwrap_or_else(|| config.experiment.results_dir.clone());
            cmd_evaluate(
                &config,
                cli.bank,
                &test,
                test_limit.unwrap_or(config.experiment.test_limit),
                &results_dir,
            )
        }
        Commands::Retrieve {
            query,
            expected,
            top_k,
        } => cmd_retrieve(&config, cli.bank, &query, expected.as_deref(), top_k),
        Commands::Judge {
            predicted,
            expected,
        } => cmd_judge(&predicted, &expected),
        Commands::Ping => cmd_ping(&config),
        Commands::Bank { command } => match command {
            BankCommands::Stats => cmd_bank_stats(&open_bank(&config, cli.bank)?),
            BankCommands::List { limit } => cmd_bank_list(&open_bank(&config, cli.bank)?, limit),
            BankCommands::Clear => cmd_bank_clear(open_bank(&config, cli.bank)?),
            BankCommands::Embed { force, batch_size } => cmd_bank_embed(
                &config,
                open_bank(&config, cli.bank)?,
                force,
                batch_size.unwrap_or(config.embedding.batch_size),
            ),
        },
        Commands::Diagnose {
            results_dir,
            limit,
            regressions_only,
        } => {
            let results_dir = results_dir.unwrap_or_else(|| config.experiment.results_dir.clone());
            cmd_diagnose(&results_dir, limit, regressions_only)
        }
        Commands::Config => cmd_config(config, cli.config.as_deref()),
    }
}

// ---------------------------------------------------------------------------
// Experiment commands
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    config: &Config,
    bank_path: Option<PathBuf>,
    train_path: &Path,
    test_path: &Path,
    train_limit: usize,
    test_limit: usize,
    results_dir: &Path,
    fresh: bool,
) -> Result<()> {
    let train = load_split(train_path)?;
    let test = load_split(test_path)?;
    let mut bank = open_bank(config, bank_path)?;
    if fresh {
        bank.clear()?;
    }
    let retriever = Retriever::new(config.retrieval.to_retrieval_config()?);
    let embedder = init_embedder(config)?;
    let client = LlamaServerClient::new(config.llm.settings());

    println!("Inference server: {} ({})", client.endpoint(), client.model_name());
    let start = Instant::now();
    let mut exp = Experiment::new(
        &client,
        &embedder,
        bank,
        retriever,
        experiment_settings(config),
    );

    println!("\nStep 1: building reasoning bank from {train_limit} training problems");
    let report = exp.build_bank(&train, train_limit)?;
    print_build_report(&report, exp.bank().len());

    println!("\nStep 2: baseline (no memory) on {test_limit} test problems");
    let baseline = exp.run_baseline(&test, test_limit)?;
    println!("Baseline accuracy: {:.2}%", baseline * 100.0);

    println!("\nStep 3: with memory on {test_limit} test problems");
    match exp.run_with_memory(&test, test_limit)? {
        Some(acc) => println!("With-memory accuracy: {:.2}%", acc * 100.0),
        None => println!("Bank is empty; with-memory arm skipped."),
    }

    let summary = exp.save_results(results_dir)?;
    print_report(&summary);
    warn_failed_trials(exp.failed_trials());
    println!(
        "\nResults saved to {} in {:.1}s",
        results_dir.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn cmd_build(
    config: &Config,
    bank_path: Option<PathBuf>,
    train_path: &Path,
    train_limit: usize,
    fresh: bool,
) -> Result<()> {
    let train = load_split(train_path)?;
    let mut bank = open_bank(config, bank_path)?;
    if fresh {
        bank.clear()?;
    }
    let retriever = Retriever::new(config.retrieval.to_retrieval_config()?);
    let embedder = init_embedder(config)?;
    let client = LlamaServerClient::new(config.llm.settings());

    let mut exp = Experiment::new(
        &client,
        &embedder,
        bank,
        retriever,
        experiment_settings(config),
    );
    let report = exp.build_bank(&train, train_limit)?;
    print_build_report(&report, exp.bank().len());
    Ok(())
}

fn cmd_evaluate(
    config: &Config,
    bank_path: Option<PathBuf>,
    test_path: &Path,
    test_limit: usize,
    results_dir: &Path,
) -> Result<()> {
    let test = load_split(test_path)?;
    let bank = open_bank(config, bank_path)?;
    if bank.is_empty() {
        bail!("reasoning bank is empty; run `rbank build` first");
    }
    let retriever = Retriever::new(config.retrieval.to_retrieval_config()?);
    let embedder = init_embedder(config)?;
    let client = LlamaServerClient::new(config.llm.settings());

    let mut exp = Experiment::new(
        &client,
        &embedder,
        bank,
        retriever,
        experiment_settings(config),
    );
    let baseline = exp.run_baseline(&test, test_limit)?;
    println!("Baseline accuracy: {:.2}%", baseline * 100.0);
    if let Some(acc) = exp.run_with_memory(&test, test_limit)? {
        println!("With-memory accuracy: {:.2}%", acc * 100.0);
    }
    let summary = exp.save_results(results_dir)?;
    print_report(&summary);
    warn_failed_trials(exp.failed_trials());
    Ok(())
}

fn warn_failed_trials(n: usize) {
    if n > 0 {
        println!("{n} trials were scored incorrect because the server call failed.");
    }
}

fn print_build_report(report: &experiment::BuildReport, bank_size: usize) {
    println!(
        "Attempted {} problems ({} solved, {} skipped as already banked, {} failed calls)",
        report.attempted, report.solved, report.skipped, report.failed_calls
    );
    println!(
        "Added {} memories; bank now holds {bank_size} items",
        report.memories_added
    );
}

fn cmd_diagnose(results_dir: &Path, limit: usize, regressions_only: bool) -> Result<()> {
    let results = experiment::load_results(&results_dir.join(experiment::RESULTS_FILE))?;
    let diffs = experiment::compare_arms(&results);
    let regressions: Vec<_> = diffs
        .iter()
        .filter(|d| d.change == Change::Regression)
        .collect();
    let improvements: Vec<_> = diffs
        .iter()
        .filter(|d| d.change == Change::Improvement)
        .collect();

    println!(
        "{} regressions, {} improvements across {} paired problems",
        regressions.len(),
        improvements.len(),
        results.baseline.len().min(results.with_memory.len())
    );

    let mut sections = vec![("REGRESSIONS (baseline ✓, memory ✗)", regressions)];
    if !regressions_only {
        sections.push(("IMPROVEMENTS (baseline ✗, memory ✓)", improvements));
    }
    for (heading, rows) in sections {
        println!("\n{heading}");
        println!("{}", "=".repeat(70));
        if rows.is_empty() {
            println!("(none)");
        }
        for (i, diff) in rows.iter().take(limit).enumerate() {
            let question: String = diff.baseline.question.chars().take(80).collect();
            println!("\n{}. [{}] {question}", i + 1, diff.baseline.problem_id);
            println!("   Baseline:    {}", number_or_answer(&diff.baseline.evaluation));
            println!("   With memory: {}", number_or_answer(&diff.with_memory.evaluation));
            println!(
                "   Expected:    {}",
                diff.baseline
                    .evaluation
                    .expected_number
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| diff.baseline.evaluation.expected.clone())
            );
            let titles = diff
                .with_memory
                .retrieved_memories
                .as_deref()
                .unwrap_or_default();
            if titles.is_empty() {
                println!("   Retrieved:   (none)");
            } else {
                println!("   Retrieved:   {}", titles.join(" | "));
            }
            if let Some(err) = &diff.with_memory.error {
                println!("   Error:       {err}");
            }
        }
        if rows.len() > limit {
            println!("\n({} more)", rows.len() - limit);
        }
    }
    Ok(())
}

fn number_or_answer(eval: &rbank_core::Evaluation) -> String {
    match eval.predicted_number {
        Some(n) => n.to_string(),
        None if eval.predicted.is_empty() => "(no answer)".into(),
        None => eval.predicted.clone(),
    }
}

// ---------------------------------------------------------------------------
// Single-shot commands
// ---------------------------------------------------------------------------

fn cmd_retrieve(
    config: &Config,
    bank_path: Option<PathBuf>,
    query: &str,
    expected: Option<&str>,
    top_k: Option<usize>,
) -> Result<()> {
    let mut bank = open_bank(config, bank_path)?;
    if bank.is_empty() {
        println!("Reasoning bank is empty.");
        return Ok(());
    }
    let mut retrieval = config.retrieval.to_retrieval_config()?;
    if let Some(k) = top_k {
        if k == 0 {
            bail!("--top-k must be at least 1");
        }
        retrieval.top_k = k;
    }
    let embedder = init_embedder(config)?;
    bank.embed_missing(&embedder, config.embedding.batch_size, false)?;

    let query_vec = embedder.embed(query)?;
    let hits = Retriever::new(retrieval).retrieve(&query_vec, bank.all(), expected);
    if hits.is_empty() {
        println!("No usable memories (all filtered or none embedded).");
        return Ok(());
    }
    for hit in &hits {
        println!(
            "[{:.3}] {} {} (from {})",
            hit.score,
            hit.memory.kind().marker(),
            hit.memory.title,
            hit.memory.source_problem_id
        );
    }
    println!("\n{}", format_for_prompt(&hits));
    Ok(())
}

fn cmd_judge(predicted: &str, expected: &str) -> Result<()> {
    let eval = judge::evaluate(predicted, expected);
    let verdict = if eval.success { "correct" } else { "incorrect" };
    println!("{verdict}: {}", eval.reasoning);
    Ok(())
}

fn cmd_ping(config: &Config) -> Result<()> {
    let client = LlamaServerClient::new(config.llm.settings());
    println!("Testing {} ({})...", client.endpoint(), client.model_name());
    let start = Instant::now();
    let solution = MathSolver::new(&client)
        .with_max_tokens(config.llm.max_tokens)
        .with_temperature(config.llm.solve_temperature)
        .solve("What is 5 + 7?", "")
        .context("inference server did not answer")?;
    let eval = judge::evaluate(&solution.answer, "12");
    println!(
        "Answer: {} ({}) in {:.1}s",
        solution.answer,
        if eval.success { "correct" } else { "incorrect" },
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Bank maintenance
// ---------------------------------------------------------------------------

fn cmd_bank_stats(bank: &JsonBank) -> Result<()> {
    let stats = bank.stats();
    if let Some(path) = bank.path() {
        println!("Bank:       {}", path.display());
    }
    println!("Memories:   {}", stats.total_items);
    println!("Strategies: {}", stats.from_successes);
    println!("Lessons:    {}", stats.from_failures);
    println!("Embedded:   {}", stats.embedded);
    println!("Sources:    {}", stats.source_problems);
    if let Some(oldest) = stats.oldest_item {
        println!("Oldest:     {}", oldest.format("%Y-%m-%d %H:%M"));
    }
    if let Some(newest) = stats.newest_item {
        println!("Newest:     {}", newest.format("%Y-%m-%d %H:%M"));
    }
    Ok(())
}

fn cmd_bank_list(bank: &JsonBank, limit: usize) -> Result<()> {
    if bank.is_empty() {
        println!("No memories found.");
        return Ok(());
    }
    for item in bank.all().iter().take(limit) {
        println!("--- {} [{}] ---", item.source_problem_id, item.kind());
        println!("  title:   {}", item.title);
        println!("  summary: {}", item.description);
        println!("  created: {}", item.created_at.format("%Y-%m-%d %H:%M"));
        println!(
            "  embedded: {}",
            if item.embedding.is_some() { "yes" } else { "no" }
        );
    }
    if bank.len() > limit {
        println!("({} more)", bank.len() - limit);
    }
    Ok(())
}

fn cmd_bank_clear(mut bank: JsonBank) -> Result<()> {
    let n = bank.len();
    bank.clear()?;
    println!("Cleared {n} memories.");
    Ok(())
}

fn cmd_bank_embed(
    config: &Config,
    mut bank: JsonBank,
    force: bool,
    batch_size: usize,
) -> Result<()> {
    if bank.is_empty() {
        println!("No memories to embed.");
        return Ok(());
    }
    let embedder = init_embedder(config)?;
    let n = bank
        .embed_missing(&embedder, batch_size, force)
        .context("embedding reasoning bank")?;
    println!("Embedded {n} memories ({} dims).", embedder.dimensions());
    Ok(())
}

fn cmd_config(mut config: Config, explicit: Option<&Path>) -> Result<()> {
    println!("Config: {}", config::show_config_path(explicit));
    if config.llm.api_key.is_some() {
        config.llm.api_key = Some("<redacted>".into());
    }
    println!("\n{}", toml::to_string_pretty(&config)?);
    Ok(())
}
