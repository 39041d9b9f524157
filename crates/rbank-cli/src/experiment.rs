//! Phase 1 driver: does retrieval from the reasoning bank help?
//!
//! 1. Build the bank once from the training split (solve, judge, distil).
//! 2. Baseline: solve the test split with no memory and no bank growth.
//! 3. With memory: solve the test split with retrieved strategy hints.
//! 4. Compare accuracies with Wilson intervals.
//!
//! Every trial blocks on the inference server; nothing runs concurrently.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use rbank_core::judge::{self, Evaluation};
use rbank_core::retrieval::format_for_prompt;
use rbank_core::{Embedder, Problem, Retriever, StrategyStore, Summary};
use rbank_llm::{CompletionClient, Extractor, MathSolver, Solution};
use rbank_store::JsonBank;

pub const RESULTS_FILE: &str = "phase1_results.json";
pub const SUMMARY_FILE: &str = "phase1_summary.json";

#[derive(Debug, Clone)]
pub struct ExperimentSettings {
    pub seed: u64,
    pub fail_fast: bool,
    pub solve_max_tokens: u32,
    pub solve_temperature: f32,
    pub extract_max_tokens: u32,
    pub extract_temperature: f32,
    pub extract_max_items: usize,
    pub embed_batch_size: usize,
    pub show_progress: bool,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            seed: 42,
            fail_fast: false,
            solve_max_tokens: 16384,
            solve_temperature: 0.1,
            extract_max_tokens: 2048,
            extract_temperature: 0.1,
            extract_max_items: 3,
            embed_batch_size: 32,
            show_progress: true,
        }
    }
}

/// One solved (or failed) test problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialRecord {
    pub problem_id: String,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieved_memories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_scores: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_memories_retrieved: Option<usize>,
    pub solution: Solution,
    pub evaluation: Evaluation,
    /// Completion error, when the trial was scored without a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Results {
    pub baseline: Vec<TrialRecord>,
    pub with_memory: Vec<TrialRecord>,
}

impl Results {
    fn tally(records: &[TrialRecord]) -> (usize, usize) {
        let ok = records.iter().filter(|r| r.evaluation.success).count();
        (ok, records.len())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub attempted: usize,
    pub skipped: usize,
    pub solved: usize,
    pub memories_added: usize,
    pub failed_calls: usize,
}

pub struct Experiment<'a> {
    solver: MathSolver<'a>,
    extractor: Extractor<'a>,
    embedder: &'a dyn Embedder,
    bank: JsonBank,
    retriever: Retriever,
    settings: ExperimentSettings,
    results: Results,
}

impl<'a> Experiment<'a> {
    pub fn new(
        client: &'a dyn CompletionClient,
        embedder: &'a dyn Embedder,
        bank: JsonBank,
        retriever: Retriever,
        settings: ExperimentSettings,
    ) -> Self {
        let solver = MathSolver::new(client)
            .with_max_tokens(settings.solve_max_tokens)
            .with_temperature(settings.solve_temperature)
            .with_seed(Some(settings.seed));
        let extractor = Extractor::new(client)
            .with_max_tokens(settings.extract_max_tokens)
            .with_temperature(settings.extract_temperature)
            .with_max_items(settings.extract_max_items);
        Self {
            solver,
            extractor,
            embedder,
            bank,
            retriever,
            settings,
            results: Results::default(),
        }
    }

    pub fn bank(&self) -> &JsonBank {
        &self.bank
    }

    /// Populate the bank from the first `limit` training problems.
    ///
    /// Problems whose id already appears as a memory source are skipped, so an
    /// interrupted build resumes where it stopped.
    pub fn build_bank(&mut self, train: &[Problem], limit: usize) -> Result<BuildReport> {
        let problems = &train[..limit.min(train.len())];
        let pb = self.progress(problems.len(), "Training");
        let mut report = BuildReport::default();

        for problem in problems {
            pb.inc(1);
            if self.bank.contains_source(&problem.id) {
                report.skipped += 1;
                continue;
            }
            report.attempted += 1;

            let (solution, error) = self.attempt(&problem.question, "")?;
            if error.is_some() {
                report.failed_calls += 1;
                continue;
            }
            let evaluation = score(&solution, problem, false);
            if evaluation.success {
                report.solved += 1;
            }

            let items = match self.extractor.extract(
                &problem.id,
                &problem.question,
                &solution,
                problem.expected(),
                evaluation.success,
            ) {
                Ok(items) => items,
                Err(e) if !self.settings.fail_fast => {
                    warn!(problem = %problem.id, "extraction failed: {e}");
                    report.failed_calls += 1;
                    continue;
                }
                Err(e) => return Err(e).context(format!("extracting from {}", problem.id)),
            };
            report.memories_added += self.bank.add_many(items)?;
        }
        pb.finish_and_clear();

        self.bank
            .embed_missing(self.embedder, self.settings.embed_batch_size, false)
            .context("embedding reasoning bank")?;
        info!(?report, bank_size = self.bank.len(), "bank built");
        Ok(report)
    }

    /// Solve without memory and without growing the bank. Returns accuracy.
    pub fn run_baseline(&mut self, test: &[Problem], limit: usize) -> Result<f64> {
        let problems = &test[..limit.min(test.len())];
        let pb = self.progress(problems.len(), "Baseline");
        let mut records = Vec::with_capacity(problems.len());

        for problem in problems {
            let (solution, error) = self.attempt(&problem.question, "")?;
            let evaluation = score(&solution, problem, error.is_some());
            records.push(TrialRecord {
                problem_id: problem.id.clone(),
                question: problem.question.clone(),
                retrieved_memories: None,
                retrieval_scores: None,
                num_memories_retrieved: None,
                solution,
                evaluation,
                error,
            });
            pb.inc(1);
        }
        pb.finish_and_clear();

        self.results.baseline = records;
        let (ok, n) = Results::tally(&self.results.baseline);
        Ok(rbank_core::stats::accuracy(ok, n))
    }

    /// Solve with retrieved strategy hints. Returns `None` when the bank is empty.
    pub fn run_with_memory(&mut self, test: &[Problem], limit: usize) -> Result<Option<f64>> {
        if self.bank.is_empty() {
            warn!("memory bank is empty; skipping the with-memory run");
            return Ok(None);
        }
        self.bank
            .embed_missing(self.embedder, self.settings.embed_batch_size, false)
            .context("embedding reasoning bank")?;

        let problems = &test[..limit.min(test.len())];
        let pb = self.progress(problems.len(), "With Memory");
        let mut records = Vec::with_capacity(problems.len());

        for problem in problems {
            let query = self
                .embedder
                .embed(&problem.question)
                .with_context(|| format!("embedding question {}", problem.id))?;
            let hits = self.retriever.retrieve(
                &query,
                self.bank.all(),
                problem.expected_value.as_deref(),
            );
            let hints = format_for_prompt(&hits);
            let titles: Vec<String> = hits.iter().map(|h| h.memory.title.clone()).collect();
            let scores: Vec<f32> = hits.iter().map(|h| h.score).collect();

            let (solution, error) = self.attempt(&problem.question, &hints)?;
            let evaluation = score(&solution, problem, error.is_some());
            records.push(TrialRecord {
                problem_id: problem.id.clone(),
                question: problem.question.clone(),
                num_memories_retrieved: Some(titles.len()),
                retrieved_memories: Some(titles),
                retrieval_scores: Some(scores),
                solution,
                evaluation,
                error,
            });
            pb.inc(1);
        }
        pb.finish_and_clear();

        self.results.with_memory = records;
        let (ok, n) = Results::tally(&self.results.with_memory);
        Ok(Some(rbank_core::stats::accuracy(ok, n)))
    }

    /// Trials scored without a response because the completion failed.
    pub fn failed_trials(&self) -> usize {
        self.results
            .baseline
            .iter()
            .chain(&self.results.with_memory)
            .filter(|r| r.error.is_some())
            .count()
    }

    pub fn summary(&self) -> Summary {
        Summary::compute(
            Results::tally(&self.results.baseline),
            Results::tally(&self.results.with_memory),
            self.bank.len(),
            self.settings.seed,
        )
    }

    /// Write `phase1_results.json` and `phase1_summary.json` into `dir`.
    pub fn save_results(&self, dir: &Path) -> Result<Summary> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

        let results_path = dir.join(RESULTS_FILE);
        std::fs::write(&results_path, serde_json::to_string_pretty(&self.results)?)
            .with_context(|| format!("writing {}", results_path.display()))?;

        let summary = self.summary();
        let summary_path = dir.join(SUMMARY_FILE);
        std::fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)
            .with_context(|| format!("writing {}", summary_path.display()))?;

        info!(dir = %dir.display(), "results saved");
        Ok(summary)
    }

    /// Solve once, applying the failure policy to completion errors.
    fn attempt(&self, question: &str, hints: &str) -> Result<(Solution, Option<String>)> {
        match self.solver.solve(question, hints) {
            Ok(solution) => Ok((solution, None)),
            Err(e) if !self.settings.fail_fast => {
                warn!("completion failed, scoring as incorrect: {e}");
                Ok((Solution::default(), Some(e.to_string())))
            }
            Err(e) => Err(e).context("completion failed"),
        }
    }

    fn progress(&self, len: usize, label: &str) -> ProgressBar {
        if !self.settings.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        let style = ProgressStyle::with_template("{msg:>12} [{bar:40}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.set_message(label.to_string());
        pb
    }
}

/// How a problem's outcome moved between the two arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Baseline correct, with-memory wrong.
    Regression,
    /// Baseline wrong, with-memory correct.
    Improvement,
}

/// One problem whose verdict differs between the arms.
#[derive(Debug, Clone, Copy)]
pub struct TrialDiff<'a> {
    pub change: Change,
    pub baseline: &'a TrialRecord,
    pub with_memory: &'a TrialRecord,
}

/// Pair trials by `problem_id` and keep those whose verdict flipped.
///
/// Follows baseline order. Problems present in only one arm are ignored.
pub fn compare_arms(results: &Results) -> Vec<TrialDiff<'_>> {
    let memory_by_id: HashMap<&str, &TrialRecord> = results
        .with_memory
        .iter()
        .map(|r| (r.problem_id.as_str(), r))
        .collect();

    results
        .baseline
        .iter()
        .filter_map(|b| {
            let m = memory_by_id.get(b.problem_id.as_str())?;
            let change = match (b.evaluation.success, m.evaluation.success) {
                (true, false) => Change::Regression,
                (false, true) => Change::Improvement,
                _ => return None,
            };
            Some(TrialDiff {
                change,
                baseline: b,
                with_memory: m,
            })
        })
        .collect()
}

/// Read a `phase1_results.json` written by `save_results`.
pub fn load_results(path: &Path) -> Result<Results> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Judge a trial. A trial without a response is always wrong.
fn score(solution: &Solution, problem: &Problem, failed: bool) -> Evaluation {
    let mut evaluation = judge::evaluate(&solution.answer, problem.expected());
    if failed {
        evaluation.success = false;
    }
    evaluation
}

/// Human-readable report printed after `save_results`.
pub fn print_report(summary: &Summary) {
    println!("\n{}", "=".repeat(70));
    println!("PHASE 1 RESULTS");
    println!("{}", "=".repeat(70));
    println!(
        "Baseline Accuracy:    {} (95% CI: [{}, {}])",
        pct(summary.baseline_accuracy),
        pct(summary.baseline_ci_lower),
        pct(summary.baseline_ci_upper)
    );
    println!(
        "With Memory Accuracy: {} (95% CI: [{}, {}])",
        pct(summary.with_memory_accuracy),
        pct(summary.with_memory_ci_lower),
        pct(summary.with_memory_ci_upper)
    );
    println!(
        "Absolute Improvement: {:+.2}%",
        summary.absolute_improvement * 100.0
    );
    println!(
        "Relative Improvement: {:+.2}%",
        summary.relative_improvement * 100.0
    );
    println!("Memory Bank Size:     {} items", summary.memory_bank_size);
    println!("Problems Tested:      {}", summary.problems_tested);
    println!();
    if summary.statistically_significant {
        println!("✓ Improvement is statistically significant at 95% confidence");
        println!("  (Memory CI lower bound > Baseline CI upper bound)");
    } else {
        println!("⚠ Improvement not statistically significant at 95% confidence");
        println!("  (Confidence intervals overlap)");
    }
    println!("{}", "=".repeat(70));
}

fn pct(v: f64) -> String {
    format!("{:.2}%", v * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbank_core::{MemoryItem, RbankError, RbankResult, RetrievalConfig};
    use rbank_llm::CompletionRequest;
    use std::cell::{Cell, RefCell};

    /// Answers training questions correctly, and test questions correctly only
    /// when strategy hints are present in the system prompt.
    struct ScriptedServer {
        lesson_content: &'static str,
        calls: Cell<usize>,
        fail_on_call: Option<usize>,
        systems: RefCell<Vec<Option<String>>>,
    }

    impl ScriptedServer {
        fn new(lesson_content: &'static str) -> Self {
            Self {
                lesson_content,
                calls: Cell::new(0),
                fail_on_call: None,
                systems: RefCell::new(Vec::new()),
            }
        }
    }

    impl CompletionClient for ScriptedServer {
        fn generate(&self, request: &CompletionRequest) -> RbankResult<String> {
            let n = self.calls.get() + 1;
            self.calls.set(n);
            if self.fail_on_call == Some(n) {
                return Err(RbankError::Llm("server returned 503: loading model".into()));
            }
            self.systems.borrow_mut().push(request.system.clone());

            if request.prompt.starts_with("You successfully solved")
                || request.prompt.starts_with("You attempted")
            {
                return Ok(format!(
                    "MEMORY 1:\nTITLE: Multiply groups by size\n\
                     DESCRIPTION: Count groups times items per group.\n\
                     CONTENT: {}",
                    self.lesson_content
                ));
            }

            let hinted = request
                .system
                .as_deref()
                .is_some_and(|s| s.contains("Past Strategy Hints"));
            let answer = if request.prompt.contains("boxes of 4 apples") {
                "12"
            } else if request.prompt.contains("bags of 6 pears") && hinted {
                "30"
            } else {
                "11"
            };
            Ok(format!("REASONING: multiply\nANSWER: {answer}"))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    /// Questions and memories land on fixed vectors with cosine 0.6.
    struct TwoPointEmbedder;

    impl Embedder for TwoPointEmbedder {
        fn embed(&self, text: &str) -> RbankResult<Vec<f32>> {
            Ok(if text.contains('?') {
                vec![1.0, 0.0]
            } else {
                vec![0.6, 0.8]
            })
        }

        fn embed_batch(&self, texts: &[&str]) -> RbankResult<Vec<Vec<f32>>> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimensions(&self) -> usize {
            2
        }
    }

    fn problem(id: &str, question: &str, expected: &str) -> Problem {
        Problem {
            id: id.into(),
            question: question.into(),
            answer: None,
            expected_value: Some(expected.into()),
            level: None,
            kind: None,
        }
    }

    fn train() -> Vec<Problem> {
        vec![problem("gsm8k_0", "Tom has 3 boxes of 4 apples. How many apples?", "12")]
    }

    fn test_split() -> Vec<Problem> {
        vec![problem("gsm8k_1000", "Ann has 5 bags of 6 pears. How many pears?", "30")]
    }

    fn settings() -> ExperimentSettings {
        ExperimentSettings {
            show_progress: false,
            ..ExperimentSettings::default()
        }
    }

    fn experiment<'a>(
        client: &'a dyn CompletionClient,
        embedder: &'a dyn Embedder,
        bank: JsonBank,
        settings: ExperimentSettings,
    ) -> Experiment<'a> {
        Experiment::new(
            client,
            embedder,
            bank,
            Retriever::new(RetrievalConfig::default()),
            settings,
        )
    }

    #[test]
    fn test_full_run_improves_with_memory() {
        let server = ScriptedServer::new("Identify the groups and their size, then multiply.");
        let mut exp = experiment(&server, &TwoPointEmbedder, JsonBank::in_memory(), settings());

        let report = exp.build_bank(&train(), 100).unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.solved, 1);
        assert_eq!(report.memories_added, 1);
        assert!(exp.bank().all().iter().all(|m| m.embedding.is_some()));

        assert_eq!(exp.run_baseline(&test_split(), 100).unwrap(), 0.0);
        assert_eq!(exp.run_with_memory(&test_split(), 100).unwrap(), Some(1.0));

        let rec = &exp.results.with_memory[0];
        assert_eq!(
            rec.retrieved_memories.as_deref(),
            Some(&["Multiply groups by size".to_string()][..])
        );
        assert_eq!(rec.num_memories_retrieved, Some(1));
        assert!((rec.retrieval_scores.as_ref().unwrap()[0] - 0.6).abs() < 1e-6);

        let summary = exp.summary();
        assert_eq!(summary.baseline_accuracy, 0.0);
        assert_eq!(summary.with_memory_accuracy, 1.0);
        assert_eq!(summary.memory_bank_size, 1);
        assert_eq!(summary.random_seed, 42);
    }

    #[test]
    fn test_leaky_memory_is_not_injected() {
        let server = ScriptedServer::new("Five bags of six pears gives a total of 30.");
        let mut exp = experiment(&server, &TwoPointEmbedder, JsonBank::in_memory(), settings());
        exp.build_bank(&train(), 100).unwrap();

        assert_eq!(exp.run_with_memory(&test_split(), 100).unwrap(), Some(0.0));
        let rec = &exp.results.with_memory[0];
        assert_eq!(rec.num_memories_retrieved, Some(0));
        let last_system = server.systems.borrow().last().cloned().flatten().unwrap();
        assert!(!last_system.contains("Past Strategy Hints"));
    }

    #[test]
    fn test_empty_bank_skips_memory_run() {
        let server = ScriptedServer::new("x");
        let mut exp = experiment(&server, &TwoPointEmbedder, JsonBank::in_memory(), settings());
        assert_eq!(exp.run_with_memory(&test_split(), 100).unwrap(), None);
        assert_eq!(server.calls.get(), 0);
    }

    #[test]
    fn test_build_resumes_by_problem_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.json");
        let server = ScriptedServer::new("Multiply the counts.");
        {
            let bank = JsonBank::open(&path).unwrap();
            let mut exp = experiment(&server, &TwoPointEmbedder, bank, settings());
            exp.build_bank(&train(), 100).unwrap();
        }
        let calls_after_first = server.calls.get();

        let bank = JsonBank::open(&path).unwrap();
        let mut exp = experiment(&server, &TwoPointEmbedder, bank, settings());
        let report = exp.build_bank(&train(), 100).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.attempted, 0);
        assert_eq!(server.calls.get(), calls_after_first);
        assert_eq!(exp.bank().len(), 1);
    }

    #[test]
    fn test_limit_caps_problems() {
        let server = ScriptedServer::new("x");
        let mut exp = experiment(&server, &TwoPointEmbedder, JsonBank::in_memory(), settings());
        let mut many = test_split();
        many.push(problem("gsm8k_1001", "Ann has 5 bags of 6 pears. How many pears?", "30"));
        exp.run_baseline(&many, 1).unwrap();
        assert_eq!(exp.results.baseline.len(), 1);
        exp.run_baseline(&many, 10).unwrap();
        assert_eq!(exp.results.baseline.len(), 2);
    }

    #[test]
    fn test_failed_completion_is_scored_wrong() {
        let mut server = ScriptedServer::new("x");
        server.fail_on_call = Some(1);
        let mut exp = experiment(&server, &TwoPointEmbedder, JsonBank::in_memory(), settings());
        let acc = exp.run_baseline(&train(), 100).unwrap();
        assert_eq!(acc, 0.0);
        let rec = &exp.results.baseline[0];
        assert!(!rec.evaluation.success);
        assert!(rec.error.as_deref().unwrap().contains("503"));
        assert_eq!(rec.solution, Solution::default());
        assert_eq!(exp.failed_trials(), 1);
    }

    #[test]
    fn test_failed_completion_without_expected_value_is_wrong() {
        let mut server = ScriptedServer::new("x");
        server.fail_on_call = Some(1);
        let mut exp = experiment(&server, &TwoPointEmbedder, JsonBank::in_memory(), settings());
        let mut unlabeled = problem("math_7", "Simplify the expression.", "");
        unlabeled.expected_value = None;

        let acc = exp.run_baseline(&[unlabeled], 100).unwrap();
        assert_eq!(acc, 0.0);
        let rec = &exp.results.baseline[0];
        assert!(rec.error.is_some());
        assert!(!rec.evaluation.success);
    }

    #[test]
    fn test_unlabeled_training_problem_yields_a_lesson() {
        let server = ScriptedServer::new("Check the arithmetic.");
        let mut exp = experiment(&server, &TwoPointEmbedder, JsonBank::in_memory(), settings());
        let mut unlabeled = problem("math_8", "Simplify the expression.", "");
        unlabeled.expected_value = None;

        let report = exp.build_bank(&[unlabeled], 100).unwrap();
        assert_eq!(report.solved, 0);
        assert!(!exp.bank().all()[0].success);
    }

    #[test]
    fn test_fail_fast_aborts() {
        let mut server = ScriptedServer::new("x");
        server.fail_on_call = Some(1);
        let mut exp = experiment(
            &server,
            &TwoPointEmbedder,
            JsonBank::in_memory(),
            ExperimentSettings {
                fail_fast: true,
                ..settings()
            },
        );
        assert!(exp.run_baseline(&train(), 100).is_err());
    }

    #[test]
    fn test_save_results_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let server = ScriptedServer::new("Multiply the counts.");
        let mut exp = experiment(&server, &TwoPointEmbedder, JsonBank::in_memory(), settings());
        exp.build_bank(&train(), 100).unwrap();
        exp.run_baseline(&test_split(), 100).unwrap();
        exp.run_with_memory(&test_split(), 100).unwrap();

        let out = dir.path().join("results");
        let summary = exp.save_results(&out).unwrap();
        assert_eq!(summary.problems_tested, 1);

        let results: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join(RESULTS_FILE)).unwrap()).unwrap();
        assert_eq!(results["baseline"][0]["problem_id"], "gsm8k_1000");
        assert!(results["baseline"][0].get("retrieved_memories").is_none());
        assert_eq!(results["with_memory"][0]["evaluation"]["success"], true);
        assert_eq!(results["with_memory"][0]["solution"]["answer"], "30");

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join(SUMMARY_FILE)).unwrap()).unwrap();
        for key in [
            "baseline_accuracy",
            "with_memory_ci_lower",
            "relative_improvement",
            "statistically_significant",
            "random_seed",
        ] {
            assert!(summary.get(key).is_some(), "missing {key}");
        }
    }

    fn record(
        id: &str,
        success: bool,
        predicted: &str,
        memories: Option<Vec<&str>>,
    ) -> TrialRecord {
        TrialRecord {
            problem_id: id.into(),
            question: format!("question {id}?"),
            num_memories_retrieved: memories.as_ref().map(|m| m.len()),
            retrieved_memories: memories.map(|m| m.into_iter().map(String::from).collect()),
            retrieval_scores: None,
            solution: Solution {
                answer: predicted.into(),
                ..Solution::default()
            },
            evaluation: Evaluation {
                success,
                ..judge::evaluate(predicted, "30")
            },
            error: None,
        }
    }

    #[test]
    fn test_compare_arms_pairs_by_problem_id() {
        let results = Results {
            baseline: vec![
                record("a", true, "30", None),
                record("b", false, "29", None),
                record("c", true, "30", None),
                record("d", true, "30", None),
                record("e", false, "1", None),
            ],
            // Different order, one problem missing, one unchanged.
            with_memory: vec![
                record("d", true, "30", Some(vec![])),
                record("b", true, "30", Some(vec!["Count the groups"])),
                record("a", false, "300", Some(vec!["Scale by ten", "Check units"])),
                record("c", true, "30", Some(vec![])),
            ],
        };

        let diffs = compare_arms(&results);
        assert_eq!(diffs.len(), 2);

        assert_eq!(diffs[0].change, Change::Regression);
        assert_eq!(diffs[0].baseline.problem_id, "a");
        assert_eq!(diffs[0].with_memory.solution.answer, "300");
        assert_eq!(
            diffs[0].with_memory.retrieved_memories.as_deref().unwrap(),
            ["Scale by ten", "Check units"]
        );

        assert_eq!(diffs[1].change, Change::Improvement);
        assert_eq!(diffs[1].with_memory.problem_id, "b");
    }

    #[test]
    fn test_load_results_reads_saved_file() {
        let dir = tempfile::tempdir().unwrap();
        let server = ScriptedServer::new("Multiply the counts.");
        let mut exp = experiment(&server, &TwoPointEmbedder, JsonBank::in_memory(), settings());
        exp.build_bank(&train(), 100).unwrap();
        exp.run_baseline(&test_split(), 100).unwrap();
        exp.run_with_memory(&test_split(), 100).unwrap();
        exp.save_results(dir.path()).unwrap();

        let loaded = load_results(&dir.path().join(RESULTS_FILE)).unwrap();
        let diffs = compare_arms(&loaded);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].change, Change::Improvement);
        assert_eq!(
            diffs[0].baseline.evaluation.predicted_number,
            Some(rbank_core::Number::Int(11))
        );
    }

    #[test]
    fn test_bank_items_from_failures_are_lessons() {
        let server = ScriptedServer::new("Check the arithmetic.");
        let mut exp = experiment(&server, &TwoPointEmbedder, JsonBank::in_memory(), settings());
        // Without hints the scripted server gets this one wrong.
        let report = exp.build_bank(&test_split(), 100).unwrap();
        assert_eq!(report.solved, 0);
        let items: &[MemoryItem] = exp.bank().all();
        assert_eq!(items.len(), 1);
        assert!(!items[0].success);
        assert_eq!(items[0].source_problem_id, "gsm8k_1000");
    }
}
