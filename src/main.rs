//! Augur CLI - coverage-guided LLM test augmentation for Python repositories.

use std::future::Future;
use std::io::stdout;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use augur::apply::{apply_results, AugmentResults};
use augur::augment::{
    AugmentReport, Composer, OpenAiChat, ResolvedTargets, Resolver, WithContextStrategy,
};
use augur::cli::{
    AugmentArgs, CacheSubcommand, Cli, Command, InitArgs, ModulesArgs, NeuterArgs, SelectArgs,
};
use augur::config::Config;
use augur::core::progress::create_spinner;
use augur::core::{Error, LogContext, Result};
use augur::coverage::{TestCoverage, TestPathFilter, TotalCoverage};
use augur::git::GitRepo;
use augur::neuter::Neuterer;
use augur::output::Format;
use augur::runner::{CachedRunner, PytestRunner, RunCache, RunRequest, TestRunner};
use augur::testmod::{discover_modules, select_modules, TestModule};

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let default_level = if cli.verbose { "augur=debug" } else { "augur=info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let format = Format::from(cli.format);
    let log = LogContext::default();

    match &cli.command {
        Command::Init(args) => init(&cli.path, args),
        Command::Modules(args) => {
            let config = load_config(&cli)?;
            list_modules(&config, args, format, &log)
        }
        Command::Cache(cmd) => {
            let config = load_config(&cli)?;
            let cache = RunCache::open(&config.cache.db_path())?;
            match cmd.command {
                CacheSubcommand::Clear => {
                    let removed = cache.clear()?;
                    println!("Cleared {removed} cached test runs");
                }
                CacheSubcommand::Info => {
                    let info = CacheInfo {
                        path: config.cache.db_path(),
                        entries: cache.len()?,
                    };
                    format.format(&info, &mut stdout())?;
                }
            }
            Ok(())
        }
        Command::Apply(args) => {
            let config = load_config(&cli)?;
            let mut reports = Vec::new();
            for file in &args.files {
                let results = AugmentResults::load(file)?;
                let report = apply_results(&results, &config.repo.source_folder)?;
                eprintln!(
                    "{} {} tests to {}",
                    "applied".green().bold(),
                    report.applied,
                    report.path.display()
                );
                reports.push(report);
            }
            format.format(&reports, &mut stdout())
        }
        Command::Baseline => {
            let config = load_config(&cli)?;
            config.validate()?;
            let runner = build_runner(&config, cli.no_cache, &log)?;
            let report = block_on(baseline(runner.as_ref(), &config))??;
            format.format(&BaselineReport::new(&config.repo.name, &report), &mut stdout())
        }
        Command::Target(args) => {
            let config = load_config(&cli)?;
            config.validate()?;
            let runner = build_runner(&config, cli.no_cache, &log)?;
            let resolved = block_on(target(runner, &config, args, &log))??;
            format.format(&resolved, &mut stdout())
        }
        Command::Augment(args) => {
            let config = load_config(&cli)?;
            config.validate()?;
            let runner = build_runner(&config, cli.no_cache, &log)?;
            let out = if args.out.is_absolute() {
                args.out.clone()
            } else {
                cli.path.join(&args.out)
            };
            let rows = block_on(augment(runner, &config, args, &out, &log))??;
            format.format(&rows, &mut stdout())
        }
        Command::Neuter(args) => {
            let mut config = load_config(&cli)?;
            apply_neuter_overrides(&mut config, args);
            config.validate()?;
            let runner = build_runner(&config, cli.no_cache, &log)?;
            let modules = load_modules(&config, &args.select.modules, &log)?;
            let neuterer = Neuterer::new(
                runner,
                config.neuter.clone(),
                &config.repo.source_folder,
                log.clone(),
            );
            let summary = block_on(neuterer.neuter_repo(modules))??;
            for skipped in &summary.skipped {
                eprintln!("{} {}: {}", "skip".yellow().bold(), skipped.module, skipped.reason);
            }
            let path = summary.write(&config.repo.source_folder)?;
            log.info(format!("wrote {}", path.display()));
            format.format(&summary, &mut stdout())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load_default(&cli.path)?,
    };
    Ok(config.resolve_paths(&cli.path))
}

fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}

fn build_runner(config: &Config, no_cache: bool, log: &LogContext) -> Result<Arc<dyn TestRunner>> {
    let pytest = PytestRunner::new(config, log.clone())?;
    if no_cache || !config.cache.enabled {
        return Ok(Arc::new(pytest));
    }
    let cache = RunCache::open(&config.cache.db_path())?;
    Ok(Arc::new(CachedRunner::new(pytest, cache, log.clone())))
}

fn load_modules(config: &Config, selectors: &[String], log: &LogContext) -> Result<Vec<TestModule>> {
    let filter = TestPathFilter::new(&config.repo.test_patterns)?;
    let modules = discover_modules(&config.repo.source_folder, &filter, &config.repo.exclude, log)?;
    select_modules(modules, selectors)
}

fn init(path: &Path, args: &InitArgs) -> Result<()> {
    let target = path.join("augur.toml");
    if target.exists() && !args.force {
        return Err(Error::config(format!(
            "{} already exists; pass --force to overwrite",
            target.display()
        )));
    }
    std::fs::write(&target, Config::default_toml())?;
    println!("Wrote {}", target.display());
    Ok(())
}

fn list_modules(config: &Config, args: &ModulesArgs, format: Format, log: &LogContext) -> Result<()> {
    let modules = load_modules(config, &[], log)?;
    let summaries: Vec<_> = modules
        .iter()
        .filter(|m| args.filter.as_ref().is_none_or(|f| m.id().contains(f.as_str())))
        .map(TestModule::summary)
        .collect();
    format.format(&summaries, &mut stdout())
}

async fn baseline(runner: &dyn TestRunner, config: &Config) -> Result<TestCoverage> {
    let spinner = create_spinner(&format!("running the full suite of {}", config.repo.name));
    let result = runner.run(RunRequest::full_suite()).await;
    spinner.finish_and_clear();
    let result = result?;
    for failure in &result.failed {
        tracing::warn!("baseline failure: {} - {}", failure.nodeid, failure.message);
    }
    Ok(result.coverage)
}

async fn target(
    runner: Arc<dyn TestRunner>,
    config: &Config,
    args: &SelectArgs,
    log: &LogContext,
) -> Result<Vec<ResolvedTargets>> {
    let modules = load_modules(config, &args.modules, log)?;
    let base = baseline(runner.as_ref(), config).await?;
    let resolver = Resolver::new(
        runner,
        &config.repo.source_folder,
        config.resolver.stale_diff_threshold,
        log.clone(),
    );

    let mut resolved = Vec::new();
    for module in &modules {
        match resolver.resolve(module, &base).await {
            Ok(targets) => resolved.push(targets),
            Err(e) if e.is_fatal_for_batch() => return Err(e),
            Err(e) => skip_notice(module.name(), &e),
        }
    }
    Ok(resolved)
}

async fn augment(
    runner: Arc<dyn TestRunner>,
    config: &Config,
    args: &AugmentArgs,
    out: &Path,
    log: &LogContext,
) -> Result<Vec<AugmentRow>> {
    let modules = load_modules(config, &args.select.modules, log)?;
    let git_hash = GitRepo::open(&config.repo.source_folder)?.head_sha()?;
    let model = Arc::new(OpenAiChat::new(&config.llm)?);
    let base = baseline(runner.as_ref(), config).await?;
    let resolver = Resolver::new(
        Arc::clone(&runner),
        &config.repo.source_folder,
        config.resolver.stale_diff_threshold,
        log.clone(),
    );

    let mut rows = Vec::new();
    for mut module in modules {
        let mut report = AugmentReport::new(module.name());
        let outcome = async {
            resolver.resolve_into(&mut module, &base).await?;
            let strategy = WithContextStrategy::new(
                &config.repo.source_folder,
                config.augment.max_context_tokens,
                log.clone(),
            );
            let mut composer = Composer::new(
                Arc::clone(&runner),
                model.clone(),
                Box::new(strategy),
                log.clone(),
            )
            .rounds(args.rounds.unwrap_or(config.augment.n_times))
            .retries(config.augment.llm_retries);
            composer.augment_into(&mut module, &mut report).await
        }
        .await;

        // Rounds that completed before an error still produce a results file.
        let complete = outcome.is_ok();
        if complete || !report.improved.is_empty() {
            let results = AugmentResults::from_report(&config.repo.name, &git_hash, &module, &report);
            let path = results.save(out)?;
            let label = if complete {
                "done".green().bold()
            } else {
                "partial".yellow().bold()
            };
            eprintln!(
                "{label} {}: {} generated, {} improved, {} failed, {} no improvement (+{} lines) in {} rounds",
                module.name(),
                report.generated(),
                report.improved.len(),
                report.failed.len(),
                report.no_improve.len(),
                report.total_coverage_added(),
                report.rounds
            );
            rows.push(AugmentRow {
                module: module.id(),
                complete,
                rounds: report.rounds,
                generated: report.generated(),
                improved: report.improved.len(),
                failed: report.failed.len(),
                no_improve: report.no_improve.len(),
                coverage_added: report.total_coverage_added(),
                results: path,
            });
        }

        match outcome {
            Ok(()) => {}
            Err(e) if e.is_fatal_for_batch() => return Err(e),
            Err(e) => skip_notice(module.name(), &e),
        }
    }
    Ok(rows)
}

fn apply_neuter_overrides(config: &mut Config, args: &NeuterArgs) {
    if let Some(keep) = args.keep {
        config.neuter.keep = keep;
        config.neuter.delete = 0;
    }
    if let Some(delete) = args.delete {
        config.neuter.delete = delete;
        config.neuter.keep = 0;
    }
    if args.max_delete.is_some() {
        config.neuter.max_total_delete = args.max_delete;
    }
    if args.aggregate_only {
        config.neuter.attribute_per_test = false;
    }
    if args.commit {
        config.neuter.commit = true;
    }
}

fn skip_notice(module: &str, err: &Error) {
    let label = if err.is_skip_signal() {
        "skip".yellow().bold()
    } else {
        "failed".red().bold()
    };
    eprintln!("{label} {module}: {err}");
}

#[derive(Serialize)]
struct CacheInfo {
    path: PathBuf,
    entries: usize,
}

#[derive(Serialize)]
struct FileRow {
    file: PathBuf,
    covered: usize,
    missing: usize,
}

#[derive(Serialize)]
struct BaselineReport {
    repo: String,
    percent: f64,
    total: TotalCoverage,
    files: Vec<FileRow>,
}

impl BaselineReport {
    fn new(repo: &str, coverage: &TestCoverage) -> Self {
        let total = coverage.total_cov();
        Self {
            repo: repo.to_string(),
            percent: total.percent(),
            total,
            files: coverage
                .cov_list
                .iter()
                .map(|c| FileRow {
                    file: c.filename.clone(),
                    covered: c.covered(),
                    missing: c.missing(),
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct AugmentRow {
    module: String,
    complete: bool,
    rounds: usize,
    generated: usize,
    improved: usize,
    failed: usize,
    no_improve: usize,
    coverage_added: usize,
    results: PathBuf,
}
