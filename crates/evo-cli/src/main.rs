use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "evo", version, about = "Evolutionary code-optimization harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendArg {
    #[value(name = "local")]
    Local,
    #[value(name = "docker")]
    Docker,
    #[value(name = "docker-persistent")]
    DockerPersistent,
}

impl From<BackendArg> for evo_engine::Backend {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Local => evo_engine::Backend::Local,
            BackendArg::Docker => evo_engine::Backend::Docker,
            BackendArg::DockerPersistent => evo_engine::Backend::DockerPersistent,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the evolution engine on a seed program.
    Run {
        seed: PathBuf,
        #[arg(long)]
        input_dir: PathBuf,
        #[arg(long)]
        expected: PathBuf,
        #[arg(long)]
        workdir: PathBuf,
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,
        #[arg(long)]
        rounds: Option<u32>,
        #[arg(long)]
        repeats: Option<u32>,
        #[arg(long)]
        cpus: Option<f64>,
        #[arg(long)]
        mem: Option<u64>,
        #[arg(long)]
        allow_net: bool,
        #[arg(long)]
        timeout: Option<u64>,
        /// Comma-separated recipe names overriding the default catalog.
        #[arg(long)]
        recipes: Option<String>,
        #[arg(long)]
        image: Option<String>,
        /// YAML overrides file, applied below any explicit flags.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Summarize a configured invocation without running anything.
    Describe {
        #[arg(long)]
        input_dir: PathBuf,
        #[arg(long)]
        expected: PathBuf,
        #[arg(long)]
        workdir: PathBuf,
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,
        #[arg(long)]
        recipes: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// List the mutation recipe catalog.
    Recipes {
        #[arg(long)]
        json: bool,
    },
    /// Apply one recipe to a source file and print or write the result.
    Mutate {
        seed: PathBuf,
        recipe: String,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli.command) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json!({
                    "ok": false,
                    "error": "command_failed",
                    "message": err.to_string(),
                }));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Describe { json, .. }
        | Commands::Recipes { json }
        | Commands::Mutate { json, .. } => *json,
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            seed,
            input_dir,
            expected,
            workdir,
            backend,
            rounds,
            repeats,
            cpus,
            mem,
            allow_net,
            timeout,
            recipes,
            image,
            config,
            json,
        } => {
            let seed_code = fs::read_to_string(&seed)
                .with_context(|| format!("seed not readable: {}", seed.display()))?;

            let mut cfg = evo_engine::RunConfig::new(input_dir, expected, workdir);
            if let Some(path) = config {
                cfg.apply_overrides(evo_engine::config::load_overrides(&path)?)?;
            }
            if let Some(backend) = backend {
                cfg.backend = backend.into();
            }
            if let Some(rounds) = rounds {
                cfg.rounds = rounds;
            }
            if let Some(repeats) = repeats {
                cfg.repeats = repeats;
            }
            if let Some(cpus) = cpus {
                cfg.cpus = cpus;
            }
            if let Some(mem) = mem {
                cfg.mem_mb = mem;
            }
            if allow_net {
                cfg.network = evo_engine::NetworkMode::Bridge;
            }
            if let Some(timeout) = timeout {
                cfg.timeout_s = timeout;
            }
            if let Some(recipes) = recipes {
                cfg.recipes = parse_recipe_list(&recipes);
            }
            if let Some(image) = image {
                cfg.image = image;
            }
            let cfg = cfg.resolved()?;

            let outcome = evo_engine::evolve(&seed_code, &cfg)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "score": outcome.best.score,
                    "best": outcome.best,
                    "best_path": outcome.best_path.display().to_string(),
                })));
            }
            println!("score: {}", outcome.best.score);
            println!("correct: {}", outcome.best.correct);
            println!("best_path: {}", outcome.best_path.display());
        }
        Commands::Describe {
            input_dir,
            expected,
            workdir,
            backend,
            recipes,
            config,
            json,
        } => {
            let mut cfg = evo_engine::RunConfig::new(input_dir, expected, workdir);
            if let Some(path) = config {
                cfg.apply_overrides(evo_engine::config::load_overrides(&path)?)?;
            }
            if let Some(backend) = backend {
                cfg.backend = backend.into();
            }
            if let Some(recipes) = recipes {
                cfg.recipes = parse_recipe_list(&recipes);
            }
            let cfg = cfg.resolved()?;
            let summary = evo_engine::describe(&cfg)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "backend": summary.backend,
                    "network": summary.network,
                    "rounds": summary.rounds,
                    "repeats": summary.repeats,
                    "timeout_s": summary.timeout_s,
                    "cpus": summary.cpus,
                    "mem_mb": summary.mem_mb,
                    "image": summary.image,
                    "workdir": summary.workdir.display().to_string(),
                    "input_dir": summary.input_dir.display().to_string(),
                    "input_file_count": summary.input_file_count,
                    "expected_path": summary.expected_path.display().to_string(),
                    "expected_line_count": summary.expected_line_count,
                    "recipes": summary.recipes,
                    "entry_command": summary.entry_command,
                })));
            }
            print_summary(&summary);
        }
        Commands::Recipes { json } => {
            if json {
                let entries: Vec<Value> = evo_engine::CATALOG
                    .iter()
                    .map(|r| json!({"name": r.name, "summary": r.summary}))
                    .collect();
                return Ok(Some(json!({
                    "ok": true,
                    "command": "recipes",
                    "recipes": entries,
                })));
            }
            for recipe in evo_engine::CATALOG {
                println!("{}: {}", recipe.name, recipe.summary);
            }
        }
        Commands::Mutate {
            seed,
            recipe,
            out,
            json,
        } => {
            let code = fs::read_to_string(&seed)
                .with_context(|| format!("seed not readable: {}", seed.display()))?;
            let mutated = evo_engine::mutate(&code, &recipe);
            let changed = mutated != code;
            if let Some(out_path) = &out {
                fs::write(out_path, &mutated)
                    .with_context(|| format!("cannot write: {}", out_path.display()))?;
            }
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "mutate",
                    "recipe": recipe,
                    "changed": changed,
                    "out": out.map(|p| p.display().to_string()),
                })));
            }
            if out.is_none() {
                print!("{}", mutated);
            } else {
                println!("changed: {}", changed);
            }
        }
    }
    Ok(None)
}

fn parse_recipe_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect()
}

fn print_summary(summary: &evo_engine::RunSummary) {
    println!("backend: {}", summary.backend);
    println!("network: {}", summary.network);
    println!("rounds: {}", summary.rounds);
    println!("repeats: {}", summary.repeats);
    println!("timeout_s: {}", summary.timeout_s);
    println!("cpus: {}", summary.cpus);
    println!("mem_mb: {}", summary.mem_mb);
    println!("image: {}", summary.image);
    println!("workdir: {}", summary.workdir.display());
    println!("input_dir: {}", summary.input_dir.display());
    println!("input_file_count: {}", summary.input_file_count);
    println!("expected_path: {}", summary.expected_path.display());
    println!("expected_line_count: {}", summary.expected_line_count);
    println!("recipes: {}", summary.recipes.join(","));
    println!("entry_command: {:?}", summary.entry_command);
}

fn emit_json(payload: &Value) {
    match serde_json::to_string_pretty(payload) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", payload),
    }
}
