// src/main.rs

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use hyperpkg::config::Config;
use hyperpkg::db::{self, Database, Dependency, PackageRecord};
use hyperpkg::repository::Sha256Checksum;
use hyperpkg::resolver::{Action, DefaultWeigher, PlannedAction, Solver, SolverOptions};
use hyperpkg::version::depend_string;
use serde::Serialize;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "hyperpkg")]
#[command(author, version, about = "Binary package database and dependency solver", long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database directory, overrides the configuration
    #[arg(short, long, global = true)]
    db_dir: Option<PathBuf>,

    /// Install suggested packages too
    #[arg(long, global = true)]
    suggests: bool,

    /// Ignore the installed state while resolving
    #[arg(long, global = true)]
    no_installed: bool,

    /// Do not resolve dependencies
    #[arg(long, global = true)]
    no_deps: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct PlanArgs {
    /// Package patterns such as `foo` or `foo>=1.2`
    patterns: Vec<String>,

    /// Alternative to take at each choice, in order
    #[arg(long = "choice", value_name = "N")]
    choices: Vec<usize>,

    /// Print the action list as JSON
    #[arg(long)]
    json: bool,

    /// Record the actions in the database
    #[arg(long)]
    commit: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the database from the configured feeds
    Update,
    /// Search packages by name (regular expression)
    Search { pattern: String },
    /// Show package details
    Show { pattern: String },
    /// Show dependencies of a package
    Depends { pattern: String },
    /// Show packages depending on a package
    Rdepends { pattern: String },
    /// List files of a package
    Files { pattern: String },
    /// Find the package owning a file
    Owner { path: String },
    /// List installed packages with newer versions available
    Upgrades,
    /// List installed packages nothing needs
    Orphans,
    /// Plan the installation of packages
    Install(PlanArgs),
    /// Plan the removal of packages
    Remove(PlanArgs),
    /// Plan the removal of packages and their configuration
    Purge(PlanArgs),
    /// Plan upgrades, of every upgradable package if none is given
    Upgrade(PlanArgs),
    /// Generate shell completion scripts
    Completions { shell: Shell },
}

/// One planned step as printed with `--json`
#[derive(Serialize)]
struct PlanEntry<'a> {
    action: Action,
    name: &'a str,
    version: &'a str,
    download_size: u32,
    install_size: u32,
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = &cli.db_dir {
        config.db_dir = dir.clone();
    }
    let options = SolverOptions {
        install_suggests: cli.suggests || config.install_suggests,
        use_installed: !cli.no_installed,
        use_deps: !cli.no_deps,
    };

    match cli.command {
        Commands::Update => {
            let feeds = config.feeds()?;
            let installed = config.installed_state()?;
            let db = db::rebuild(&config.db_dir, &feeds, installed, &Sha256Checksum)?;
            println!(
                "Database updated at {}: {} packages, {} files",
                config.db_dir.display(),
                db.package_count(),
                db.file_count()
            );
            Ok(())
        }
        Commands::Search { pattern } => {
            let db = open_read_only(&config)?;
            let mut found = 0;
            for idx in db.packages_by_name(&pattern)? {
                if let Some(record) = db.package(idx) {
                    println!(
                        "{} {} - {}",
                        db.str(record.name),
                        db.str(record.version),
                        short_desc(&db, &record)
                    );
                    found += 1;
                }
            }
            if found == 0 {
                println!("No packages match '{}'", pattern);
            }
            Ok(())
        }
        Commands::Show { pattern } => {
            let db = open_read_only(&config)?;
            for idx in find(&db, &pattern)? {
                show_package(&db, idx);
            }
            Ok(())
        }
        Commands::Depends { pattern } => {
            let db = open_read_only(&config)?;
            for idx in find(&db, &pattern)? {
                println!("{}:", label(&db, idx));
                for dep in db.dependencies(idx) {
                    if let Dependency::Ordinary {
                        kind,
                        op,
                        name,
                        version,
                    } = dep
                    {
                        println!(
                            "  {}: {}",
                            kind.as_str(),
                            depend_string(db.str(name), op, db.str(version))
                        );
                    }
                }
            }
            Ok(())
        }
        Commands::Rdepends { pattern } => {
            let db = open_read_only(&config)?;
            for idx in find(&db, &pattern)? {
                println!("{}:", label(&db, idx));
                for dep in db.dependencies(idx) {
                    if let Dependency::ReverseOf { dependent } = dep {
                        println!("  {}", label(&db, dependent));
                    }
                }
            }
            Ok(())
        }
        Commands::Files { pattern } => {
            let db = open_read_only(&config)?;
            for idx in find(&db, &pattern)? {
                for file in db.files_of_package(idx) {
                    if let Some(path) = db.file_path(file) {
                        println!("{}", path);
                    }
                }
            }
            Ok(())
        }
        Commands::Owner { path } => {
            let db = open_read_only(&config)?;
            let file = db
                .find_file(&path)
                .with_context(|| format!("No package owns {}", path))?;
            let record = db.file(file).context("Corrupt file record")?;
            println!("{} is owned by {}", path, label(&db, record.package));
            Ok(())
        }
        Commands::Upgrades => {
            let db = open_read_only(&config)?;
            let upgrades = db.upgrade_candidates();
            if upgrades.is_empty() {
                println!("All packages are up to date");
            }
            for (installed, candidate) in upgrades {
                let version = db.package(candidate).map(|r| db.str(r.version)).unwrap_or("");
                println!("{} -> {}", label(&db, installed), version);
            }
            Ok(())
        }
        Commands::Orphans => {
            let db = open_read_only(&config)?;
            for idx in db.orphaned_packages() {
                println!("{}", label(&db, idx));
            }
            Ok(())
        }
        Commands::Install(args) => plan(&config, options, Action::Install, args),
        Commands::Remove(args) => plan(&config, options, Action::Remove, args),
        Commands::Purge(args) => plan(&config, options, Action::Purge, args),
        Commands::Upgrade(args) => plan(&config, options, Action::Update, args),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "hyperpkg", &mut io::stdout());
            Ok(())
        }
    }
}

fn open_read_only(config: &Config) -> Result<Database> {
    Database::open_read_only(&config.db_dir)
        .with_context(|| format!("Failed to open database at {}", config.db_dir.display()))
}

/// Packages matching `name` or `name op version`
fn find(db: &Database, pattern: &str) -> Result<Vec<u32>> {
    let parsed = hyperpkg::version::VersionPattern::parse(pattern)
        .with_context(|| format!("Invalid package pattern '{}'", pattern))?;
    let found: Vec<u32> = db
        .packages_by_version_string(&parsed)
        .filter(|&idx| db.package(idx).is_some_and(|r| db.str(r.name) == parsed.name))
        .collect();
    if found.is_empty() {
        anyhow::bail!("No package matches '{}'", pattern);
    }
    Ok(found)
}

fn label(db: &Database, idx: u32) -> String {
    db.package(idx)
        .map(|r| format!("{}~{}", db.str(r.name), db.str(r.version)))
        .unwrap_or_else(|| format!("#{}", idx))
}

fn short_desc<'a>(db: &'a Database, record: &PackageRecord) -> &'a str {
    db.string(true, record.short_desc).unwrap_or("")
}

fn show_package(db: &Database, idx: u32) {
    let Some(record) = db.package(idx) else {
        return;
    };
    let field = |i: u32| db.string(false, i).unwrap_or("-");

    println!("Package: {}", db.str(record.name));
    println!("  Version: {}", db.str(record.version));
    println!("  Description: {}", short_desc(db, &record));
    println!("  Repository: {} ({})", field(record.repo), field(record.distribution));
    println!("  Architecture: {}", field(record.arch));
    println!("  Section: {}", field(record.section));
    println!("  Maintainer: {}", field(record.maintainer));
    println!("  License: {}", field(record.license));
    println!("  Download size: {} bytes", record.download_size);
    println!("  Installed size: {} bytes", record.install_size);
    println!("  Installed: {}", if record.is_installed() { "yes" } else { "no" });
    if record.is_installed() {
        let when = chrono::DateTime::from_timestamp(i64::from(record.install_date), 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  Install date: {}", when);
        println!("  Used by: {} packages", record.used);
    }
}

/// Resolve, walk and optionally commit a set of requests
fn plan(config: &Config, options: SolverOptions, action: Action, args: PlanArgs) -> Result<()> {
    let opened = if args.commit {
        Database::open(&config.db_dir)
    } else {
        Database::open_read_only(&config.db_dir)
    };
    let mut db =
        opened.with_context(|| format!("Failed to open database at {}", config.db_dir.display()))?;

    let mut patterns = args.patterns.clone();
    if patterns.is_empty() {
        if action != Action::Update {
            anyhow::bail!("No packages given");
        }
        patterns = db.upgradable_names();
        if patterns.is_empty() {
            println!("All packages are up to date");
            return Ok(());
        }
    }

    let (steps, requested) = {
        let mut solver = Solver::new(&db, options);
        for pattern in &patterns {
            solver.add_request(pattern, action)?;
        }
        solver.solve()?;
        solver.weight(&DefaultWeigher);

        let mut picks = args.choices.iter().copied();
        let mut done = solver.begin_list()?;
        while !done {
            let alternatives: Vec<String> = solver.choices().iter().map(|&id| solver.describe(id)).collect();
            let choice = match picks.next() {
                Some(choice) => choice,
                None => solver.cheapest_choice().unwrap_or(0),
            };
            info!("Choosing {} of [{}]", choice, alternatives.join(", "));
            done = solver.continue_list(choice)?;
        }

        let requested: HashSet<usize> = solver
            .root()
            .map(|root| root.children.iter().flat_map(|c| c.nodes().to_vec()).collect())
            .unwrap_or_default();
        (solver.list().to_vec(), requested)
    };

    print_plan(&db, &steps, args.json)?;

    if args.commit {
        commit(&mut db, &steps, &requested, &config.installed_packages)?;
        println!("Recorded {} actions", steps.len());
    }
    Ok(())
}

fn print_plan(db: &Database, steps: &[PlannedAction], json: bool) -> Result<()> {
    if json {
        let entries: Vec<PlanEntry> = steps
            .iter()
            .filter_map(|step| {
                let record = db.package(step.package)?;
                Some(PlanEntry {
                    action: step.action,
                    name: db.str(record.name),
                    version: db.str(record.version),
                    download_size: record.download_size,
                    install_size: record.install_size,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if steps.is_empty() {
        println!("Nothing to do");
    }
    for step in steps {
        println!("{:>8} {}", step.action.as_str(), label(db, step.package));
    }
    Ok(())
}

/// Record the plan in the database and in the installed package list
fn commit(
    db: &mut Database,
    steps: &[PlannedAction],
    requested: &HashSet<usize>,
    installed_packages: &Path,
) -> Result<()> {
    let timestamp = u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(u32::MAX);
    let user = current_uid();

    for step in steps {
        let wanted = requested.contains(&step.node);
        db.register_action(step.package, step.action, wanted, timestamp, user)?;
    }
    db.flush()?;
    db.write_installed_state(installed_packages).with_context(|| {
        format!("Failed to write installed state to {}", installed_packages.display())
    })?;
    Ok(())
}

#[cfg(unix)]
fn current_uid() -> u32 {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata("/proc/self").map(|m| m.uid()).unwrap_or(0)
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}
