// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn plan_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(
            Arg::new("patterns")
                .num_args(0..)
                .help("Package patterns such as foo or foo>=1.2"),
        )
        .arg(
            Arg::new("choice")
                .long("choice")
                .value_name("N")
                .action(ArgAction::Append)
                .help("Alternative to take at each choice, in order"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the action list as JSON"),
        )
        .arg(
            Arg::new("commit")
                .long("commit")
                .action(ArgAction::SetTrue)
                .help("Record the actions in the database"),
        )
}

fn pattern_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(Arg::new("pattern").required(true).help("Package name or name op version"))
}

fn build_cli() -> Command {
    Command::new("hyperpkg")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Binary package database and dependency solver")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Configuration file (JSON)"),
        )
        .arg(
            Arg::new("db_dir")
                .short('d')
                .long("db-dir")
                .value_name("DIR")
                .global(true)
                .help("Database directory, overrides the configuration"),
        )
        .arg(
            Arg::new("suggests")
                .long("suggests")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Install suggested packages too"),
        )
        .arg(
            Arg::new("no_installed")
                .long("no-installed")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Ignore the installed state while resolving"),
        )
        .arg(
            Arg::new("no_deps")
                .long("no-deps")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Do not resolve dependencies"),
        )
        .subcommand_required(true)
        .subcommand(Command::new("update").about("Rebuild the database from the configured feeds"))
        .subcommand(
            Command::new("search")
                .about("Search packages by name (regular expression)")
                .arg(Arg::new("pattern").required(true).help("Search pattern")),
        )
        .subcommand(pattern_command("show", "Show package details"))
        .subcommand(pattern_command("depends", "Show dependencies of a package"))
        .subcommand(pattern_command("rdepends", "Show packages depending on a package"))
        .subcommand(pattern_command("files", "List files of a package"))
        .subcommand(
            Command::new("owner")
                .about("Find the package owning a file")
                .arg(Arg::new("path").required(true).help("Absolute file path")),
        )
        .subcommand(Command::new("upgrades").about("List installed packages with newer versions available"))
        .subcommand(Command::new("orphans").about("List installed packages nothing needs"))
        .subcommand(plan_command("install", "Plan the installation of packages"))
        .subcommand(plan_command("remove", "Plan the removal of packages"))
        .subcommand(plan_command("purge", "Plan the removal of packages and their configuration"))
        .subcommand(plan_command(
            "upgrade",
            "Plan upgrades, of every upgradable package if none is given",
        ))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("hyperpkg.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
