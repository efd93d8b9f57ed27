// tests/integration_test.rs

//! Integration tests for hyperpkg
//!
//! These tests build real databases in temporary directories and drive the
//! writer, reader and solver through the public API.

use hyperpkg::db::{self, package_flags, DependKind, Database, Dependency};
use hyperpkg::repository::{Feed, InstalledState, TrustAll};
use hyperpkg::resolver::{Action, DefaultWeigher, Node, Solver, SolverOptions};
use hyperpkg::version::{depend_string, DependOp};
use hyperpkg::{Error, Result};
use std::collections::BTreeSet;
use tempfile::TempDir;

const REPO: &str = "\
[app]
Version=1.0
Maintainer=Jane Doe
ShortDesc=An application
Depends=libfoo>=1.3; libbar
Conflicts=oldapp

[libfoo]
Version=1.2
Provides=libfoo-compat

[libfoo]
Version=1.3

[libbar]
Version=0.9
Suggests=extras
";

fn build_db(feeds: &[Feed], installed: &str) -> Result<(TempDir, Database)> {
    let dir = tempfile::tempdir()?;
    let state = InstalledState {
        packages: Some(installed.as_bytes().to_vec()),
        files: None,
    };
    let db = db::rebuild(&dir.path().join("db"), feeds, state, &TrustAll)?;
    Ok((dir, db))
}

fn actions(solver: &Solver, db: &Database) -> Vec<String> {
    solver
        .list()
        .iter()
        .map(|step| {
            let record = db.package(step.package).unwrap();
            format!("{} {}~{}", step.action, db.str(record.name), db.str(record.version))
        })
        .collect()
}

#[test]
fn test_feed_facts_survive_round_trip() {
    let (_dir, db) = build_db(&[Feed::packages("main", "stable", REPO)], "").unwrap();
    assert_eq!(db.package_count(), 4);

    let app = db.find_package("app", "1.0").unwrap();
    let record = db.package(app).unwrap();
    assert_eq!(db.str(record.maintainer), "Jane Doe");
    assert_eq!(db.string(true, record.short_desc), Some("An application"));
    assert_eq!(db.str(record.repo), "main");
    assert_eq!(db.str(record.distribution), "stable");

    let deps: BTreeSet<String> = db
        .dependencies(app)
        .filter_map(|dep| match dep {
            Dependency::Ordinary {
                kind,
                op,
                name,
                version,
            } => Some(format!(
                "{} {}",
                kind.as_str(),
                depend_string(db.str(name), op, db.str(version))
            )),
            Dependency::ReverseOf { .. } => None,
        })
        .collect();
    let kinds = [DependKind::Depend, DependKind::Conflict].map(|k| k.as_str());
    let expected: BTreeSet<String> = [
        format!("{} libfoo>=1.3", kinds[0]),
        format!("{} libbar", kinds[0]),
        format!("{} oldapp", kinds[1]),
    ]
    .into_iter()
    .collect();
    assert_eq!(deps, expected);
}

#[test]
fn test_equal_strings_share_an_index() {
    let (_dir, db) = build_db(
        &[Feed::packages(
            "main",
            "stable",
            "[a]\nVersion=1.0\nSection=net\n[b]\nVersion=1.0\nSection=web\n",
        )],
        "",
    )
    .unwrap();
    let a = db.package(db.find_package("a", "1.0").unwrap()).unwrap();
    let b = db.package(db.find_package("b", "1.0").unwrap()).unwrap();
    assert_eq!(a.version, b.version);
    assert_eq!(a.repo, b.repo);
    assert_ne!(a.section, b.section);
    assert_ne!(a.name, b.name);
}

#[test]
fn test_installed_and_repository_copy_are_one_record() {
    let (_dir, db) = build_db(
        &[Feed::packages("main", "stable", "[foo]\nVersion=2\nShortDesc=Foo\n")],
        "[foo]\nVersion=2\n",
    )
    .unwrap();
    assert_eq!(db.package_count(), 1);
    let record = db.package(0).unwrap();
    assert!(record.is_installed());
    assert_eq!(db.string(true, record.short_desc), Some("Foo"));
}

#[test]
fn test_inverted_index_matches_operator() {
    let (_dir, db) = build_db(&[Feed::packages("main", "stable", REPO)], "").unwrap();
    let name = db.find_string("libfoo").unwrap();
    let version = db.find_string("1.3").unwrap();

    let versions = |op: DependOp| -> BTreeSet<String> {
        db.packages_of_string(version, name, op)
            .map(|idx| db.str(db.package(idx).unwrap().version).to_string())
            .collect()
    };
    assert_eq!(versions(DependOp::None).len(), 2);
    assert_eq!(versions(DependOp::Eq), ["1.3".to_string()].into());
    assert_eq!(versions(DependOp::Lt), ["1.2".to_string()].into());
    assert_eq!(versions(DependOp::Ge), ["1.3".to_string()].into());
    assert!(versions(DependOp::Gt).is_empty());

    let compat = db.find_string("libfoo-compat").unwrap();
    let providers: Vec<u32> = db.packages_of_string(db::NONE, compat, DependOp::None).collect();
    assert_eq!(providers, vec![db.find_package("libfoo", "1.2").unwrap()]);
}

#[test]
fn test_upgrade_scenario_orders_dependencies_first() {
    let (_dir, db) = build_db(
        &[Feed::packages(
            "main",
            "stable",
            "[A]\nVersion=1.0\nDepends=B>=2.0\n[B]\nVersion=2.0\n",
        )],
        "[B]\nVersion=1.0\nDistribution=stable\n",
    )
    .unwrap();

    let mut solver = Solver::new(&db, SolverOptions::default());
    solver.add_request("A", Action::Install).unwrap();
    solver.solve().unwrap();
    solver.weight(&DefaultWeigher);
    assert!(solver.begin_list().unwrap());

    let plan = actions(&solver, &db);
    assert_eq!(plan.len(), 3);
    let position = |s: &str| plan.iter().position(|p| p == s).unwrap();
    assert!(position("install B~2.0") < position("install A~1.0"));
    assert!(position("remove B~1.0") < position("install A~1.0"));
}

#[test]
fn test_provides_resolves_request() {
    let (_dir, db) = build_db(
        &[Feed::packages("main", "stable", "[C]\nVersion=1\nProvides=D\n")],
        "",
    )
    .unwrap();

    let mut solver = Solver::new(&db, SolverOptions::default());
    solver.add_request("D", Action::Install).unwrap();
    solver.solve().unwrap();
    assert!(solver.begin_list().unwrap());
    assert_eq!(actions(&solver, &db), vec!["install C~1"]);
}

#[test]
fn test_solver_is_deterministic() {
    let (_dir, db) = build_db(
        &[Feed::packages(
            "main",
            "stable",
            "[app]\nVersion=1\nDepends=mta; libc\n[exim]\nVersion=4\nProvides=mta\n\
             [postfix]\nVersion=3\nProvides=mta\nDownloadSize=900\n[libc]\nVersion=2\n",
        )],
        "",
    )
    .unwrap();

    let run = || -> Vec<Node> {
        let mut solver = Solver::new(&db, SolverOptions::default());
        solver.add_request("app", Action::Install).unwrap();
        solver.solve().unwrap();
        solver.weight(&DefaultWeigher);
        solver.nodes().to_vec()
    };
    let first = run();
    assert_eq!(first, run());
    assert!(first[0].min.key() <= first[0].max.key());
}

#[test]
fn test_choice_protocol_round_trip() {
    let (_dir, db) = build_db(
        &[Feed::packages(
            "main",
            "stable",
            "[app]\nVersion=1\nDepends=mta\n[exim]\nVersion=4\nProvides=mta\n\
             [postfix]\nVersion=3\nProvides=mta\n",
        )],
        "",
    )
    .unwrap();

    let mut solver = Solver::new(&db, SolverOptions::default());
    solver.add_request("app", Action::Install).unwrap();
    solver.solve().unwrap();
    solver.weight(&DefaultWeigher);

    assert!(!solver.begin_list().unwrap());
    let alternatives: Vec<String> = solver.choices().iter().map(|&id| solver.describe(id)).collect();
    assert_eq!(alternatives, vec!["install exim~4", "install postfix~3"]);

    assert!(solver.continue_list(1).unwrap());
    assert_eq!(actions(&solver, &db), vec!["install postfix~3", "install app~1"]);

    assert!(solver.up_list());
    assert!(solver.list().is_empty());
    assert!(solver.continue_list(0).unwrap());
    assert_eq!(actions(&solver, &db), vec!["install exim~4", "install app~1"]);

    assert!(matches!(solver.continue_list(0), Err(Error::NoPendingChoice)));
}

#[test]
fn test_commit_updates_state_and_counts() {
    let (_dir, mut db) = build_db(&[Feed::packages("main", "stable", REPO)], "").unwrap();

    let steps = {
        let mut solver = Solver::new(&db, SolverOptions::default());
        solver.add_request("app", Action::Install).unwrap();
        solver.solve().unwrap();
        solver.weight(&DefaultWeigher);
        assert!(solver.begin_list().unwrap());
        solver.list().to_vec()
    };
    assert_eq!(steps.len(), 3);

    for step in &steps {
        let wanted = db.str(db.package(step.package).unwrap().name) == "app";
        db.register_action(step.package, step.action, wanted, 1_700_000_000, 0)
            .unwrap();
    }
    db.flush().unwrap();

    let path = db.path().to_path_buf();
    drop(db);
    let db = Database::open_read_only(&path).unwrap();

    let app = db.package(db.find_package("app", "1.0").unwrap()).unwrap();
    assert!(app.has_flag(package_flags::WANTED));
    let libbar = db.package(db.find_package("libbar", "0.9").unwrap()).unwrap();
    assert!(libbar.is_installed());
    assert_eq!(libbar.used, 1);
    assert_eq!(libbar.install_date, 1_700_000_000);
    assert!(db.orphaned_packages().is_empty());
}

#[test]
fn test_committed_state_survives_rebuild() {
    let feeds = [Feed::packages("main", "stable", REPO)];
    let (dir, mut db) = build_db(&feeds, "").unwrap();

    let steps = {
        let mut solver = Solver::new(&db, SolverOptions::default());
        solver.add_request("app", Action::Install).unwrap();
        solver.solve().unwrap();
        solver.weight(&DefaultWeigher);
        assert!(solver.begin_list().unwrap());
        solver.list().to_vec()
    };
    for step in &steps {
        let wanted = db.str(db.package(step.package).unwrap().name) == "app";
        db.register_action(step.package, step.action, wanted, 1_700_000_000, 1000)
            .unwrap();
    }
    db.flush().unwrap();

    let installed = dir.path().join("installed");
    db.write_installed_state(&installed).unwrap();
    let path = db.path().to_path_buf();
    drop(db);

    let state = InstalledState::load(&installed, &dir.path().join("files")).unwrap();
    let db = db::rebuild(&path, &feeds, state, &TrustAll).unwrap();
    assert_eq!(db.package_count(), 4);

    let app = db.package(db.find_package("app", "1.0").unwrap()).unwrap();
    assert!(app.is_installed());
    assert!(app.has_flag(package_flags::WANTED));
    assert_eq!(app.install_date, 1_700_000_000);
    assert_eq!(app.installed_by, 1000);
    assert_eq!(db.string(true, app.short_desc), Some("An application"));

    let libbar = db.package(db.find_package("libbar", "0.9").unwrap()).unwrap();
    assert!(libbar.is_installed());
    assert!(!libbar.has_flag(package_flags::WANTED));
    assert_eq!(libbar.used, 1);
    let libfoo = db.package(db.find_package("libfoo", "1.3").unwrap()).unwrap();
    assert_eq!(libfoo.used, 1);
    assert!(!db.package(db.find_package("libfoo", "1.2").unwrap()).unwrap().is_installed());
    assert!(db.orphaned_packages().is_empty());
}
