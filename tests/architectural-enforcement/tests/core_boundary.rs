//! Integration Test: Core Library Boundary
//!
//! **Policy**: `kb-client-core` is headless. It reports through `tracing`
//! and `Result`, never by printing or panicking, and depends on no surface
//! crate. Rendering, argument parsing and subscriber setup belong to the
//! shell.

use std::fs;

use architectural_enforcement::{production_lines, workspace_root, SourceLine};

const CORE_SRC: &str = "client/core/src";

fn report(what: &str, violations: &[SourceLine]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n{what} found in client core:\n");
    for violation in violations {
        eprintln!("  {violation}");
    }
    panic!("\nFound {} violation(s): {what}", violations.len());
}

#[test]
fn test_core_never_prints() {
    let violations: Vec<SourceLine> = production_lines(CORE_SRC)
        .into_iter()
        .filter(|line| {
            ["println!", "print!", "eprintln!", "eprint!", "dbg!"]
                .iter()
                .any(|mac| line.code.contains(mac))
        })
        .collect();
    report("Direct stdout/stderr output", &violations);
}

#[test]
fn test_core_never_unwraps() {
    let violations: Vec<SourceLine> = production_lines(CORE_SRC)
        .into_iter()
        .filter(|line| line.code.contains(".unwrap()") || line.code.contains(".expect("))
        .collect();
    report("unwrap()/expect() in production code", &violations);
}

#[test]
fn test_core_has_no_surface_dependencies() {
    let manifest = fs::read_to_string(workspace_root().join("client/core/Cargo.toml"))
        .expect("core manifest readable");
    let dependencies = manifest
        .split("[dev-dependencies]")
        .next()
        .unwrap_or_default();

    for forbidden in ["clap", "tracing-subscriber", "anyhow", "ratatui", "crossterm"] {
        let declared = dependencies.lines().any(|line| {
            let line = line.trim_start();
            line.starts_with(&format!("{forbidden} ")) || line.starts_with(&format!("{forbidden}="))
        });
        assert!(!declared, "client core must not depend on {forbidden}");
    }
}
