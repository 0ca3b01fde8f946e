//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the client core and the shell MUST NOT
//! call sleep methods. Streams are waited on, never polled; the only timer
//! is the idle timeout, which wraps a read with `tokio::time::timeout`.
//! **Exceptions**: test code

use architectural_enforcement::{production_lines, SourceLine};

const PRODUCTION_DIRS: &[&str] = &["client/core/src", "client/shell/src"];

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations: Vec<SourceLine> = PRODUCTION_DIRS
        .iter()
        .flat_map(|dir| production_lines(dir))
        .filter(|line| is_sleep_call(&line.code))
        .collect();

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nWait on I/O (channels, streams, tokio::time::timeout) instead.");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
}

#[test]
fn test_sleep_detection() {
    assert!(is_sleep_call("    tokio::time::sleep(Duration::from_millis(10)).await;"));
    assert!(is_sleep_call("    std::thread::sleep(delay);"));
    assert!(!is_sleep_call("    tokio::time::timeout(limit, events.next()).await"));
}
