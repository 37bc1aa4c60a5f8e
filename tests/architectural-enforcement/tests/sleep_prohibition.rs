//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code waits on I/O, channels and signals, never on
//! the clock.
//! **Exceptions**: async sleeps in backoff after a failed accept, and the
//! demo `delay` command whose whole purpose is to take time.

use std::path::Path;

use architectural_enforcement::{production_sources, SourceFile};

/// Files allowed to sleep on behalf of a caller's request
const DELAY_COMMANDS: &[&str] = &["switchboard/daemon/src/server.rs"];

fn is_backoff_context(lines: &[String], idx: usize) -> bool {
    let start = idx.saturating_sub(15);
    lines[start..=idx].iter().any(|line| {
        let line = line.to_lowercase();
        line.contains("backoff") || line.contains("retry")
    })
}

fn check_file(file: &SourceFile, violations: &mut Vec<String>) {
    let delay_allowed = DELAY_COMMANDS
        .iter()
        .any(|allowed| file.path == Path::new(allowed));

    for (idx, code) in file.production_lines() {
        if code.contains("thread::sleep") {
            violations.push(file.violation(idx, "Thread sleep"));
            continue;
        }
        if code.contains("::sleep(") || code.contains(".sleep(") {
            if delay_allowed || is_backoff_context(&file.lines, idx) {
                continue;
            }
            violations.push(file.violation(idx, "Sleep"));
        }
    }
}

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let sources = production_sources();
    assert!(!sources.is_empty(), "no production sources found");

    let mut violations = Vec::new();
    for file in &sources {
        check_file(file, &mut violations);
    }

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - tokio::time::sleep in accept backoff");
        eprintln!("  - Test code (#[cfg(test)] modules)");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - std::thread::sleep anywhere");
        eprintln!("  - Sleep as poor man's synchronization (use watch/mpsc/Notify)");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

#[test]
fn test_thread_sleep_always_flagged() {
    let file = SourceFile::from_text(
        "switchboard/daemon/src/server.rs",
        "fn wait() {\n    std::thread::sleep(Duration::from_millis(5));\n}",
    );
    let mut violations = Vec::new();
    check_file(&file, &mut violations);
    assert_eq!(violations.len(), 1);
}

#[test]
fn test_backoff_sleep_allowed() {
    let file = SourceFile::from_text(
        "listener.rs",
        "const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);\nasync fn run() {\n    tokio::time::sleep(ACCEPT_BACKOFF).await;\n}",
    );
    let mut violations = Vec::new();
    check_file(&file, &mut violations);
    assert!(violations.is_empty());
}

#[test]
fn test_polling_sleep_flagged() {
    let file = SourceFile::from_text(
        "poll.rs",
        "async fn poll() {\n    loop {\n        tokio::time::sleep(Duration::from_millis(10)).await;\n    }\n}",
    );
    let mut violations = Vec::new();
    check_file(&file, &mut violations);
    assert_eq!(violations.len(), 1);
}
