//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Code that runs on the tokio runtime MUST NOT use blocking I/O.
//! **Required**: Use `tokio::fs`, `tokio::net`, `tokio::io`, or move the work
//! to `tokio::task::spawn_blocking`.
//!
//! Synchronous functions (config loading before the runtime starts, `Drop`
//! impls) may use `std::fs`.

use architectural_enforcement::{is_in_async_context, production_sources, SourceFile};

/// Patterns that block the calling thread
const BLOCKING: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::TcpStream", "Blocking network I/O"),
    ("std::net::TcpListener", "Blocking network I/O"),
    ("std::os::unix::net::", "Blocking Unix socket I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::io::stdin()", "Blocking stdin"),
    ("std::io::stdout()", "Blocking stdout"),
];

fn check_file(file: &SourceFile, violations: &mut Vec<String>) {
    for (idx, code) in file.production_lines() {
        for (pattern, what) in BLOCKING {
            if code.contains(pattern) && is_in_async_context(&file.lines, idx) {
                violations.push(file.violation(idx, what));
            }
        }
    }
}

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let sources = production_sources();
    assert!(!sources.is_empty(), "no production sources found");

    let mut violations = Vec::new();
    for file in &sources {
        check_file(file, &mut violations);
    }

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in async code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::*, tokio::net::*, tokio::io::stdout()");
        eprintln!("  - tokio::task::spawn_blocking for unavoidable sync work");

        panic!(
            "\nFound {} blocking I/O violation(s) in async code.\nFix these before merging!",
            violations.len()
        );
    }
}

#[test]
fn test_detector_flags_async_fs() {
    let file = SourceFile::from_text(
        "bad.rs",
        "async fn load() {\n    let text = std::fs::read_to_string(\"x\");\n}",
    );
    let mut violations = Vec::new();
    check_file(&file, &mut violations);
    assert_eq!(violations.len(), 1);
    assert!(violations[0].starts_with("bad.rs:2 - Blocking file I/O"));
}

#[test]
fn test_detector_allows_sync_fs() {
    let file = SourceFile::from_text(
        "ok.rs",
        "fn load() {\n    let text = std::fs::read_to_string(\"x\");\n}",
    );
    let mut violations = Vec::new();
    check_file(&file, &mut violations);
    assert!(violations.is_empty());
}

#[test]
fn test_detector_ignores_test_module() {
    let file = SourceFile::from_text(
        "tests.rs",
        "#[cfg(test)]\nmod tests {\n    async fn helper() {\n        std::fs::write(\"x\", b\"\");\n    }\n}",
    );
    let mut violations = Vec::new();
    check_file(&file, &mut violations);
    assert!(violations.is_empty());
}
