use std::fs;
use std::path::{Path, PathBuf};

fn rs_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|s| s.to_str()) == Some("rs") {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

fn rel(path: &Path) -> String {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let rel = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string();
    rel.replace('\\', "/")
}

#[test]
fn derivation_is_pure() {
    let file = Path::new(env!("CARGO_MANIFEST_DIR")).join("src/system/derive.rs");
    let content = fs::read_to_string(&file).unwrap_or_default();
    let mut violations = Vec::new();

    for forbidden in ["std::fs", "std::io", "crate::system::platform", "tokio", "tracing::"] {
        if content.contains(forbidden) {
            violations.push(format!(
                "{} uses forbidden dependency `{}`",
                rel(&file),
                forbidden
            ));
        }
    }

    assert!(
        violations.is_empty(),
        "Derivation purity violations:\n{}",
        violations.join("\n")
    );
}

#[test]
fn only_platform_and_collector_touch_sample_sources() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut violations = Vec::new();

    for file in rs_files(&root) {
        let rel_path = rel(&file);
        if rel_path.starts_with("src/system/platform/")
            || rel_path == "src/system/collector.rs"
            || rel_path == "src/main.rs"
        {
            continue;
        }
        let content = fs::read_to_string(&file).unwrap_or_default();
        if content.contains("default_source") || content.contains("ProcfsSource") {
            violations.push(format!("{} constructs a sample source directly", rel_path));
        }
    }

    assert!(
        violations.is_empty(),
        "Sample source boundary violations:\n{}",
        violations.join("\n")
    );
}

#[test]
fn os_cfg_is_scoped_to_system_platform() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut violations = Vec::new();

    for file in rs_files(&root) {
        let content = fs::read_to_string(&file).unwrap_or_default();
        if !content.contains("target_os") && !content.contains("cfg(unix)") {
            continue;
        }

        let rel_path = rel(&file);
        if !rel_path.starts_with("src/system/platform/") {
            violations.push(format!(
                "{} contains an OS cfg but is outside allowed boundary",
                rel_path
            ));
        }
    }

    assert!(
        violations.is_empty(),
        "Unexpected OS cfg usage:\n{}",
        violations.join("\n")
    );
}

#[test]
fn source_lines_fit_in_one_hundred_columns() {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut violations = Vec::new();

    for dir in ["src", "tests", "benches"] {
        for file in rs_files(&manifest.join(dir)) {
            let content = fs::read_to_string(&file).unwrap_or_default();
            for (idx, line) in content.lines().enumerate() {
                let width = line.chars().count();
                if width > 100 {
                    violations.push(format!("{}:{} is {} columns", rel(&file), idx + 1, width));
                }
            }
        }
    }

    assert!(
        violations.is_empty(),
        "Overlong lines:\n{}",
        violations.join("\n")
    );
}

#[test]
fn ctrl_c_listener_is_created_once_outside_the_watch_loop() {
    let file = Path::new(env!("CARGO_MANIFEST_DIR")).join("src/main.rs");
    let content = fs::read_to_string(&file).unwrap_or_default();

    assert_eq!(
        content.matches("ctrl_c()").count(),
        1,
        "{} should register a single ctrl-c listener",
        rel(&file)
    );
    let watch_loop = content
        .find("async fn watch")
        .and_then(|start| content[start..].find("loop {").map(|at| start + at));
    let listener = content.find("ctrl_c()");
    assert!(
        matches!((listener, watch_loop), (Some(l), Some(w)) if l < w),
        "ctrl-c listener must be pinned before the watch loop starts"
    );
}
