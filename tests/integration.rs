use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

/// Path to the packtrace binary (debug build)
fn packtrace_bin() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("target");
    path.push("debug");
    path.push("packtrace");
    path
}

/// Fresh scratch directory for one test, outside /tmp so the classifier
/// does not ignore fixture paths.
fn scratch_dir(name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("target");
    path.push("it-scratch");
    path.push(name);
    let _ = fs::remove_dir_all(&path);
    fs::create_dir_all(&path).expect("failed to create scratch dir");
    path
}

/// Run packtrace with given args and return (exit_code, stdout, stderr)
fn run_packtrace(args: &[&str]) -> (i32, String, String) {
    let output = Command::new(packtrace_bin())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to execute packtrace");

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    (code, stdout, stderr)
}

/// Parse a JSONL file into a Vec of serde_json::Value
fn parse_jsonl(path: &Path) -> Vec<serde_json::Value> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

fn events_of_type<'a>(
    events: &'a [serde_json::Value],
    event_type: &str,
) -> Vec<&'a serde_json::Value> {
    events
        .iter()
        .filter(|e| e.get("event_type").and_then(|v| v.as_str()) == Some(event_type))
        .collect()
}

/// Some CI sandboxes deny ptrace entirely. Probe once and skip the
/// trace-driven tests there rather than failing on the environment.
fn ptrace_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        let pkg = scratch_dir("ptrace-probe").join("pkg");
        let (code, _stdout, stderr) = run_packtrace(&[
            "pack",
            "-d",
            pkg.to_str().unwrap(),
            "/bin/true",
        ]);
        if code != 0 {
            eprintln!("ptrace probe failed (code {code}): {stderr}");
        }
        code == 0
    })
}

/// Mirror location of an absolute path inside a package dir.
fn packaged(pkg: &Path, abs: &Path) -> PathBuf {
    pkg.join("root").join(abs.strip_prefix("/").unwrap())
}

// ========== Capture Tests ==========

#[test]
fn pack_bin_true_exits_zero() {
    if !ptrace_available() {
        eprintln!("skipping: ptrace unavailable");
        return;
    }

    let dir = scratch_dir("pack-true");
    let pkg = dir.join("pkg");
    let events_file = dir.join("events.jsonl");

    let (code, _stdout, stderr) = run_packtrace(&[
        "pack",
        "-d",
        pkg.to_str().unwrap(),
        "-o",
        events_file.to_str().unwrap(),
        "/bin/true",
    ]);
    assert_eq!(code, 0, "expected exit code 0 for /bin/true, stderr: {stderr}");

    let events = parse_jsonl(&events_file);
    assert!(!events.is_empty(), "expected JSONL events");

    let summaries = events_of_type(&events, "summary");
    assert_eq!(summaries.len(), 1, "expected exactly one summary");
    assert_eq!(summaries[0]["exit_code"], 0);
    assert_eq!(summaries[0]["mode"], "audit");
    assert_eq!(summaries[0]["incomplete"], false);
    assert!(summaries[0]["processes"].as_u64().unwrap() >= 1);

    // The executable itself is a dependency.
    assert!(
        packaged(&pkg, Path::new("/bin/true")).exists(),
        "expected /bin/true mirrored into the package"
    );
}

#[test]
fn pack_captures_opened_file_with_content_and_permissions() {
    if !ptrace_available() {
        eprintln!("skipping: ptrace unavailable");
        return;
    }

    let dir = scratch_dir("pack-capture");
    let fixture = dir.join("hosts.fixture");
    fs::write(&fixture, "127.0.0.1 localhost\n").unwrap();
    fs::set_permissions(&fixture, fs::Permissions::from_mode(0o640)).unwrap();

    let pkg = dir.join("pkg");
    let (code, stdout, stderr) = run_packtrace(&[
        "pack",
        "-d",
        pkg.to_str().unwrap(),
        "/bin/cat",
        fixture.to_str().unwrap(),
    ]);
    assert_eq!(code, 0, "stderr: {stderr}");
    // Capture is invisible to the traced program.
    assert_eq!(stdout, "127.0.0.1 localhost\n");

    let copy = packaged(&pkg, &fixture);
    assert!(copy.is_file(), "expected {} in package", copy.display());
    assert_eq!(fs::read_to_string(&copy).unwrap(), "127.0.0.1 localhost\n");
    let mode = fs::metadata(&copy).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o640, "permission bits should be preserved");
}

#[test]
fn pack_rerun_is_idempotent() {
    if !ptrace_available() {
        eprintln!("skipping: ptrace unavailable");
        return;
    }

    let dir = scratch_dir("pack-rerun");
    let fixture = dir.join("data.txt");
    fs::write(&fixture, "stable contents\n").unwrap();

    let pkg = dir.join("pkg");
    let args = [
        "pack",
        "-d",
        pkg.to_str().unwrap(),
        "/bin/cat",
        fixture.to_str().unwrap(),
    ];

    let (code, _, _) = run_packtrace(&args);
    assert_eq!(code, 0);
    let copy = packaged(&pkg, &fixture);
    let first = fs::read_to_string(&copy).unwrap();

    let (code, _, _) = run_packtrace(&args);
    assert_eq!(code, 0);
    assert_eq!(fs::read_to_string(&copy).unwrap(), first);
}

#[test]
fn pack_writes_environment_snapshot() {
    let dir = scratch_dir("pack-meta");
    let pkg = dir.join("pkg");

    // The skeleton and snapshot are written before tracing starts, so
    // this holds even where ptrace is unavailable.
    let _ = run_packtrace(&["pack", "-d", pkg.to_str().unwrap(), "/bin/true"]);

    assert!(pkg.join("meta").join("environment").is_file());
    assert!(pkg.join("meta").join("cwd").is_file());
}

// ========== Replay Tests ==========

#[test]
fn exec_redirects_reads_into_the_package() {
    if !ptrace_available() {
        eprintln!("skipping: ptrace unavailable");
        return;
    }

    let dir = scratch_dir("exec-replay");
    let fixture = dir.join("config.txt");
    fs::write(&fixture, "captured contents\n").unwrap();

    let pkg = dir.join("pkg");
    let (code, _, stderr) = run_packtrace(&[
        "pack",
        "-d",
        pkg.to_str().unwrap(),
        "/bin/cat",
        fixture.to_str().unwrap(),
    ]);
    assert_eq!(code, 0, "pack failed: {stderr}");

    // Diverge the packaged copy; replay must read the package, not the
    // original file.
    let copy = packaged(&pkg, &fixture);
    fs::write(&copy, "from the package\n").unwrap();

    let events_file = dir.join("events.jsonl");
    let (code, stdout, stderr) = run_packtrace(&[
        "exec",
        "-d",
        pkg.to_str().unwrap(),
        "-o",
        events_file.to_str().unwrap(),
        "/bin/cat",
        fixture.to_str().unwrap(),
    ]);
    assert_eq!(code, 0, "exec failed: {stderr}");
    assert_eq!(stdout, "from the package\n");

    // The redirected form carries the package-root prefix and is longer
    // than the original, so at least one rewrite must have gone through
    // the staging mechanism, and the program still behaved normally.
    let events = parse_jsonl(&events_file);
    let staged: Vec<_> = events_of_type(&events, "path")
        .into_iter()
        .filter(|e| {
            e.get("kind").and_then(|k| k.as_str()) == Some("redirected")
                && e.get("staged").and_then(|s| s.as_bool()) == Some(true)
        })
        .collect();
    assert!(!staged.is_empty(), "expected staged redirections");
}

#[test]
fn unreadable_dependency_does_not_abort_the_session() {
    if !ptrace_available() {
        eprintln!("skipping: ptrace unavailable");
        return;
    }

    let dir = scratch_dir("pack-unreadable");
    let pkg = dir.join("pkg");
    let events_file = dir.join("events.jsonl");
    let missing = dir.join("does-not-exist.txt");

    let (code, _stdout, _stderr) = run_packtrace(&[
        "pack",
        "-d",
        pkg.to_str().unwrap(),
        "-o",
        events_file.to_str().unwrap(),
        "/bin/cat",
        missing.to_str().unwrap(),
    ]);
    // cat's own failure is the session exit code; the capture itself
    // must run to completion and produce a summary.
    assert_ne!(code, 0);
    let events = parse_jsonl(&events_file);
    let summaries = events_of_type(&events, "summary");
    assert_eq!(summaries.len(), 1, "session must finish despite the miss");
    assert_eq!(summaries[0]["incomplete"], false);
}

#[test]
fn exec_without_package_is_an_error() {
    let dir = scratch_dir("exec-missing");
    let pkg = dir.join("nonexistent");

    let (code, _stdout, stderr) = run_packtrace(&[
        "exec",
        "-d",
        pkg.to_str().unwrap(),
        "/bin/true",
    ]);
    assert_ne!(code, 0, "exec against a missing package must fail");
    assert!(
        stderr.contains("No captured package"),
        "unexpected stderr: {stderr}"
    );
}

// ========== Process Tree Tests ==========

#[test]
fn pack_follows_forked_children() {
    if !ptrace_available() {
        eprintln!("skipping: ptrace unavailable");
        return;
    }

    let dir = scratch_dir("pack-forks");
    let f1 = dir.join("first.txt");
    let f2 = dir.join("second.txt");
    fs::write(&f1, "one\n").unwrap();
    fs::write(&f2, "two\n").unwrap();

    let pkg = dir.join("pkg");
    let events_file = dir.join("events.jsonl");
    let script = format!(
        "/bin/cat {}; /bin/cat {}",
        f1.to_str().unwrap(),
        f2.to_str().unwrap()
    );

    let (code, stdout, stderr) = run_packtrace(&[
        "pack",
        "-d",
        pkg.to_str().unwrap(),
        "-o",
        events_file.to_str().unwrap(),
        "/bin/sh",
        "-c",
        &script,
    ]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert_eq!(stdout, "one\ntwo\n");

    // Dependencies referenced by different children both captured.
    assert!(packaged(&pkg, &f1).is_file());
    assert!(packaged(&pkg, &f2).is_file());

    let events = parse_jsonl(&events_file);
    let summaries = events_of_type(&events, "summary");
    assert_eq!(summaries.len(), 1);
    assert!(
        summaries[0]["processes"].as_u64().unwrap() >= 2,
        "expected the shell and at least one child, got {}",
        summaries[0]["processes"]
    );
}

// ========== Event Stream Tests ==========

#[test]
fn jsonl_events_are_valid_and_typed() {
    if !ptrace_available() {
        eprintln!("skipping: ptrace unavailable");
        return;
    }

    let dir = scratch_dir("jsonl-valid");
    let pkg = dir.join("pkg");
    let events_file = dir.join("events.jsonl");

    let (code, _, _) = run_packtrace(&[
        "pack",
        "-d",
        pkg.to_str().unwrap(),
        "-o",
        events_file.to_str().unwrap(),
        "/bin/true",
    ]);
    assert_eq!(code, 0);

    let raw = fs::read_to_string(&events_file).unwrap();
    for (i, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: Result<serde_json::Value, _> = serde_json::from_str(line);
        assert!(parsed.is_ok(), "line {} is not valid JSON: {}", i + 1, line);
        let value = parsed.unwrap();
        assert!(
            value.get("event_type").is_some(),
            "event missing event_type: {line}"
        );
    }

    let events = parse_jsonl(&events_file);
    // Every run attaches the root and emits mirrored paths for the
    // executable and its loader dependencies.
    assert!(!events_of_type(&events, "process").is_empty());
    assert!(!events_of_type(&events, "path").is_empty());
}

#[test]
fn mirrored_events_name_real_package_paths() {
    if !ptrace_available() {
        eprintln!("skipping: ptrace unavailable");
        return;
    }

    let dir = scratch_dir("events-paths");
    let pkg = dir.join("pkg");
    let events_file = dir.join("events.jsonl");

    let (code, _, _) = run_packtrace(&[
        "pack",
        "-d",
        pkg.to_str().unwrap(),
        "-o",
        events_file.to_str().unwrap(),
        "/bin/true",
    ]);
    assert_eq!(code, 0);

    let events = parse_jsonl(&events_file);
    let mirrored: Vec<_> = events_of_type(&events, "path")
        .into_iter()
        .filter(|e| e.get("kind").and_then(|k| k.as_str()) == Some("mirrored"))
        .collect();
    assert!(!mirrored.is_empty(), "expected mirrored path events");

    for event in mirrored {
        let dest = event["dest"].as_str().unwrap();
        assert!(
            Path::new(dest).exists(),
            "mirrored event names a missing destination: {dest}"
        );
    }
}
