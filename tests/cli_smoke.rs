use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_path(prefix: &str, ext: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time is before unix epoch")
        .as_nanos();
    path.push(format!("{prefix}_{}_{}.{}", std::process::id(), nanos, ext));
    path
}

fn find_ecodiv_binary() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_ecodiv") {
        return PathBuf::from(path);
    }

    let current = std::env::current_exe().expect("failed to get current exe path");
    let deps_dir = current
        .parent()
        .expect("failed to get deps dir from current exe")
        .to_path_buf();
    let debug_dir = deps_dir
        .parent()
        .expect("failed to get debug dir from deps dir")
        .to_path_buf();

    let direct = debug_dir.join("ecodiv");
    if direct.exists() {
        return direct;
    }
    panic!("failed to find ecodiv binary in CARGO_BIN_EXE_ecodiv or target/debug");
}

const COUNTS_A: &str = "pa1 pa2
1/4 0/4
2/4 3/4
0/4 1/4
0/4 0/4
3/4 1/4
";

const COUNTS_B: &str = "pb1 pb2
0/4 2/4
1/4 1/4
4/4 2/4
2/4 0/4
";

fn write_inputs(tag: &str) -> (PathBuf, Vec<PathBuf>) {
    let a = unique_temp_path(&format!("ecodiv_cli_{tag}_a"), "txt");
    let b = unique_temp_path(&format!("ecodiv_cli_{tag}_b"), "txt");
    fs::write(&a, COUNTS_A).expect("failed to write counts a");
    fs::write(&b, COUNTS_B).expect("failed to write counts b");
    let file_name = |p: &PathBuf| {
        p.file_name()
            .and_then(|s| s.to_str())
            .expect("temp file name")
            .to_string()
    };
    let settings = format!(
        "event_model_prior:
  dirichlet_process:
    concentration: {{value: 1.0, estimate: false}}
event_time_prior:
  exponential_distribution: {{rate: 10.0}}
mcmc_settings:
  chain_length: 60
  sample_frequency: 10
  debug_check_frequency: 5
comparisons:
  - path: {}
  - path: {}
",
        file_name(&a),
        file_name(&b)
    );
    let config = unique_temp_path(&format!("ecodiv_cli_{tag}_config"), "yaml");
    fs::write(&config, settings).expect("failed to write settings");
    (config.clone(), vec![config, a, b])
}

#[test]
fn cli_runs_and_writes_logs_and_summary() {
    let (config, inputs) = write_inputs("run");
    let prefix = unique_temp_path("ecodiv_cli_out", "").display().to_string();

    let status = Command::new(find_ecodiv_binary())
        .arg(&config)
        .arg("--seed")
        .arg("42")
        .arg("--threads")
        .arg("1")
        .arg("--prefix")
        .arg(&prefix)
        .arg("--no-progress")
        .status()
        .expect("failed to run ecodiv binary");
    assert!(status.success(), "ecodiv exited with non-zero status");

    let state_log = PathBuf::from(format!("{prefix}state-run-1.log"));
    let operator_log = PathBuf::from(format!("{prefix}operator-run-1.log"));
    let summary = PathBuf::from(format!("{prefix}summary-run-1.json"));

    let text = fs::read_to_string(&state_log).expect("failed to read state log");
    assert!(
        text.starts_with("generation\tln_likelihood\tln_prior\tnumber_of_events\tconcentration")
    );
    assert_eq!(text.lines().count(), 8);
    assert!(operator_log.exists(), "expected operator log");

    let out = fs::read_to_string(&summary).expect("failed to read run summary");
    let v: Value = serde_json::from_str(&out).expect("summary json is invalid");
    assert_eq!(v.get("seed").and_then(Value::as_u64), Some(42));
    assert_eq!(v.get("number_of_samples").and_then(Value::as_u64), Some(7));
    assert!(v.get("final_ln_likelihood").is_some());
    assert!(v.get("operators").and_then(Value::as_array).is_some_and(|a| !a.is_empty()));

    // Same prefix again: the existing logs must not be overwritten.
    let status = Command::new(find_ecodiv_binary())
        .arg(&config)
        .arg("--seed")
        .arg("43")
        .arg("--prefix")
        .arg(&prefix)
        .arg("--no-progress")
        .status()
        .expect("failed to run ecodiv binary");
    assert!(!status.success(), "rerun should refuse to clobber logs");

    for p in inputs.into_iter().chain([state_log, operator_log, summary]) {
        let _ = fs::remove_file(p);
    }
}

#[test]
fn cli_rejects_constant_sites_unless_relaxed() {
    let (config, inputs) = write_inputs("constant");
    let text = fs::read_to_string(&config).expect("read settings");
    let text = text.replace(".txt\n", ".txt\n    constant_sites_removed: true\n");
    fs::write(&config, text).expect("rewrite settings");
    let prefix = unique_temp_path("ecodiv_cli_constant_out", "").display().to_string();

    let status = Command::new(find_ecodiv_binary())
        .arg(&config)
        .arg("--seed")
        .arg("1")
        .arg("--prefix")
        .arg(&prefix)
        .arg("--no-progress")
        .status()
        .expect("failed to run ecodiv binary");
    assert!(!status.success(), "constant sites should be rejected");

    let status = Command::new(find_ecodiv_binary())
        .arg(&config)
        .arg("--seed")
        .arg("1")
        .arg("--prefix")
        .arg(&prefix)
        .arg("--relax-constant-sites")
        .arg("--no-progress")
        .status()
        .expect("failed to run ecodiv binary");
    assert!(status.success(), "relaxed run should succeed");

    for p in inputs {
        let _ = fs::remove_file(p);
    }
    for name in ["state-run-1.log", "operator-run-1.log", "summary-run-1.json"] {
        let _ = fs::remove_file(format!("{prefix}{name}"));
    }
}
