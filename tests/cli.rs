use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn wcr_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("wcr");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let data_dir = root.join("wcdataset");
    fs::create_dir_all(&data_dir).unwrap();
    fs::write(
        data_dir.join("world_cup.csv"),
        "Year,Host,Teams,Champion,Runner-Up,TopScorrer\n\
         2022,Qatar,32,Argentina,France,Kylian Mbappé - 8\n\
         2010,South Africa,32,Spain,Netherlands,Thomas Müller - 5\n\
         1998,France,32,France,Brazil,Davor Šuker - 6\n",
    )
    .unwrap();
    fs::write(
        data_dir.join("matches_1930_2022.csv"),
        "home_team,away_team,home_score,away_score,Round,Venue,Year\n\
         Netherlands,Spain,0,1,Final,Soccer City,2010\n",
    )
    .unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[data]
dir = "{root}/wcdataset"

[index]
dir = "{root}/wc_index"
batch_size = 16

[retrieval]
k = 4
fetch_k = 16

[embedding]
candidates = [{{ provider = "hash", dims = 128 }}]

[[llm.candidates]]
provider = "ollama"
model = "tinyllama"
url = "http://127.0.0.1:9"
"#,
        root = root.display()
    );
    let config_path = config_dir.join("wcr.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_wcr(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = wcr_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run wcr binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_build_creates_index() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_wcr(&config_path, &["build"]);
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Index built"));
    assert!(stdout.contains("hash/hash (128 dims)"));
    assert!(tmp.path().join("wc_index").join("index.sqlite").exists());
}

#[test]
fn test_build_skips_existing_index() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success) = run_wcr(&config_path, &["build"]);
    assert!(success);

    let (stdout, _, success) = run_wcr(&config_path, &["build"]);
    assert!(success);
    assert!(stdout.contains("already exists"));

    let (stdout, _, success) = run_wcr(&config_path, &["build", "--force"]);
    assert!(success);
    assert!(stdout.contains("Index built"));
}

#[test]
fn test_facts_filters_by_year() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_wcr(&config_path, &["facts", "--year", "2010"]);
    assert!(success, "facts failed: {}", stderr);
    assert!(stdout.contains("Spain"));
    assert!(stdout.contains("≠"));
    assert!(!stdout.contains("Qatar"));
}

#[test]
fn test_search_after_build() {
    let (_tmp, config_path) = setup_test_env();
    run_wcr(&config_path, &["build"]);

    let (stdout, stderr, success) =
        run_wcr(&config_path, &["search", "Quem foi campeão em 2022?", "--k", "2"]);
    assert!(success, "search failed: {}", stderr);
    let first = stdout.lines().next().unwrap_or_default();
    assert!(first.starts_with("1. ["), "unexpected output: {}", stdout);
    assert!(first.contains("Argentina"), "unexpected top result: {}", first);
    assert!(stdout.contains("2. ["));
    assert!(!stdout.contains("3. ["));
}

#[test]
fn test_search_without_index_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_wcr(&config_path, &["search", "campeão"]);
    assert!(!success);
    assert!(stderr.contains("wcr build"));
}

#[test]
fn test_status_reports_manifest() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_wcr(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("no index"));

    run_wcr(&config_path, &["build"]);
    let (stdout, _, success) = run_wcr(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("build id:"));
    assert!(stdout.contains("small 300/50"));
    assert!(stdout.contains("ollama/tinyllama"));
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[retrieval]\nk = 5\nfetch_k = 2\n").unwrap();

    let (_, stderr, success) = run_wcr(&bad, &["status"]);
    assert!(!success);
    assert!(stderr.contains("fetch_k"));
}
