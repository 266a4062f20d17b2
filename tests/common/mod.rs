use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    /// First stdout line that parses as a JSON document.
    #[allow(dead_code)]
    pub fn json(&self) -> serde_json::Value {
        self.stdout
            .lines()
            .find_map(|line| serde_json::from_str(line).ok())
            .unwrap_or_else(|| panic!("no JSON on stdout; log: {}", self.log_path.display()))
    }
}

/// A scratch home directory with every guardian path pointed inside it.
#[allow(dead_code)]
pub struct Sandbox {
    pub root: tempfile::TempDir,
}

#[allow(dead_code)]
impl Sandbox {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("create sandbox");
        fs::create_dir_all(root.path().join("Projects")).expect("create watch dir");
        Self { root }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn watch_dir(&self) -> PathBuf {
        self.path().join("Projects")
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.path().join("quarantine")
    }

    pub fn log_file(&self) -> PathBuf {
        self.path().join("guardian.log")
    }

    pub fn state_file(&self) -> PathBuf {
        self.path().join("state").join("state.json")
    }

    pub fn env(&self) -> Vec<(String, String)> {
        let s = |p: PathBuf| p.display().to_string();
        vec![
            ("ENCG_USER_HOME".to_string(), s(self.path().to_path_buf())),
            ("ENCG_HOME".to_string(), s(self.path().join("home"))),
            ("ENCG_WATCH_DIR_1".to_string(), s(self.watch_dir())),
            ("ENCG_WATCH_DIR_2".to_string(), s(self.path().join("repos"))),
            ("ENCG_QUARANTINE_DIR".to_string(), s(self.quarantine_dir())),
            ("ENCG_LOG_FILE".to_string(), s(self.log_file())),
            ("ENCG_STATE_FILE".to_string(), s(self.state_file())),
            ("ENCG_SCAN_INTERVAL".to_string(), "1".to_string()),
        ]
    }

    pub fn quarantined_files(&self) -> Vec<PathBuf> {
        let Ok(rd) = fs::read_dir(self.quarantine_dir()) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = rd.filter_map(|e| e.ok().map(|e| e.path())).collect();
        files.sort();
        files
    }

    pub fn log_contents(&self) -> String {
        fs::read_to_string(self.log_file()).unwrap_or_default()
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Some(path) = option_env!("CARGO_BIN_EXE_encg") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "encg.exe" } else { "encg" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve encg binary path for integration test"),
    }
}

#[allow(dead_code)]
pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_in(case_name, args, &[], None)
}

/// Run `encg` with extra environment variables and an optional working directory.
pub fn run_cli_case_in(
    case_name: &str,
    args: &[&str],
    env: &[(String, String)],
    cwd: Option<&Path>,
) -> CmdResult {
    let root = std::env::temp_dir().join("encg-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env("RUST_BACKTRACE", "1")
        .env_remove("ENCG_OUTPUT_FORMAT")
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    let output = command.output().expect("execute encg command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
