//! Helper functions for test setup and common operations

use std::path::Path;
use std::process::Command;

/// Run git in `dir` with a fixed identity and locale, returning trimmed stdout
///
/// # Errors
///
/// Returns an error if git cannot be spawned or exits non-zero
pub fn git(dir: &Path, args: &[&str]) -> Result<String, Box<dyn std::error::Error>> {
    let output = git_command(dir).args(args).output()?;
    if !output.status.success() {
        return Err(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// True if `git rev-parse --verify` finds `spec` in `dir`
pub fn ref_exists(dir: &Path, spec: &str) -> bool {
    git_command(dir)
        .args(["rev-parse", "--verify", "--quiet", spec])
        .output()
        .is_ok_and(|output| output.status.success())
}

/// A git command isolated from the user's global configuration
pub fn git_command(dir: &Path) -> Command {
    let mut command = Command::new("git");
    command
        .current_dir(dir)
        .env("LC_ALL", "C")
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .env("GIT_AUTHOR_NAME", "Fixture")
        .env("GIT_AUTHOR_EMAIL", "fixture@example.com")
        .env("GIT_COMMITTER_NAME", "Fixture")
        .env("GIT_COMMITTER_EMAIL", "fixture@example.com");
    command
}
