//! Build script for the hub client
//!
//! Exposes git and toolchain details to the crate as `HUB_*` compile-time
//! environment variables, read back by `version.rs`.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = run("git", &["rev-parse", "--short=8", "HEAD"]);
    let git_branch = run("git", &["rev-parse", "--abbrev-ref", "HEAD"]);
    let git_dirty = match Command::new("git").args(["status", "--porcelain"]).output() {
        Ok(output) if output.status.success() => (!output.stdout.is_empty()).to_string(),
        _ => "unknown".to_string(),
    };

    let entries = [
        ("HUB_GIT_HASH", git_hash),
        ("HUB_GIT_BRANCH", git_branch),
        ("HUB_GIT_DIRTY", git_dirty),
        (
            "HUB_BUILD_TIMESTAMP",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ),
        ("HUB_TARGET", cargo_var("TARGET")),
        ("HUB_PROFILE", cargo_var("PROFILE")),
        ("HUB_HOST", cargo_var("HOST")),
        ("HUB_RUSTC_VERSION", run("rustc", &["--version"])),
    ];

    for (key, value) in entries {
        println!("cargo:rustc-env={}={}", key, value);
    }
}

fn cargo_var(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| "unknown".to_string())
}

/// First line of a command's stdout, or "unknown"
fn run(program: &str, args: &[&str]) -> String {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
