//! Build script for the chat relay
//!
//! Embeds the git revision, build time, target and profile so
//! `chat-relay version --detailed` can report them.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = git(&["rev-parse", "--short=8", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let git_dirty = match git(&["status", "--porcelain"]) {
        Some(status) if !status.is_empty() => "true",
        Some(_) => "false",
        None => "unknown",
    };

    let build_timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let rustc_version = command_output("rustc", &["--version"]).unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=CHAT_RELAY_GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=CHAT_RELAY_GIT_DIRTY={}", git_dirty);
    println!("cargo:rustc-env=CHAT_RELAY_BUILD_TIMESTAMP={}", build_timestamp);
    println!("cargo:rustc-env=CHAT_RELAY_TARGET={}", target);
    println!("cargo:rustc-env=CHAT_RELAY_PROFILE={}", profile);
    println!("cargo:rustc-env=CHAT_RELAY_RUSTC_VERSION={}", rustc_version);
}

fn git(args: &[&str]) -> Option<String> {
    command_output("git", args)
}

/// Trimmed stdout of a successful command
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
}
