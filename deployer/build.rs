//! Stamps the deployer binary with the commit and build time reported by
//! `--version` and `GET /version`.
//!
//! Image builds usually run without a `.git` directory, so `DEPLOYER_GIT_HASH`
//! can supply the commit instead.

use std::env;
use std::process::Command;

use chrono::{SecondsFormat, Utc};

fn git_hash() -> Option<String> {
    if let Ok(hash) = env::var("DEPLOYER_GIT_HASH") {
        return Some(hash).filter(|hash| !hash.is_empty());
    }

    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())?;
    String::from_utf8(output.stdout)
        .ok()
        .map(|hash| hash.trim().to_string())
}

fn main() {
    let hash = git_hash().unwrap_or_else(|| "unknown".to_string());
    let built = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    println!("cargo:rustc-env=GIT_HASH={hash}");
    println!("cargo:rustc-env=BUILD_TIME={built}");

    println!("cargo:rerun-if-env-changed=DEPLOYER_GIT_HASH");
    println!("cargo:rerun-if-changed=../.git/HEAD");
}
