use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");

    let pkg_version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    let sha = short_sha();
    let version = match &sha {
        Some(sha) => format!("{pkg_version} ({sha})"),
        None => pkg_version,
    };

    println!("cargo:rustc-env=DEVBOX_VERSION={version}");
    println!("cargo:rustc-env=DEVBOX_GIT_SHA={}", sha.unwrap_or_default());
}

fn short_sha() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!sha.is_empty()).then_some(sha)
}
