use std::env;
use std::process::Command;

/// Short commit of the checkout, if building from one
fn git_revision() -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--short=8", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())?;
    let rev = String::from_utf8(out.stdout).ok()?;
    Some(rev.trim().to_owned())
}

fn main() {
    let stamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let vars = [
        ("GIT_HASH", git_revision().unwrap_or_else(|| "unknown".into())),
        ("BUILD_TIMESTAMP", stamp.to_string()),
        ("BUILD_PROFILE", env::var("PROFILE").unwrap_or_else(|_| "unknown".into())),
    ];
    for (key, value) in vars {
        println!("cargo:rustc-env={key}={value}");
    }
    println!("cargo:rerun-if-changed=../.git/HEAD");
}
