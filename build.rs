use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let version = git_version().unwrap_or_else(|| {
        format!("{}+{}", env!("CARGO_PKG_VERSION"), build_timestamp())
    });
    println!("cargo:rustc-env=BOARDPM_VERSION={}", version);
}

/// `git describe` of the checkout, without a leading `v`. Dirty trees get a
/// timestamp suffix so every local build is distinguishable.
fn git_version() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|o| o.status.success())?;
    let described = String::from_utf8(output.stdout).ok()?;
    let described = described.trim();
    let version = described.strip_prefix('v').unwrap_or(described);
    match version {
        "" => None,
        v if v.ends_with("-dirty") => Some(format!("{}-{}", v, build_timestamp())),
        v => Some(v.to_string()),
    }
}

fn build_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
