use std::{
    process::Command,
    time::{SystemTime, UNIX_EPOCH},
};

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
    println!("cargo:rerun-if-env-changed=PKGLINK_RUN_CROSS_WINDOWS_TESTS");

    println!("cargo::rustc-check-cfg=cfg(pkglink_skip_cross_windows_tests)");

    // Symlink tests on a Windows target only make sense on a Windows host.
    let host = std::env::var("HOST").unwrap_or_default();
    let target = std::env::var("TARGET").unwrap_or_default();
    let enable_cross_windows_tests = std::env::var("PKGLINK_RUN_CROSS_WINDOWS_TESTS").is_ok();

    if !enable_cross_windows_tests && target.contains("windows") && !host.contains("windows") {
        println!("cargo:rustc-cfg=pkglink_skip_cross_windows_tests");
    }

    let version = match git_describe() {
        Some(described) => {
            let described = described.strip_prefix('v').unwrap_or(&described).to_string();
            if described.ends_with("-dirty") {
                format!("{}-{}", described, timestamp())
            } else {
                described
            }
        }
        None => format!("{}+{}", env!("CARGO_PKG_VERSION"), timestamp()),
    };

    println!("cargo:rustc-env=PKGLINK_VERSION={}", version);
}

fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let described = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!described.is_empty()).then_some(described)
}

fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
