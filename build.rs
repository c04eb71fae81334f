use std::process::Command;

fn git(args: &[&str]) -> Option<std::process::Output> {
    Command::new("git").args(args).output().ok()
}

fn main() {
    let revision = git(&["rev-parse", "--short", "HEAD"])
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string());

    let build_revision = match revision {
        Some(rev) => {
            let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
                .map(|o| !o.stdout.is_empty())
                .unwrap_or(false);
            if dirty { format!("{}+dirty", rev) } else { rev }
        }
        None => "unknown".to_string(),
    };

    println!("cargo:rustc-env=BUILD_REVISION={}", build_revision);
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
}
