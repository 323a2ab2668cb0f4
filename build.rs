use std::env;
use std::process::Command;

use chrono::Utc;

fn main() {
	println!("cargo:rerun-if-changed=build.rs");
	println!("cargo:rerun-if-env-changed=GIT_DIR");
	println!("cargo:rerun-if-changed=.git/HEAD");

	if let Ok(sha) = git(&["rev-parse", "--short", "HEAD"]) {
		println!("cargo:rustc-env=PROVISION_GIT_SHA={sha}");
	}

	let dirty_state = git(&["status", "--porcelain"])
		.map(|output| if output.trim().is_empty() { "clean" } else { "dirty" })
		.unwrap_or("unknown");
	println!("cargo:rustc-env=PROVISION_GIT_DIRTY={dirty_state}");

	let timestamp = Utc::now().to_rfc3339();
	println!("cargo:rustc-env=PROVISION_BUILD_TIMESTAMP={timestamp}");

	let build_target = env::var("TARGET").unwrap_or_else(|_| "unknown".into());
	println!("cargo:rustc-env=PROVISION_BUILD_TARGET={build_target}");

	let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".into());
	println!("cargo:rustc-env=PROVISION_BUILD_PROFILE={profile}");
}

fn git(args: &[&str]) -> Result<String, String> {
	let output = Command::new("git")
		.args(args)
		.output()
		.map_err(|err| err.to_string())?;
	if !output.status.success() {
		return Err(format!(
			"git {:?} failed with status {:?}",
			args,
			output.status.code()
		));
	}
	let text = String::from_utf8(output.stdout).map_err(|err| err.to_string())?;
	Ok(text.trim().to_string())
}
