const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const PKG_NAME: &str = env!("CARGO_PKG_NAME");
const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
const BUILD_TARGET: Option<&str> = option_env!("PROVISION_BUILD_TARGET");
const BUILD_PROFILE: Option<&str> = option_env!("PROVISION_BUILD_PROFILE");
const BUILD_TIMESTAMP: Option<&str> = option_env!("PROVISION_BUILD_TIMESTAMP");
const GIT_SHA: Option<&str> = option_env!("PROVISION_GIT_SHA");
const GIT_DIRTY: Option<&str> = option_env!("PROVISION_GIT_DIRTY");

pub fn describe() -> String {
    [
        format!("{PKG_NAME} {PKG_VERSION}"),
        PKG_DESCRIPTION.to_string(),
        format!(
            "commit: {} (dirty: {})",
            GIT_SHA.unwrap_or("unknown"),
            GIT_DIRTY.unwrap_or("unknown"),
        ),
        format!(
            "built: {} [{} for {}]",
            BUILD_TIMESTAMP.unwrap_or("unknown time"),
            BUILD_PROFILE.unwrap_or("unknown profile"),
            BUILD_TARGET.unwrap_or("unknown target"),
        ),
    ]
    .join("\n")
}
