//! Runtime tool path resolution
//!
//! For each external tool (e.g. `skopeo`) we check `{TOOL}_BIN` first
//! (`SKOPEO_BIN`) and fall back to PATH-based invocation. This lets a
//! packaging layer pin exact tool paths while development setups keep
//! working with whatever is installed.

use anyhow::Result;
use std::env;

/// Tools harbor shells out to
pub mod names {
    pub const SKOPEO: &str = "skopeo";
    pub const DOCKER: &str = "docker";
    pub const KUBECTL: &str = "kubectl";
    pub const GH: &str = "gh";
}

/// Path to an external tool: `{TOOL}_BIN` if set, else the bare name
pub fn get_tool_path(tool: &str) -> String {
    let env_var = format!("{}_BIN", tool.to_uppercase());
    env::var(&env_var).unwrap_or_else(|_| tool.to_string())
}

/// Like [`get_tool_path`], but fail early if the tool cannot be found
pub fn require_tool(tool: &str) -> Result<String> {
    let path = get_tool_path(tool);
    which::which(&path).map_err(|_| {
        anyhow::anyhow!(
            "{} not found. Install it or set {}_BIN to its path",
            tool,
            tool.to_uppercase()
        )
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_tool_path_from_env() {
        env::set_var("HARBOR_TEST_TOOL_BIN", "/custom/path/to/tool");
        assert_eq!(get_tool_path("harbor_test_tool"), "/custom/path/to/tool");
        env::remove_var("HARBOR_TEST_TOOL_BIN");
    }

    #[test]
    fn test_get_tool_path_fallback() {
        env::remove_var("HARBOR_MISSING_TOOL_BIN");
        assert_eq!(get_tool_path("harbor_missing_tool"), "harbor_missing_tool");
    }

    #[test]
    fn test_require_tool() {
        assert!(require_tool("sh").is_ok());
        assert!(require_tool("harbor-definitely-not-installed").is_err());
    }
}
