//! Font availability checks and substitution.
//!
//! Rendering needs an installed font. A requested font that is missing is
//! an advisory condition: fontconfig is asked for the closest installed
//! alternative, and only when no alternative exists does the condition
//! escalate to a fatal error.

use thiserror::Error;
use tracing::{info, warn};

use crate::config::ToolCommands;
use crate::exec::{ToolError, ToolInvoker};

/// Errors that can occur while resolving fonts.
#[derive(Debug, Error)]
pub enum FontError {
    /// The requested font is missing and fontconfig offered no substitute.
    #[error("No usable font: '{0}' is not installed and no alternative was found")]
    NoUsableFont(String),

    /// Tool invocation error.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),
}

/// Resolves requested fonts against the installed set via fontconfig.
pub struct FontResolver<'a> {
    invoker: &'a ToolInvoker,
    tools: &'a ToolCommands,
}

impl<'a> FontResolver<'a> {
    /// Creates a new resolver.
    pub fn new(invoker: &'a ToolInvoker, tools: &'a ToolCommands) -> Self {
        Self { invoker, tools }
    }

    /// Refreshes the font cache. Failures are advisory.
    pub async fn refresh_cache(&self) -> Result<(), FontError> {
        let output = self.invoker.run(&self.tools.fc_cache, &["-fv"]).await?;
        if output.is_success() {
            info!("Font cache refreshed");
        } else {
            warn!(stderr = %output.stderr.trim(), "Font cache refresh failed");
        }
        Ok(())
    }

    /// Checks whether `name` appears among the installed font families.
    pub async fn is_installed(&self, name: &str) -> Result<bool, FontError> {
        let output = self.invoker.run(&self.tools.fc_list, &[":family"]).await?;
        if !output.is_success() {
            warn!(stderr = %output.stderr.trim(), "fc-list failed");
            return Ok(false);
        }

        let needle = name.to_lowercase();
        Ok(output
            .stdout
            .lines()
            .any(|line| line.to_lowercase().contains(&needle)))
    }

    /// Asks fontconfig for the closest installed substitute for `name`.
    ///
    /// Returns `None` when matching fails.
    pub async fn find_alternative(&self, name: &str) -> Result<Option<String>, FontError> {
        let output = self.invoker.run(&self.tools.fc_match, &[name]).await?;
        if !output.is_success() {
            warn!(stderr = %output.stderr.trim(), "fc-match failed");
            return Ok(None);
        }

        // fc-match prints "<file>: "<family>" "<style>""; the first
        // colon-delimited field is enough to hand back to text2image.
        let alternative = output
            .stdout
            .split(':')
            .next()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(alternative)
    }

    /// Resolves `name` to a renderable font, substituting if necessary.
    ///
    /// # Errors
    ///
    /// Returns `FontError::NoUsableFont` when the font is missing and no
    /// alternative exists.
    pub async fn resolve(&self, name: &str) -> Result<String, FontError> {
        if self.is_installed(name).await? {
            info!(font = %name, "Font installed");
            return Ok(name.to_string());
        }

        match self.find_alternative(name).await? {
            Some(alternative) => {
                warn!(requested = %name, substitute = %alternative, "Font not installed, substituting");
                Ok(alternative)
            }
            None => Err(FontError::NoUsableFont(name.to_string())),
        }
    }

    /// Resolves every requested font, substituting where necessary.
    pub async fn resolve_all(&self, fonts: &[String]) -> Result<Vec<String>, FontError> {
        let mut resolved = Vec::with_capacity(fonts.len());
        for font in fonts {
            resolved.push(self.resolve(font).await?);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn stub_tool(dir: &Path, name: &str, script: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().to_string()
    }

    fn tools_with(dir: &Path, fc_list: &str, fc_match: &str, fc_cache: &str) -> ToolCommands {
        ToolCommands {
            fc_list: stub_tool(dir, "fc-list", fc_list),
            fc_match: stub_tool(dir, "fc-match", fc_match),
            fc_cache: stub_tool(dir, "fc-cache", fc_cache),
            ..ToolCommands::default()
        }
    }

    #[tokio::test]
    async fn test_is_installed_case_insensitive() {
        let temp = TempDir::new().unwrap();
        let tools = tools_with(
            temp.path(),
            "printf 'DejaVu Sans\\nNoto Sans CJK SC\\n'",
            "exit 1",
            "exit 0",
        );
        let invoker = ToolInvoker::new();
        let resolver = FontResolver::new(&invoker, &tools);

        assert!(resolver.is_installed("dejavu sans").await.unwrap());
        assert!(resolver.is_installed("Noto Sans").await.unwrap());
        assert!(!resolver.is_installed("Microsoft YaHei").await.unwrap());
    }

    #[tokio::test]
    async fn test_resolve_substitutes_missing_font() {
        let temp = TempDir::new().unwrap();
        let tools = tools_with(
            temp.path(),
            "printf 'DejaVu Sans\\n'",
            "printf 'NotoSansCJK-Regular.ttc: \"Noto Sans CJK SC\" \"Regular\"\\n'",
            "exit 0",
        );
        let invoker = ToolInvoker::new();
        let resolver = FontResolver::new(&invoker, &tools);

        let resolved = resolver.resolve("Microsoft YaHei").await.unwrap();
        assert_eq!(resolved, "NotoSansCJK-Regular.ttc");
    }

    #[tokio::test]
    async fn test_resolve_keeps_installed_font() {
        let temp = TempDir::new().unwrap();
        let tools = tools_with(temp.path(), "printf 'DejaVu Sans\\n'", "exit 1", "exit 0");
        let invoker = ToolInvoker::new();
        let resolver = FontResolver::new(&invoker, &tools);

        let resolved = resolver.resolve("DejaVu Sans").await.unwrap();
        assert_eq!(resolved, "DejaVu Sans");
    }

    #[tokio::test]
    async fn test_resolve_no_usable_font_is_fatal() {
        let temp = TempDir::new().unwrap();
        let tools = tools_with(temp.path(), "exit 0", "exit 1", "exit 0");
        let invoker = ToolInvoker::new();
        let resolver = FontResolver::new(&invoker, &tools);

        let err = resolver.resolve("Microsoft YaHei").await.unwrap_err();
        assert!(matches!(err, FontError::NoUsableFont(_)));
        assert!(err.to_string().contains("Microsoft YaHei"));
    }

    #[tokio::test]
    async fn test_refresh_cache_failure_is_advisory() {
        let temp = TempDir::new().unwrap();
        let tools = tools_with(temp.path(), "exit 0", "exit 0", "echo broken >&2; exit 1");
        let invoker = ToolInvoker::new();
        let resolver = FontResolver::new(&invoker, &tools);

        assert!(resolver.refresh_cache().await.is_ok());
    }
}
