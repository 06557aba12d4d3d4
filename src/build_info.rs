//! Build-time identity of the launcher.
//!
//! The product name and run mode are baked in at compile time through
//! `APPSTART_NAME` and `APPSTART_ENV`. They are read once into a [`BuildInfo`]
//! that `main` hands to every component that needs it.

use std::fmt;

/// Whether the launcher runs the frontend as a dev server or builds it once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Frontend dev server plus backend in watch mode.
    Development,
    /// Frontend built up front, backend started with the production flag.
    Production,
}

impl RunMode {
    /// Parses the build tag. Only `prod`/`production` select production.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(|t| t.trim().to_ascii_lowercase()) {
            Some(t) if t == "prod" || t == "production" => RunMode::Production,
            _ => RunMode::Development,
        }
    }

    /// Short tag shown by `version`.
    pub fn tag(self) -> &'static str {
        match self {
            RunMode::Development => "dev",
            RunMode::Production => "prod",
        }
    }
}

/// Immutable build configuration.
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Product name used in banners.
    pub name: String,
    /// Crate version.
    pub version: String,
    /// Compiled-in run mode.
    pub mode: RunMode,
}

impl BuildInfo {
    /// Reads the values compiled into this binary.
    pub fn current() -> Self {
        Self {
            name: option_env!("APPSTART_NAME")
                .filter(|name| !name.is_empty())
                .unwrap_or(env!("CARGO_PKG_NAME"))
                .to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            mode: RunMode::from_tag(option_env!("APPSTART_ENV")),
        }
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} version {} (env: {})",
            self.name,
            self.version,
            self.mode.tag()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_prod_tags_select_production() {
        assert_eq!(RunMode::from_tag(Some("prod")), RunMode::Production);
        assert_eq!(RunMode::from_tag(Some(" Production ")), RunMode::Production);
        assert_eq!(RunMode::from_tag(Some("dev")), RunMode::Development);
        assert_eq!(RunMode::from_tag(Some("staging")), RunMode::Development);
        assert_eq!(RunMode::from_tag(None), RunMode::Development);
    }

    #[test]
    fn version_line_includes_mode_tag() {
        let info = BuildInfo {
            name: "acme".to_string(),
            version: "1.2.3".to_string(),
            mode: RunMode::Production,
        };
        assert_eq!(info.to_string(), "acme version 1.2.3 (env: prod)");
    }
}
