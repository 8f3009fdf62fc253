use std::fmt;

/// Build metadata baked in by `build.rs`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildInfo {
    pub version: &'static str,
    pub build_profile: &'static str,
    pub build_features: &'static str,
    pub build_timestamp: &'static str,
    pub rust_version: &'static str,
    pub build_target: Option<&'static str>,
    pub build_host: Option<&'static str>,
}

pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("REPO_VERSION"),
        build_profile: env!("BUILD_PROFILE"),
        build_features: env!("BUILD_FEATURES"),
        build_timestamp: env!("BUILD_TIMESTAMP"),
        rust_version: env!("RUST_VERSION"),
        build_target: option_env!("BUILD_TARGET"),
        build_host: option_env!("BUILD_HOST"),
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "xm {}", self.version)?;
        writeln!(f, "profile:  {}", self.build_profile)?;
        writeln!(f, "features: {}", self.build_features)?;
        writeln!(f, "built:    {}", self.build_timestamp)?;
        write!(f, "rustc:    {}", self.rust_version)?;
        if let Some(target) = self.build_target {
            write!(f, "\ntarget:   {}", target)?;
        }
        if let Some(host) = self.build_host {
            write!(f, "\nhost:     {}", host)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display_lists_every_field() {
        let info = BuildInfo {
            version: "v0.1.0-3-gabc",
            build_profile: "debug",
            build_features: "none",
            build_timestamp: "2024-01-01T00:00:00+00:00",
            rust_version: "rustc 1.80.0",
            build_target: Some("x86_64-unknown-linux-gnu"),
            build_host: None,
        };
        let rendered = info.to_string();
        assert!(rendered.starts_with("xm v0.1.0-3-gabc\n"));
        assert!(rendered.contains("profile:  debug"));
        assert!(rendered.contains("target:   x86_64-unknown-linux-gnu"));
        assert!(!rendered.contains("host:"));
    }

    #[test]
    fn test_build_info_is_populated() {
        let info = build_info();
        assert!(!info.version.is_empty());
        assert!(!info.build_profile.is_empty());
    }
}
