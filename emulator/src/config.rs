use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use interrupter_core::config::{ConfigOverrides, ControllerConfig, Profile};

/// Reads a TOML override file.
pub fn load_overrides(path: &Path) -> Result<ConfigOverrides> {
    if !path.exists() {
        bail!("configuration file `{}` does not exist", path.display());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("could not read file `{}`", path.display()))?;

    parse_overrides(&contents).with_context(|| format!("could not parse file `{}`", path.display()))
}

pub fn parse_overrides(contents: &str) -> Result<ConfigOverrides> {
    Ok(toml::from_str(contents)?)
}

/// Profile from the command line, then the file's overrides on top.
pub fn resolve(profile: Option<&str>, path: Option<&Path>) -> Result<ControllerConfig> {
    let fallback = match profile {
        Some(tag) => Profile::from_tag(tag).with_context(|| {
            let known: Vec<_> = Profile::ALL.iter().map(|profile| profile.tag()).collect();
            format!("unknown profile `{tag}` (expected one of {})", known.join(", "))
        })?,
        None => Profile::default(),
    };

    let Some(path) = path else {
        return Ok(fallback.config());
    };

    let mut overrides = load_overrides(path)?;
    // An explicit --profile beats the file's own.
    if profile.is_some() {
        overrides.profile = Some(fallback);
    }
    Ok(overrides.resolve(fallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use interrupter_core::WaitStrategy;
    use interrupter_core::playback::PlaybackPolicy;
    use std::io::Write;

    #[test]
    fn parses_sections_and_tagged_enums() {
        let overrides = parse_overrides(
            r#"
            profile = "poly-bench"

            [limits]
            max_on_time_us = 150

            [playback]
            policy = { mode = "poly", max_notes = 2 }
            note_block_time_us = 500

            [timing]
            wait = { kind = "spin" }
            "#,
        )
        .expect("valid overrides");

        let config = overrides.resolve(Profile::Standard);
        assert_eq!(config.profile, Profile::PolyBench);
        assert_eq!(config.limits.max_on_time_us, 150);
        assert_eq!(config.policy, PlaybackPolicy::Poly { max_notes: 2 });
        assert_eq!(config.note_block_time, Duration::from_micros(500));
        assert_eq!(config.wait_strategy, WaitStrategy::Spin);
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(parse_overrides("[limits]\nmax_on_time = 10\n").is_err());
    }

    #[test]
    fn command_line_profile_wins_over_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "profile = \"poly-bench\"\n[power]\nprecharge_ms = 250")
            .expect("write config");

        let config = resolve(Some("standard"), Some(file.path())).expect("config resolves");
        assert_eq!(config.profile, Profile::Standard);
        assert_eq!(config.precharge, Duration::from_millis(250));
    }

    #[test]
    fn unknown_profile_is_an_error() {
        let error = resolve(Some("turbo"), None).expect_err("no such profile");
        assert!(error.to_string().contains("turbo"));
    }

    #[test]
    fn missing_file_is_reported() {
        let error = load_overrides(Path::new("/nonexistent/interrupter.toml"))
            .expect_err("file is missing");
        assert!(error.to_string().contains("does not exist"));
    }
}
