//! Handlers for the `config` subcommand: inspect the effective
//! configuration without touching the database or any node.

use std::path::Path;

use crate::app::Config;
use crate::cli::output;
use crate::error::Result;

/// Execute `config show`: print the configuration that would be used,
/// defaults included.
pub fn show(path: &Path) -> Result<()> {
    let config = Config::load(path)?;
    output::header(env!("CARGO_PKG_VERSION"));
    output::section("Database");
    println!();
    output::field("url", &config.database.url);

    output::section("Logging");
    println!();
    output::field("level", &config.logging.level);
    output::field("json", config.logging.json);

    output::section("Notifications");
    println!();
    output::field(
        "usage_report_url",
        config.notifications.usage_report_url.as_deref().unwrap_or("(none)"),
    );

    output::section("Startup");
    println!();
    output::field("links_cache_retries", config.startup.links_cache_retries);
    println!();
    Ok(())
}

/// Execute `config validate`: load the file and report success/failure
/// without printing its contents.
pub fn validate(path: &Path) -> Result<()> {
    match Config::load(path) {
        Ok(_) => {
            output::success(&format!("{} is valid", path.display()));
            Ok(())
        }
        Err(e) => {
            output::error(&format!("{} is invalid: {e}", path.display()));
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn validate_accepts_missing_file_as_defaults() {
        validate(Path::new("/nonexistent/fleetsync-config-test.toml")).unwrap();
    }

    #[test]
    fn validate_rejects_malformed_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "this = is = not = toml").unwrap();
        assert!(validate(&path).is_err());
    }

    #[test]
    fn show_runs_against_defaults() {
        show(Path::new("/nonexistent/fleetsync-config-test.toml")).unwrap();
    }
}
