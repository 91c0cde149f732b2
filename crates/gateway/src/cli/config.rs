//! `config validate` and `config show`.

use i3_domain::config::{Config, ConfigSeverity};

/// Print validation issues; returns false when any error was found.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{config_path}: OK");
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}

/// Dump the resolved configuration as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(raw) => println!("{raw}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}
