//! log4rs initialisation
use anyhow::{Context, Result};
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::Path;

const PATTERN: &str = "{d(%Y-%m-%dT%H:%M:%S%.3f)} {l:5} {T} {t} - {m}{n}";

/// Initialise logging from a log4rs yaml file, or with a console appender
/// at `info` when no file is given. Fails if a logger is already installed.
pub fn init(config_file: Option<&Path>) -> Result<()> {
    match config_file {
        Some(path) => log4rs::init_file(path, Default::default())
            .with_context(|| format!("loading log config {}", path.display())),
        None => {
            let config = console_config(LevelFilter::Info)?;
            log4rs::init_config(config).context("installing console logger")?;
            Ok(())
        }
    }
}

/// the programmatic console configuration
pub fn console_config(level: LevelFilter) -> Result<Config> {
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_config_builds() {
        let config = console_config(LevelFilter::Debug).expect("should build");
        assert_eq!(config.root().level(), LevelFilter::Debug);
        assert_eq!(config.appenders().len(), 1);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(init(Some(Path::new("./no-such-log4rs.yaml"))).is_err());
    }
}
