//! Layered configuration for the engine.
//!
//! Sources, later ones winning: built-in defaults, `config/default.toml`
//! (optional), then `POPMQ__SECTION__KEY` environment variables. A `.env` file
//! in the working directory is loaded into the environment first.

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{BrokerSettings, LoggingSettings, ProducerSettings, Settings};

/// Loads the configuration from the default file and environment variables
/// and merges it with default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("POPMQ")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    let settings = partial.merge(Settings::default());

    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.producer.priority > 9 {
        return Err(ConfigError::Message(format!(
            "producer.priority must be between 0 and 9, got {}",
            settings.producer.priority
        )));
    }
    if settings.producer.time_to_live_ms < 0 {
        return Err(ConfigError::Message(
            "producer.time_to_live_ms must not be negative".to_string(),
        ));
    }
    if settings.producer.delivery_delay_ms < 0 {
        return Err(ConfigError::Message(
            "producer.delivery_delay_ms must not be negative".to_string(),
        ));
    }
    Ok(())
}
