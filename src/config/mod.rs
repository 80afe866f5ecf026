mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    HubSettings, KafkaSettings, OutboxSettings, RetryPolicy, RetrySettings, ServerSettings,
    Settings,
};

/// Prefix of the environment variables read by [`load_config`], e.g.
/// `NOTIFY__KAFKA__BROKERS=a:9092,b:9092`.
pub const ENV_PREFIX: &str = "NOTIFY";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct containing every section, or an error when a
/// hub interval is zero
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("kafka.brokers")
                .with_list_parse_key("kafka.topics")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let settings = partial.merge(Settings::default());
    settings.hub.validate()?;
    Ok(settings)
}
