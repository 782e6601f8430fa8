mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    BrokerSettings, DestinationSettings, ListenerSettings, LoggingSettings, ProducerSettings,
    Settings,
};

/// Loads `config/default.{toml,yaml,json,...}` relative to the working
/// directory, then `ACKLINE__SECTION__KEY` environment variables, merged over
/// [`Settings::default`].
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Same as [`load_config`] with an explicit base file path (extension optional).
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix("ACKLINE")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    let partial: PartialSettings = config.try_deserialize()?;

    Ok(merge(partial, Settings::default()))
}

fn merge(partial: PartialSettings, default: Settings) -> Settings {
    let broker = partial.broker;
    let producer = partial.producer;

    Settings {
        broker: BrokerSettings {
            data_dir: broker
                .as_ref()
                .and_then(|b| b.data_dir.clone())
                .unwrap_or(default.broker.data_dir),
            in_memory: broker
                .as_ref()
                .and_then(|b| b.in_memory)
                .unwrap_or(default.broker.in_memory),
            max_redeliveries: broker
                .as_ref()
                .and_then(|b| b.max_redeliveries)
                .or(default.broker.max_redeliveries),
            dead_letter_queue: broker
                .as_ref()
                .and_then(|b| b.dead_letter_queue.clone())
                .or(default.broker.dead_letter_queue),
        },
        producer: ProducerSettings {
            delivery_mode: producer
                .as_ref()
                .and_then(|p| p.delivery_mode)
                .unwrap_or(default.producer.delivery_mode),
            default_priority: producer
                .as_ref()
                .and_then(|p| p.default_priority)
                .unwrap_or(default.producer.default_priority),
            default_ttl_ms: producer
                .as_ref()
                .and_then(|p| p.default_ttl_ms)
                .unwrap_or(default.producer.default_ttl_ms),
        },
        destinations: partial.destinations.unwrap_or(default.destinations),
        listeners: partial.listeners.unwrap_or(default.listeners),
        logging: LoggingSettings {
            level: partial
                .logging
                .and_then(|l| l.level)
                .unwrap_or(default.logging.level),
        },
    }
}
