pub mod config;

pub use config::{
    BlockwatchConfig, CloudConfig, ConfigError, EndpointOptions, ExporterConfig, Interface,
    MAX_SCRAPE_TIMEOUT, parse_duration,
};
