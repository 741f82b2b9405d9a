pub mod monitor_config;

pub use monitor_config::{
    load_hub_config, parse_hub_config, HubConfig, MonitorSettings, SourceEntry,
};
