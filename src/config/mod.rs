/// Configuration system
///
/// - `macros`: the `config_struct!` macro
/// - `schemas`: every configuration section with its defaults
/// - `utils`: loading, saving and validation helpers
pub mod macros;
pub mod schemas;
pub mod utils;

pub use schemas::{ApiConfig, Config, PollerConfig, TopicConfig, TransportConfig};
pub use utils::{load_config_from_path, save_config, CONFIG_FILE_PATH};
