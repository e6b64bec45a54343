//! Terminal logger setup, grounded on `flux::logging::init`: a
//! `sloggers` `LoggerConfig` parsed from an inline TOML snippet rather
//! than a full config file, since the client has nothing else worth
//! putting in one.

use slog::Logger;
use sloggers::{Config, LoggerConfig};

pub fn init(debug: bool) -> Logger {
    let level = if debug { "debug" } else { "info" };
    let toml = format!(
        r#"
type = "terminal"
level = "{}"
destination = "stdout"
"#,
        level
    );

    let config: LoggerConfig =
        serdeconv::from_toml_str(&toml).expect("built-in logger config is valid TOML");
    config.build_logger().expect("terminal logger always builds")
}
