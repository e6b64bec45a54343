//! Terminal logger setup, grounded on `flux::logging::init`.

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
