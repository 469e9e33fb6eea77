//! Logging setup shared by the blather binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber with the specified default log level.
///
/// Events from the shared library and from the given binary are enabled at
/// `default_log_level`; `RUST_LOG` overrides the whole filter. Output goes to
/// stderr so it never interleaves with a client's chat display on stdout.
///
/// # Arguments
///
/// * `binary_name` - The name of the binary (e.g., "blather-server")
/// * `default_log_level` - The default log level (e.g., "debug", "info", "warn")
///
/// # Examples
///
/// ```no_run
/// use blather_shared::logger::setup_logger;
///
/// setup_logger("blather-server", "info");
/// ```
pub fn setup_logger(binary_name: &str, default_log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(binary_name, default_log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn default_filter(binary_name: &str, default_log_level: &str) -> String {
    format!(
        "{}={},{}={}",
        env!("CARGO_PKG_NAME").replace('-', "_"),
        default_log_level,
        binary_name.replace('-', "_"),
        default_log_level
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_covers_library_and_binary() {
        // テスト項目: デフォルトのフィルタが共有ライブラリとバイナリの両方を含む
        // given (前提条件):
        let binary = "blather-server";

        // when (操作):
        let filter = default_filter(binary, "debug");

        // then (期待する結果):
        assert_eq!(filter, "blather_shared=debug,blather_server=debug");
    }
}
