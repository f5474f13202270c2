use anyhow::{anyhow, Context};
use tracing::{level_filters::LevelFilter, subscriber::set_global_default, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

/// Install the global console subscriber.
///
/// `RUST_LOG` directives win over `level`.
pub fn init(level: &str) -> anyhow::Result<()> {
    let level: Level = level
        .parse()
        .with_context(|| format!("Invalid log level '{level}'"))?;
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let console_layer = {
        #[cfg(debug_assertions)]
        let layer = fmt::layer()
            .with_writer(std::io::stdout)
            .with_file(true)
            .with_line_number(true);

        #[cfg(not(debug_assertions))]
        let layer = fmt::layer().with_writer(std::io::stdout).with_target(false);

        layer.with_filter(filter)
    };

    let subscriber = Registry::default().with(console_layer);
    set_global_default(subscriber).map_err(|_| anyhow!("Failed to set logger"))
}
