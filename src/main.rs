use anyhow::Context;
use feedly_bridge::app::BridgeApp;
use feedly_bridge::config::BridgeConfig;
use feedly_bridge::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise telemetry")?;

    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    let config = BridgeConfig::load().context("failed to load configuration")?;

    let app = BridgeApp::initialise(config)
        .await
        .context("failed to construct application")?;

    app.run().await.context("application runtime error")
}

fn print_help() {
    println!(
        "\
Usage: feedly-bridge

Configuration comes from config/local.* and FEEDLY__-prefixed environment
variables, e.g. FEEDLY__DATABASE__URL and FEEDLY__MQTT__BROKER_URL.
Leaving FEEDLY__MQTT__BROKER_URL unset runs the bridge in disabled mode.

Options:
  -h, --help    Print this help message
"
    );
}
