//! `lexstream serve`: start the streaming gateway.

use lexstream_config::AppConfig;

pub async fn run(
    port_override: Option<u16>,
    host_override: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if let Some(host) = host_override {
        config.gateway.host = host;
    }

    if !config.has_api_key() {
        eprintln!("  warning: no model API key configured, every request will end early");
    }

    println!("lexstream gateway");
    println!(
        "   Stream:  http://{}:{}/chat_stream/{{message}}",
        config.gateway.host, config.gateway.port
    );
    println!("   History: {}", config.history.backend);

    lexstream_gateway::start(config).await?;

    Ok(())
}
