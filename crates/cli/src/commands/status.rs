//! `lexstream status`: show the effective configuration.

use lexstream_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let configured = |present: bool| if present { "configured" } else { "missing" };

    println!("lexstream status");
    println!("================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Provider:     {}", config.default_provider);
    println!("  Model:        {}", config.default_model);
    println!("  Temperature:  {}", config.default_temperature);
    println!("  Model key:    {}", configured(config.has_api_key()));
    println!("  Search:       {} (max {} results)", config.search.provider, config.search.max_results);
    println!("  Search key:   {}", configured(config.search.api_key.is_some()));
    println!("  Max rounds:   {}", config.agent.max_rounds);
    println!("  History:      {}", config.history.backend);
    println!("  Gateway:      {}:{}", config.gateway.host, config.gateway.port);

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  Config file found");
    } else {
        println!("\n  No config file, using defaults (run `lexstream init` to create one)");
    }

    Ok(())
}
