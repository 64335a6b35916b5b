//! `lexstream doctor`: diagnose configuration and connectivity.

use lexstream_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("lexstream doctor");
    println!("================\n");

    let mut issues = 0;

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  [ok]   Config valid");
            config
        }
        Err(e) => {
            println!("  [fail] Config invalid: {e}");
            println!("\n  1 issue found. Fix the config file and run again.");
            return Ok(());
        }
    };

    if config.search.api_key.is_some() {
        println!("  [ok]   Search API key configured");
    } else {
        println!("  [warn] No search API key, set TAVILY_API_KEY");
        issues += 1;
    }

    match lexstream_history::open_from_config(&config.history).await {
        Ok(store) => println!("  [ok]   History backend '{}' opened", store.name()),
        Err(e) => {
            println!("  [fail] History backend '{}': {e}", config.history.backend);
            issues += 1;
        }
    }

    if config.has_api_key() {
        println!("  [ok]   Model API key configured");
        let providers = lexstream_providers::build_from_config(&config);
        match providers.primary() {
            Ok(provider) => match provider.health_check().await {
                Ok(true) => println!("  [ok]   Provider '{}' reachable", provider.name()),
                Ok(false) => {
                    println!("  [fail] Provider '{}' rejected the health check", provider.name());
                    issues += 1;
                }
                Err(e) => {
                    println!("  [fail] Provider '{}': {e}", provider.name());
                    issues += 1;
                }
            },
            Err(e) => {
                println!("  [fail] {e}");
                issues += 1;
            }
        }
    } else {
        println!("  [warn] No model API key, set LEXSTREAM_API_KEY or OPENAI_API_KEY");
        issues += 1;
    }

    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
