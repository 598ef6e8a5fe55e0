//! `operative init`: Write a default configuration file.

use anyhow::Context;
use operative_config::AppConfig;

pub fn run(force: bool) -> anyhow::Result<()> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("Operative - Setup");
    println!("=================\n");

    if config_path.exists() && !force {
        println!("  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or re-run with --force.\n");
        return Ok(());
    }

    AppConfig::default()
        .save_to(&config_path)
        .with_context(|| format!("writing {}", config_path.display()))?;
    println!("  Created config.toml at: {}", config_path.display());

    println!("\n  Next steps:");
    println!("    1. Set ANTHROPIC_API_KEY, or add api_key to the config file");
    println!("       (for Vertex or Bedrock set provider and its [vertex] / [bedrock] section)");
    println!("    2. Run `operative doctor` to check the setup");
    println!("    3. Run `operative chat` to start\n");

    Ok(())
}
