//! `operative doctor`: Diagnose configuration and credentials.

use operative_config::AppConfig;

pub fn run() -> anyhow::Result<()> {
    println!("Operative Doctor - System Diagnostics");
    println!("=====================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  ok    Config file found: {}", config_path.display());
    } else {
        println!("  warn  No config file, using defaults - run `operative init`");
    }

    match AppConfig::load() {
        Ok(config) => {
            println!("  ok    Config valid");
            println!("        provider:     {}", config.provider);
            println!("        model:        {}", config.model());
            println!("        tool version: {}", config.tool_version());
            println!("        max tokens:   {}", config.output_tokens());
            match config.effective_thinking_budget() {
                Some(budget) => println!("        thinking:     {budget} tokens"),
                None => println!("        thinking:     off"),
            }
            println!(
                "        display:      {}x{}",
                config.display.width, config.display.height
            );

            if config.server.static_dir.is_dir() {
                println!("  ok    Static content: {}", config.server.static_dir.display());
            } else {
                println!(
                    "  warn  Static content directory missing: {} (needed by `operative serve`)",
                    config.server.static_dir.display()
                );
            }

            match config.validate_auth() {
                None => println!("  ok    Credentials configured"),
                Some(problem) => {
                    println!("  error {problem}");
                    issues += 1;
                }
            }
        }
        Err(e) => {
            println!("  error Config invalid: {e}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  All checks passed!");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
