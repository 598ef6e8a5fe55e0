//! `operative chat`: Interactive or single-message chat mode.

use anyhow::{Context, bail};
use operative_agent::{ChannelObserver, LoopEvent, LoopOutcome, LoopParams, SamplingLoop, Session};
use operative_config::AppConfig;
use operative_core::tool::ToolResult;
use operative_tools::BuiltinTools;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(message: Option<String>, model: Option<String>) -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;
    if let Some(model) = model {
        config.model = Some(model);
    }

    // Check credentials early for a clear error
    if let Some(problem) = config.validate_auth() {
        eprintln!();
        eprintln!("  ERROR: {problem}");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        bail!("credentials missing for provider {}", config.provider);
    }

    let provider = operative_providers::build_from_config(&config)
        .context("Failed to build provider")?;
    let tools = Arc::new(BuiltinTools::new(&config.display));
    let params = LoopParams::from_config(&config);
    let mut session = Session::new(SamplingLoop::new(provider, tools, params.clone()));

    // Ctrl-C stops the running loop; a second one before the next prompt exits.
    let interrupt = session.interrupt_handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt.is_interrupted() {
                eprintln!();
                std::process::exit(130);
            }
            eprintln!("\n  [interrupting]");
            interrupt.interrupt();
        }
    });

    if let Some(msg) = message {
        // Single message mode
        session.submit_user_input(&msg);
        let outcome = run_turn(&mut session).await;
        report(&outcome);
        if let LoopOutcome::Failed { error } = outcome {
            bail!(error);
        }
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  Operative - Interactive Mode");
    println!();
    println!("  Provider:  {}", config.provider);
    println!("  Model:     {}", params.model);
    println!("  Tools:     {}", params.tool_version);
    println!();
    println!("  Type your message and press Enter.");
    println!("  Ctrl+C stops the agent; 'exit' quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        if line == "/reset" {
            session.reset();
            println!("  [conversation cleared]\n");
            continue;
        }

        let repaired = session.submit_user_input(line);
        if repaired > 0 {
            println!("  [{repaired} interrupted tool call(s) closed]");
        }
        let outcome = run_turn(&mut session).await;
        report(&outcome);
        println!();
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

/// Run the loop once, printing events as they arrive.
async fn run_turn(session: &mut Session) -> LoopOutcome {
    let (observer, mut rx) = ChannelObserver::new();

    let run = async {
        let outcome = session.run(&observer).await;
        drop(observer);
        outcome
    };
    let print = async {
        while let Some(event) = rx.recv().await {
            render(&event);
        }
    };

    let (outcome, ()) = tokio::join!(run, print);
    outcome
}

fn report(outcome: &LoopOutcome) {
    match outcome {
        LoopOutcome::Terminated => println!(),
        LoopOutcome::Interrupted => println!("\n  [stopped]"),
        LoopOutcome::Failed { error } => {
            eprintln!("\n  [Error] {error}");
            if let Some(secs) = error.retry_after_secs() {
                eprintln!("  Rate limited; try again in {secs}s.");
            }
        }
    }
}

fn render(event: &LoopEvent) {
    match event {
        LoopEvent::Text { text } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        LoopEvent::Thinking { thinking } => {
            eprint!("{thinking}");
        }
        LoopEvent::ToolUse { name, input, .. } => {
            println!("\n  [{name}] {input}");
        }
        LoopEvent::ToolResult { result, .. } => {
            for line in describe_tool_result(result) {
                println!("    {line}");
            }
        }
        LoopEvent::ApiExchange {
            error: Some(error), ..
        } => {
            tracing::debug!(error = %error, "API exchange failed");
        }
        LoopEvent::ApiExchange { response, .. } => {
            if let Some(response) = response {
                tracing::debug!(status = response.status, "API exchange");
            }
        }
    }
}

const PREVIEW_LINES: usize = 20;

/// Terminal lines summarizing a tool result.
fn describe_tool_result(result: &ToolResult) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(system) = &result.system {
        lines.push(format!("(system) {system}"));
    }
    if let Some(output) = &result.output {
        let mut shown: Vec<String> = output.lines().take(PREVIEW_LINES).map(str::to_string).collect();
        let total = output.lines().count();
        if total > PREVIEW_LINES {
            shown.push(format!("... ({} more lines)", total - PREVIEW_LINES));
        }
        lines.extend(shown);
    }
    if let Some(error) = &result.error {
        lines.push(format!("error: {error}"));
    }
    if result.base64_image.is_some() {
        lines.push("[screenshot]".to_string());
    }
    lines
}
