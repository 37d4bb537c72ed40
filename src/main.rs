//! tenx - run one query through a tool-using agent
//!
//! Main entry point for the CLI application.

use std::sync::Arc;

use clap::Parser;
use tenx::core::telemetry::init_tracing;
use tenx::core::ToolCallingMode;
use tenx::{Agent, CalculatorTool, Config, RunRequest};

/// tenx - tool-using LLM agent
#[derive(Parser, Debug)]
#[command(name = "tenx")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Query to answer
    #[arg(long, short = 'p')]
    prompt: Option<String>,

    /// Session id to read and extend
    #[arg(long, short = 's')]
    session: Option<String>,

    /// Model identifier
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// Describe tools in the prompt instead of using native tool calling
    #[arg(long)]
    manual: bool,

    /// Maximum model rounds for the run
    #[arg(long)]
    max_llm_calls: Option<usize>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Build configuration
    let mut config = Config::load();

    // Apply CLI overrides
    if let Some(model) = args.model {
        config.provider.model = model;
    }

    if args.manual {
        config.agent.tool_calling = ToolCallingMode::Manual;
    }

    if let Some(max) = args.max_llm_calls {
        config.agent.max_llm_calls = max;
    }

    if args.verbose {
        config.logging.level = "debug".to_string();
    }

    init_tracing(&config.logging);

    if args.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let Some(prompt) = args.prompt else {
        anyhow::bail!("nothing to do: pass a query with --prompt");
    };

    let agent = Agent::from_config(&config)?
        .tool(Arc::new(CalculatorTool))
        .build()?;

    let mut request = RunRequest::new(prompt);
    if let Some(session) = args.session {
        request = request.session(session);
    }

    let response = agent.run(request).await?;
    println!("{}", response.text());

    let usage = response.usage();
    eprintln!(
        "[{} llm call(s), {} prompt + {} completion = {} tokens]",
        response.llm_calls, usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
    );

    Ok(())
}
