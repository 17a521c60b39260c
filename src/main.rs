use clap::{Parser, Subcommand};
use std::sync::Arc;

use guardrail_workflow::chat::ChatClientFactory;
use guardrail_workflow::config::Settings;
use guardrail_workflow::server::{self, AppState};
use guardrail_workflow::span::{NoopSink, TraceSink};
use guardrail_workflow::telemetry;
use guardrail_workflow::workflow::Variant;

/// Traced intake, generation and guardrail chat workflow
#[derive(Parser)]
#[command(name = "guardrail-workflow")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,

    /// Answer one question and print the reply
    Ask {
        question: String,

        /// Workflow variant: dummy, custom or llama
        #[arg(long, default_value = "dummy")]
        variant: Variant,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load()?;
    telemetry::init_logging(&settings.logging);

    let otel = telemetry::init_sink(&settings.telemetry);
    let sink: Arc<dyn TraceSink> = match &otel {
        Some(otel) => otel.clone() as Arc<dyn TraceSink>,
        None => Arc::new(NoopSink),
    };
    let client = ChatClientFactory::create(&settings.llm)?;
    let state = AppState::new(client, settings.llm.model.clone(), sink);

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve(&settings.server, state).await,
        Command::Ask { question, variant } => match state.engine(variant).run(&question).await {
            Ok(reply) => {
                println!("{reply}");
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
    };

    if let Some(otel) = otel {
        otel.shutdown();
    }
    result
}
