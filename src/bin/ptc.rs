use clap::{Args, Parser, Subcommand};
use ptc_runner::{
    eval::{EvalContext, Evaluator, Exit, Limits, Step},
    llm::ScriptedModel,
    parse, parse_signature,
    tool::echo_tool,
    turn::TurnOutcome,
    Error, Journal, Map, PtcResult, RunConfig, RunInput, SubAgent, ToolRegistry, Value,
};
use std::{path::PathBuf, sync::Arc};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a single program
    Eval(EvalArgs),

    /// Run the turn loop against scripted model replies
    Script(ScriptArgs),

    /// Parse a signature and show its canonical form
    Signature {
        /// Signature text, e.g. "(id :int) -> {status :keyword}"
        text: String,
    },
}

#[derive(Args)]
struct RunFiles {
    /// JSON object exposed under data/
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Journal file, read if present and written back afterwards
    #[arg(short, long)]
    journal: Option<PathBuf>,

    /// Run configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Parser)]
struct EvalArgs {
    /// Program file
    #[arg(short, long)]
    program: PathBuf,

    #[command(flatten)]
    files: RunFiles,
}

#[derive(Parser)]
struct ScriptArgs {
    /// JSON array of model replies, replayed in order
    #[arg(short, long)]
    responses: PathBuf,

    #[arg(short, long, default_value = "Solve the task using the available tools.")]
    mission: String,

    #[command(flatten)]
    files: RunFiles,
}

impl RunFiles {
    fn load_config(&self) -> PtcResult<RunConfig> {
        match &self.config {
            Some(path) => RunConfig::from_file(path),
            None => Ok(RunConfig::default()),
        }
    }

    fn load_data(&self) -> PtcResult<Map> {
        let Some(path) = &self.data else {
            return Ok(Map::new());
        };
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        match Value::from_json(&json) {
            Value::Map(map) => Ok(map),
            other => Err(Error::internal(format!(
                "data file must hold a JSON object, found {}",
                other.type_name()
            ))),
        }
    }

    fn load_journal(&self) -> PtcResult<Journal> {
        match &self.journal {
            Some(path) if path.exists() => Ok(Journal::load(path)?),
            _ => Ok(Journal::new()),
        }
    }

    fn save_journal(&self, journal: &Journal) -> PtcResult<()> {
        if let Some(path) = &self.journal {
            journal.save(path)?;
            info!("journal written to {:?}", path);
        }
        Ok(())
    }
}

fn print_json(value: &impl serde::Serialize) -> PtcResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn eval(args: &EvalArgs) -> PtcResult<()> {
    let config = args.files.load_config()?;
    let data = args.files.load_data()?;
    let journal = args.files.load_journal()?;
    let source = std::fs::read_to_string(&args.program)?;
    let program = parse(&source)?;
    debug!("parsed {} forms", program.forms.len());

    let deadline = tokio::time::Instant::now() + config.timeout;
    let tools = Arc::new(ToolRegistry::new().with(echo_tool()));
    let mut ctx = EvalContext::new(tools, Arc::new(data), Map::new(), journal.clone())
        .with_limits(Limits::from_config(&config, Some(deadline)));
    let outcome = match Evaluator::new().eval_program(&program, &mut ctx).await {
        Ok(Step::Continue(value)) => TurnOutcome::Continued { value },
        Ok(Step::Exit(Exit::Return(value))) => TurnOutcome::Returned { value },
        Ok(Step::Exit(Exit::Fail(failure))) => TurnOutcome::Failed { failure },
        Err(error) => TurnOutcome::Errored {
            failure: error.into(),
        },
    };
    let (memory, tool_calls, prints) = ctx.finish();
    print_json(&serde_json::json!({
        "outcome": outcome,
        "memory": Value::Map(memory),
        "prints": prints,
        "tool_calls": tool_calls,
    }))?;
    args.files.save_journal(&journal)
}

async fn script(args: &ScriptArgs) -> PtcResult<bool> {
    let model = ScriptedModel::from_file(&args.responses)?;
    let agent = SubAgent::builder("script", Arc::new(model))
        .mission(&args.mission)
        .tool(echo_tool())
        .config(args.files.load_config()?)
        .build()?;
    let input = RunInput::new(args.files.load_data()?).with_journal(args.files.load_journal()?);

    match agent.run(input).await {
        Ok(success) => {
            print_json(&serde_json::json!({ "ok": success }))?;
            args.files.save_journal(&success.journal)?;
            Ok(true)
        }
        Err(failure) => {
            print_json(&serde_json::json!({ "error": failure }))?;
            args.files.save_journal(&failure.journal)?;
            Ok(false)
        }
    }
}

fn signature(text: &str) -> PtcResult<()> {
    let signature = parse_signature(text)?;
    println!("{}", signature);
    println!("example output: {}", signature.output.example());
    Ok(())
}

async fn run(cli: &Cli) -> PtcResult<bool> {
    match &cli.command {
        Commands::Eval(args) => eval(args).await.map(|_| true),
        Commands::Script(args) => script(args).await,
        Commands::Signature { text } => signature(text).map(|_| true),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(&cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
