use clap::{command, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use thingtalk::{
    compile_program, config, CompilerConfig, Error, FileSchemaClient, InternalResult, Program,
    SchemaRetriever,
};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// JSON snapshot of the channel schemas
    #[arg(short, long, default_value = "schemas.json")]
    schemas: PathBuf,

    /// Program AST, serialized as JSON
    #[arg(short, long)]
    program: PathBuf,

    /// Enable debug mode
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> InternalResult<CompilerConfig> {
    if cli.config.exists() {
        config::from_file(&cli.config)
    } else {
        Ok(CompilerConfig::default())
    }
}

async fn run(cli: &Cli, config: &CompilerConfig) -> InternalResult<()> {
    debug!("config: {:?}", config);

    let client = FileSchemaClient::from_file(&cli.schemas)?;
    let retriever = SchemaRetriever::new(Arc::new(client), config.schema_batch_window);

    let program: Program = config::from_file(&cli.program)?;
    info!("Compiling program {}", program.name);

    let compiled = compile_program(&program, &retriever).await?;
    println!("{}: {} rule(s)", compiled.name, compiled.rules.len());
    for rule in &compiled.rules {
        println!("  {}", rule.summary());
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .with(fmt::layer())
        .init();

    if let Err(e) = run(&cli, &config).await {
        eprintln!("Error: {}", e);
        if let Error::TypeCheck(_) | Error::Compile(_) = e {
            eprintln!("The program was rejected; nothing was compiled.");
        }
        std::process::exit(1);
    }
}
