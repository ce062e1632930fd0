use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

use commands::{exit_status, Context};

#[derive(Parser)]
#[command(name = "m2env", version, about = "Local Magento 2 container environments")]
struct Cli {
    /// Kill subprocesses still running after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// Compose executable used for builds and in-container commands
    #[arg(
        long,
        global = true,
        env = "M2ENV_COMPOSE_BIN",
        default_value = env_builder::DEFAULT_COMPOSE_BIN
    )]
    compose_bin: String,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a settings file for this directory
    Init(commands::init::InitArgs),
    /// Render the project files and build the application image
    Build,
    /// Run the Magento installer in the app container
    InstallMagento,
    /// Require a composer package and recompile
    InstallPlugin {
        /// Composer package name, e.g. vendor/module
        plugin: String,
    },
    /// Upgrade the schema and redeploy in production mode
    Refresh,
    /// Run a command as the application user in the app container
    Run {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

fn init_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let outcome = Context::from_env(cli.compose_bin, cli.timeout).and_then(|ctx| match cli.cmd {
        Commands::Init(args) => commands::init::run(&ctx, args),
        Commands::Build => commands::env::build(&ctx),
        Commands::InstallMagento => commands::env::install(&ctx),
        Commands::InstallPlugin { plugin } => commands::env::install_plugin(&ctx, &plugin),
        Commands::Refresh => commands::env::refresh(&ctx),
        Commands::Run { command } => commands::env::run(&ctx, &command),
    });

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            std::process::exit(exit_status(&err));
        }
    }
}
