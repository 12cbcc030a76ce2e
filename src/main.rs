use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use keg::commands;
use keg::config::Config;
use keg::ui;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keg")]
#[command(author, version, about = "Install packages from formula files into isolated kegs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Installation prefix (overrides KEG_PREFIX)
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a formula for integrity and data-entry problems
    Lint {
        /// Formula file
        formula: PathBuf,
    },

    /// Show formula metadata and releases
    Info {
        /// Formula file
        formula: PathBuf,
    },

    /// Download and verify a release without installing it
    Fetch {
        /// Formula file
        formula: PathBuf,

        /// Release version (default: latest)
        #[arg(long = "release")]
        version: Option<String>,
    },

    /// Fetch, verify, install and test a release
    Install {
        /// Formula file
        formula: PathBuf,

        /// Release version (default: latest)
        #[arg(long = "release")]
        version: Option<String>,

        /// Interpreter to use instead of searching (overrides KEG_PYTHON)
        #[arg(long)]
        python: Option<PathBuf>,

        /// Skip post-install tests
        #[arg(long)]
        skip_tests: bool,
    },

    /// Run a release's tests against its installed keg
    Test {
        /// Formula file
        formula: PathBuf,

        /// Installed version (default: newest installed)
        #[arg(long = "release")]
        version: Option<String>,
    },

    /// Remove an installed keg
    Uninstall {
        /// Formula name
        name: String,

        /// Installed version (default: newest installed)
        #[arg(long = "release")]
        version: Option<String>,
    },

    /// List installed kegs
    List,

    /// Show post-install instructions
    Caveats {
        /// Formula file
        formula: PathBuf,
    },

    /// Print resource stanzas (url + sha256) for archive URLs
    Hash {
        /// Archive URLs or local paths
        #[arg(required = true)]
        urls: Vec<String>,

        /// Resource name (default: derived from the file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Print resource stanzas for PyPI requirements (name==version)
    Pypi {
        #[arg(required = true)]
        requirements: Vec<String>,
    },

    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
    ui::init_colors();

    let config = Config::from_env().with_prefix(cli.prefix);

    let result = match cli.command {
        Commands::Lint { formula } => match commands::lint(&formula) {
            Ok(true) => Ok(()),
            Ok(false) => std::process::exit(1),
            Err(e) => Err(e),
        },
        Commands::Info { formula } => commands::info(&formula),
        Commands::Fetch { formula, version } => {
            commands::fetch(&config, &formula, version.as_deref()).await
        }
        Commands::Install {
            formula,
            version,
            python,
            skip_tests,
        } => {
            let config = config.with_python(python);
            commands::install(&config, &formula, version.as_deref(), skip_tests).await
        }
        Commands::Test { formula, version } => {
            commands::test(&config, &formula, version.as_deref())
        }
        Commands::Uninstall { name, version } => {
            commands::uninstall(&config, &name, version.as_deref())
        }
        Commands::List => commands::list(&config),
        Commands::Caveats { formula } => commands::caveats(&formula),
        Commands::Hash { urls, name } => commands::hash(&config, &urls, name.as_deref()).await,
        Commands::Pypi { requirements } => commands::pypi(&config, &requirements).await,
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "keg", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        ui::failure(&format!("{} failed: {}", e.stage(), e));
        std::process::exit(1);
    }
}
