use anyhow::Result;
use clap::Parser;
use pkglink::application::{DEFAULT_DIRECTORY, LinkRequest};
use pkglink::commands::{self, Config};
use pkglink::error::exit_code_for;
use pkglink::runtime::RealRuntime;
use std::path::PathBuf;

/// pkglink - link a directory from a Python package into the working directory
///
/// Installs the package with uv into a shared cache (or uses a local checkout),
/// finds the requested directory inside it and creates a dot-prefixed symlink.
///
/// Examples:
///   pkglink link toolbelt                 # .toolbelt -> <cache>/.../toolbelt/resources
///   pkglink link github:org/repo@v2 docs  # .repo -> .../docs
///   pkglink link toolbelt --from tbelt    # install tbelt, link its toolbelt module
///   pkglink x toolbelt                    # .pkglink/toolbelt, runnable with uvx --from
#[derive(Parser, Debug)]
#[command(author, version = env!("PKGLINK_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Cache directory for installed packages (also via PKGLINK_CACHE_DIR)
    #[arg(long = "cache-dir", env = "PKGLINK_CACHE_DIR", value_name = "PATH", global = true)]
    cache_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Link a package directory into the working directory
    #[command(visible_alias = "ln")]
    Link(LinkArgs),

    /// Link under .pkglink/ and prepare the package for `uvx --from .pkglink/<project>`
    #[command(visible_alias = "x")]
    Tool(ToolArgs),

    /// Show what `link` would do without changing the working directory
    #[command(visible_alias = "preview")]
    Plan(PlanArgs),

    /// Apply every link in a pkglink.config.yaml
    #[command(visible_alias = "batch")]
    Sync(SyncArgs),

    /// List managed (dot-prefixed) symlinks in a directory
    List(ListArgs),

    /// Inspect the package cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(clap::Args, Debug)]
struct LinkArgs {
    /// PyPI name (pkg, pkg==1.2, pkg@1.2), github:owner/repo[@ref], or local path
    #[arg(value_name = "SOURCE")]
    source: String,

    /// Directory to link from inside the package
    #[arg(value_name = "DIRECTORY", default_value = DEFAULT_DIRECTORY)]
    directory: String,

    /// Name of the symlink to create (default: .<package>)
    #[arg(long, value_name = "NAME")]
    symlink_name: Option<String>,

    /// Install this package instead; SOURCE then names the module to look in
    #[arg(long, value_name = "PACKAGE")]
    from: Option<String>,

    /// Replace an existing file, directory or symlink at the target
    #[arg(long)]
    force: bool,

    /// Describe the change without touching the working directory
    #[arg(long)]
    dry_run: bool,

    /// Reinstall even if the package is cached
    #[arg(long)]
    refresh: bool,

    /// Skip the symlinks requested by the package's pkglink.yaml
    #[arg(long)]
    no_setup: bool,

    /// Link under .pkglink/ and build a uvx project next to it
    #[arg(long)]
    inside_pkglink: bool,

    /// uvx project directory name under .pkglink/ (default: the package name)
    #[arg(long, value_name = "NAME")]
    project_name: Option<String>,
}

impl LinkArgs {
    fn into_request(self) -> LinkRequest {
        LinkRequest {
            source: self.source,
            directory: self.directory,
            symlink_name: self.symlink_name,
            from: self.from,
            force: self.force,
            dry_run: self.dry_run,
            refresh: self.refresh,
            project_name: self.project_name,
            inside_pkglink: self.inside_pkglink,
            no_setup: self.no_setup,
        }
    }
}

#[derive(clap::Args, Debug)]
struct ToolArgs {
    /// PyPI name (pkg, pkg==1.2, pkg@1.2) or github:owner/repo[@ref]
    #[arg(value_name = "SOURCE")]
    source: String,

    /// Directory to link from inside the package
    #[arg(value_name = "DIRECTORY", default_value = DEFAULT_DIRECTORY)]
    directory: String,

    /// Name of the symlink inside .pkglink/ (default: .<package>)
    #[arg(long, value_name = "NAME")]
    symlink_name: Option<String>,

    /// Install this package instead; SOURCE then names the module to look in
    #[arg(long, value_name = "PACKAGE")]
    from: Option<String>,

    /// uvx project directory name under .pkglink/ (default: the package name)
    #[arg(long, value_name = "NAME")]
    project_name: Option<String>,

    /// Skip the symlinks requested by the package's pkglink.yaml
    #[arg(long)]
    no_setup: bool,

    /// Replace an existing file, directory or symlink at the target
    #[arg(long)]
    force: bool,

    /// Describe the change without touching the working directory
    #[arg(long)]
    dry_run: bool,

    /// Reinstall even if the package is cached
    #[arg(long)]
    refresh: bool,
}

impl ToolArgs {
    fn into_request(self) -> LinkRequest {
        LinkRequest {
            source: self.source,
            directory: self.directory,
            symlink_name: self.symlink_name,
            from: self.from,
            force: self.force,
            dry_run: self.dry_run,
            refresh: self.refresh,
            project_name: self.project_name,
            inside_pkglink: true,
            no_setup: self.no_setup,
        }
    }
}

#[derive(clap::Args, Debug)]
struct PlanArgs {
    #[command(flatten)]
    link: LinkArgs,

    /// Print the plan as JSON
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
struct SyncArgs {
    /// Batch file (default: ./pkglink.config.yaml)
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Describe every change without touching the working directory
    #[arg(long)]
    dry_run: bool,

    /// Only run entries whose name matches one of these glob patterns
    #[arg(value_name = "ENTRY_PATTERN")]
    patterns: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct ListArgs {
    /// Directory to inspect (default: working directory)
    #[arg(value_name = "DIR")]
    dir: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum CacheCommands {
    /// Print the cache directory
    Path,
    /// List cached packages
    List,
}

fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

async fn run(cli: Cli) -> Result<()> {
    let runtime = RealRuntime;
    match cli.command {
        Commands::Link(args) => {
            commands::link(Config::new(runtime, cli.cache_dir)?, args.into_request()).await
        }
        Commands::Tool(args) => {
            commands::tool(Config::new(runtime, cli.cache_dir)?, args.into_request()).await
        }
        Commands::Plan(args) => {
            commands::plan(
                Config::new(runtime, cli.cache_dir)?,
                args.link.into_request(),
                args.json,
            )
            .await
        }
        Commands::Sync(args) => {
            commands::sync(
                Config::new(runtime, cli.cache_dir)?,
                args.config,
                args.dry_run,
                args.patterns,
            )
            .await
        }
        Commands::List(args) => commands::list(runtime, args.dir),
        Commands::Cache { command } => {
            let config = Config::new(runtime, cli.cache_dir)?;
            match command {
                CacheCommands::Path => commands::cache_path(config),
                CacheCommands::List => commands::cache_list(config),
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_filter(cli.verbose)),
    )
    .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code_for(&e));
    }
}
