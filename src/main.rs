use anyhow::{Context, Result};
use boardpm::archive::ArchiveExtractorImpl;
use boardpm::catalog::VersionConstraint;
use boardpm::config::{Config, ConfigOverrides};
use boardpm::download::HttpDownloader;
use boardpm::http::HttpClient;
use boardpm::install::alternate::Git2Fetcher;
use boardpm::install::store::FsLibraryStore;
use boardpm::install::{
    GitLibraryInstallRequest, LibraryInstallRequest, ZipLibraryInstallRequest, git_library_install,
    library_install, library_upgrade, zip_library_install,
};
use boardpm::progress::{ConsoleSink, ProgressSink};
use boardpm::registry::InstallLocation;
use boardpm::runtime::{RealRuntime, Runtime};
use boardpm::state::Session;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// boardpm - library manager for embedded board toolchains
///
/// Resolves, downloads and installs code libraries from a library index,
/// a local zip archive or a git repository.
///
/// Examples:
///   boardpm install Servo            # Latest Servo and its dependencies
///   boardpm install "Adafruit GFX Library@1.11.9" --no-deps
///   boardpm git-install https://github.com/owner/MyLib.git#v1.0
#[derive(Parser, Debug)]
#[command(author, version = env!("BOARDPM_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory holding settings, index and built-in libraries (also via BOARDPM_DATA_DIR)
    #[arg(long, value_name = "PATH", global = true)]
    data_dir: Option<PathBuf>,

    /// Directory archives are downloaded into (also via BOARDPM_DOWNLOADS_DIR)
    #[arg(long, value_name = "PATH", global = true)]
    downloads_dir: Option<PathBuf>,

    /// User libraries directory (also via BOARDPM_USER_DIR)
    #[arg(long, value_name = "PATH", global = true)]
    user_dir: Option<PathBuf>,

    /// IDE built-in libraries directory (also via BOARDPM_BUILTIN_DIR)
    #[arg(long, value_name = "PATH", global = true)]
    builtin_dir: Option<PathBuf>,

    /// Sketch-local libraries directory
    #[arg(long, value_name = "PATH", global = true, env = "BOARDPM_SKETCH_DIR")]
    sketch_dir: Option<PathBuf>,

    /// Library index file (also via BOARDPM_CATALOG)
    #[arg(long, value_name = "FILE", global = true)]
    catalog: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            data_dir: self.data_dir.clone(),
            downloads_dir: self.downloads_dir.clone(),
            user_dir: self.user_dir.clone(),
            builtin_dir: self.builtin_dir.clone(),
            sketch_dir: self.sketch_dir.clone(),
            catalog_path: self.catalog.clone(),
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install a library from the index, with its dependencies
    Install(InstallArgs),

    /// Install a library from a local zip archive
    ZipInstall(ZipInstallArgs),

    /// Install a library from a git repository
    GitInstall(GitInstallArgs),

    /// Upgrade installed user libraries to their newest release
    Upgrade(UpgradeArgs),

    /// List installed libraries
    List(ListArgs),

    /// Show or initialize the settings file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(clap::Args, Debug)]
struct InstallArgs {
    /// Library name, optionally followed by @VERSION
    #[arg(value_name = "NAME[@VERSION]")]
    library: String,

    /// Do not install dependencies
    #[arg(long)]
    no_deps: bool,

    /// Fail instead of replacing an installed library with another version
    #[arg(long)]
    no_overwrite: bool,

    /// Where to install: user, ide-builtin or sketch
    #[arg(long, default_value = "user")]
    location: InstallLocation,
}

#[derive(clap::Args, Debug)]
struct ZipInstallArgs {
    /// Path to the zip archive
    #[arg(value_name = "ZIP")]
    path: PathBuf,

    /// Replace a library of the same name
    #[arg(long)]
    overwrite: bool,
}

#[derive(clap::Args, Debug)]
struct GitInstallArgs {
    /// Repository URL, optionally followed by #REF
    #[arg(value_name = "URL")]
    url: String,

    /// Replace a library of the same name
    #[arg(long)]
    overwrite: bool,
}

#[derive(clap::Args, Debug)]
struct UpgradeArgs {
    /// Only upgrade these libraries
    #[arg(value_name = "NAME")]
    names: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct ListArgs {
    /// Only list libraries of this location
    #[arg(long)]
    location: Option<InstallLocation>,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration
    Dump,
    /// Write the effective configuration to the settings file
    Init {
        /// Replace an existing settings file
        #[arg(long)]
        overwrite: bool,
    },
}

/// Splits `NAME[@VERSION]`.
fn parse_library_arg(arg: &str) -> Result<(String, VersionConstraint)> {
    match arg.rsplit_once('@') {
        Some((name, version)) if !name.is_empty() => Ok((
            name.to_string(),
            VersionConstraint::parse(version)
                .with_context(|| format!("Invalid version in '{}'", arg))?,
        )),
        _ => Ok((arg.to_string(), VersionConstraint::Latest)),
    }
}

fn open_session(runtime: Arc<RealRuntime>, config: &Config) -> Result<Session<RealRuntime>> {
    runtime
        .create_dir_all(&config.downloads_dir)
        .with_context(|| format!("Failed to create {:?}", config.downloads_dir))?;
    Ok(Session::open(
        runtime,
        &config.catalog_path,
        config.roots(),
        config.downloads_dir.clone(),
    )?)
}

async fn list(session: &Session<RealRuntime>, location: Option<InstallLocation>) {
    let explorer = session.manager().explorer().await;
    let libraries: Vec<_> = explorer
        .registry
        .libraries()
        .iter()
        .filter(|lib| location.is_none_or(|l| l == lib.location))
        .collect();
    if libraries.is_empty() {
        println!("No libraries installed.");
        return;
    }
    for lib in libraries {
        println!(
            "{}\t{}\t{}\t{}",
            lib.name,
            lib.version,
            lib.location,
            lib.install_dir.display()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = Arc::new(RealRuntime);
    let config = Config::resolve(runtime.as_ref(), &cli.overrides())?;

    if let Commands::Config(command) = &cli.command {
        match command {
            ConfigCommands::Dump => println!("{}", config.to_json()?),
            ConfigCommands::Init { overwrite } => {
                let path = config.init(runtime.as_ref(), *overwrite)?;
                println!("Settings written to {}", path.display());
            }
        }
        return Ok(());
    }

    let session = open_session(Arc::clone(&runtime), &config)?;
    let http_client = HttpClient::build(&config.user_agent, config.download_timeout())?;
    let downloader = HttpDownloader::new(Arc::clone(&runtime), http_client);
    let extractor = Arc::new(ArchiveExtractorImpl::new());
    let store = FsLibraryStore::new(Arc::clone(&runtime), Arc::clone(&extractor));
    let progress: Arc<dyn ProgressSink> = Arc::new(ConsoleSink { verbose: false });

    match cli.command {
        Commands::Install(args) => {
            let (name, version) = parse_library_arg(&args.library)?;
            let request = LibraryInstallRequest {
                name,
                version,
                no_deps: args.no_deps,
                no_overwrite: args.no_overwrite,
                location: args.location,
            };
            library_install(&session, &downloader, &store, &request, progress).await?;
        }
        Commands::ZipInstall(args) => {
            let request = ZipLibraryInstallRequest {
                path: args.path,
                overwrite: args.overwrite,
            };
            zip_library_install(&session, extractor.as_ref(), &store, &request, progress).await?;
        }
        Commands::GitInstall(args) => {
            let request = GitLibraryInstallRequest {
                url: args.url,
                overwrite: args.overwrite,
            };
            git_library_install(&session, &Git2Fetcher, &store, &request, progress).await?;
        }
        Commands::Upgrade(args) => {
            let upgraded =
                library_upgrade(&session, &downloader, &store, &args.names, progress).await?;
            if upgraded.is_empty() {
                println!("All libraries are up to date.");
            }
        }
        Commands::List(args) => list(&session, args.location).await,
        Commands::Config(_) => {}
    }
    Ok(())
}
