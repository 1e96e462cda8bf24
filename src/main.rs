//! aeta CLI - serve tests over REST and run them remotely.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{Level, debug, info};
use tracing_subscriber::FmtSubscriber;

use aeta::catalog::ModuleLoader;
use aeta::client::{
    HttpAuthenticator, RemoteSuite, RestClient, ResultUpdater, TokenSource, create_test_cases,
};
use aeta::config::{self, Config, StorageMode};
use aeta::report::{print_result, print_summary, write_junit};
use aeta::sample::{SAMPLE_PACKAGE, sample_catalog};

#[derive(Parser)]
#[command(name = "aeta")]
#[command(about = "Test discovery and batched remote execution", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "aeta.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the REST interface over the built-in test catalog
    ///
    /// Only packages registered in the catalog compiled into this binary
    /// (sample_package) can be served.
    Serve {
        /// Serve sample_package regardless of tests.package_names
        #[arg(long)]
        demo: bool,

        /// Override the listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Run the tests of a remote aeta server
    Run {
        /// Base URL of the aeta routes, e.g. http://localhost:8080/tests
        url: String,

        /// Only run tests under this fullname
        prefix: Option<String>,

        /// JUnit XML output path
        #[arg(long)]
        junit: Option<PathBuf>,

        /// Print the output of passing tests
        #[arg(long)]
        show_output: bool,

        /// File holding a bearer token
        #[arg(long)]
        token_file: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,

    /// Initialize a new configuration file
    Init {
        /// Storage mode (deferred, immediate)
        #[arg(short, long, default_value = "deferred")]
        mode: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Serve { demo, listen } => serve(&cli.config, demo, listen).await,
        Commands::Run {
            url,
            prefix,
            junit,
            show_output,
            token_file,
        } => {
            let code = run_remote(
                &cli.config,
                &url,
                prefix.as_deref().unwrap_or(""),
                junit,
                show_output,
                token_file,
            )
            .await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Validate => validate_config(&cli.config),
        Commands::Init { mode } => init_config(&cli.config, &mode),
    }
}

/// Loads the config file, or the defaults if there is none.
fn load_or_default(config_path: &Path) -> Result<Config> {
    if config_path.exists() {
        let config = config::load_config(config_path)?;
        config.validate()?;
        info!("Loaded configuration from {}", config_path.display());
        Ok(config)
    } else {
        debug!(
            "No configuration at {}, using defaults",
            config_path.display()
        );
        Ok(Config::default())
    }
}

async fn serve(config_path: &Path, demo: bool, listen: Option<String>) -> Result<()> {
    let mut config = load_or_default(config_path)?;
    if let Some(listen) = listen {
        config.server.listen = listen;
    }
    if demo {
        config.tests.package_names = vec![SAMPLE_PACKAGE.to_string()];
    } else if config.tests.package_names.is_empty() {
        bail!(
            "tests.package_names is empty; set it in {} or pass --demo to serve {}",
            config_path.display(),
            SAMPLE_PACKAGE
        );
    }

    let catalog = sample_catalog();
    let unknown: Vec<&str> = config
        .tests
        .package_names
        .iter()
        .filter(|name| !catalog.is_package(name) && catalog.load_module(name).is_none())
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        bail!(
            "tests.package_names lists {} which the built-in catalog does not contain; \
             only {} can be served",
            unknown.join(", "),
            SAMPLE_PACKAGE
        );
    }

    let server = aeta::rest::start(&config, Arc::new(catalog)).await?;
    println!("Serving {} at {}", config.tests.package_names.join(", "), server.base_url());

    let token = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down");
            token.cancel();
        }
    });
    server.wait().await
}

async fn run_remote(
    config_path: &Path,
    url: &str,
    prefix: &str,
    junit_path: Option<PathBuf>,
    show_output: bool,
    token_file: Option<PathBuf>,
) -> Result<i32> {
    let config = load_or_default(config_path)?;

    let mut auth = HttpAuthenticator::new(config.client.max_auth_attempts);
    if let Some(path) = token_file {
        auth = auth.with_token(TokenSource::File(path));
    }
    let client = RestClient::new(url, Arc::new(auth));
    let mut updater = ResultUpdater::new(client, prefix, config.client.poll_interval());

    let cases = create_test_cases(&mut updater)
        .await
        .with_context(|| format!("Failed to load tests from {}", url))?;
    let mut suite = RemoteSuite::new();
    suite.add_test_cases(cases)?;

    if suite.count_test_cases() == 0 {
        let mut message = "No tests ".to_string();
        if !prefix.is_empty() {
            message.push_str(&format!("with the prefix \"{}\" ", prefix));
        }
        message.push_str(&format!("found at \"{}\"", url));
        eprintln!("{}", message);
        return Ok(1);
    }
    println!("Discovered {} tests", suite.count_test_cases());

    let pb = indicatif::ProgressBar::new(0);
    pb.set_style(
        indicatif::ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} units")
            .context("Invalid progress template")?
            .progress_chars("#>-"),
    );
    updater
        .wait_all(|done, total| {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
        })
        .await?;
    pb.finish_and_clear();

    let summary = suite
        .run(&mut updater, |report| print_result(report, show_output))
        .await?;
    print_summary(&summary);

    if let Some(path) = junit_path {
        write_junit(&summary, &path)?;
    }

    Ok(summary.exit_code())
}

fn validate_config(config_path: &Path) -> Result<()> {
    let result = config::load_config(config_path).and_then(|config| {
        config.validate()?;
        Ok(config)
    });
    match result {
        Ok(config) => {
            println!("Configuration is valid!");
            println!();
            println!("Settings:");
            println!("  Packages: {}", config.tests.package_names.join(", "));
            println!("  Module pattern: {}", config.tests.module_pattern);
            println!(
                "  Parallelize: modules={} classes={} methods={}",
                config.parallelize.modules,
                config.parallelize.classes,
                config.parallelize.methods
            );
            let mode = match config.storage.mode {
                StorageMode::Deferred => "deferred",
                StorageMode::Immediate => "immediate",
            };
            println!("  Storage mode: {}", mode);
            println!("  Listen: {}{}", config.server.listen, config.server.url_path);
            println!("  Workers: {}", config.server.workers);
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_config(config_path: &Path, mode: &str) -> Result<()> {
    let mode = match mode {
        "deferred" => StorageMode::Deferred,
        "immediate" => StorageMode::Immediate,
        _ => {
            eprintln!("Unknown storage mode: {}. Use: deferred, immediate", mode);
            std::process::exit(1);
        }
    };

    if config_path.exists() {
        bail!("{} already exists", config_path.display());
    }

    let mut config = Config::default();
    config.tests.package_names = vec![SAMPLE_PACKAGE.to_string()];
    config.storage.mode = mode;

    std::fs::write(config_path, config.to_toml()?)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("Created {}", config_path.display());
    Ok(())
}
