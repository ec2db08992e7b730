//! Hutch - Entry Point
//!
//! Command-line front end for managing and launching sandbox instances.

use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use miette::{IntoDiagnostic, Result};
use tracing::{Level, debug, info};
use tracing_subscriber::{EnvFilter, fmt};

use hutch::dirs::Directories;
use hutch::instance::{CreateOptions, InstanceManager, MigrationOutcome, migration};
use hutch::launch::LaunchPlan;
use hutch::sandbox::ServiceContext;

/// Hutch - Persistent application sandboxes on top of bubblewrap.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new instance, optionally from a profile
    Create {
        /// Name of the new instance
        name: String,

        /// Profile to seed the instance from
        #[arg(long)]
        profile: Option<String>,

        /// Write a desktop entry for the instance
        #[arg(long)]
        desktop_entry: bool,

        /// Print the profile's import tips
        #[arg(long)]
        import_tips: bool,
    },

    /// List instances or profiles
    List {
        #[arg(value_enum)]
        what: ListTarget,
    },

    /// Print the launch arguments of an instance
    Args {
        /// Instance name
        name: String,

        /// Print the full launch plan as JSON
        #[arg(long)]
        json: bool,

        /// Command to run instead of the configured one
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Run a command inside an instance
    Run {
        /// Instance name
        name: String,

        /// Command to run instead of the configured one
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Convert an instance's legacy configuration
    Migrate {
        /// Instance name
        name: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ListTarget {
    Instances,
    Profiles,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries command output.
    let filter = if args.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    debug!("Hutch v{}", env!("CARGO_PKG_VERSION"));

    let manager = InstanceManager::new(Directories::from_env()?);

    match args.command {
        Commands::Create {
            name,
            profile,
            desktop_entry,
            import_tips,
        } => {
            let mut options = CreateOptions::new(name);
            options.profile = profile;
            options.desktop_entry = desktop_entry;
            options.import_tips = import_tips;

            let instance = manager.create_instance(&options)?;
            info!(path = %instance.paths.root.display(), "Created instance {}", instance.name);
        }
        Commands::List { what } => match what {
            ListTarget::Instances => {
                for instance in manager.list_instances()? {
                    println!("{}", instance.name);
                }
            }
            ListTarget::Profiles => {
                for name in manager.list_profile_names()? {
                    println!("{name}");
                }
            }
        },
        Commands::Args {
            name,
            json,
            command,
        } => {
            let plan = plan_for(&manager, &name, &command)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&plan).into_diagnostic()?
                );
            } else {
                for arg in plan.argv() {
                    println!("{arg}");
                }
            }
        }
        Commands::Run { name, command } => {
            let status = plan_for(&manager, &name, &command)?.run()?;
            let code = status.code().and_then(|code| u8::try_from(code).ok());
            return Ok(code.map_or(ExitCode::FAILURE, ExitCode::from));
        }
        Commands::Migrate { name } => {
            let instance = manager.find_instance(&name)?;
            match migration::migrate(&instance.paths)? {
                MigrationOutcome::Current => info!("Instance {name} is already current"),
                MigrationOutcome::Migrated => info!("Migrated instance {name}"),
                MigrationOutcome::Incomplete => {
                    miette::bail!("Instance {name} has no configuration to migrate")
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn plan_for(manager: &InstanceManager, name: &str, command: &[String]) -> Result<LaunchPlan> {
    let instance = manager.lookup_instance(name)?;
    let host_home = etcetera::home_dir().map_err(|_| hutch::Error::HomeDirectoryUnavailable)?;
    let context = ServiceContext { host_home };
    Ok(LaunchPlan::assemble(&instance, &context, command)?)
}
