use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use depot_installer::{default_user_prefix, PrefixLayout};

mod flows;
mod render;


use flows::{
    run_doctor_command, run_info_command, run_install_command, run_list_command,
    run_rollback_command, run_search_command, run_uninstall_command, InstallArgs,
};

#[derive(Parser, Debug)]
#[command(name = "depot")]
#[command(about = "Package manager with transactional installs and rollback", long_about = None)]
#[command(version)]
struct Cli {
    /// Registry root directory; omit to run without a registry index
    #[arg(long, global = true)]
    registry_root: Option<PathBuf>,
    /// Installation prefix (defaults to the per-user prefix)
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install or upgrade packages
    Install {
        /// Requirement specs: `name`, `name@^1.2`, `git+<url>#<name>@<rev>`,
        /// `<url>#<name>`
        specs: Vec<String>,
        /// Read requirements from a file, one spec per line
        #[arg(short = 'r', long = "requirement", value_name = "FILE")]
        requirement_files: Vec<PathBuf>,
        /// Upgrade the named packages to the newest satisfying version
        #[arg(short = 'U', long)]
        upgrade: bool,
        /// How to treat already-satisfied dependencies of upgraded packages
        #[arg(long, value_name = "STRATEGY", default_value = "only-if-needed")]
        upgrade_strategy: String,
        /// Reinstall even when the resolved version is already installed
        #[arg(long)]
        force_reinstall: bool,
        /// Plan installs without consulting what is already on disk
        #[arg(short = 'I', long)]
        ignore_installed: bool,
        /// Do not consult the registry index
        #[arg(long)]
        no_index: bool,
        /// Also look for source trees in this directory
        #[arg(short = 'f', long = "find-links", value_name = "DIR")]
        find_links: Vec<PathBuf>,
        /// Show the plan without applying it
        #[arg(long)]
        dry_run: bool,
        /// Ignore cached artifacts and download again
        #[arg(long)]
        force_redownload: bool,
    },
    /// Remove installed packages
    Uninstall {
        names: Vec<String>,
        /// Keep dependencies that only the removed packages needed
        #[arg(long)]
        no_prune: bool,
    },
    /// List installed packages
    List,
    /// Search the configured sources by name
    Search { query: String },
    /// Show known versions of one package
    Info { name: String },
    /// Roll back an interrupted or failed transaction
    Rollback { txid: Option<String> },
    /// Show prefix paths and transaction health
    Doctor,
    /// Generate shell completions
    Completions { shell: clap_complete::Shell },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let prefix = match &cli.prefix {
        Some(prefix) => prefix.clone(),
        None => default_user_prefix()?,
    };
    let layout = PrefixLayout::new(prefix);

    match cli.command {
        Commands::Install {
            specs,
            requirement_files,
            upgrade,
            upgrade_strategy,
            force_reinstall,
            ignore_installed,
            no_index,
            find_links,
            dry_run,
            force_redownload,
        } => {
            let args = InstallArgs {
                specs,
                requirement_files,
                upgrade,
                upgrade_strategy,
                force_reinstall,
                ignore_installed,
                no_index,
                find_links,
                dry_run,
                force_redownload,
            };
            for line in run_install_command(&layout, cli.registry_root.as_deref(), &args)? {
                println!("{line}");
            }
        }
        Commands::Uninstall { names, no_prune } => {
            for line in run_uninstall_command(&layout, &names, !no_prune)? {
                println!("{line}");
            }
        }
        Commands::List => {
            for line in run_list_command(&layout)? {
                println!("{line}");
            }
        }
        Commands::Search { query } => {
            for line in run_search_command(cli.registry_root.as_deref(), &query)? {
                println!("{line}");
            }
        }
        Commands::Info { name } => {
            for line in run_info_command(cli.registry_root.as_deref(), &name)? {
                println!("{line}");
            }
        }
        Commands::Rollback { txid } => {
            for line in run_rollback_command(&layout, txid)? {
                println!("{line}");
            }
        }
        Commands::Doctor => {
            for line in run_doctor_command(&layout)? {
                println!("{line}");
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            let mut stdout = std::io::stdout();
            clap_complete::generate(shell, &mut command, "depot", &mut stdout);
            stdout.flush()?;
        }
    }

    Ok(())
}
