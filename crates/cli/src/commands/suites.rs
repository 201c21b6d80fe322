//! Suite Commands

use anyhow::{bail, Context, Result};
use clap::Subcommand;

use dialog_differ_common::{DifferConfig, SqliteStore, Store, SuiteResult};

use super::{ResultDisplay, SuiteDisplay};
use crate::output::{print_item, print_list, print_structured, print_success, OutputFormat};

#[derive(Subcommand)]
pub enum SuitesCommands {
    /// List stored suites, newest first
    List,

    /// Show one suite with its dialog results
    Show {
        /// Suite ID
        id: String,
    },

    /// Show the most recent suite
    Latest,

    /// Delete a suite record
    Delete {
        /// Suite ID
        id: String,
    },

    /// Delete all but the newest suites
    Prune {
        /// Number of suites to keep
        #[arg(long)]
        keep: usize,
    },
}

fn print_suite(suite: &SuiteResult, format: OutputFormat) {
    if !format.is_human() {
        print_structured(suite, format);
        return;
    }

    print_item(&SuiteDisplay::from(suite), format);
    let results: Vec<ResultDisplay> = suite.results.iter().map(ResultDisplay::from).collect();
    print_list(&results, format);
}

pub async fn execute(cmd: SuitesCommands, config: &DifferConfig, format: OutputFormat) -> Result<()> {
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("cannot open store {}", config.database_path.display()))?;

    match cmd {
        SuitesCommands::List => {
            let suites = store.list_suites().await?;
            let displays: Vec<SuiteDisplay> = suites.iter().map(SuiteDisplay::from).collect();
            print_list(&displays, format);
        }

        SuitesCommands::Show { id } => match store.get_suite(&id).await? {
            Some(suite) => print_suite(&suite, format),
            None => bail!("suite '{}' not found", id),
        },

        SuitesCommands::Latest => match store.latest_suite().await? {
            Some(suite) => print_suite(&suite, format),
            None => bail!("no suite has been run yet"),
        },

        SuitesCommands::Delete { id } => {
            if !store.delete_suite(&id).await? {
                bail!("suite '{}' not found", id);
            }
            print_success(&format!("Suite '{}' deleted", id));
        }

        SuitesCommands::Prune { keep } => {
            let removed = store.prune_suites(keep).await?;
            print_success(&format!("Pruned {} suite(s), kept the newest {}", removed, keep));
        }
    }

    Ok(())
}
