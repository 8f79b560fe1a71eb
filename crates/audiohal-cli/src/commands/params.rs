//! Parameter store commands.
//!
//! The store holds criterion literals and stream parameters that outlive a
//! single routing session. `audiohal route` does not read it; feed it back
//! with `--criterion` or through the library.

use std::path::PathBuf;

use audiohal_config::{ParameterStore, paths};
use clap::{Args, Subcommand};

#[derive(Args)]
pub struct ParamsArgs {
    /// Store file (defaults to the user parameter store)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: ParamsCommand,
}

#[derive(Subcommand)]
enum ParamsCommand {
    /// Print the stored parameters
    Show,

    /// Merge a blob into the store (e.g., "Mode=InCall;mic_mute=1")
    Set {
        /// Parameter blob
        blob: String,
    },

    /// Remove a key from the store
    Remove {
        /// Key to remove
        key: String,
    },

    /// Show the store and topology locations
    Paths,
}

pub fn run(args: ParamsArgs) -> anyhow::Result<()> {
    let path = match args.store {
        Some(path) => path,
        None => {
            paths::ensure_user_config_dir()?;
            paths::parameter_store_path()
        }
    };

    match args.command {
        ParamsCommand::Show => show(path),
        ParamsCommand::Set { blob } => {
            let mut store = ParameterStore::load(path)?;
            store.merge(&blob)?;
            store.save()?;
            println!("Saved {} key(s) to {}", store.pairs().len(), store.path().display());
            Ok(())
        }
        ParamsCommand::Remove { key } => {
            let mut store = ParameterStore::load(path)?;
            let value = store.remove(&key)?;
            store.save()?;
            println!("Removed {key} (was '{value}')");
            Ok(())
        }
        ParamsCommand::Paths => show_paths(&path),
    }
}

fn show(path: PathBuf) -> anyhow::Result<()> {
    let store = ParameterStore::load(path)?;
    println!("Store: {}", store.path().display());
    if store.pairs().is_empty() {
        println!("  (empty)");
        return Ok(());
    }
    for (key, value) in store.pairs().iter() {
        println!("  {key:28} = {value}");
    }
    Ok(())
}

fn show_paths(store: &std::path::Path) -> anyhow::Result<()> {
    println!("Parameter store:   {}", store.display());
    for (label, dir) in [
        ("User topologies:  ", paths::user_topologies_dir()),
        ("System topologies:", paths::system_topologies_dir()),
    ] {
        println!("{label} {}", dir.display());
        for file in paths::list_topologies(&dir) {
            println!("  {}", file.display());
        }
    }
    Ok(())
}
