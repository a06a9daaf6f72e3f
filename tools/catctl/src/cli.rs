use std::path::PathBuf;

use cat_utils::Switch;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file. Defaults to /etc/catctl/config.toml or /etc/catctl.toml.
    #[arg(short, long, env = "CATCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Board document, overriding the config.
    #[arg(short, long)]
    pub board: Option<PathBuf>,

    /// Scenario document, overriding the config.
    #[arg(short, long)]
    pub scenario: Option<PathBuf>,

    /// Enable verbose output. Specify multiple times to increase verbosity.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Generate the cache allocation policies of every cache region")]
    Generate {
        #[arg(
            short,
            long,
            help = "Store the resulting CACHE_ALLOCATION in the scenario"
        )]
        write: bool,
    },
    #[command(about = "Set an RDT switch, adjusting the others, and save the scenario")]
    Switch {
        #[arg(help = "Switch to set: RDT, CDP or VCAT")]
        switch: Switch,
        #[arg(help = "New value: y or n")]
        value: String,
    },
    #[command(about = "Show the CLOS entries the persisted policies fold into")]
    Clos,
    #[command(about = "Show the cache ways and bytes used by each VM")]
    Usage {
        #[arg(short, long, help = "Cache level to report")]
        level: Option<u32>,
    },
    #[command(about = "Check the persisted cache allocation against the board")]
    Check,
}
