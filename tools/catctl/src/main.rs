// Copyright (c) Meta Platforms, Inc. and affiliates.

// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

mod cli;
mod config;

use std::path::Path;
use std::path::PathBuf;
use std::process::exit;

use anyhow::anyhow;
use anyhow::Result;
use cat_utils::check_cache_allocation;
use cat_utils::parse_yes_no;
use cat_utils::to_scenario_cache_allocation;
use cat_utils::vm_cache_usage;
use cat_utils::BoardInfo;
use cat_utils::ClosTable;
use cat_utils::PolicyGenerator;
use cat_utils::Scenario;
use cat_utils::Switch;
use clap::Parser;
use cli::{Cli, Commands};
use config::Config;
use log::debug;
use log::info;
use serde::Serialize;

struct Ctx {
    config: Config,
    board: Option<PathBuf>,
    scenario: Option<PathBuf>,
}

impl Ctx {
    fn board(&self) -> Result<BoardInfo> {
        let path = self
            .board
            .as_ref()
            .or(self.config.board.as_ref())
            .ok_or_else(|| anyhow!("No board document, use --board or set it in the config"))?;
        BoardInfo::load(path)
    }

    fn scenario_path(&self) -> Result<&Path> {
        self.scenario
            .as_deref()
            .or(self.config.scenario.as_deref())
            .ok_or_else(|| anyhow!("No scenario document, use --scenario or set it in the config"))
    }

    fn scenario(&self) -> Result<Scenario> {
        Scenario::load(self.scenario_path()?)
    }

    fn print<T: Serialize>(&self, value: &T) -> Result<()> {
        let out = if self.config.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        println!("{}", out);
        Ok(())
    }
}

fn cmd_generate(ctx: &Ctx, write: bool) -> Result<()> {
    let board = ctx.board()?;
    let mut scenario = ctx.scenario()?;

    // Policies of unknown VMs are reported on import and dropped on write.
    let mut generator = PolicyGenerator::from_scenario_on_board(&scenario, &board);
    let ui = generator.generate_for_board(&mut scenario, &board);
    ctx.print(&ui)?;

    if write {
        scenario.set_cache_allocation(to_scenario_cache_allocation(&ui.regions));
        let path = ctx.scenario_path()?;
        scenario.save(path)?;
        info!("Saved {}", path.display());
    }
    Ok(())
}

fn cmd_switch(ctx: &Ctx, switch: Switch, value: &str) -> Result<()> {
    let value = parse_yes_no(value)?;
    let mut scenario = ctx.scenario()?;

    scenario.features_mut().set(switch, value, true);
    let features = scenario.features();
    for switch in Switch::ALL {
        println!("{}={}", switch, cat_utils::yes_no_token(features.get(switch)));
    }

    let path = ctx.scenario_path()?;
    scenario.save(path)?;
    info!("Saved {}", path.display());
    Ok(())
}

fn cmd_clos(ctx: &Ctx) -> Result<()> {
    let scenario = ctx.scenario()?;
    ctx.print(&ClosTable::from_scenario(&scenario))
}

fn cmd_usage(ctx: &Ctx, level: Option<u32>) -> Result<()> {
    let board = ctx.board()?;
    let scenario = ctx.scenario()?;
    let level = level.unwrap_or(ctx.config.usage_level);
    ctx.print(&vm_cache_usage(&scenario, &board, level)?)
}

fn cmd_check(ctx: &Ctx) -> Result<()> {
    let board = ctx.board()?;
    let scenario = ctx.scenario()?;

    let issues = check_cache_allocation(&scenario, &board);
    if issues.is_empty() {
        println!("cache allocation ok");
        return Ok(());
    }

    for issue in issues.iter() {
        println!("error: {}", issue);
    }
    exit(1);
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let llv = match cli.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    debug!("cli={:?}", &cli);

    let ctx = Ctx {
        config: config::init_config(cli.config.as_deref())?,
        board: cli.board,
        scenario: cli.scenario,
    };

    match cli.command {
        Commands::Generate { write } => cmd_generate(&ctx, write),
        Commands::Switch { switch, value } => cmd_switch(&ctx, switch, &value),
        Commands::Clos => cmd_clos(&ctx),
        Commands::Usage { level } => cmd_usage(&ctx, level),
        Commands::Check => cmd_check(&ctx),
    }
}
