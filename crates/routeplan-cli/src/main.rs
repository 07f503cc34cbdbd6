//! Routeplan CLI: print the routing plan of a SELECT

use anyhow::Context;
use clap::Parser;
use routeplan_common::{ExplainFormat, PlannerConfig, PlannerVersion};
use routeplan_planner::{build_plan, explain, BuildOptions};
use routeplan_vschema::VSchemaConfig;
use std::io::Read;
use std::path::PathBuf;

/// Routeplan CLI
#[derive(Parser, Debug)]
#[command(name = "routeplan")]
#[command(version = "0.1.0")]
#[command(about = "Plan SELECT statements against a sharded vschema")]
struct Args {
    /// VSchema file (TOML or JSON)
    #[arg(long)]
    vschema: Option<PathBuf>,

    /// Config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Planner version, unless the query carries a PLANNER directive
    #[arg(long, value_enum)]
    planner: Option<PlannerVersion>,

    /// Keyspace for unqualified table names
    #[arg(long)]
    keyspace: Option<String>,

    /// Output format
    #[arg(long, value_enum)]
    format: Option<ExplainFormat>,

    /// Statement to plan; read from stdin when absent
    sql: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PlannerConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PlannerConfig::default(),
    };
    if let Some(path) = args.vschema {
        config.vschema_path = Some(path);
    }
    if let Some(planner) = args.planner {
        config.planner_version = planner;
    }
    if let Some(keyspace) = args.keyspace {
        config.default_keyspace = Some(keyspace);
    }
    if let Some(format) = args.format {
        config.explain_format = format;
    }

    let vschema_path = config
        .vschema_path
        .clone()
        .context("no vschema given: pass --vschema or set vschema_path in the config")?;
    let mut vschema = VSchemaConfig::load_from_file(&vschema_path)
        .and_then(|vs| vs.build())
        .with_context(|| format!("loading vschema {}", vschema_path.display()))?;
    if config.default_keyspace.is_some() {
        vschema.set_default_keyspace(config.default_keyspace.clone());
    }

    let sql = match args.sql {
        Some(sql) => sql,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading SQL from stdin")?;
            buf
        }
    };
    let sql = sql.trim().trim_end_matches(';').trim_end();
    if sql.is_empty() {
        anyhow::bail!("no SQL statement given");
    }

    tracing::debug!(planner = %config.planner_version, "planning");
    let options = BuildOptions {
        planner: Some(config.planner_version),
        legacy: None,
    };
    let plan = build_plan(sql, &vschema, options)?;
    let out = explain(&plan, config.explain_format)?;
    println!("{}", out.trim_end());
    Ok(())
}
