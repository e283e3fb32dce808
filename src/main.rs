//! `nspwire`: inspect wiring configuration without opening connections.
//!
//! - `check` compiles every directive of every configured socket and
//!   reports the resulting bindings and skipped entries
//! - `resolve` shows how a connect request resolves against the sockets

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nspwire_core::Role;
use nspwire_engine::compile_all;
use nspwire_settings::{load_settings_from_path, resolve_connect, settings_path, ConnectOptions, Persist, WireSettings};
use nspwire_telemetry::{init_telemetry, TelemetryConfig};
use serde_json::{json, Value};
use tracing::{info, Level};

#[derive(Debug, Parser)]
#[command(name = "nspwire", version, about = "Namespace wiring configuration tool")]
struct Cli {
    /// Log level: error, warn, info, debug or trace.
    #[arg(long, global = true, default_value = "warn")]
    log_level: Level,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compile every directive and report bindings and skips.
    Check {
        /// Settings file. Defaults to ~/.nspwire/settings.json.
        settings: Option<PathBuf>,
        /// Print the report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Resolve a connect request.
    Resolve {
        /// Settings file. Defaults to ~/.nspwire/settings.json.
        settings: Option<PathBuf>,
        /// Socket name; the default socket when omitted.
        #[arg(long)]
        name: Option<String>,
        /// Namespace to join.
        #[arg(long)]
        channel: Option<String>,
        /// Persist the connection under this key.
        #[arg(long)]
        persist: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _telemetry = init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        json: cli.json_logs,
        ..Default::default()
    });

    match cli.command {
        Command::Check { settings, json } => check(&load(settings)?, json),
        Command::Resolve {
            settings,
            name,
            channel,
            persist,
        } => resolve(&load(settings)?, name, channel, persist),
    }
}

fn load(path: Option<PathBuf>) -> Result<WireSettings> {
    let path = path.unwrap_or_else(settings_path);
    let settings = load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings: {}", path.display()))?;
    info!(path = %path.display(), sockets = settings.sockets.len(), "settings loaded");
    Ok(settings)
}

fn check(settings: &WireSettings, as_json: bool) -> Result<()> {
    if settings.sockets.is_empty() {
        anyhow::bail!("no sockets configured");
    }

    let mut report = Vec::new();
    let mut skipped_total = 0;
    for socket in &settings.sockets {
        let mut groups = Vec::new();
        for (namespace, cfg) in &socket.namespaces {
            groups.push((format!("{namespace} emitters"), &cfg.emitters, Role::Emitter));
            groups.push((format!("{namespace} listeners"), &cfg.listeners, Role::Listener));
            groups.push((format!("{namespace} emitBacks"), &cfg.emit_backs, Role::EmitBack));
        }
        groups.push(("vuex actions".to_owned(), &socket.vuex.actions, Role::Listener));
        groups.push(("vuex mutations".to_owned(), &socket.vuex.mutations, Role::Listener));
        groups.push(("vuex emitBacks".to_owned(), &socket.vuex.emit_backs, Role::EmitBack));

        let mut entries = Vec::new();
        for (group, raws, role) in groups {
            if raws.is_empty() {
                continue;
            }
            let (bindings, skipped) = compile_all(raws, role);
            skipped_total += skipped.len();
            entries.push(json!({
                "group": group,
                "bindings": bindings,
                "skipped": skipped
                    .iter()
                    .map(|s| json!({"raw": s.raw, "reason": s.reason.to_string()}))
                    .collect::<Vec<Value>>(),
            }));
        }
        report.push(json!({"socket": socket.label(), "groups": entries}));
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    for socket in &report {
        println!("{}", socket["socket"].as_str().unwrap_or_default());
        for group in socket["groups"].as_array().into_iter().flatten() {
            println!("  {}", group["group"].as_str().unwrap_or_default());
            for binding in group["bindings"].as_array().into_iter().flatten() {
                println!("    ok    {binding}");
            }
            for skip in group["skipped"].as_array().into_iter().flatten() {
                println!("    skip  {} ({})", skip["raw"], skip["reason"].as_str().unwrap_or_default());
            }
        }
    }
    println!("{skipped_total} directive(s) skipped");
    Ok(())
}

fn resolve(settings: &WireSettings, name: Option<String>, channel: Option<String>, persist: Option<String>) -> Result<()> {
    let opts = ConnectOptions {
        name,
        channel,
        persist: persist.map_or(Persist::Flag(false), Persist::Key),
        ..Default::default()
    };
    let resolved = resolve_connect(settings, &[], &opts)?;
    let out = json!({
        "label": resolved.label,
        "url": resolved.url,
        "namespace": resolved.namespace,
        "scope": resolved.scope,
        "persistKey": resolved.persist_key,
        "teardown": resolved.teardown,
        "statusProp": resolved.status_prop,
        "emitTimeoutMs": resolved.emit_timeout.map(|d| d.as_millis() as u64),
        "namespaceCfg": resolved.namespace_cfg,
        "vuex": resolved.vuex,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
