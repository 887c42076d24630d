//! Chorus CLI: checks configurations and shows how the scope tree resolves.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::json;

use chorus::framework::{PluginRegistry, ResolvedContext, ScopeConfig, ScopeContext, ScopeTree};
use chorus::prelude::*;
use chorus::runtime::config::{ChorusConfig, ConfigLoader, LogOutput, validate_config};
use chorus::runtime::LoggingBuilder;

/// Chorus bot configuration tools
#[derive(Parser, Debug)]
#[command(name = "chorus")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate a configuration, including its scope tree
    Check(Source),
    /// Show the aliases and listeners active in one context
    Resolve {
        #[command(flatten)]
        source: Source,

        /// Network identifier
        #[arg(long)]
        network: String,

        /// Guild id
        #[arg(long)]
        guild: Option<String>,

        /// Channel id
        #[arg(long)]
        channel: Option<String>,

        /// User id
        #[arg(long)]
        user: Option<String>,

        /// Resolve as if this command had been invoked
        #[arg(long)]
        command: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct Source {
    /// Configuration file; searched for in the usual places when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile
    #[arg(short, long)]
    profile: Option<String>,

    /// Accept plugin types this binary does not know, as inert listeners
    #[arg(long)]
    lenient: bool,
}

/// Stands in for a plugin type the CLI cannot instantiate.
struct Placeholder;

#[async_trait]
impl Listener for Placeholder {}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    LoggingBuilder::new()
        .with_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .output(LogOutput::Stderr)
        .init();

    match cli.command {
        Command::Check(source) => check(&source),
        Command::Resolve {
            source,
            network,
            guild,
            channel,
            user,
            command,
            json,
        } => {
            let mut ctx = ScopeContext::network(network);
            if let Some(guild) = guild {
                ctx = ctx.with_guild(guild);
            }
            if let Some(channel) = channel {
                ctx = ctx.with_channel(channel);
            }
            if let Some(user) = user {
                ctx = ctx.with_user(user);
            }
            if let Some(command) = command {
                ctx = ctx.with_command(command);
            }
            resolve(&source, &ctx, json)
        }
    }
}

fn load(source: &Source) -> anyhow::Result<(ChorusConfig, ScopeTree)> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &source.config {
        loader = loader.file(path);
    }
    if let Some(profile) = &source.profile {
        loader = loader.profile(profile);
    }
    let config = loader.load().context("failed to load configuration")?;
    validate_config(&config).context("invalid configuration")?;

    let registry = registry_for(&config.scope, source.lenient);
    let tree = ScopeTree::load(&config.scope, &registry, config.dispatch.case)
        .context("invalid scope tree")?;
    Ok((config, tree))
}

fn registry_for(scope: &ScopeConfig, lenient: bool) -> PluginRegistry {
    let mut registry = PluginRegistry::with_builtins();
    if lenient {
        let mut types = BTreeSet::new();
        collect_plugin_types(scope, &mut types);
        for plugin in types {
            if !registry.contains(&plugin) {
                tracing::debug!(plugin = %plugin, "Using a placeholder listener");
                registry.register_config(plugin, |_: serde_json::Value| Placeholder);
            }
        }
    }
    registry
}

fn collect_plugin_types(scope: &ScopeConfig, types: &mut BTreeSet<String>) {
    types.extend(scope.listeners.iter().map(|l| l.plugin.clone()));
    for child in &scope.children {
        collect_plugin_types(child, types);
    }
}

fn check(source: &Source) -> anyhow::Result<()> {
    let (config, tree) = load(source)?;
    let plugins: BTreeSet<&str> = tree.instances().iter().map(|i| i.plugin()).collect();

    println!("configuration ok");
    println!("  listeners:  {}", tree.instances().len());
    println!("  plugins:    {}", plugins.into_iter().collect::<Vec<_>>().join(", "));
    println!("  networks:   {}", config.networks.len());
    println!("  admins:     {}", config.admins.len());
    if tree.has_command_scopes() {
        println!("  command-scoped nodes present");
    }
    Ok(())
}

fn resolve(source: &Source, ctx: &ScopeContext, as_json: bool) -> anyhow::Result<()> {
    let (_config, tree) = load(source)?;
    let resolved = chorus::framework::resolve(&tree, ctx);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&to_json(&resolved))?);
    } else {
        print_text(&resolved);
    }

    if !resolved.errors().is_empty() {
        bail!("{} resolution problem(s)", resolved.errors().len());
    }
    Ok(())
}

fn to_json(resolved: &ResolvedContext) -> serde_json::Value {
    let aliases: Vec<_> = resolved
        .aliases()
        .iter()
        .map(|(name, alias)| {
            json!({
                "name": name,
                "listener": alias.listener.name(),
                "exposed": alias.exposed,
            })
        })
        .collect();
    let listeners: Vec<_> = resolved
        .listeners()
        .iter()
        .map(|l| {
            json!({
                "name": l.name(),
                "plugin": l.plugin(),
                "scopes": l.chain(),
                "passive": l.is_passive(),
            })
        })
        .collect();
    let errors: Vec<_> = resolved.errors().iter().map(ToString::to_string).collect();

    json!({
        "context": resolved.context(),
        "tree_version": resolved.version(),
        "aliases": aliases,
        "listeners": listeners,
        "errors": errors,
    })
}

fn print_text(resolved: &ResolvedContext) {
    println!("context: {}", resolved.context());

    println!("aliases:");
    if resolved.aliases().is_empty() {
        println!("  (none)");
    }
    for (name, alias) in resolved.aliases() {
        let hidden = if alias.exposed { "" } else { " (hidden)" };
        println!("  {name} -> {}{hidden}", alias.listener.name());
    }

    println!("listeners:");
    if resolved.listeners().is_empty() {
        println!("  (none)");
    }
    for listener in resolved.listeners() {
        let passive = if listener.is_passive() { ", passive" } else { "" };
        println!(
            "  {} ({}{passive}) via {}",
            listener.name(),
            listener.plugin(),
            listener.chain().join(" > ")
        );
    }

    for error in resolved.errors() {
        eprintln!("warning: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> ScopeConfig {
        serde_json::from_value(json!({
            "listeners": [{ "plugin": "help" }, { "plugin": "dice", "aliases": ["roll"] }],
            "children": [{ "match": { "channel": "#games" },
                "listeners": [{ "plugin": "trivia", "aliases": ["quiz"] }] }]
        }))
        .unwrap()
    }

    #[test]
    fn test_collect_plugin_types() {
        let mut types = BTreeSet::new();
        collect_plugin_types(&scope(), &mut types);
        assert_eq!(types.into_iter().collect::<Vec<_>>(), ["dice", "help", "trivia"]);
    }

    #[test]
    fn test_lenient_registry_accepts_unknown_plugins() {
        let strict = registry_for(&scope(), false);
        assert!(ScopeTree::load(&scope(), &strict, Default::default()).is_err());

        let lenient = registry_for(&scope(), true);
        let tree = ScopeTree::load(&scope(), &lenient, Default::default()).unwrap();
        let resolved = chorus::framework::resolve(
            &tree,
            &ScopeContext::network("libera").with_channel("#games"),
        );
        let names: Vec<&str> = resolved.aliases().keys().map(String::as_str).collect();
        assert_eq!(names, ["help", "quiz", "roll"]);
    }

    #[test]
    fn test_cli_parses_resolve() {
        let cli = Cli::try_parse_from([
            "chorus", "resolve", "--network", "libera", "--channel", "#x", "--json", "--lenient",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Resolve { ref network, json: true, source: Source { lenient: true, .. }, .. }
                if network == "libera"
        ));
    }
}
