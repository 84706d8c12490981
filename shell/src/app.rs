//! Command-line surface and the shell's event loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use parking_lot::RwLock;
use tracing::warn;
use unicorn_core::{Language, Registry, TokenStream, cache, decode_command};

use crate::bus::{self, Bus, BusError, Painter};
use crate::dmenu;
use crate::events::{Event, EventQueue};
use crate::frontend::{self, QueuePainter};
use crate::proxy::{self, ProxyConfig};

/// Interactive shell federating remote command handlers over MQTT.
///
/// Without arguments an interactive prompt is started. Any bare argument
/// (or everything after `--`) forms a command line that is published once
/// and the shell exits.
#[derive(Parser, Debug)]
#[command(name = "unicorn-shell", version)]
pub struct Cli {
    /// Broker hostname
    #[arg(long, default_value = "mqtt")]
    pub host: String,

    /// Broker port
    #[arg(long, default_value_t = 1883)]
    pub port: u16,

    /// SOCKS4 proxy, as host:port[:user]
    #[arg(long)]
    pub proxy: Option<ProxyConfig>,

    /// Command history file
    #[arg(long)]
    pub history: Option<PathBuf>,

    /// Known-IDL cache file
    #[arg(long)]
    pub cache: Option<PathBuf>,

    /// Print completion candidates for the given command line and exit
    #[arg(long)]
    pub options: bool,

    /// Print the menu tree of leaf commands once IDLs have arrived, then
    /// exit
    #[arg(long)]
    pub dmenu_tree: bool,

    /// Command line to publish non-interactively
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    let mut registry = load_registry(&cli);
    let language = Language::compose(&registry);

    // Completion for external callers works entirely off the cache; no
    // bus connection is made.
    if cli.options {
        return print_options(&language, &cli.command);
    }

    let (bus_host, bus_port) = endpoint(&cli)?;

    if !cli.command.is_empty() && !cli.dmenu_tree {
        let line = shlex::try_join(cli.command.iter().map(String::as_str))
            .context("joining command line")?;
        if let Some(dispatch) = decode_command(&line, &language.routes) {
            bus::publish_once(&bus_host, bus_port, &dispatch.topic, &dispatch.payload)?;
        }
        return Ok(());
    }

    let queue = Arc::new(EventQueue::new());
    let shared = Arc::new(RwLock::new(language));

    let mut editor_slot = None;
    let painter: Box<dyn Painter> = if cli.dmenu_tree {
        Box::new(QueuePainter::new(Arc::clone(&queue)))
    } else {
        let (editor, painter) = frontend::editor(Arc::clone(&shared), cli.history.as_deref())?;
        editor_slot = Some(editor);
        painter
    };
    let bus = Bus::connect(&bus_host, bus_port, Arc::clone(&queue), painter);

    match editor_slot {
        Some(editor) => {
            let queue = Arc::clone(&queue);
            let history = cli.history.clone();
            std::thread::spawn(move || frontend::input_loop(editor, history, queue));
        }
        None => {
            // Give announcements a moment to arrive, then print the tree
            // and shut down.
            let queue = Arc::clone(&queue);
            let language = Arc::clone(&shared);
            let menu_host = cli.host.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_secs(1));
                print!("{}", dmenu::render(&language.read(), &menu_host));
                queue.push(Event::Terminate);
            });
        }
    }

    loop {
        match queue.pop() {
            Event::Terminate => break,
            Event::Input(line) => dispatch_line(&bus, &shared, &line),
            Event::IdlConfig(idl) => {
                registry.upsert(idl);
                *shared.write() = Language::compose(&registry);
                if let Some(path) = &cli.cache {
                    if let Err(err) = cache::save(&registry, path) {
                        warn!("cache write failed: {err}");
                    }
                }
            }
            Event::IdlStdout(line) => println!("{line}"),
            Event::IdlStderr(line) => eprintln!("{line}"),
        }
    }
    Ok(())
}

/// Decode one submitted line; bind response topics and publish when it
/// routes, stay silent when it does not.
fn dispatch_line(bus: &Bus, shared: &RwLock<Language>, line: &str) {
    let dispatch = {
        let language = shared.read();
        decode_command(line, &language.routes)
    };
    let Some(dispatch) = dispatch else {
        return;
    };

    let route = &dispatch.route;
    if let Err(err) = bus.set_response_topics(
        route.stdout.clone(),
        route.stderr.clone(),
        route.result.clone(),
        &dispatch.suffix,
    ) {
        warn!("dispatch aborted: {err}");
        return;
    }
    if let Err(err) = bus.publish(&dispatch.topic, &dispatch.payload) {
        warn!("publish failed: {err}");
    }
}

fn load_registry(cli: &Cli) -> Registry {
    match &cli.cache {
        Some(path) if path.exists() => match cache::load(path) {
            Ok(registry) => registry,
            Err(err) => {
                warn!("ignoring idl cache: {err}");
                Registry::new()
            }
        },
        _ => Registry::new(),
    }
}

/// Complete the joined command line at its end and print the candidates,
/// shell-quoted and space-separated.
fn print_options(language: &Language, command: &[String]) -> anyhow::Result<()> {
    let mut line = shlex::try_join(command.iter().map(String::as_str))
        .context("joining command line")?;
    line.push(' ');

    let mut toks = TokenStream::new(&line, line.len());
    let candidates = language.grammar.complete(&mut toks).unwrap_or_default();
    let quoted: Vec<String> = candidates
        .iter()
        .map(|word| shlex::try_quote(word).map(|q| q.into_owned()))
        .collect::<Result<_, _>>()
        .context("quoting candidates")?;
    println!("{}", quoted.join(" "));
    Ok(())
}

/// The TCP endpoint the bus client dials: the broker itself, or a local
/// SOCKS4 tunnel towards it.
fn endpoint(cli: &Cli) -> anyhow::Result<(String, u16)> {
    match &cli.proxy {
        Some(config) => {
            let local = proxy::spawn_socks4_tunnel(config, &cli.host, cli.port)
                .map_err(BusError::Proxy)?;
            Ok((local.ip().to_string(), local.port()))
        }
        None => Ok((cli.host.clone(), cli.port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_arguments_accumulate_into_a_command_line() {
        let cli = Cli::try_parse_from(["unicorn-shell", "room", "kitchen", "on"]).unwrap();
        assert_eq!(cli.command, vec!["room", "kitchen", "on"]);
        assert!(!cli.options);
    }

    #[test]
    fn double_dash_passes_flag_like_words_through() {
        let cli = Cli::try_parse_from(["unicorn-shell", "--", "--host", "x"]).unwrap();
        assert_eq!(cli.command, vec!["--host", "x"]);
        assert_eq!(cli.host, "mqtt");
    }

    #[test]
    fn connection_flags_are_parsed() {
        let cli = Cli::try_parse_from([
            "unicorn-shell",
            "--host",
            "broker.local",
            "--port",
            "1884",
            "--proxy",
            "hop:1080:peter",
            "--options",
            "room",
        ])
        .unwrap();
        assert_eq!(cli.host, "broker.local");
        assert_eq!(cli.port, 1884);
        assert!(cli.options);
        let proxy = cli.proxy.unwrap();
        assert_eq!((proxy.host.as_str(), proxy.port), ("hop", 1080));
        assert_eq!(cli.command, vec!["room"]);
    }

    #[test]
    fn dmenu_tree_flag_uses_kebab_case() {
        let cli = Cli::try_parse_from(["unicorn-shell", "--dmenu-tree"]).unwrap();
        assert!(cli.dmenu_tree);
    }
}
