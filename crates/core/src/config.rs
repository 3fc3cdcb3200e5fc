//! CLI token interpretation and per-stage configuration
//!
//! The command line is `bgpipe [GLOBAL] [--] STAGE [FLAGS] [ARGS] [--] ...`.
//! Global flags are parsed first; the remaining tokens are walked
//! left-to-right into stage segments, with `--` as an explicit boundary and
//! first-token inference (socket address -> `tcp`, stat-able path -> `mrt`).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::Result;

/// Whether a token looks like a peer address (`IP:port` or `[v6]:port`)
pub fn is_addr(token: &str) -> bool {
    if token.starts_with('-') {
        return false;
    }
    if token.parse::<SocketAddr>().is_ok() {
        return true;
    }
    // hostname:port, but never a path or a bare IPv6
    match token.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty()
                && !host.contains('/')
                && !host.contains(':')
                && !port.is_empty()
                && port.chars().all(|c| c.is_ascii_digit())
                && port.parse::<u16>().is_ok()
        }
        None => false,
    }
}

/// Whether a token looks like an input file (stat-able, or `.mrt` by name)
pub fn is_file(token: &str) -> bool {
    if token.starts_with('-') {
        return false;
    }
    let path = Path::new(token);
    path.is_file() || path.extension().is_some_and(|e| e == "mrt")
}

/// Parsed global flags
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    /// Log level filter (`--log`)
    pub log: String,

    /// Reverse the stage list and swap L/R (`--reverse`)
    pub reverse: bool,

    /// Do not auto-attach a stdout stage (`--silent`)
    pub silent: bool,

    /// Auto-attach a stdin stage (`--stdin`)
    pub stdin: bool,

    /// Event types to log (`--events`)
    pub events: Vec<String>,

    /// Ban the 4-byte ASN capability (`--short-asn`)
    pub short_asn: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log: "info".to_string(),
            reverse: false,
            silent: false,
            stdin: false,
            events: Vec::new(),
            short_asn: false,
        }
    }
}

impl GlobalConfig {
    /// The global flag set
    pub fn command() -> Command {
        Command::new("bgpipe")
            .no_binary_name(true)
            .disable_help_flag(true)
            .arg(
                Arg::new("log")
                    .long("log")
                    .value_name("LEVEL")
                    .default_value("info")
                    .help("log level (trace/debug/info/warn/error)"),
            )
            .arg(
                Arg::new("reverse")
                    .long("reverse")
                    .action(ArgAction::SetTrue)
                    .help("reverse the pipeline"),
            )
            .arg(
                Arg::new("silent")
                    .long("silent")
                    .action(ArgAction::SetTrue)
                    .help("do not attach an automatic stdout stage"),
            )
            .arg(
                Arg::new("stdin")
                    .long("stdin")
                    .action(ArgAction::SetTrue)
                    .help("attach an automatic stdin stage"),
            )
            .arg(
                Arg::new("events")
                    .long("events")
                    .value_name("LIST")
                    .value_delimiter(',')
                    .action(ArgAction::Append)
                    .help("log the given pipe events"),
            )
            .arg(
                Arg::new("short-asn")
                    .long("short-asn")
                    .action(ArgAction::SetTrue)
                    .help("use 2-byte ASN numbers"),
            )
    }

    /// Split argv into global tokens and the stage tokens that follow.
    ///
    /// Globals run until the first token that is not a flag; `--` ends them
    /// explicitly.
    pub fn split_argv(argv: &[String]) -> (Vec<String>, Vec<String>) {
        let mut i = 0;
        let mut globals = Vec::new();
        while i < argv.len() {
            let token = &argv[i];
            if token == "--" {
                i += 1;
                break;
            }
            if !token.starts_with('-') {
                break;
            }
            globals.push(token.clone());
            // value-taking globals consume the next token
            if matches!(token.as_str(), "--log" | "--events") && i + 1 < argv.len() {
                i += 1;
                globals.push(argv[i].clone());
            }
            i += 1;
        }
        (globals, argv[i..].to_vec())
    }

    /// Parse the global token list
    pub fn parse(tokens: &[String]) -> Result<Self> {
        let matches = Self::command().try_get_matches_from(tokens)?;
        Ok(Self {
            log: matches
                .get_one::<String>("log")
                .cloned()
                .unwrap_or_else(|| "info".to_string()),
            reverse: matches.get_flag("reverse"),
            silent: matches.get_flag("silent"),
            stdin: matches.get_flag("stdin"),
            events: matches
                .get_many::<String>("events")
                .map(|v| v.cloned().collect())
                .unwrap_or_default(),
            short_asn: matches.get_flag("short-asn"),
        })
    }
}

/// Add the flags every stage understands to its private flag set
pub fn common_stage_flags(cmd: Command) -> Command {
    cmd.no_binary_name(true)
        .disable_help_flag(true)
        .arg(
            Arg::new("left")
                .long("left")
                .short('L')
                .action(ArgAction::SetTrue)
                .help("operate in the L direction"),
        )
        .arg(
            Arg::new("right")
                .long("right")
                .short('R')
                .action(ArgAction::SetTrue)
                .help("operate in the R direction"),
        )
        .arg(
            Arg::new("in")
                .long("in")
                .value_name("TARGET")
                .default_value("next")
                .help("where to inject new messages (next/here/first/last/INDEX/@NAME)"),
        )
        .arg(
            Arg::new("wait")
                .long("wait")
                .value_name("EVENT")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .help("start only after the given event(s)"),
        )
        .arg(
            Arg::new("stop")
                .long("stop")
                .value_name("EVENT")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .help("stop when the given event(s) fire"),
        )
}

/// Per-stage configuration, read by the stage during attach
#[derive(Debug, Clone, Default)]
pub struct StageConfig {
    /// Direction overrides (`--left` / `--right`)
    pub left: bool,
    pub right: bool,

    /// Injection target (`--in`)
    pub in_target: String,

    /// Start/stop gate events, raw (possibly short) names
    pub wait: Vec<String>,
    pub stop: Vec<String>,

    /// Named positional arguments declared by the stage
    pub args: HashMap<String, String>,

    /// Remaining positionals, for stages that take a free argument list
    pub rest: Vec<String>,

    matches: Option<ArgMatches>,
}

impl StageConfig {
    /// Build from parsed stage flags
    pub fn from_matches(matches: ArgMatches) -> Self {
        Self {
            left: matches.get_flag("left"),
            right: matches.get_flag("right"),
            in_target: matches
                .get_one::<String>("in")
                .cloned()
                .unwrap_or_else(|| "next".to_string()),
            wait: matches
                .get_many::<String>("wait")
                .map(|v| v.cloned().collect())
                .unwrap_or_default(),
            stop: matches
                .get_many::<String>("stop")
                .map(|v| v.cloned().collect())
                .unwrap_or_default(),
            args: HashMap::new(),
            rest: Vec::new(),
            matches: Some(matches),
        }
    }

    /// Value of a stage-private boolean flag
    pub fn flag(&self, name: &str) -> bool {
        self.matches
            .as_ref()
            .and_then(|m| m.try_get_one::<bool>(name).ok().flatten())
            .copied()
            .unwrap_or(false)
    }

    /// Value of a stage-private string flag
    pub fn str_opt(&self, name: &str) -> Option<String> {
        self.matches
            .as_ref()
            .and_then(|m| m.try_get_one::<String>(name).ok().flatten())
            .cloned()
    }

    /// Values of a stage-private repeatable flag
    pub fn strings(&self, name: &str) -> Vec<String> {
        self.matches
            .as_ref()
            .and_then(|m| m.try_get_many::<String>(name).ok().flatten())
            .map(|v| v.cloned().collect())
            .unwrap_or_default()
    }

    /// A declared positional argument
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(String::as_str)
    }
}

/// Split one stage segment into flag tokens and positional tokens, then
/// parse the flags against the stage's command. Returns the matches and the
/// positional tokens in order.
pub(crate) fn parse_stage_tokens(
    cmd: &Command,
    tokens: &[String],
) -> Result<(ArgMatches, Vec<String>)> {
    let mut flags = Vec::new();
    let mut positionals = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        if token.starts_with('-') && token.len() > 1 && token != "--" {
            flags.push(token.clone());
            if !token.contains('=') && flag_takes_value(cmd, token) && i + 1 < tokens.len() {
                i += 1;
                flags.push(tokens[i].clone());
            }
        } else if token != "--" {
            positionals.push(token.clone());
        }
        i += 1;
    }

    let matches = cmd.clone().try_get_matches_from(flags)?;
    Ok((matches, positionals))
}

fn flag_takes_value(cmd: &Command, token: &str) -> bool {
    let name = token.trim_start_matches('-');
    cmd.get_arguments().any(|arg| {
        let named = arg.get_long() == Some(name)
            || (name.len() == 1 && arg.get_short() == name.chars().next());
        let takes_value = !matches!(
            arg.get_action(),
            ArgAction::SetTrue | ArgAction::SetFalse | ArgAction::Count
        );
        named && takes_value
    })
}

/// Split `cmd@alias` into the command and its optional alias
pub(crate) fn split_alias(token: &str) -> (&str, Option<String>) {
    match token.split_once('@') {
        Some((cmd, alias)) if !cmd.is_empty() && !alias.is_empty() => {
            (cmd, Some(format!("@{alias}")))
        }
        _ => (token, None),
    }
}
