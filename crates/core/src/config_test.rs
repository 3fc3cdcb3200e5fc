//! CLI token interpretation tests

use clap::{Arg, ArgAction, Command};

use crate::config::{
    common_stage_flags, parse_stage_tokens, split_alias, GlobalConfig, StageConfig,
};
use crate::{is_addr, is_file};

fn argv(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

// ============================================================================
// Token classification
// ============================================================================

#[test]
fn test_is_addr() {
    assert!(is_addr("192.0.2.1:179"));
    assert!(is_addr("[2001:db8::1]:179"));
    assert!(is_addr("collector.example.net:179"));

    assert!(!is_addr("speaker"));
    assert!(!is_addr("192.0.2.1"));
    assert!(!is_addr("2001:db8::1"));
    assert!(!is_addr("dir/file:1"));
    assert!(!is_addr("host:99999"));
    assert!(!is_addr("--left"));
    assert!(!is_addr(":179"));
}

#[test]
fn test_is_file() {
    assert!(is_file("dump.mrt"));
    assert!(!is_file("dump.json"));
    assert!(!is_file("--mrt"));

    let tmp = tempfile::NamedTempFile::new().unwrap();
    assert!(is_file(tmp.path().to_str().unwrap()));
}

#[test]
fn test_split_alias() {
    assert_eq!(split_alias("tcp@peer1"), ("tcp", Some("@peer1".to_string())));
    assert_eq!(split_alias("tcp"), ("tcp", None));
    assert_eq!(split_alias("@x"), ("@x", None));
    assert_eq!(split_alias("tcp@"), ("tcp@", None));
}

// ============================================================================
// Global flags
// ============================================================================

#[test]
fn test_split_argv_stops_at_first_stage_token() {
    let (globals, rest) = GlobalConfig::split_argv(&argv(&[
        "--log", "debug", "--reverse", "speaker", "--wait", "GO",
    ]));
    assert_eq!(globals, argv(&["--log", "debug", "--reverse"]));
    assert_eq!(rest, argv(&["speaker", "--wait", "GO"]));
}

#[test]
fn test_split_argv_explicit_boundary() {
    let (globals, rest) = GlobalConfig::split_argv(&argv(&["--silent", "--", "--weird"]));
    assert_eq!(globals, argv(&["--silent"]));
    assert_eq!(rest, argv(&["--weird"]));
}

#[test]
fn test_global_parse() {
    let cfg = GlobalConfig::parse(&argv(&[
        "--log",
        "trace",
        "--stdin",
        "--short-asn",
        "--events",
        "START,ESTABLISHED",
    ]))
    .unwrap();

    assert_eq!(cfg.log, "trace");
    assert!(cfg.stdin);
    assert!(cfg.short_asn);
    assert!(!cfg.reverse);
    assert_eq!(cfg.events, argv(&["START", "ESTABLISHED"]));
}

#[test]
fn test_global_parse_rejects_unknown() {
    assert!(GlobalConfig::parse(&argv(&["--bogus"])).is_err());
}

// ============================================================================
// Stage segments
// ============================================================================

fn stage_command() -> Command {
    common_stage_flags(
        Command::new("test")
            .arg(Arg::new("mode").long("mode").value_name("MODE"))
            .arg(Arg::new("fast").long("fast").action(ArgAction::SetTrue)),
    )
}

#[test]
fn test_stage_flags_and_positionals_are_separated() {
    let cmd = stage_command();
    let (matches, positionals) = parse_stage_tokens(
        &cmd,
        &argv(&["--mode", "strict", "one", "--fast", "two"]),
    )
    .unwrap();

    assert_eq!(positionals, argv(&["one", "two"]));
    let cfg = StageConfig::from_matches(matches);
    assert_eq!(cfg.str_opt("mode").as_deref(), Some("strict"));
    assert!(cfg.flag("fast"));
    assert_eq!(cfg.in_target, "next");
}

#[test]
fn test_stage_common_flags() {
    let cmd = stage_command();
    let (matches, _) = parse_stage_tokens(
        &cmd,
        &argv(&["-L", "--in", "here", "--wait", "A,B", "--stop", "C"]),
    )
    .unwrap();

    let cfg = StageConfig::from_matches(matches);
    assert!(cfg.left);
    assert!(!cfg.right);
    assert_eq!(cfg.in_target, "here");
    assert_eq!(cfg.wait, argv(&["A", "B"]));
    assert_eq!(cfg.stop, argv(&["C"]));
}

#[test]
fn test_stage_equals_form_takes_no_extra_token() {
    let cmd = stage_command();
    let (matches, positionals) =
        parse_stage_tokens(&cmd, &argv(&["--mode=loose", "tail"])).unwrap();

    let cfg = StageConfig::from_matches(matches);
    assert_eq!(cfg.str_opt("mode").as_deref(), Some("loose"));
    assert_eq!(positionals, argv(&["tail"]));
}

#[test]
fn test_stage_unknown_flag_is_an_error() {
    let cmd = stage_command();
    assert!(parse_stage_tokens(&cmd, &argv(&["--nope"])).is_err());
}

#[test]
fn test_unqueried_flags_default_cleanly() {
    let cmd = stage_command();
    let (matches, _) = parse_stage_tokens(&cmd, &[]).unwrap();
    let cfg = StageConfig::from_matches(matches);

    assert!(!cfg.flag("fast"));
    assert!(!cfg.flag("never-defined"));
    assert_eq!(cfg.str_opt("never-defined"), None);
    assert!(cfg.strings("never-defined").is_empty());
}
