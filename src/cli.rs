use crate::{
    app::{App, GroupDetail, StartupOptions, VersionState},
    config,
    log::{log_level_label, Verbosity},
    rewrite::{self, FieldStatus, RewriteOutcome},
    store::{AssociationStore, ConfiguredStore, FieldName, RecordGroupId},
    version::VersionToken,
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{
    io::{self, Write},
    path::PathBuf,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct GlobalOptions {
    format: OutputFormat,
    install_root: Option<PathBuf>,
    store_file: Option<PathBuf>,
    verbosity: Option<Verbosity>,
}

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    Status,
    Current,
    Versions,
    Details,
    Groups,
    Switch(SwitchOptions),
    Restore(RestoreOptions),
    Export(PathBuf),
    Paths,
    Help,
    Version,
}

#[derive(Debug, PartialEq, Eq)]
struct SwitchOptions {
    target: Option<String>,
    from: Option<String>,
    yes: bool,
    no_backup: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct RestoreOptions {
    yes: bool,
    force: bool,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, command) = parse_args(&args)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("vivswitch v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let mut app = App::initialize(StartupOptions {
                data_dir: None,
                install_root: global.install_root,
                store_file: global.store_file,
                verbosity: global.verbosity,
            })?;
            run_command(&mut app, command, global.format)
        }
    }
}

fn parse_args(args: &[String]) -> Result<(GlobalOptions, CliCommand)> {
    let (global, tokens) = parse_global_options(args)?;
    let command = parse_subcommand(&tokens)?;
    Ok((global, command))
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut format = OutputFormat::Text;
    let mut install_root = None;
    let mut store_file = None;
    let mut verbosity = None;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let (name, inline) = match arg.split_once('=') {
            Some((name, value)) if name.starts_with("--") => (name, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        match name {
            "--format" => {
                let value = inline
                    .or_else(|| iter.next().cloned())
                    .context("--format requires a value")?;
                format = OutputFormat::parse(&value)
                    .with_context(|| format!("Unknown format: {value} (use 'text' or 'json')"))?;
            }
            "--root" => {
                let value = inline
                    .or_else(|| iter.next().cloned())
                    .context("--root requires a directory")?;
                install_root = Some(PathBuf::from(value));
            }
            "--store" => {
                let value = inline
                    .or_else(|| iter.next().cloned())
                    .context("--store requires a file")?;
                store_file = Some(PathBuf::from(value));
            }
            "-q" | "--quiet" => verbosity = Some(Verbosity::Quiet),
            "-v" | "--verbose" => verbosity = Some(Verbosity::Verbose),
            _ => tokens.push(arg.to_string()),
        }
    }

    Ok((
        GlobalOptions {
            format,
            install_root,
            store_file,
            verbosity,
        },
        tokens,
    ))
}

fn parse_subcommand(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Status);
    };
    let rest = tokens.get(1..).unwrap_or(&[]);
    let command = match head.as_str() {
        "status" => CliCommand::Status,
        "current" => CliCommand::Current,
        "versions" | "list" => CliCommand::Versions,
        "details" => CliCommand::Details,
        "groups" => CliCommand::Groups,
        "switch" => CliCommand::Switch(parse_switch(rest)?),
        "restore" => CliCommand::Restore(parse_restore(rest)?),
        "export" => match rest {
            [path] if !path.starts_with('-') => CliCommand::Export(PathBuf::from(path)),
            [] => bail!("export requires a file path"),
            _ => bail!("export takes a single file path"),
        },
        "paths" => CliCommand::Paths,
        "help" | "--help" | "-h" => CliCommand::Help,
        "version" | "--version" | "-V" => CliCommand::Version,
        other => bail!("Unknown command: {other} (see 'vivswitch help')"),
    };
    Ok(command)
}

fn parse_switch(args: &[String]) -> Result<SwitchOptions> {
    let mut target = None;
    let mut from = None;
    let mut yes = false;
    let mut no_backup = false;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--yes" | "-y" => yes = true,
            "--no-backup" => no_backup = true,
            "--from" => {
                from = Some(iter.next().context("--from requires a version")?.to_string());
            }
            value if value.starts_with("--from=") => {
                from = Some(value.trim_start_matches("--from=").to_string());
            }
            value if value.starts_with('-') => bail!("Unknown switch option: {value}"),
            value => {
                if target.is_some() {
                    bail!("switch takes a single target version");
                }
                target = Some(value.to_string());
            }
        }
    }

    Ok(SwitchOptions {
        target,
        from,
        yes,
        no_backup,
    })
}

fn parse_restore(args: &[String]) -> Result<RestoreOptions> {
    let mut options = RestoreOptions::default();
    for arg in args {
        match arg.as_str() {
            "--yes" | "-y" => options.yes = true,
            "--force" => options.force = true,
            other => bail!("Unknown restore option: {other}"),
        }
    }
    Ok(options)
}

fn run_command(
    app: &mut App<ConfiguredStore>,
    command: CliCommand,
    format: OutputFormat,
) -> Result<()> {
    match command {
        CliCommand::Status => {
            let state = app.version_state();
            print_status(&state, format)
        }
        CliCommand::Current => {
            let current = app.detect_current_version();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&current)?),
                OutputFormat::Text => match current {
                    Some(version) => println!("{version}"),
                    None => println!("No Vivado version found in registry"),
                },
            }
            Ok(())
        }
        CliCommand::Versions => {
            let (versions, _) = app.list_available_versions();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&versions)?),
                OutputFormat::Text => {
                    for version in &versions {
                        println!("{version}");
                    }
                }
            }
            Ok(())
        }
        CliCommand::Details => print_details(&app.details(), format),
        CliCommand::Groups => print_groups(format),
        CliCommand::Switch(options) => switch(app, options, format),
        CliCommand::Restore(options) => restore(app, options, format),
        CliCommand::Export(path) => {
            let count = app.export(&path)?;
            println!("Exported {count} association entries to {}", path.display());
            Ok(())
        }
        CliCommand::Paths => print_paths(app, format),
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

fn print_status(state: &VersionState, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(state)?);
        }
        OutputFormat::Text => {
            for line in status_lines(state) {
                println!("{line}");
            }
        }
    }
    Ok(())
}

// Scan diagnostics already reach stderr through the operation log.
fn status_lines(state: &VersionState) -> Vec<String> {
    let current = match &state.current {
        Some(version) => format!("Current version: {version}"),
        None => "Current version: not found".to_string(),
    };
    let available = if state.available.is_empty() {
        "Available versions: none".to_string()
    } else {
        format!("Available versions: {}", join_versions(&state.available))
    };
    vec![
        current,
        format!("Installation root: {}", state.install_root.display()),
        available,
    ]
}

fn join_versions(versions: &[VersionToken]) -> String {
    versions
        .iter()
        .map(VersionToken::as_str)
        .collect::<Vec<&str>>()
        .join(", ")
}

#[derive(Serialize)]
struct FieldDetailItem {
    group: RecordGroupId,
    field: FieldName,
    key: String,
    value: Option<String>,
    error: Option<String>,
}

fn print_details(details: &[GroupDetail], format: OutputFormat) -> Result<()> {
    let items: Vec<FieldDetailItem> = details
        .iter()
        .flat_map(|detail| {
            detail.fields.iter().map(move |field| FieldDetailItem {
                group: detail.group,
                field: field.field,
                key: field.key_path.clone(),
                value: field.value.as_ref().ok().cloned(),
                error: field.value.as_ref().err().map(|err| err.to_string()),
            })
        })
        .collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            for item in items {
                println!("{}:", item.key);
                match (item.value, item.error) {
                    (Some(value), _) => println!("  {value}"),
                    (None, Some(error)) => println!("  access failed: {error}"),
                    (None, None) => println!("  -"),
                }
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct GroupItem {
    group: RecordGroupId,
    key: &'static str,
    label: &'static str,
    fields: Vec<&'static str>,
}

fn print_groups(format: OutputFormat) -> Result<()> {
    let items: Vec<GroupItem> = RecordGroupId::ALL
        .into_iter()
        .map(|group| GroupItem {
            group,
            key: group.key_name(),
            label: group.label(),
            fields: FieldName::ALL.into_iter().map(FieldName::subkey).collect(),
        })
        .collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            println!("HKEY_CLASSES_ROOT");
            for item in items {
                println!("  {} ({})", item.key, item.label);
                println!("    DefaultIcon");
                println!("    Shell");
                println!("      Open");
                println!("        Command");
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct FieldOutcomeItem {
    group: RecordGroupId,
    field: FieldName,
    key: String,
    status: &'static str,
    error: Option<String>,
}

fn outcome_items(outcome: &RewriteOutcome) -> Vec<FieldOutcomeItem> {
    outcome
        .fields
        .iter()
        .map(|field| {
            let (status, error) = match &field.status {
                FieldStatus::Updated { changed: true } => ("updated", None),
                FieldStatus::Updated { changed: false } => ("unchanged", None),
                FieldStatus::Failed(err) => ("failed", Some(err.to_string())),
            };
            FieldOutcomeItem {
                group: field.group,
                field: field.field,
                key: field.key_path(),
                status,
                error,
            }
        })
        .collect()
}

fn print_outcome_text(outcome: &RewriteOutcome) {
    for item in outcome_items(outcome) {
        match item.error {
            Some(error) => println!("  {:<10} {}: {error}", item.status, item.key),
            None => println!("  {:<10} {}", item.status, item.key),
        }
    }
    println!(
        "Success rate: {:.1}% ({}/{})",
        outcome.success_rate(),
        outcome.succeeded,
        outcome.attempted
    );
    let failures = outcome.failures().count();
    if failures > 0 {
        println!("{failures} entr{} could not be updated", if failures == 1 { "y" } else { "ies" });
    }
}

#[derive(Serialize)]
struct SwitchOutput<'a> {
    source: &'a VersionToken,
    target: &'a VersionToken,
    backup: Option<String>,
    attempted: usize,
    succeeded: usize,
    success_rate: f64,
    fields: Vec<FieldOutcomeItem>,
    current_after: Option<&'a VersionToken>,
    log: Vec<String>,
}

fn switch(
    app: &mut App<ConfiguredStore>,
    options: SwitchOptions,
    format: OutputFormat,
) -> Result<()> {
    let state = app.version_state();
    let source = options
        .from
        .or_else(|| state.current.as_ref().map(|version| version.to_string()))
        .unwrap_or_default();
    let target = resolve_target(options.target, &state)?;
    app.log.info(format!("Target version: {target}"));
    let (source_version, target_version) = rewrite::validate_request(&source, &target)?;

    if !state.available.contains(&target_version) {
        app.log.warn(format!(
            "Target version {target_version} is not installed under {}",
            state.install_root.display()
        ));
    }

    if app.config.confirm_switch && !options.yes {
        let prompt =
            format!("Switch Vivado association from {source_version} to {target_version}?");
        if !confirm(&prompt)? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let log_mark = app.log.entries().len();
    let backup = app.config.backup_before_switch && !options.no_backup;
    let report = app.switch_version(source_version.as_str(), target_version.as_str(), backup)?;

    match format {
        OutputFormat::Json => {
            let log: Vec<String> = app
                .log
                .entries()
                .get(log_mark..)
                .unwrap_or(&[])
                .iter()
                .map(|entry| format!("[{}] {}", log_level_label(entry.level), entry.message))
                .collect();
            let output = SwitchOutput {
                source: &report.source,
                target: &report.target,
                backup: report.backup.as_ref().map(|path| path.display().to_string()),
                attempted: report.outcome.attempted,
                succeeded: report.outcome.succeeded,
                success_rate: report.outcome.success_rate(),
                fields: outcome_items(&report.outcome),
                current_after: report.refreshed.current.as_ref(),
                log,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!(
                "Switching Vivado associations: {} -> {}",
                report.source, report.target
            );
            if let Some(path) = &report.backup {
                println!("Backup: {}", path.display());
            }
            print_outcome_text(&report.outcome);
            if report.outcome.succeeded == 0 {
                println!("No registry entries were updated");
            } else if report.outcome.is_complete() {
                println!("Vivado version switch complete!");
            }
            match &report.refreshed.current {
                Some(version) => println!("Current version: {version}"),
                None => println!("Current version: not found"),
            }
        }
    }
    Ok(())
}

/// Explicit target, else the newest installed version.
fn resolve_target(target: Option<String>, state: &VersionState) -> Result<String> {
    match target {
        Some(target) => Ok(target),
        None => state
            .available
            .first()
            .map(VersionToken::to_string)
            .context("switch requires a target version (no installed versions found)"),
    }
}

fn restore(
    app: &mut App<ConfiguredStore>,
    options: RestoreOptions,
    format: OutputFormat,
) -> Result<()> {
    let Some(path) = app.last_backup()? else {
        bail!("No backup found in {}", app.data_dir.join("backups").display());
    };
    if !options.yes && !confirm(&format!("Restore associations from {}?", path.display()))? {
        println!("Cancelled.");
        return Ok(());
    }

    let report = app.restore_last_backup(options.force)?;
    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "backup": report.backup.display().to_string(),
                "reason": report.snapshot.reason,
                "attempted": report.outcome.attempted,
                "succeeded": report.outcome.succeeded,
                "fields": outcome_items(&report.outcome),
                "current_after": report.refreshed.current,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("Restoring from {}", report.backup.display());
            if let Some(reason) = &report.snapshot.reason {
                println!("Backup reason: {reason}");
            }
            print_outcome_text(&report.outcome);
            match &report.refreshed.current {
                Some(version) => println!("Current version: {version}"),
                None => println!("Current version: not found"),
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct PathsOutput {
    data_dir: String,
    config_file: String,
    log_file: Option<String>,
    install_root: String,
    store: String,
    last_backup: Option<String>,
}

fn print_paths(app: &App<ConfiguredStore>, format: OutputFormat) -> Result<()> {
    let output = PathsOutput {
        data_dir: app.data_dir.display().to_string(),
        config_file: config::config_path(&app.data_dir).display().to_string(),
        log_file: app.log.path().map(|path| path.display().to_string()),
        install_root: app.config.install_root.display().to_string(),
        store: app.store.describe(),
        last_backup: app
            .last_backup()
            .ok()
            .flatten()
            .map(|path| path.display().to_string()),
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("Data dir: {}", output.data_dir);
            println!("Config: {}", output.config_file);
            if let Some(log_file) = &output.log_file {
                println!("Log: {log_file}");
            }
            println!("Installation root: {}", output.install_root);
            println!("Association store: {}", output.store);
            if let Some(last) = &output.last_backup {
                println!("Last backup: {last}");
            }
        }
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N] ");
    io::stderr().flush().context("flush prompt")?;
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("read confirmation")?;
    Ok(matches!(
        line.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn print_help() {
    println!("vivswitch v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  vivswitch [status]                 Show current and installed Vivado versions");
    println!("  vivswitch current                  Print the version the associations point at");
    println!("  vivswitch versions                 List installed versions, newest first");
    println!("  vivswitch details                  Show every association entry");
    println!("  vivswitch groups                   Show the association key layout");
    println!("  vivswitch switch [version]         Repoint associations (default: newest installed)");
    println!("  vivswitch restore [--force]        Restore the most recent backup");
    println!("  vivswitch export <file>            Copy associations into a JSON store file");
    println!("  vivswitch paths                    Show config, log and store locations");
    println!();
    println!("Global options:");
    println!("  --format <text|json>               Output format");
    println!("  --root <dir>                       Installation root (default C:\\Xilinx\\Vivado)");
    println!("  --store <file>                     Use a JSON store file instead of the registry");
    println!("  -q, --quiet                        Errors only");
    println!("  -v, --verbose                      Echo every log line");
    println!("  -h, --help                         Show help");
    println!("  -V, --version                      Show version");
    println!();
    println!("Switch options:");
    println!("  --from <version>                   Source version (default: detected)");
    println!("  -y, --yes                          Skip confirmation");
    println!("  --no-backup                        Do not snapshot associations first");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn no_arguments_shows_status() {
        let (global, command) = parse_args(&[]).unwrap();
        assert_eq!(command, CliCommand::Status);
        assert_eq!(global.format, OutputFormat::Text);
        assert!(global.install_root.is_none());
    }

    #[test]
    fn global_options_may_appear_anywhere() {
        let (global, command) = parse_args(&args(&[
            "switch",
            "--format=json",
            "2022.2",
            "--root",
            r"D:\Xilinx\Vivado",
            "--store",
            "assoc.json",
            "-q",
        ]))
        .unwrap();
        assert_eq!(global.format, OutputFormat::Json);
        assert_eq!(global.install_root, Some(PathBuf::from(r"D:\Xilinx\Vivado")));
        assert_eq!(global.store_file, Some(PathBuf::from("assoc.json")));
        assert_eq!(global.verbosity, Some(Verbosity::Quiet));
        assert_eq!(
            command,
            CliCommand::Switch(SwitchOptions {
                target: Some("2022.2".to_string()),
                from: None,
                yes: false,
                no_backup: false,
            })
        );
    }

    #[test]
    fn switch_options_are_parsed() {
        let (_, command) = parse_args(&args(&[
            "switch", "2020.2", "--from", "2021.1", "-y", "--no-backup",
        ]))
        .unwrap();
        assert_eq!(
            command,
            CliCommand::Switch(SwitchOptions {
                target: Some("2020.2".to_string()),
                from: Some("2021.1".to_string()),
                yes: true,
                no_backup: true,
            })
        );
    }

    #[test]
    fn switch_takes_at_most_one_target() {
        assert_eq!(
            parse_args(&args(&["switch", "-y"])).unwrap().1,
            CliCommand::Switch(SwitchOptions {
                target: None,
                from: None,
                yes: true,
                no_backup: false,
            })
        );
        assert!(parse_args(&args(&["switch", "2021.1", "2022.2"])).is_err());
        assert!(parse_args(&args(&["switch", "2021.1", "--force"])).is_err());
    }

    #[test]
    fn simple_commands_are_recognised() {
        let cases = [
            ("current", CliCommand::Current),
            ("versions", CliCommand::Versions),
            ("details", CliCommand::Details),
            ("groups", CliCommand::Groups),
            ("paths", CliCommand::Paths),
            ("--help", CliCommand::Help),
            ("-V", CliCommand::Version),
        ];
        for (arg, expected) in cases {
            assert_eq!(parse_args(&args(&[arg])).unwrap().1, expected, "{arg}");
        }
        assert_eq!(
            parse_args(&args(&["restore", "--yes"])).unwrap().1,
            CliCommand::Restore(RestoreOptions {
                yes: true,
                force: false,
            })
        );
        assert_eq!(
            parse_args(&args(&["export", "out.json"])).unwrap().1,
            CliCommand::Export(PathBuf::from("out.json"))
        );
    }

    #[test]
    fn bad_arguments_are_errors() {
        assert!(parse_args(&args(&["frobnicate"])).is_err());
        assert!(parse_args(&args(&["--format", "xml"])).is_err());
        assert!(parse_args(&args(&["--root"])).is_err());
        assert!(parse_args(&args(&["export"])).is_err());
    }

    #[test]
    fn restore_and_export_reject_stray_arguments() {
        assert_eq!(
            parse_args(&args(&["restore", "--force", "-y"])).unwrap().1,
            CliCommand::Restore(RestoreOptions {
                yes: true,
                force: true,
            })
        );
        assert!(parse_args(&args(&["restore", "now"])).is_err());
        assert!(parse_args(&args(&["restore", "--yse"])).is_err());
        assert!(parse_args(&args(&["export", "a.json", "b.json"])).is_err());
        assert!(parse_args(&args(&["export", "--yes"])).is_err());
    }

    #[test]
    fn missing_target_defaults_to_newest_installed() {
        let mut state = VersionState {
            current: VersionToken::parse("2021.1"),
            available: ["2022.2", "2021.1"]
                .into_iter()
                .filter_map(VersionToken::parse)
                .collect(),
            install_root: PathBuf::from(r"C:\Xilinx\Vivado"),
            scan_error: None,
        };
        assert_eq!(resolve_target(None, &state).unwrap(), "2022.2");
        assert_eq!(
            resolve_target(Some("2020.2".to_string()), &state).unwrap(),
            "2020.2"
        );
        state.available.clear();
        assert!(resolve_target(None, &state).is_err());
    }

    #[test]
    fn status_text_leaves_scan_diagnostics_to_the_log() {
        let state = VersionState {
            current: VersionToken::parse("2021.1"),
            available: Vec::new(),
            install_root: PathBuf::from(r"C:\Xilinx\Vivado"),
            scan_error: Some("Vivado installation directory not found".to_string()),
        };
        let lines = status_lines(&state);
        assert_eq!(lines[0], "Current version: 2021.1");
        assert_eq!(lines[2], "Available versions: none");
        assert!(lines.iter().all(|line| !line.contains("not found")));
    }

    #[test]
    fn outcome_items_label_each_field() {
        let mut store = crate::store::testing::MemoryStore::default().with_record(
            RecordGroupId::Checkpoint,
            r"C:\Xilinx\Vivado\2021.1\bin\icon.ico",
            "cmd.exe",
        );
        store.deny_writes(RecordGroupId::Checkpoint, FieldName::CommandPath);
        let outcome =
            rewrite::switch_version(&mut store, &[RecordGroupId::Checkpoint], "2021.1", "2022.2")
                .unwrap();
        let items = outcome_items(&outcome);
        let statuses: Vec<&str> = items.iter().map(|item| item.status).collect();
        assert_eq!(statuses, ["updated", "failed"]);
        assert!(items[1].error.as_deref().unwrap().contains("access denied"));
    }
}
