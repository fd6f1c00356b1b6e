//! smilebin: annotations anchored to git history.
//!
//! Entry point for the `smilebin` binary. Wires together the user config
//! (`config`), the SQLite annotation store (`smilebin-core`), the per-directory
//! history inspectors (`git`), and the anchoring protocol (`anchor`).
//!
//! # Startup sequence
//!
//! 1. Install the `tracing` subscriber (stderr, `RUST_LOG`, default `info`).
//! 2. Parse arguments; usage errors exit with status 2 before anything opens.
//! 3. Load config from XDG; soft failure to defaults.
//! 4. `create_dir_all` the database directory and open the store.
//! 5. Run the command. Exit status: 0 ok, 1 error, 2 declined or usage.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use smilebin::anchor::{AnnotationResolver, CreateOutcome, Placement, ToggleOutcome};
use smilebin::config::Config;
use smilebin::git::history::InspectorCache;
use smilebin::git::types::LineRange;
use smilebin::translate::UnifiedDiffTranslator;
use smilebin_core::{DeleteOutcome, SqliteStore};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    List { files: Vec<PathBuf>, offline: bool },
    Check { file: PathBuf, start: u32, end: u32 },
    Add {
        file: PathBuf,
        start: u32,
        end: u32,
        emoticon: Option<String>,
        text: String,
    },
    Toggle {
        file: PathBuf,
        line: u32,
        emoticon: Option<String>,
    },
    Delete { id: String },
}

fn usage(message: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(msg) = message {
        if !msg.trim().is_empty() {
            out.push_str(&format!("Error: {msg}\n\n"));
        }
    }
    out.push_str("Usage: smilebin <command> [args]\n\n");
    out.push_str("Commands:\n");
    out.push_str("  list <file>... [--offline]                       show annotations\n");
    out.push_str("  check <file> <start> <end>                       show line provenance\n");
    out.push_str("  add <file> <start> <end> [--emoticon NAME] <text...>\n");
    out.push_str("                                                   annotate a range\n");
    out.push_str("  toggle <file> <line> [--emoticon NAME]           add or remove on one line\n");
    out.push_str("  delete <id>                                      remove an annotation\n");
    out
}

fn parse_line(raw: &str, name: &str) -> Result<u32, String> {
    raw.parse::<u32>()
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| usage(Some(&format!("invalid {name}: {raw:?}"))))
}

/// Splits out `--emoticon NAME` / `--emoticon=NAME`, returning the rest in order.
fn take_emoticon(args: &[String]) -> Result<(Option<String>, Vec<String>), String> {
    let mut emoticon = None;
    let mut rest = Vec::new();
    let mut idx = 0usize;
    while idx < args.len() {
        let token = &args[idx];
        if token == "--" {
            rest.extend(args[idx + 1..].iter().cloned());
            break;
        }
        if let Some(value) = token.strip_prefix("--emoticon=") {
            emoticon = Some(value.to_owned());
        } else if token == "--emoticon" {
            idx += 1;
            let value = args
                .get(idx)
                .ok_or_else(|| usage(Some("--emoticon requires a value")))?;
            emoticon = Some(value.clone());
        } else {
            rest.push(token.clone());
        }
        idx += 1;
    }
    Ok((emoticon, rest))
}

fn parse_args(argv: &[String]) -> Result<Command, String> {
    let Some((name, args)) = argv.split_first() else {
        return Err(usage(None));
    };

    match name.as_str() {
        "list" => {
            let offline = args.iter().any(|a| a == "--offline");
            let files: Vec<PathBuf> = args
                .iter()
                .filter(|a| *a != "--offline")
                .map(PathBuf::from)
                .collect();
            if files.is_empty() {
                return Err(usage(Some("list needs at least one file")));
            }
            Ok(Command::List { files, offline })
        }
        "check" => match args {
            [file, start, end] => Ok(Command::Check {
                file: PathBuf::from(file),
                start: parse_line(start, "start line")?,
                end: parse_line(end, "end line")?,
            }),
            _ => Err(usage(Some("check takes <file> <start> <end>"))),
        },
        "add" => {
            let (emoticon, rest) = take_emoticon(args)?;
            match rest.as_slice() {
                [file, start, end, text @ ..] if !text.is_empty() => Ok(Command::Add {
                    file: PathBuf::from(file),
                    start: parse_line(start, "start line")?,
                    end: parse_line(end, "end line")?,
                    emoticon,
                    text: text.join(" "),
                }),
                _ => Err(usage(Some("add takes <file> <start> <end> <text...>"))),
            }
        }
        "toggle" => {
            let (emoticon, rest) = take_emoticon(args)?;
            match rest.as_slice() {
                [file, line] => Ok(Command::Toggle {
                    file: PathBuf::from(file),
                    line: parse_line(line, "line")?,
                    emoticon,
                }),
                _ => Err(usage(Some("toggle takes <file> <line>"))),
            }
        }
        "delete" => match args {
            [id] => Ok(Command::Delete { id: id.clone() }),
            _ => Err(usage(Some("delete takes <id>"))),
        },
        "-h" | "--help" | "help" => Err(usage(None)),
        other => Err(usage(Some(&format!("unknown command {other:?}")))),
    }
}

type Resolver = AnnotationResolver<SqliteStore, UnifiedDiffTranslator>;

async fn run(command: Command, resolver: &Resolver, config: &Config) -> Result<ExitCode, String> {
    match command {
        Command::List { files, offline } => {
            let mut failed = false;
            for entry in resolver.fetch_many(&files, offline).await {
                println!("{}", entry.path.display());
                if let Some(err) = entry.failure {
                    println!("  error: {err}");
                    failed = true;
                    continue;
                }
                for resolved in &entry.annotations {
                    let a = &resolved.annotation;
                    let position = match &resolved.placement {
                        Placement::Current(range) => format!("{}-{}", range.start, range.end),
                        Placement::Deleted => "deleted".to_owned(),
                        Placement::Unresolved { reason } => format!("unresolved ({reason})"),
                    };
                    println!(
                        "  {position} :{}: {} {} [{}]",
                        a.emoticon, a.user_id, a.text, a.id
                    );
                }
            }
            Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }
        Command::Check { file, start, end } => {
            let range = LineRange::new(start, end)
                .ok_or_else(|| format!("invalid line range {start}..={end}"))?;
            let check = resolver
                .check_range(&file, range)
                .await
                .map_err(|e| e.to_string())?;
            for span in &check.spans {
                let owner = if span.is_uncommitted() {
                    "uncommitted".to_owned()
                } else {
                    span.revision.to_string()
                };
                println!("{}-{} {owner}", span.start_line, span.end_line);
            }
            let uncommitted = check.uncommitted_lines();
            if !uncommitted.is_empty() {
                println!("uncommitted lines {uncommitted:?}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Add {
            file,
            start,
            end,
            emoticon,
            text,
        } => {
            let emoticon = emoticon.unwrap_or_else(|| config.emoticon.clone());
            match resolver
                .create_annotation(&file, &text, &emoticon, start, end)
                .await
                .map_err(|e| e.to_string())?
            {
                CreateOutcome::Created { id, .. } => {
                    println!("{id}");
                    Ok(ExitCode::SUCCESS)
                }
                CreateOutcome::Declined { uncommitted_lines } => {
                    eprintln!("declined: uncommitted lines {uncommitted_lines:?}; commit them first");
                    Ok(ExitCode::from(2))
                }
            }
        }
        Command::Toggle {
            file,
            line,
            emoticon,
        } => {
            let emoticon = emoticon.unwrap_or_else(|| config.emoticon.clone());
            match resolver
                .toggle_annotation(&file, line, "", &emoticon)
                .await
                .map_err(|e| e.to_string())?
            {
                ToggleOutcome::Created { id } => println!("added {id}"),
                ToggleOutcome::Removed { id } => println!("removed {id}"),
                ToggleOutcome::Declined { uncommitted_lines } => {
                    eprintln!("declined: uncommitted lines {uncommitted_lines:?}; commit them first");
                    return Ok(ExitCode::from(2));
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Delete { id } => {
            match resolver.delete_annotation(&id).await.map_err(|e| e.to_string())? {
                DeleteOutcome::Deleted => println!("deleted {id}"),
                DeleteOutcome::NotFound => println!("no annotation {id}"),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&argv) {
        Ok(command) => command,
        Err(text) => {
            eprint!("{text}");
            return ExitCode::from(2);
        }
    };

    let config = Config::load();

    if let Some(dir) = config.database.parent() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("smilebin: cannot create {}: {e}", dir.display());
            return ExitCode::FAILURE;
        }
    }
    let store = match SqliteStore::open(&config.database.to_string_lossy()).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("smilebin: opening {}: {e}", config.database.display());
            return ExitCode::FAILURE;
        }
    };

    let inspectors = Arc::new(InspectorCache::new(config.git.clone(), config.process_timeout()));
    let resolver = AnnotationResolver::new(
        store,
        UnifiedDiffTranslator,
        inspectors,
        config.user_id.clone(),
    );

    match run(command, &resolver, &config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("smilebin: {e}");
            ExitCode::FAILURE
        }
    }
}
