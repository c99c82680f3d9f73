//! BBTag command-line runner.
//!
//! Usage:
//!   bbtag [-e <source>] [-t <name>] [-c|-a] [-j] [<file>] [<arg>]...
//!
//! Executes a BBTag script against in-memory collaborators and prints
//! the stitched output, then any recorded errors to stderr.  The script
//! comes from `-e`, a file path, or stdin; trailing positionals become
//! the script's `{args}` input.

use std::io::Read;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use bbtag::engine::{BBTagEngine, ExecutionOptions};
use bbtag::limits;
use bbtag::platform::memory::{
    InMemoryPlatform, InMemorySettings, InMemoryVariables, QueuedReactions,
};

// ── Argument parsing ──────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
struct CliArgs {
    /// Inline script source (`-e <source>`).
    source: Option<String>,
    /// Tag name used for local variable scoping (`-t <name>`).
    tag_name: Option<String>,
    /// Run under the custom-command limit profile (`-c`).
    custom_command: bool,
    /// Run under the general-autoresponse limit profile (`-a`).
    autoresponse: bool,
    /// Emit the full result as JSON (`-j`).
    json: bool,
    /// Script file (`-` or absent means stdin) plus `{args}` input.
    positional: Vec<String>,
}

fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();
        match arg {
            "--" => {
                args.positional.extend(argv[i + 1..].iter().cloned());
                break;
            }
            "-e" => {
                i += 1;
                let source = argv.get(i).ok_or("-e requires a source argument")?;
                args.source = Some(source.clone());
            }
            "-t" => {
                i += 1;
                let name = argv.get(i).ok_or("-t requires a name argument")?;
                args.tag_name = Some(name.clone());
            }
            "-c" => args.custom_command = true,
            "-a" => args.autoresponse = true,
            "-j" => args.json = true,
            _ if arg.starts_with('-') && arg != "-" => {
                return Err(format!("unknown flag {arg}"));
            }
            _ => args.positional.push(arg.to_owned()),
        }
        i += 1;
    }

    if args.custom_command && args.autoresponse {
        return Err("-c and -a are mutually exclusive".to_owned());
    }
    Ok(args)
}

// ── JSON report ───────────────────────────────────────────────────────────────

#[derive(serde::Serialize)]
struct Report {
    content: String,
    state: String,
    errors: Vec<ReportError>,
}

#[derive(serde::Serialize)]
struct ReportError {
    line: u32,
    column: u32,
    message: String,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let args = match parse_argv(&raw) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("bbtag: {e}");
            eprintln!("Usage: bbtag [-e <source>] [-t <name>] [-c|-a] [-j] [<file>] [<arg>]...");
            std::process::exit(1);
        }
    };

    let mut positional = args.positional.into_iter();
    let source = match args.source {
        Some(source) => source,
        None => {
            let path = positional.next();
            match path.as_deref() {
                None | Some("-") => {
                    let mut buffer = String::new();
                    if let Err(e) = std::io::stdin().read_to_string(&mut buffer) {
                        eprintln!("bbtag: can't read stdin: {e}");
                        std::process::exit(1);
                    }
                    buffer
                }
                Some(path) => match std::fs::read_to_string(path) {
                    Ok(text) => text,
                    Err(e) => {
                        eprintln!("bbtag: can't read {path}: {e}");
                        std::process::exit(1);
                    }
                },
            }
        }
    };
    let input: Vec<String> = positional.collect();

    let engine = BBTagEngine::new(
        bbtag::subtags::all(),
        Arc::new(InMemoryPlatform::default()),
        Arc::new(InMemoryVariables::default()),
        Arc::new(InMemorySettings::default()),
        Arc::new(QueuedReactions::default()),
    );

    let mut options = ExecutionOptions::tag(args.tag_name.unwrap_or_else(|| "cli".to_owned()));
    options.input = input;
    options.channel_id = "cli-channel".to_owned();
    options.guild_id = Some("cli-guild".to_owned());
    if args.custom_command {
        options.is_custom_command = true;
        options.limit = limits::custom_command_limit();
    } else if args.autoresponse {
        options.limit = limits::general_auto_response_limit();
    }

    let result = match engine.execute(source.trim_end_matches('\n'), options).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("bbtag: {e}");
            std::process::exit(1);
        }
    };

    if args.json {
        let report = Report {
            content: result.content,
            state: format!("{:?}", result.state),
            errors: result
                .errors
                .iter()
                .map(|e| ReportError {
                    line: e.span.start.line,
                    column: e.span.start.column,
                    message: e.error.to_string(),
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&report).expect("report serialises"));
        return;
    }

    println!("{}", result.content);
    for located in &result.errors {
        eprintln!("bbtag: error at {}: {}", located.span.start, located.error);
    }
}
