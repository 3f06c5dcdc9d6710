mod backend;
mod command;
mod config;
mod logging;
mod pipeline;
mod session;
mod tui;

#[cfg(test)]
mod testing;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{CommandFactory, Parser};
use config::{ConfigFile, ResolvedConfig};
use crossterm::style::Stylize;
use pipeline::{UiEvent, UiHandle};
use session::Session;

#[derive(Parser, Debug)]
#[command(
    name = "aiterm",
    about = "Chat with local and remote LLMs from the terminal",
    long_about = None,
)]
struct Args {
    /// Prompt to send once (omit, together with --file, to enter interactive mode)
    prompt: Option<String>,

    /// File whose contents are prepended to the prompt
    #[arg(short, long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// Print the response as it streams in
    #[arg(long)]
    stream: bool,

    /// Backend to activate (a name from the config file)
    #[arg(long, env = "AITERM_API")]
    api: Option<String>,

    /// Override the active backend's endpoint URL
    #[arg(long, env = "AITERM_ENDPOINT")]
    endpoint: Option<String>,

    /// Override the active backend's model
    #[arg(short, long, env = "AITERM_MODEL")]
    model: Option<String>,

    /// Show timestamps on transcript lines
    #[arg(long)]
    timestamps: bool,

    /// Write a default config file to ~/.config/aiterm/config.toml and exit
    #[arg(long)]
    init: bool,

    /// List configured backends and exit
    #[arg(long)]
    backends: bool,

    /// List the models offered by the active backend and exit
    #[arg(long)]
    models: bool,

    /// Generate shell completions and print to stdout (bash, zsh, fish, elvish)
    #[arg(long, value_name = "SHELL")]
    completions: Option<String>,

    /// Debug-level logging (see AITERM_LOG for finer control)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ── --init ────────────────────────────────────────────────────────────────
    if args.init {
        let path = ConfigFile::write_default_if_missing()?;
        println!("Config written to: {}", path.display());
        println!("Edit it, then run: aiterm");
        return Ok(());
    }

    // ── --completions ─────────────────────────────────────────────────────────
    if let Some(shell_name) = &args.completions {
        return generate_completions(shell_name);
    }

    if let Err(e) = logging::init(args.verbose) {
        eprintln!("warning: logging disabled: {e:#}");
    }

    let file = ConfigFile::load().unwrap_or_else(|e| fatal(e));

    // ── --backends ────────────────────────────────────────────────────────────
    if args.backends {
        print_backends(&file);
        return Ok(());
    }

    let resolved = ResolvedConfig::resolve(
        &file,
        args.api.as_deref(),
        args.endpoint.as_deref(),
        args.model.as_deref(),
    )
    .unwrap_or_else(|e| fatal(e));
    let backends = backend::build(&resolved.backends).unwrap_or_else(|e| fatal(e));
    let mut session = Session::new(backends, resolved.active.clone());
    tracing::info!(backend = session.active_name(), "starting");

    // ── --models ──────────────────────────────────────────────────────────────
    if args.models {
        return print_models(&session).await;
    }

    // ── Single-shot mode (plain stdout, no TUI) ───────────────────────────────
    if args.prompt.is_some() || args.file.is_some() {
        let prompt = args.prompt.unwrap_or_default();
        run_single_shot(&prompt, args.file.as_deref(), args.stream, &mut session).await;
        return Ok(());
    }

    // ── Interactive TUI mode ──────────────────────────────────────────────────
    tui::run(session, args.timestamps).await?;
    println!("Exited Interactive Mode.");
    Ok(())
}

/// Report an initialization error and exit before any UI starts.
fn fatal(e: anyhow::Error) -> ! {
    eprintln!("Error: {e:#}");
    std::process::exit(1);
}

// ── Single-shot mode ──────────────────────────────────────────────────────────

/// File contents go first, separated from the prompt by a blank line.
fn compose_prompt(file_content: Option<&str>, prompt: &str) -> String {
    match file_content {
        Some(content) if !content.is_empty() && !prompt.is_empty() => {
            format!("{content}\n\n{prompt}")
        }
        Some(content) if !content.is_empty() => content.to_string(),
        _ => prompt.to_string(),
    }
}

async fn run_single_shot(prompt: &str, file: Option<&Path>, stream: bool, session: &mut Session) {
    let file_content = file.and_then(|path| match std::fs::read_to_string(path) {
        Ok(content) => {
            println!("--- Content from {} prepended to prompt ---", path.display());
            Some(content)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("Error: File not found: {}", path.display());
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "read failed: {e}");
            println!("Error: Could not read file: {}", path.display());
            None
        }
    });

    let final_prompt = compose_prompt(file_content.as_deref(), prompt);
    if final_prompt.trim().is_empty() {
        if file.is_some() && file_content.is_none() {
            println!("Prompt is empty and file could not be read or was empty.");
        } else {
            println!("Prompt is empty. Use -h for help or provide a prompt/file.");
        }
        return;
    }

    let Some(backend) = session.active_backend().cloned() else {
        println!("{}", command::NO_ACTIVE_BACKEND);
        print_status(session);
        return;
    };

    println!("\nUsing API: {}", session.active_name());
    println!("Sending prompt (length: {} chars)...", final_prompt.chars().count());

    if stream {
        stream_to_stdout(backend.generate_stream(&final_prompt), session).await;
    } else {
        match backend.generate(&final_prompt).await {
            Ok(completion) => {
                session.record_completion(completion.total_tokens);
                println!("\nAI Response:\n{}", completion.text);
            }
            Err(e) => {
                tracing::warn!(kind = e.kind(), "request failed: {e}");
                println!("\n[SYSTEM_ERROR: {}: {e}]", e.kind());
            }
        }
    }

    print_status(session);
}

/// Drive the same pipeline the TUI uses, echoing fragments as they land.
async fn stream_to_stdout(source: backend::ResponseStream, session: &mut Session) {
    let slot = session.insert_placeholder();
    let (ui, mut rx) = UiHandle::channel();
    pipeline::spawn(source, slot, ui);

    let mut stdout = std::io::stdout();
    let mut printed = 0usize;
    println!();
    while let Some(ev) = rx.recv().await {
        let done = ev == UiEvent::Redraw;
        if let UiEvent::Chunk { text, .. } = &ev {
            print!("{text}");
            let _ = stdout.flush();
            printed += text.len();
        }
        session.apply(ev);
        if done {
            break;
        }
    }

    // Whatever the terminal update appended (error annotations)
    if let Some(tail) = session
        .messages()
        .get(slot.index)
        .and_then(|m| m.text.get(printed..))
    {
        print!("{tail}");
    }
    println!();
}

fn print_status(session: &Session) {
    let name = session.active_name();
    let name = if session.active_backend().is_some() {
        name.green()
    } else {
        name.red()
    };
    println!("Status:");
    println!("  Active API: {name}");
    println!("  Messages Sent: {}", session.message_count);
    println!("  Tokens Used: {}", session.token_count);
}

// ── Listings ──────────────────────────────────────────────────────────────────

fn print_backends(file: &ConfigFile) {
    println!();
    println!("  Backends");
    for (name, b) in &file.backends {
        let marker = if name.eq_ignore_ascii_case(&file.default_backend) { " ←" } else { "" };
        println!("  {name}{marker}");
        println!("    kind      {:?}", b.kind);
        println!("    endpoint  {}", b.endpoint);
        println!("    model     {}", b.model);
        println!();
    }
}

async fn print_models(session: &Session) -> Result<()> {
    let Some(backend) = session.active_backend() else {
        println!("{}", command::NO_ACTIVE_BACKEND);
        return Ok(());
    };
    let models = backend
        .list_models()
        .await
        .map_err(|e| anyhow::anyhow!("{} ({}): {e}", session.active_name(), e.kind()))?;
    println!("Models on {} ({}):", session.active_name(), backend.endpoint());
    for model in models {
        let marker = if model == backend.model() { " ←" } else { "" };
        println!("  {model}{marker}");
    }
    Ok(())
}

// ── Shell completions ─────────────────────────────────────────────────────────

fn generate_completions(shell_name: &str) -> Result<()> {
    use clap_complete::{Shell, generate};

    let shell: Shell = match shell_name.to_lowercase().as_str() {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        "elvish" => Shell::Elvish,
        _ => {
            eprintln!("Unknown shell: {shell_name}");
            eprintln!("Supported: bash, zsh, fish, elvish");
            std::process::exit(1);
        }
    };

    let mut cmd = Args::command();
    generate(shell, &mut cmd, "aiterm", &mut std::io::stdout());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_prompt() {
        assert_eq!(compose_prompt(None, "hi"), "hi");
        assert_eq!(compose_prompt(Some("code"), "explain"), "code\n\nexplain");
        assert_eq!(compose_prompt(Some("code"), ""), "code");
        assert_eq!(compose_prompt(Some(""), "hi"), "hi");
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["aiterm", "-f", "notes.txt", "--stream", "--api", "openai", "sum up"])
            .unwrap();
        assert_eq!(args.prompt.as_deref(), Some("sum up"));
        assert_eq!(args.file.as_deref(), Some(Path::new("notes.txt")));
        assert!(args.stream);
        assert_eq!(args.api.as_deref(), Some("openai"));
    }

    #[test]
    fn test_args_debug_assert() {
        Args::command().debug_assert();
    }
}
