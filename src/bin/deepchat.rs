//! Interactive terminal client for the deepchat server.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a server on localhost:3000
//! deepchat
//!
//! # Another server
//! deepchat --base-url http://chat.example.com
//!
//! # Single-session mode with history kept in ./.deepchat
//! deepchat --legacy
//! ```
//!
//! Type `/help` for commands.  Ctrl+C stops a reply that is streaming;
//! Ctrl+D exits.

use std::fs::OpenOptions;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use deepchat::{
    ChatApp, ChatArgs, ChatBackend, ChatClient, ChatConfig, CommandOutcome, Confirm, Controls,
    Error, FileStore, HistoryStore, LegacyChat, PlainTextRenderer, WriterLogger,
    parse_command,
};

/// Asks on the terminal with a fresh line editor.
struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        let Ok(mut rl) = DefaultEditor::new() else {
            return false;
        };
        match rl.readline(&format!("{prompt} [y/N] ")) {
            Ok(answer) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

/// Main entry point for the deepchat application.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, _) = ChatArgs::from_command_line_relaxed("deepchat [OPTIONS]");
    let config = ChatConfig::from(args);

    let mut client = ChatClient::with_options(Some(config.base_url.clone()), Some(config.timeout))?;
    if let Some(path) = &config.log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        client = client.with_logger(Arc::new(WriterLogger::new(file)));
    }
    let backend: Arc<dyn ChatBackend> = Arc::new(client);

    // Ctrl+C while a reply streams stops the reply, not the program.
    let controls = Controls::new();
    let interrupt = controls.interrupt_flag();
    ctrlc::set_handler(move || {
        interrupt.store(true, Ordering::Release);
    })?;

    let mut rl = DefaultEditor::new()?;
    let renderer = PlainTextRenderer::with_color(config.use_color);

    println!("deepchat ({})", config.base_url);
    println!("Type /help for commands, /quit to exit\n");

    if config.legacy {
        let store = HistoryStore::new(FileStore::new(config.state_dir.clone()));
        let chat = LegacyChat::new(backend, store, renderer)
            .with_confirm(TerminalConfirm)
            .with_controls(controls);
        run_legacy(chat, &mut rl).await;
    } else {
        let app = ChatApp::builder()
            .backend(backend)
            .renderer(renderer)
            .confirm(TerminalConfirm)
            .controls(controls)
            .build()?;
        run_sessions(app, &mut rl).await;
    }

    Ok(())
}

async fn run_sessions(mut app: ChatApp, rl: &mut DefaultEditor) {
    if let Err(err) = app.init().await {
        app.notify("Failed to load sessions", &err);
    }

    while let Some(line) = read_line(rl) {
        if let Some(cmd) = parse_command(&line) {
            if app.handle_command(cmd).await == CommandOutcome::Quit {
                break;
            }
            continue;
        }
        match app.submit(&line).await {
            Ok(_) | Err(Error::NoActiveSession) => {}
            Err(err) => app.notify("Message not sent", &err),
        }
    }
    println!("Goodbye!");
}

async fn run_legacy(mut chat: LegacyChat<FileStore>, rl: &mut DefaultEditor) {
    chat.start();

    while let Some(line) = read_line(rl) {
        if let Some(cmd) = parse_command(&line) {
            if chat.handle_command(cmd) == CommandOutcome::Quit {
                break;
            }
            continue;
        }
        if let Err(err) = chat.submit(&line).await {
            chat.notify("Message not sent", &err);
        }
    }
    println!("Goodbye!");
}

/// Reads the next non-empty line, or `None` at end of input.
fn read_line(rl: &mut DefaultEditor) -> Option<String> {
    loop {
        match rl.readline("You: ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);
                return Some(line.to_string());
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
            }
            Err(ReadlineError::Eof) => {
                println!();
                return None;
            }
            Err(err) => {
                eprintln!("Input error: {}", err);
                return None;
            }
        }
    }
}
