//! Line-oriented terminal front end for the widget.
//!
//! Parses input lines into commands and renders the transcript.

use std::path::Path;

use parley_core::types::{FileMeta, Message, QuickAction, Sender};
use parley_widget::WidgetSnapshot;

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text to send.
    Send(String),
    /// Pick the quick action at this 1-based position.
    Quick(usize),
    /// Send a file attachment with optional text.
    Attach { path: String, text: String },
    Retry,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Send(line.to_string());
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    match name {
        "quit" | "exit" | "q" => Command::Quit,
        "retry" | "reset" => Command::Retry,
        "help" | "?" => Command::Help,
        "quick" => match args.parse::<usize>() {
            Ok(n) if n > 0 => Command::Quick(n),
            _ => Command::Unknown(line.to_string()),
        },
        "attach" if !args.is_empty() => {
            let (path, text) = match args.split_once(char::is_whitespace) {
                Some((path, text)) => (path, text.trim()),
                None => (args, ""),
            };
            Command::Attach {
                path: path.to_string(),
                text: text.to_string(),
            }
        }
        _ => Command::Unknown(line.to_string()),
    }
}

pub const HELP: &str = "\
Commands:
  <text>               send a message
  /quick <n>           pick quick action n
  /attach <path> [msg] send a file (metadata only)
  /retry               start a new conversation
  /quit                exit";

/// Metadata for a local file. Only name, size and type are ever sent.
pub fn file_meta(path: &Path) -> std::io::Result<FileMeta> {
    let size = std::fs::metadata(path)?.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(FileMeta {
        name,
        size,
        mime_type: mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string(),
    })
}

pub fn render_message(message: &Message) -> String {
    match message.sender {
        Sender::User => match &message.file {
            Some(file) if file.name != message.text => {
                format!("you> {} [{} ({} bytes)]", message.text, file.name, file.size)
            }
            Some(file) => format!("you> [{} ({} bytes)]", file.name, file.size),
            None => format!("you> {}", message.text),
        },
        Sender::Bot => format!("bot> {}", message.text),
        Sender::System => format!("  * {}", message.text),
    }
}

pub fn render_quick_actions(actions: &[QuickAction]) -> Option<String> {
    if actions.is_empty() {
        return None;
    }
    let items: Vec<String> = actions
        .iter()
        .enumerate()
        .map(|(i, a)| {
            if a.icon.is_empty() {
                format!("[{}] {}", i + 1, a.text)
            } else {
                format!("[{}] {} {}", i + 1, a.icon, a.text)
            }
        })
        .collect();
    Some(items.join("  "))
}

/// Tracks what has already been printed so only new entries are shown.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    conversation: Option<String>,
    printed: usize,
}

impl TranscriptPrinter {
    /// Lines to print for the current snapshot.
    pub fn update(&mut self, snapshot: &WidgetSnapshot) -> Vec<String> {
        let current = snapshot
            .session
            .as_ref()
            .map(|s| s.conversation_id.to_string());
        let mut lines = Vec::new();

        if current != self.conversation {
            self.printed = 0;
            if let Some(id) = &current {
                lines.push(format!("--- conversation {} ---", id));
            }
            self.conversation = current;
        }

        for message in snapshot.messages.iter().skip(self.printed) {
            lines.push(render_message(message));
        }
        self.printed = snapshot.messages.len();

        if let Some(actions) = render_quick_actions(&snapshot.quick_actions) {
            lines.push(actions);
        }
        lines
    }
}
