//! Line-editor glue: completion, history, and response-line painting.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::FileHistory;
use rustyline::validate::Validator;
use rustyline::{CompletionType, Config, Context, Editor, ExternalPrinter, Helper};
use tracing::warn;
use unicorn_core::{Language, TokenStream};

use crate::bus::{Channel, Painter};
use crate::events::{Event, EventQueue};

const PROMPT: &str = "> ";

/// Completion helper over the shared composed language.
///
/// The completer runs on the input thread while rebuilds happen on the
/// event-loop thread; the read lock gives it a consistent snapshot.
pub struct ShellHelper {
    language: Arc<RwLock<Language>>,
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let mut toks = TokenStream::new(line, pos);
        let mut candidates = {
            let language = self.language.read();
            // A token the grammar rejects simply yields no candidates.
            language.grammar.complete(&mut toks).unwrap_or_default()
        };
        candidates.sort();
        candidates.dedup();

        let start = line[..pos].rfind([' ', '\t']).map_or(0, |i| i + 1);
        let pairs = candidates
            .into_iter()
            .map(|word| Pair {
                display: word.clone(),
                replacement: word,
            })
            .collect();
        Ok((start, pairs))
    }
}

impl Hinter for ShellHelper {
    type Hint = String;
}

impl Highlighter for ShellHelper {}
impl Validator for ShellHelper {}
impl Helper for ShellHelper {}

/// Paints response lines over the active prompt.
pub struct TerminalPainter {
    printer: Box<dyn ExternalPrinter + Send>,
}

impl Painter for TerminalPainter {
    fn line(&mut self, channel: Channel, line: &str) {
        let _ = self.printer.print(format!("{}{line}", channel.tag()));
    }
}

/// Routes response lines through the event queue instead of the terminal;
/// used when no line editor owns the screen (dmenu export).
pub struct QueuePainter {
    queue: Arc<EventQueue>,
}

impl QueuePainter {
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self { queue }
    }
}

impl Painter for QueuePainter {
    fn line(&mut self, channel: Channel, line: &str) {
        let tagged = format!("{}{line}", channel.tag());
        self.queue.push(match channel {
            Channel::Stderr => Event::IdlStderr(tagged),
            Channel::Stdout | Channel::Result => Event::IdlStdout(tagged),
        });
    }
}

/// Build the editor plus the painter the bus thread renders through.
pub fn editor(
    language: Arc<RwLock<Language>>,
    history: Option<&Path>,
) -> anyhow::Result<(Editor<ShellHelper, FileHistory>, Box<dyn Painter>)> {
    let config = Config::builder()
        .completion_type(CompletionType::List)
        .max_history_size(10_000)?
        .build();
    let mut editor: Editor<ShellHelper, FileHistory> = Editor::with_config(config)?;
    editor.set_helper(Some(ShellHelper { language }));

    if let Some(path) = history {
        if path.exists() {
            let _ = editor.load_history(path);
        }
    }

    let printer: Box<dyn ExternalPrinter + Send> = Box::new(editor.create_external_printer()?);
    Ok((editor, Box::new(TerminalPainter { printer })))
}

/// Read lines until EOF, pushing each as an [`Event::Input`]. Ctrl-C
/// aborts only the current edit; EOF saves history and terminates.
pub fn input_loop(
    mut editor: Editor<ShellHelper, FileHistory>,
    history: Option<PathBuf>,
    queue: Arc<EventQueue>,
) {
    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                queue.push(Event::Input(line));
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                warn!("line editor: {err}");
                break;
            }
        }
    }
    if let Some(path) = history {
        if let Err(err) = editor.save_history(&path) {
            warn!("saving history: {err}");
        }
    }
    queue.push(Event::Terminate);
}
