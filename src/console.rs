//! Console output for a run: loop progress, tool traffic and the final result.

use std::io::{self, Write};

use crate::agent::{AgentEvent, AgentRun, Answer, Outcome};
use crate::bigquery::QueryResult;

/// Tool results are shortened to this many chars on screen.
const MAX_DISPLAY_CHARS: usize = 1000;

const RULE_WIDTH: usize = 72;

const BLUE: &str = "34";
const DIM: &str = "2";
const GREEN: &str = "32";
const RED: &str = "31";
const YELLOW: &str = "33";

/// Writes human-readable progress to a sink, optionally with ANSI colour.
pub struct Console<W: Write> {
    out: W,
    color: bool,
}

impl Console<io::Stdout> {
    /// Console on stdout, coloured when stdout is a terminal.
    pub fn stdout() -> Self {
        use std::io::IsTerminal;
        let color = io::stdout().is_terminal();
        Self::new(io::stdout(), color)
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self { out, color }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.color {
            format!("\x1b[{}m{}\x1b[0m", code, text)
        } else {
            text.to_string()
        }
    }

    fn rule(&mut self, title: &str) -> io::Result<()> {
        let side = RULE_WIDTH.saturating_sub(title.chars().count() + 2) / 2;
        let line = format!("{} {} {}", "─".repeat(side), title, "─".repeat(side));
        let painted = self.paint(YELLOW, &line);
        writeln!(self.out, "{}", painted)
    }

    pub fn event(&mut self, event: &AgentEvent) -> io::Result<()> {
        match event {
            AgentEvent::LoopStarted {
                iteration,
                dispatches,
                max_loops,
            } => self.rule(&format!(
                "Agent Loop {} ({}/{} tool calls used)",
                iteration, dispatches, max_loops
            )),
            AgentEvent::ToolCall { name, arguments } => {
                let label = self.paint(BLUE, "Function Call:");
                writeln!(self.out, "{} {}({})", label, name, arguments)
            }
            AgentEvent::ToolResult { name, content } => {
                let label = self.paint(BLUE, "Function Call Result:");
                let body = self.paint(DIM, &shorten(content, MAX_DISPLAY_CHARS));
                writeln!(self.out, "{} {}(...) ->\n{}", label, name, body)
            }
            AgentEvent::ToolFailed { name, error } => {
                let line = self.paint(RED, &format!("Tool {} failed: {}", name, error));
                writeln!(self.out, "{}", line)
            }
        }
    }

    /// Print how the run ended.
    pub fn finish(&mut self, run: &AgentRun) -> io::Result<()> {
        match &run.outcome {
            Outcome::Completed(Answer::Query(final_query)) => {
                self.rule("Final Query")?;
                writeln!(self.out, "Reasoning: {}", final_query.reasoning)?;
                writeln!(self.out, "Query: {}", final_query.sql)?;
                writeln!(self.out)?;
                let label = self.paint(GREEN, "Final Results:");
                writeln!(self.out, "{}", label)?;
                self.rows(&final_query.result)
            }
            Outcome::Completed(Answer::Message(text)) => {
                let label = self.paint(GREEN, "Answer:");
                writeln!(self.out, "{}\n{}", label, text)
            }
            Outcome::Aborted { max_loops } => {
                let line = self.paint(
                    YELLOW,
                    &format!(
                        "Warning: exceeded maximum loops ({}) without a final query",
                        max_loops
                    ),
                );
                writeln!(self.out, "{}", line)
            }
        }
    }

    fn rows(&mut self, result: &QueryResult) -> io::Result<()> {
        if result.rows.is_empty() {
            return writeln!(self.out, "(no rows)");
        }
        writeln!(self.out, "{}", result.to_lines())?;
        if let Some(total) = result.total_rows {
            if total > result.rows.len() as u64 {
                writeln!(self.out, "... {} of {} rows shown", result.rows.len(), total)?;
            }
        }
        Ok(())
    }

    pub fn error(&mut self, message: &str) -> io::Result<()> {
        let line = self.paint(RED, &format!("Error: {}", message));
        writeln!(self.out, "{}", line)
    }
}

fn shorten(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((idx, _)) => format!("{}... [truncated]", &s[..idx]),
    }
}
