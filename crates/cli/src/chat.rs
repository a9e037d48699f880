use anyhow::Result;
use genie_session::{QueryOptions, Session};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Query(String),
    Clean,
    State,
    Quit,
    Empty,
}

pub fn parse_input(line: &str) -> ChatInput {
    match line.trim() {
        "" => ChatInput::Empty,
        ":quit" | ":q" | ":exit" => ChatInput::Quit,
        ":clean" => ChatInput::Clean,
        ":state" => ChatInput::State,
        text => ChatInput::Query(text.to_string()),
    }
}

/// Read utterances from stdin until `:quit` or end of input. Each reply is
/// printed as one JSON line.
pub async fn run(session: &mut Session, options: &QueryOptions) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("Type a request, `:clean` to reset the dialogue, `:quit` to leave.");
    while let Some(line) = lines.next_line().await? {
        let reply: Value = match parse_input(&line) {
            ChatInput::Empty => continue,
            ChatInput::Quit => break,
            ChatInput::Clean => session.clean().await?,
            ChatInput::State => serde_json::to_value(session.state())?,
            ChatInput::Query(text) => session.query(&text, options.clone()).await?,
        };
        crate::print_stdout(&serde_json::to_string(&reply)?)?;
    }
    Ok(())
}
