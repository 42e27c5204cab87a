//! Line dispatcher and slash-command parser.

use chrono::Local;
use std::borrow::Cow;

/// Fixed reply strings.
pub struct Response;

impl Response {
    pub const SAY_SOMETHING: &'static str = "Say something...\n";
    pub const HI_THERE: &'static str = "Hi there!\n";
    pub const GOODBYE: &'static str = "Goodbye!\n";
    pub const TOO_LONG: &'static str = "Message too long. Max 1024 bytes allowed.\n";
    pub const ECHO_USAGE: &'static str = "Usage: /echo <message>\n";
    pub const UNKNOWN_COMMAND: &'static str = "Unknown command\n";

    /// A line of text sent back as-is.
    pub fn line(text: &str) -> String {
        format!("{text}\n")
    }

    pub fn server_time(hms: &str) -> String {
        format!("Server time: {hms}\n")
    }
}

/// What the session should do with one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send the text and keep reading.
    Reply(Cow<'static, str>),
    /// Send the text, then end the session.
    Close(Cow<'static, str>),
}

impl Action {
    pub fn text(&self) -> &str {
        match self {
            Action::Reply(text) | Action::Close(text) => text,
        }
    }

    pub fn closes(&self) -> bool {
        matches!(self, Action::Close(_))
    }
}

/// Decide the response to an already-trimmed input line.
///
/// Greetings are matched case-insensitively and before command parsing,
/// so `hello` and `BYE` never reach the command table.
pub fn dispatch(input: &str) -> Action {
    if input.is_empty() {
        return Action::Reply(Response::SAY_SOMETHING.into());
    }
    if input.eq_ignore_ascii_case("hello") {
        return Action::Reply(Response::HI_THERE.into());
    }
    if input.eq_ignore_ascii_case("bye") {
        return Action::Close(Response::GOODBYE.into());
    }
    if input.starts_with('/') {
        return Command::parse(input).execute();
    }
    Action::Reply(Response::line(input).into())
}

/// A parsed slash command. Command names are case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Time,
    Quit,
    Echo(Vec<&'a str>),
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    /// Split `input` on whitespace and match the first token.
    pub fn parse(input: &'a str) -> Self {
        let mut parts = input.split_whitespace();
        match parts.next() {
            Some("/time") => Command::Time,
            Some("/quit") => Command::Quit,
            Some("/echo") => Command::Echo(parts.collect()),
            Some(other) => Command::Unknown(other),
            None => Command::Unknown(""),
        }
    }

    pub fn execute(self) -> Action {
        match self {
            Command::Time => {
                let now = Local::now().format("%H:%M:%S").to_string();
                Action::Reply(Response::server_time(&now).into())
            }
            Command::Quit => Action::Close(Response::GOODBYE.into()),
            Command::Echo(args) if args.is_empty() => {
                Action::Reply(Response::ECHO_USAGE.into())
            }
            Command::Echo(args) => Action::Reply(Response::line(&args.join(" ")).into()),
            Command::Unknown(_) => Action::Reply(Response::UNKNOWN_COMMAND.into()),
        }
    }
}
