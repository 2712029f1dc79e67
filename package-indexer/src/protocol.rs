//! Line protocol spoken by indexer clients.
//!
//! Requests look like `COMMAND|package|dep1,dep2,...` and are terminated by a
//! newline. Every request gets exactly one of three response lines back:
//! `OK`, `FAIL` or `ERROR`.

use std::fmt;

use thiserror::Error;

const FIELD_DELIMITER: char = '|';
const DEPENDENCY_DELIMITER: char = ',';
const LINE_ENDINGS: &[char] = &['\n', '\r'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Index,
    Query,
    Remove,
}

impl Command {
    fn from_wire(field: &str) -> Option<Self> {
        match field {
            "INDEX" => Some(Self::Index),
            "QUERY" => Some(Self::Query),
            "REMOVE" => Some(Self::Remove),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Index => "INDEX",
            Self::Query => "QUERY",
            Self::Remove => "REMOVE",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub package: String,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected 3 fields separated by '|', found {0}")]
    WrongFieldCount(usize),
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("package name is empty")]
    EmptyPackageName,
}

impl Request {
    /// Parses one request line. A trailing `\n` or `\r\n` is ignored.
    ///
    /// The dependency field is whitespace-trimmed and may be empty. Empty
    /// segments inside it (`b,,c`) are kept as empty names.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim_end_matches(LINE_ENDINGS);
        let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
        let &[command, package, dependencies] = fields.as_slice() else {
            return Err(ParseError::WrongFieldCount(fields.len()));
        };

        let command = Command::from_wire(command)
            .ok_or_else(|| ParseError::UnknownCommand(command.to_string()))?;

        if package.is_empty() {
            return Err(ParseError::EmptyPackageName);
        }

        let dependencies = match dependencies.trim() {
            "" => Vec::new(),
            list => list
                .split(DEPENDENCY_DELIMITER)
                .map(str::to_string)
                .collect(),
        };

        Ok(Self {
            command,
            package: package.to_string(),
            dependencies,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// The request was applied, or the query found the package.
    Ok,
    /// The request was refused by a dependency rule, or the query missed.
    Fail,
    /// The request line was malformed.
    Error,
}

impl Response {
    pub fn from_outcome(accepted: bool) -> Self {
        if accepted { Self::Ok } else { Self::Fail }
    }

    /// The newline-terminated line written back to the client.
    pub fn as_line(self) -> &'static str {
        match self {
            Self::Ok => "OK\n",
            Self::Fail => "FAIL\n",
            Self::Error => "ERROR\n",
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_line().trim_end_matches(LINE_ENDINGS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(command: Command, package: &str, dependencies: &[&str]) -> Request {
        Request {
            command,
            package: package.to_string(),
            dependencies: dependencies.iter().map(|dep| dep.to_string()).collect(),
        }
    }

    #[test]
    fn parses_each_command() {
        assert_eq!(
            Request::parse("INDEX|a|b,c\n"),
            Ok(request(Command::Index, "a", &["b", "c"]))
        );
        assert_eq!(
            Request::parse("QUERY|a|\n"),
            Ok(request(Command::Query, "a", &[]))
        );
        assert_eq!(
            Request::parse("REMOVE|a|"),
            Ok(request(Command::Remove, "a", &[]))
        );
    }

    #[test]
    fn accepts_crlf_and_padded_dependencies() {
        assert_eq!(
            Request::parse("INDEX|a| b,c \r\n"),
            Ok(request(Command::Index, "a", &["b", "c"]))
        );
        assert_eq!(
            Request::parse("INDEX|a|  \n"),
            Ok(request(Command::Index, "a", &[]))
        );
    }

    #[test]
    fn keeps_empty_dependency_segments() {
        assert_eq!(
            Request::parse("INDEX|a|b,,c\n"),
            Ok(request(Command::Index, "a", &["b", "", "c"]))
        );
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert_eq!(
            Request::parse("INDEX|a\n"),
            Err(ParseError::WrongFieldCount(2))
        );
        assert_eq!(
            Request::parse("INDEX|a|b|c\n"),
            Err(ParseError::WrongFieldCount(4))
        );
        assert_eq!(Request::parse("\n"), Err(ParseError::WrongFieldCount(1)));
    }

    #[test]
    fn rejects_unknown_commands() {
        assert_eq!(
            Request::parse("BLINDEX|a|\n"),
            Err(ParseError::UnknownCommand("BLINDEX".into()))
        );
        assert_eq!(
            Request::parse("index|a|\n"),
            Err(ParseError::UnknownCommand("index".into()))
        );
    }

    #[test]
    fn rejects_empty_package_name() {
        assert_eq!(Request::parse("QUERY||\n"), Err(ParseError::EmptyPackageName));
    }

    #[test]
    fn commands_display_as_wire_names() {
        for wire in ["INDEX", "QUERY", "REMOVE"] {
            let command = Command::from_wire(wire).expect("known command");
            assert_eq!(command.to_string(), wire);
        }
    }

    #[test]
    fn response_lines() {
        assert_eq!(Response::Ok.as_line(), "OK\n");
        assert_eq!(Response::Fail.as_line(), "FAIL\n");
        assert_eq!(Response::Error.as_line(), "ERROR\n");
        assert_eq!(Response::from_outcome(true), Response::Ok);
        assert_eq!(Response::from_outcome(false), Response::Fail);
        assert_eq!(Response::Error.to_string(), "ERROR");
    }
}
