//! Interactive command parsing
//!
//! One command per input line:
//!
//! | Input          | Action                                   |
//! |----------------|------------------------------------------|
//! | *(empty)*      | start recording, or stop and send        |
//! | `p`            | pause / resume recording                 |
//! | `t <text>`     | send typed text                          |
//! | `ls`           | list the conversation                    |
//! | `d <n>`        | delete message `n`                       |
//! | `c <n>`        | copy message `n` to the clipboard        |
//! | `r <n>`        | speak message `n` again                  |
//! | `key <secret>` | save the chat credential                 |
//! | `key clear`    | forget the chat credential               |
//! | `voices`       | list synthesis voices                    |
//! | `?`            | help                                     |
//! | `q`            | quit                                     |

use std::str::FromStr;

use thiserror::Error;

/// A parsed interactive command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Talk,
    Pause,
    Type(String),
    List,
    Delete(usize),
    Copy(usize),
    Replay(usize),
    SetKey(String),
    ClearKey,
    Voices,
    Help,
    Quit,
}

/// Why a line is not a command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCommandError {
    #[error("unknown command {0:?}, type ? for help")]
    Unknown(String),

    #[error("{0} needs a message number")]
    MissingIndex(&'static str),

    #[error("{0:?} is not a message number")]
    BadIndex(String),

    #[error("{0} needs an argument")]
    MissingArgument(&'static str),
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(w, r)| (w, r.trim()));

        match word {
            "" => Ok(Self::Talk),
            "p" | "pause" => Ok(Self::Pause),
            "t" | "type" => {
                if rest.is_empty() {
                    Err(ParseCommandError::MissingArgument("t"))
                } else {
                    Ok(Self::Type(rest.to_string()))
                }
            }
            "ls" | "list" => Ok(Self::List),
            "d" | "del" => index("d", rest).map(Self::Delete),
            "c" | "copy" => index("c", rest).map(Self::Copy),
            "r" | "replay" => index("r", rest).map(Self::Replay),
            "key" => match rest {
                "" => Err(ParseCommandError::MissingArgument("key")),
                "clear" => Ok(Self::ClearKey),
                secret => Ok(Self::SetKey(secret.to_string())),
            },
            "voices" => Ok(Self::Voices),
            "?" | "h" | "help" => Ok(Self::Help),
            "q" | "quit" | "exit" => Ok(Self::Quit),
            other => Err(ParseCommandError::Unknown(other.to_string())),
        }
    }
}

fn index(command: &'static str, arg: &str) -> Result<usize, ParseCommandError> {
    if arg.is_empty() {
        return Err(ParseCommandError::MissingIndex(command));
    }
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ParseCommandError::BadIndex(arg.to_string())),
    }
}
