// Line-oriented command input.
//
// Translates one line typed on stdin into a SessionCommand for the running
// session. Blank lines produce nothing.

use partsbid_core::protocol::{BidId, LineItemId, RfqId};
use partsbid_core::session::SessionCommand;
use thiserror::Error;

pub const HELP: &str = "\
commands:
  toggle <bid>               select or deselect a bid (t)
  award                      create an order from the selected bids (a)
  rfq <id> [excluded ...]    switch to another RFQ
  help                       show this text (h, ?)
  quit                       leave (q, exit)";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("unknown command `{0}` (type `help`)")]
    Unknown(String),

    #[error("`{command}` needs {what}")]
    MissingArgument {
        command: &'static str,
        what: &'static str,
    },

    #[error("`{0}` is not a valid id")]
    InvalidId(String),
}

/// What a line of input asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Command(SessionCommand),
    Help,
    Nothing,
}

pub fn parse_line(line: &str) -> Result<Input, InputError> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(Input::Nothing);
    };

    let command = match head.to_ascii_lowercase().as_str() {
        "toggle" | "t" => {
            let id = words.next().ok_or(InputError::MissingArgument {
                command: "toggle",
                what: "a bid id",
            })?;
            SessionCommand::ToggleBid(BidId(parse_id(id)?))
        }
        "award" | "a" => SessionCommand::Award,
        "rfq" => {
            let id = words.next().ok_or(InputError::MissingArgument {
                command: "rfq",
                what: "an RFQ id",
            })?;
            let rfq_id = RfqId(parse_id(id)?);
            let excluded = words
                .map(|w| parse_id(w).map(LineItemId))
                .collect::<Result<Vec<_>, _>>()?;
            SessionCommand::SwitchRfq { rfq_id, excluded }
        }
        "quit" | "q" | "exit" => SessionCommand::Shutdown,
        "help" | "h" | "?" => return Ok(Input::Help),
        other => return Err(InputError::Unknown(other.to_string())),
    };

    Ok(Input::Command(command))
}

fn parse_id(raw: &str) -> Result<u64, InputError> {
    raw.trim_start_matches('#')
        .parse()
        .map_err(|_| InputError::InvalidId(raw.to_string()))
}
