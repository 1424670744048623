//! Wire commands for telnet-style robot controllers
//!
//! A [`Command`] is one translated instruction in the controller's line
//! protocol: a verb followed by space separated parameters and a newline.
//! Numeric parameters are rendered with fixed precision and trailing zeros
//! stripped, which is what the controller firmware expects.

use crate::error::{Result, RmiError};
use std::fmt;

/// Default number of decimals used for numeric parameters
pub const DEFAULT_PRECISION: usize = 6;

/// Verb that stops motion; pending queued motion is dropped before it is sent
pub const ABORT_VERB: &str = "abort";

/// Which channel a command travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Motion command, queued and sent by the connector's sender loop
    Action,
    /// State query, sent synchronously with the reply handed to the caller
    Query,
}

/// One translated wire-protocol instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    kind: CommandKind,
    name: String,
    params: Vec<String>,
}

impl Command {
    /// Create a command with no parameters
    pub fn new(kind: CommandKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Create a command with a single raw parameter blob
    pub fn with_params(kind: CommandKind, name: impl Into<String>, params: impl Into<String>) -> Self {
        let mut cmd = Self::new(kind, name);
        cmd.add_param("", params);
        cmd
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// A command without a verb has nothing to send
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// Append a parameter
    ///
    /// With a key the stored entry is `"key value"` (e.g. `"velros 1 1 1"`),
    /// without one it is the raw value. Empty values are skipped unless they
    /// carry a key.
    pub fn add_param(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        let entry = match (key.is_empty(), value.is_empty()) {
            (true, true) => return self,
            (true, false) => value,
            (false, true) => key.to_string(),
            (false, false) => format!("{} {}", key, value),
        };
        self.params.push(entry);
        self
    }

    /// Append numeric values under `key` using [`DEFAULT_PRECISION`]
    pub fn add_values(&mut self, key: &str, values: &[f64]) -> &mut Self {
        self.add_param(key, params_to_string(values, DEFAULT_PRECISION))
    }

    /// Render the exact line sent to the controller, newline included
    ///
    /// Returns an empty string for an empty command.
    pub fn to_wire(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!("{}\n", self)
    }

    /// Number of numeric tokens across all parameters
    pub fn numeric_count(&self) -> usize {
        self.params
            .iter()
            .flat_map(|p| p.split_whitespace())
            .filter(|t| is_numeric_token(t))
            .count()
    }

    /// Parse a wire line back into a command
    ///
    /// The verb is the leading run of non-numeric tokens. Numbers directly
    /// after the verb form one raw parameter; every later word starts a new
    /// keyed parameter that collects the numbers following it.
    pub fn from_wire(kind: CommandKind, line: &str) -> Result<Self> {
        let mut tokens = line.trim_end_matches(['\r', '\n']).split_whitespace().peekable();

        let mut verb = Vec::new();
        while let Some(token) = tokens.next_if(|t| !is_numeric_token(t)) {
            verb.push(token);
        }
        if verb.is_empty() {
            return Err(RmiError::Protocol(format!("Missing verb in wire line: {:?}", line)));
        }

        let mut cmd = Self::new(kind, verb.join(" "));
        let mut current: Vec<&str> = Vec::new();
        for token in tokens {
            if !is_numeric_token(token) && !current.is_empty() {
                cmd.params.push(current.join(" "));
                current.clear();
            }
            current.push(token);
        }
        if !current.is_empty() {
            cmd.params.push(current.join(" "));
        }

        Ok(cmd)
    }
}

impl fmt::Display for Command {
    /// Wire line without the trailing newline
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for param in self.params.iter().filter(|p| !p.is_empty()) {
            write!(f, " {}", param)?;
        }
        Ok(())
    }
}

/// Format a float with at most `precision` decimals and no trailing zeros
pub fn float_to_string_no_trailing(value: f64, precision: usize) -> String {
    let formatted = format!("{:.*}", precision, value);
    if !formatted.contains('.') {
        return formatted;
    }
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// Space-join values, each formatted by [`float_to_string_no_trailing`]
pub fn params_to_string(values: &[f64], precision: usize) -> String {
    values
        .iter()
        .map(|v| float_to_string_no_trailing(*v, precision))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a whitespace separated numeric reply such as `"0.1 -2.1 1.3"`
pub fn parse_values(line: &str) -> Result<Vec<f64>> {
    line.split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| RmiError::Protocol(format!("Non-numeric token {:?} in reply {:?}", token, line)))
        })
        .collect()
}

// "inf" and "nan" parse as f64 but are words on the wire
fn is_numeric_token(token: &str) -> bool {
    token.bytes().any(|b| b.is_ascii_digit()) && token.parse::<f64>().is_ok()
}
