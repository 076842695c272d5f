//! Command-line parsing

use anyhow::{Context, Result, bail};
use reqwest::Method;

pub const USAGE: &str = "\
usage: api-cli [--config PATH] <COMMAND>

commands:
  <METHOD> <PATH> [--data JSON] [--query KEY=VALUE]...
                  send one request and print the JSON response
  login           read {\"access_token\", \"refresh_token\"} JSON from stdin and store it
  logout          clear stored credentials
";

#[derive(Debug, PartialEq)]
pub struct Cli {
    pub config: Option<String>,
    pub command: Command,
}

#[derive(Debug, PartialEq)]
pub enum Command {
    Request {
        method: Method,
        path: String,
        data: Option<String>,
        query: Vec<(String, String)>,
    },
    Login,
    Logout,
    Help,
}

/// Parse arguments, excluding the program name.
pub fn parse(args: &[String]) -> Result<Cli> {
    let mut config = None;
    let mut positional = Vec::new();
    let mut data = None;
    let mut query = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                return Ok(Cli {
                    config,
                    command: Command::Help,
                });
            }
            "--config" => {
                config = Some(iter.next().context("--config needs a path")?.clone());
            }
            "--data" => {
                data = Some(iter.next().context("--data needs a JSON value")?.clone());
            }
            "--query" => {
                let pair = iter.next().context("--query needs KEY=VALUE")?;
                let (key, value) = pair
                    .split_once('=')
                    .with_context(|| format!("--query expects KEY=VALUE, got {pair:?}"))?;
                query.push((key.to_string(), value.to_string()));
            }
            other if other.starts_with("--") => bail!("unknown option {other}"),
            _ => positional.push(arg.as_str()),
        }
    }

    if data.is_some() && !query.is_empty() {
        bail!("--data and --query cannot be combined");
    }

    let command = match positional.as_slice() {
        [] => Command::Help,
        ["login"] => Command::Login,
        ["logout"] => Command::Logout,
        [method, path] => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .with_context(|| format!("invalid HTTP method {method:?}"))?;
            Command::Request {
                method,
                path: path.to_string(),
                data,
                query,
            }
        }
        other => bail!("unexpected arguments {other:?}\n\n{USAGE}"),
    };

    Ok(Cli { config, command })
}
