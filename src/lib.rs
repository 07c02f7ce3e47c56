pub mod anchor;
pub mod args;
pub mod commands;
pub mod config;
pub mod env;
pub mod error;
pub mod generate;
pub mod keys;
pub mod log;
pub mod parent;
pub mod parse;
pub mod rollover;
pub mod signing;
pub mod util;
pub mod zone;

use clap::Parser;

use args::Args;
use env::Env;
use error::Error;

pub fn parse_args(env: impl Env) -> Result<Args, Error> {
    Ok(Args::try_parse_from(env.args_os())?)
}

/// Run the program in the given environment, returning the exit code.
pub fn run(env: impl Env) -> u8 {
    match parse_args(&env).and_then(|args| args.execute(&env)) {
        Ok(()) => 0,
        Err(err) => {
            err.pretty_print(&env);
            err.exit_code()
        }
    }
}
