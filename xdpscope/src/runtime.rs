use std::{error::Error, fmt};

use clap::Parser;

use crate::runtime::{
    cli::Cli,
    conf::{Conf, ConfError},
};

pub mod capabilities;
pub mod cli;
pub mod conf;
pub mod signals;

pub struct Runtime {
    pub cli: Cli,
    pub conf: Conf,
}

impl Runtime {
    pub fn new() -> Result<Self, RuntimeError> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self, RuntimeError> {
        let (conf, cli) = Conf::new(cli)?;

        Ok(Runtime { cli, conf })
    }
}

#[derive(Debug)]
pub enum RuntimeError {
    Conf(ConfError),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Conf(e) => e.fmt(f),
        }
    }
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RuntimeError::Conf(e) => Some(e),
        }
    }
}

impl From<ConfError> for RuntimeError {
    fn from(e: ConfError) -> Self {
        RuntimeError::Conf(e)
    }
}
