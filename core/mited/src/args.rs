// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", env = "MITED_CONFIG")]
    config: Option<String>,

    /// Run the client sequence once and exit instead of waiting for a signal
    #[arg(long, env = "MITED_ONE_SHOT")]
    one_shot: bool,
}

impl Args {
    pub fn config(&self) -> Option<&str> {
        self.config.as_deref()
    }

    pub fn one_shot(&self) -> bool {
        self.one_shot
    }
}
