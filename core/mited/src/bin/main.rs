// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;

use mited::args;
use mited::runner;

fn main() {
    let args = args::Args::parse();

    if let Err(e) = runner::run(args.config(), args.one_shot()) {
        eprintln!("mited-demo: {:#}", e);
        std::process::exit(1);
    }
}
