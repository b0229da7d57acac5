// Copyright 2021-2024 SecureDNA Stiftung (SecureDNA Foundation) <licensing@securedna.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::path::PathBuf;

use clap::Parser;

use szstd_demos::report::measure_directory;
use szstd_demos::NegotiationOpts;

#[derive(Debug, Parser)]
#[command(
    name = "szstd-report",
    version,
    about = "Compares compressed sizes with and without each cached dictionary"
)]
struct Opts {
    #[command(flatten)]
    negotiation: NegotiationOpts,

    #[arg(help = "Directory of sample files to compress")]
    samples: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let config = opts.negotiation.to_partial_config()?;
    szstd_demos::init_logging(config.log_level.unwrap_or_default());
    let context = NegotiationOpts::context(config)?;
    let snapshot = context.snapshot();

    let reports = measure_directory(&snapshot, &opts.samples)?;
    let (original, plain, best) = reports.iter().fold((0, 0, 0), |(o, p, b), report| {
        let best = report.best().map_or(report.plain, |&(_, size)| size.min(report.plain));
        (o + report.original, p + report.plain, b + best)
    });
    for report in &reports {
        println!("{report}");
    }
    println!(
        "{} files, {original} bytes: {plain} with zstd, {best} with the best dictionary per file",
        reports.len()
    );
    Ok(())
}
