use crate::CLAP_STYLING;
use clap::{arg, command};
use sitedex::handlers::DEFAULT_STATE_PATH;
use std::path::PathBuf;

fn config_arg() -> clap::Arg {
    arg!(-c --"config" <PATH>)
        .required(false)
        .help("TOML file with provider options ([always], [full_dispatch], [single_dispatch])")
        .value_parser(clap::value_parser!(PathBuf))
}

fn state_arg() -> clap::Arg {
    arg!(-s --"state" <PATH>)
        .required(false)
        .help("Location of the crawl state database")
        .default_value(DEFAULT_STATE_PATH)
}

fn output_arg() -> clap::Arg {
    arg!(-o --"output" <PATH>)
        .required(false)
        .help("Save report to file (default: display to screen)")
        .value_parser(clap::value_parser!(PathBuf))
}

fn format_arg() -> clap::Arg {
    arg!(-f --"format" <FORMAT>)
        .required(false)
        .help("Report format: text, json")
        .value_parser(["text", "json"])
        .default_value("text")
}

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("sitedex")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("sitedex")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress progress output").required(false))
        .subcommand_required(true)
        .subcommand(
            command!("crawl")
                .about("Crawl a site from a seed URL and normalize every indexable resource")
                .arg(
                    arg!(-u --"seed" <URL>)
                        .required(false)
                        .help("The URL to start from (overrides full_dispatch.seed)"),
                )
                .arg(config_arg())
                .arg(state_arg())
                .arg(
                    arg!(-t --"threads" <NUM_WORKERS>)
                        .required(false)
                        .help("The number of concurrent fetches per depth level.")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("10"),
                )
                .arg(
                    arg!(--"max-depth" <DEPTH>)
                        .required(false)
                        .help("Maximum link depth to follow (default: 15)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"limit" <COUNT>)
                        .required(false)
                        .help("Stop after this many fetched resources (0 = unbounded)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"own-host-only")
                        .required(false)
                        .help("Only follow links on the seed host")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(format_arg())
                .arg(output_arg()),
        )
        .subcommand(
            command!("single")
                .about("Fetch and normalize exactly one resource")
                .arg(
                    arg!(-H --"host" <URL>)
                        .required(false)
                        .help("Host the path is resolved against (overrides single_dispatch.host)"),
                )
                .arg(
                    arg!(-p --"path" <PATH>)
                        .required(true)
                        .help("Path of the resource on the host, e.g. /en/about"),
                )
                .arg(config_arg())
                .arg(state_arg())
                .arg(format_arg())
                .arg(output_arg()),
        )
        .subcommand(
            command!("reset")
                .about("Clear crawl progress and link filter state left by an interrupted run")
                .arg(state_arg()),
        )
}
