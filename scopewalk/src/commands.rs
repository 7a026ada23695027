use clap::{arg, command};
use url::Url;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("scopewalk")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("scopewalk")
        .arg(
            arg!(--"db" <PATH>)
                .required(false)
                .help("Location of the scopewalk database directory")
                .global(true)
                .default_value("~/.config/scopewalk/"),
        )
        .arg(
            arg!(-q --"quiet" "Suppress non-essential output")
                .required(false)
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Initializes the scopewalk database on your filesystem")
                .arg(
                    arg!(-f --"force")
                        .help("Overwrite any existing database at the specified location")
                        .required(false)
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("crawl")
                .about(
                    "Crawl a seed URL breadth-first within its origin and scope, cataloging \
                every page, API endpoint and asset discovered.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("The seed URL to crawl from")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-s --"scope" <PATH>)
                        .required(false)
                        .help("Path prefix to stay within (default: the whole origin)"),
                )
                .arg(
                    arg!(-d --"depth" <DEPTH>)
                        .required(false)
                        .help("Maximum link depth from the seed")
                        .value_parser(clap::value_parser!(u32))
                        .default_value("2"),
                )
                .arg(
                    arg!(-r --"rate" <MILLIS>)
                        .required(false)
                        .help("Pacing delay between navigations, in milliseconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("500"),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Request timeout in seconds")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("10"),
                ),
        )
        .subcommand(
            command!("resume")
                .about(
                    "Resume crawls left behind by an interrupted process, including \
                limit-paused crawls whose record cap has since been raised",
                ),
        )
        .subcommand(command!("targets").about("List all known targets with their record counters"))
        .subcommand(
            command!("list")
                .about("List cataloged URLs for a target")
                .arg(
                    arg!(-t --"target" <TARGET_ID>)
                        .required(true)
                        .help("The target id, e.g. https://ex.com/docs/"),
                )
                .arg(
                    arg!(-k --"kind" <KINDS>)
                        .required(false)
                        .help("Comma-separated kind filter: page, api, asset"),
                )
                .arg(
                    arg!(-c --"contains" <SUBSTRING>)
                        .required(false)
                        .help("Case-insensitive substring filter on the canonical URL"),
                )
                .arg(
                    arg!(--"json")
                        .required(false)
                        .help("Emit records as JSON instead of a table")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("set")
                .about("Update a target's settings")
                .arg(
                    arg!(-t --"target" <TARGET_ID>)
                        .required(true)
                        .help("The target id to update"),
                )
                .arg(
                    arg!(--"max-urls" <N>)
                        .required(false)
                        .help("Record cap for the target (0 = unlimited)")
                        .value_parser(clap::value_parser!(u32)),
                )
                .arg(
                    arg!(--"ignore-hash" <BOOL>)
                        .required(false)
                        .help("Drop URL fragments when canonicalizing")
                        .value_parser(clap::value_parser!(bool)),
                )
                .arg(
                    arg!(--"exclude-assets" <BOOL>)
                        .required(false)
                        .help("Skip storing static assets")
                        .value_parser(clap::value_parser!(bool)),
                )
                .arg(
                    arg!(--"query" <MODE>)
                        .required(false)
                        .help("Query normalization mode")
                        .value_parser(["sort", "none"]),
                )
                .arg(
                    arg!(--"deep" <BOOL>)
                        .required(false)
                        .help("Observe network calls in addition to links")
                        .value_parser(clap::value_parser!(bool)),
                ),
        )
        .subcommand(
            command!("reset")
                .about("Delete all cataloged URLs for a target and zero its counters")
                .arg(
                    arg!(-t --"target" <TARGET_ID>)
                        .required(true)
                        .help("The target id to reset"),
                ),
        )
}
