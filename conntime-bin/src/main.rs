mod client;
mod config;
mod interrupt;
mod reporting;
mod server;

use crate::config::{Config, ConfigError, DEFAULT_CONFIG_PATH};
use crate::reporting::report::FileReport;
use anyhow::{bail, Context, Error};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use slog::{info, o, Drain, Level};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

fn root_logger(level: Level) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().stdout().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let async_drain = slog_async::Async::new(drain).build().fuse();
    let level_filter = slog::LevelFilter(async_drain, level).fuse();
    slog::Logger::root(level_filter, o!())
}

fn load_config(path: &str) -> Config {
    match Config::load(path) {
        Ok(conf) => conf,
        Err(e) => fail_config(e),
    }
}

fn fail_config(e: ConfigError) -> ! {
    eprintln!("Could not load config: {}", e);
    std::process::exit(e.exit_code());
}

fn run(matches: &ArgMatches, config_path: &str, logger: slog::Logger) -> Result<(), Error> {
    match matches.subcommand() {
        ("client", _) => {
            let config = load_config(config_path);
            let client = config.client().unwrap_or_else(|e| fail_config(e)).clone();
            let cancel = CancellationToken::new();
            interrupt::register(cancel.clone(), "in-flight connections")?;
            let rt = Runtime::new()?;
            let summary = rt.block_on(client::run(&client, cancel, logger.new(o!("role" => "client"))))?;
            println!(
                "{} bursts over {} terms, {} connections{}",
                summary.launches(),
                summary.terms.len(),
                summary.connections(),
                if summary.cancelled { " (interrupted)" } else { "" }
            );
        }
        ("server", _) => {
            let config = load_config(config_path);
            let cancel = CancellationToken::new();
            interrupt::register(cancel.clone(), "the listener to close")?;
            let rt = Runtime::new()?;
            rt.block_on(server::run(&config.server, cancel, logger.new(o!("role" => "server"))))?;
        }
        ("live", _) => {
            let config = load_config(config_path);
            let cancel = CancellationToken::new();
            interrupt::register(cancel.clone(), "the last results")?;
            let rt = Runtime::new()?;
            rt.block_on(reporting::live::run(&config.report, cancel, logger.new(o!("role" => "live"))))?;
        }
        ("report", Some(sub)) => {
            let file = sub.value_of("FILE").context("no result file given")?;
            info!(logger, "reading results"; "file" => file);
            let report = FileReport::load(file).with_context(|| format!("could not read {}", file))?;
            println!("{}", report);
        }
        (other, _) => bail!("unknown subcommand '{}'", other),
    }
    Ok(())
}

fn main() {
    let matches = App::new("conntime")
        .version("1.0")
        .author("Benn Sundsrud <benn.sundsrud@gmail.com>")
        .about("Measure TCP connection and round-trip times under bursts of load")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Path to config file")
                .default_value(DEFAULT_CONFIG_PATH)
                .takes_value(true),
        )
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets verbosity level"),
        )
        .subcommand(SubCommand::with_name("client").about("run the burst plan against a server"))
        .subcommand(SubCommand::with_name("server").about("answer timestamp requests"))
        .subcommand(
            SubCommand::with_name("report")
                .about("print per-minute statistics of a result file")
                .arg(Arg::with_name("FILE").required(true).index(1)),
        )
        .subcommand(SubCommand::with_name("live").about("show statistics of results streamed by clients"))
        .get_matches();

    let level = match matches.occurrences_of("v") {
        0 => Level::Warning,
        1 => Level::Info,
        2 => Level::Debug,
        3 => Level::Trace,
        _ => {
            eprintln!("WARNING: more than -vvv is ignored");
            Level::Trace
        }
    };
    let logger = root_logger(level);
    let config_path = matches.value_of("config").unwrap_or(DEFAULT_CONFIG_PATH);

    if let Err(e) = run(&matches, config_path, logger) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
