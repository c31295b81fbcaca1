use clap::{App, Arg};
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub uri: String,
    pub count: u32,
    pub prefix: String,
    pub sequential: bool,
    pub backoff: Duration,
    pub poll_interval: Duration,
    pub operation_timeout: Duration,
    pub max_attempts: Option<u32>,
    pub max_visibility_waits: Option<u32>,
    pub log_path: String,
}

pub fn init_app() -> Config {
    let matches = App::new("creationrepro")
        .arg(
            Arg::new("uri")
                .short('u')
                .long("uri")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::new("count")
                .short('c')
                .long("count")
                .takes_value(true)
                .default_value("128"),
        )
        .arg(
            Arg::new("prefix")
                .short('p')
                .long("prefix")
                .takes_value(true)
                .default_value("CreationRepro"),
        )
        .arg(Arg::new("sequential").short('s').long("sequential"))
        .arg(
            Arg::new("backoff_secs")
                .long("backoff-secs")
                .takes_value(true)
                .default_value("15"),
        )
        .arg(
            Arg::new("poll_secs")
                .long("poll-secs")
                .takes_value(true)
                .default_value("30"),
        )
        .arg(
            Arg::new("timeout_secs")
                .long("timeout-secs")
                .takes_value(true)
                .default_value("600"),
        )
        .arg(
            Arg::new("max_attempts")
                .long("max-attempts")
                .takes_value(true),
        )
        .arg(Arg::new("max_polls").long("max-polls").takes_value(true))
        .arg(
            Arg::new("log_path")
                .long("log-path")
                .takes_value(true)
                .default_value("creationrepro.log"),
        )
        .get_matches();

    let prefix = matches.value_of("prefix").unwrap().to_owned();
    // the prefix is interpolated into DDL statements
    assert!(
        !prefix.is_empty()
            && prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_'),
        "prefix must be a plain identifier"
    );

    Config {
        uri: matches.value_of("uri").unwrap().to_owned(),
        count: parse(&matches, "count"),
        prefix,
        sequential: matches.is_present("sequential"),
        backoff: Duration::from_secs(parse(&matches, "backoff_secs")),
        poll_interval: Duration::from_secs(parse(&matches, "poll_secs")),
        operation_timeout: Duration::from_secs(parse(&matches, "timeout_secs")),
        max_attempts: matches
            .value_of("max_attempts")
            .map(|v| v.parse().expect("max-attempts must be a number")),
        max_visibility_waits: matches
            .value_of("max_polls")
            .map(|v| v.parse().expect("max-polls must be a number")),
        log_path: matches.value_of("log_path").unwrap().to_owned(),
    }
}

fn parse<T: std::str::FromStr>(matches: &clap::ArgMatches, name: &str) -> T {
    matches
        .value_of(name)
        .unwrap()
        .parse()
        .unwrap_or_else(|_| panic!("{} must be a number", name))
}
