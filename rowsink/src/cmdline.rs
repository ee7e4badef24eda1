use clap::{Arg, ArgAction, Command};

pub(super) fn root_cli() -> Command {
    Command::new("rowsink")
        .about("Batching sink that commits records to a wide-column store")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(add_run_subcommand())
}

fn add_run_subcommand() -> Command {
    Command::new("run")
        .about("Reads newline delimited JSON records from stdin and writes them to the store")
        .arg(
            Arg::new("from-env")
                .long("from-env")
                .help(
                    "Load the sink and engine objects from ROWSINK_SINK_OBJECT and \
                     ROWSINK_ENGINE_OBJECT, the sink flags are ignored",
                )
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("table")
                .long("table")
                .help("Table the records are written to")
                .required_unless_present("from-env")
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("batch-size")
                .long("batch-size")
                .help("Number of records that triggers a flush")
                .default_value("15000")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("flush-interval-secs")
                .long("flush-interval-secs")
                .help("Seconds between forced flushes, 0 derives it from the message timeout")
                .default_value("0")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("message-timeout-secs")
                .long("message-timeout-secs")
                .help("Upstream message timeout")
                .default_value("30")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("skip-wal")
                .long("skip-wal")
                .help("Do not write the mutations to the write-ahead log")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("store")
                .long("store")
                .help("Builtin store to write to")
                .default_value("log")
                .value_parser(["log", "memory"]),
        )
        .arg(
            Arg::new("row-key-field")
                .long("row-key-field")
                .help("JSON field holding the row key")
                .required_unless_present("from-env")
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("column-family")
                .long("column-family")
                .help("Column family the fields are written to")
                .required_unless_present("from-env")
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("columns")
                .long("columns")
                .help("JSON fields written as columns")
                .num_args(1..)
                .value_delimiter(',')
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("counters")
                .long("counters")
                .help("Integer JSON fields added to counter columns")
                .num_args(1..)
                .value_delimiter(',')
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .help("Print the metrics when the sink stops")
                .action(ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        root_cli().debug_assert();
    }

    #[test]
    fn test_run_requires_table_unless_from_env() {
        let err = root_cli()
            .try_get_matches_from(["rowsink", "run", "--row-key-field", "id"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let matches = root_cli()
            .try_get_matches_from(["rowsink", "run", "--from-env"])
            .unwrap();
        let (name, run) = matches.subcommand().unwrap();
        assert_eq!(name, "run");
        assert!(run.get_flag("from-env"));
    }

    #[test]
    fn test_run_column_lists() {
        let matches = root_cli()
            .try_get_matches_from([
                "rowsink",
                "run",
                "--table",
                "words",
                "--row-key-field",
                "word",
                "--column-family",
                "cf",
                "--columns",
                "word,lang",
                "--counters",
                "count",
            ])
            .unwrap();
        let (_, run) = matches.subcommand().unwrap();
        let columns: Vec<&String> = run.get_many::<String>("columns").unwrap().collect();
        assert_eq!(columns, ["word", "lang"]);
        assert_eq!(run.get_one::<usize>("batch-size"), Some(&15000));
        assert_eq!(run.get_one::<String>("store").map(String::as_str), Some("log"));
    }
}
