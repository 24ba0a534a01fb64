use crate::{Error, Result};

/// Options for the `run` command; values are `None` when not provided on CLI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOptions {
    pub server: Option<String>,
    pub offline: bool,
    pub config_path: Option<String>,
    pub device_id: Option<String>,
    pub once: bool,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
}

/// Parsed command-line intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(RunOptions),
    ShowHelp,
    ShowVersion,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut iter = args.iter();
        match iter.next().map(|s| s.as_str()) {
            None => Ok(Command::Run(RunOptions::default())),
            Some("run") => Ok(Command::Run(parse_run_options(&mut iter)?)),
            Some("--help") | Some("-h") => Ok(Command::ShowHelp),
            Some("--version") | Some("-V") => Ok(Command::ShowVersion),
            Some(flag) if flag.starts_with('-') => {
                // `run` is implied when the first argument is already a flag.
                Ok(Command::Run(parse_run_options(&mut args.iter())?))
            }
            Some(cmd) => Err(Error::InvalidArgs(format!(
                "unknown command '{cmd}', try --help"
            ))),
        }
    }

    pub fn help() -> &'static str {
        concat!(
            "trafficflow - traffic speed refresh daemon for LED map displays\n",
            "\n",
            "USAGE:\n",
            "  trafficflow run [--server <url> | --offline] [--config <path>] [--device-id <id>]\n",
            "                  [--once] [--log-level <level>] [--log-file <path>]\n",
            "  trafficflow --help\n",
            "  trafficflow --version\n",
            "\n",
            "OPTIONS:\n",
            "  --server <url>       Data server base url (http:// only)\n",
            "  --offline            Ignore any configured server; serve persisted tables\n",
            "  --config <path>      Config file (default: ~/.trafficflow/config.toml)\n",
            "  --device-id <id>     Identifier sent with every request as ?id=<id>\n",
            "  --once               Load every table once, report and exit\n",
            "  --log-level <level>  error|warn|info|debug|trace (default: info)\n",
            "  --log-file <path>    Also append log lines to this file\n",
            "  -h, --help           Show this help\n",
            "  -V, --version        Show version\n",
        )
    }

    pub fn print_help() {
        println!("{}", Self::help());
    }
}

fn parse_run_options(iter: &mut std::slice::Iter<String>) -> Result<RunOptions> {
    let mut opts = RunOptions::default();

    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--server" => opts.server = Some(take_value(flag, iter)?),
            "--offline" => opts.offline = true,
            "--config" => opts.config_path = Some(take_value(flag, iter)?),
            "--device-id" => opts.device_id = Some(take_value(flag, iter)?),
            "--once" => opts.once = true,
            "--log-level" => opts.log_level = Some(take_value(flag, iter)?),
            "--log-file" => opts.log_file = Some(take_value(flag, iter)?),
            other => {
                return Err(Error::InvalidArgs(format!(
                    "unknown flag '{other}', try --help"
                )));
            }
        }
    }

    if opts.offline && opts.server.is_some() {
        return Err(Error::InvalidArgs(
            "--server and --offline cannot be combined".into(),
        ));
    }
    Ok(opts)
}

fn take_value(flag: &str, iter: &mut std::slice::Iter<String>) -> Result<String> {
    iter.next()
        .cloned()
        .ok_or_else(|| Error::InvalidArgs(format!("expected a value after {flag}")))
}
