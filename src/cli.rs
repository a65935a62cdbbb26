use clap::{Arg, ArgAction, ArgMatches, ColorChoice, Command};

pub struct Cli {
    matches: ArgMatches,
}

impl Default for Cli {
    fn default() -> Self {
        Self::new()
    }
}

impl Cli {
    /// Build the command line interface.
    pub fn new() -> Self {
        Self {
            matches: Command::new("gnss-ssr-hub")
                .author("Guillaume W. Bres, <guillaume.bressaix@gmail.com>")
                .version(env!("CARGO_PKG_VERSION"))
                .about("Real-time GNSS SSR correction hub: NTRIP ingest, RTCM/SSR codec, re-broadcast")
                .color(ColorChoice::Always)
                .arg_required_else_help(true)
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .required(true)
                        .help("Path to the hub configuration JSON file"),
                )
                .arg(
                    Arg::new("reread")
                        .long("reread-on-sighup")
                        .action(ArgAction::SetTrue)
                        .help("Reread the configuration file and diff the mountpoint set on SIGHUP"),
                )
                .get_matches(),
        }
    }

    pub fn config_path(&self) -> &str {
        self.matches
            .get_one::<String>("config")
            .expect("--config is required")
    }

    pub fn reread_on_sighup(&self) -> bool {
        self.matches.get_flag("reread")
    }
}
