use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};

pub const DEFAULT_CONFIG: &str = "auth.config.json";

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

fn role_arg(required: bool) -> Arg {
    Arg::new("role")
        .help("Role name as defined in the roles section of the config")
        .required(required)
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    Command::new("authstate")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to the JSON auth config")
                .default_value(DEFAULT_CONFIG)
                .env("AUTHSTATE_CONFIG")
                .global(true),
        )
        .arg(
            Arg::new("env")
                .short('e')
                .long("env")
                .help("Value for the {env} placeholder of storageState.filePattern")
                .env("AUTHSTATE_ENV")
                .global(true),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("AUTHSTATE_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
        .subcommand(
            Command::new("check")
                .about("Verify that the credential variables of each role are set")
                .arg(
                    Arg::new("role")
                        .help("Roles to check (default: every configured role)")
                        .num_args(0..)
                        .action(ArgAction::Append),
                ),
        )
        .subcommand(Command::new("list").about("List stored sessions and their validity"))
        .subcommand(
            Command::new("status")
                .about("Show the stored session of a role")
                .arg(role_arg(true)),
        )
        .subcommand(
            Command::new("clear")
                .about("Delete the stored session of a role, or all of them")
                .arg(role_arg(false)),
        )
        .subcommand(
            Command::new("cleanup")
                .about("Delete stored sessions older than the threshold (default 24h)")
                .arg(
                    Arg::new("max-age-hours")
                        .long("max-age-hours")
                        .help("Age threshold in hours")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("totp")
                .about("Print the current TOTP code of a role")
                .arg(role_arg(true)),
        )
}
