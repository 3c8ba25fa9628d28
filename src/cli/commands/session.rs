use clap::{Arg, ArgAction, Command};

pub const CMD_LOGIN: &str = "login";
pub const CMD_STATUS: &str = "status";
pub const CMD_RENEW: &str = "renew";
pub const CMD_LOGOUT: &str = "logout";
pub const CMD_LOGOUT_ALL: &str = "logout-all";
pub const CMD_VERIFY: &str = "verify";
pub const CMD_LOCKOUT: &str = "lockout";
pub const CMD_REQUEST: &str = "request";

pub const ARG_USERNAME: &str = "username";
pub const ARG_PASSWORD: &str = "password";
pub const ARG_WAIT: &str = "wait";
pub const ARG_PATH: &str = "path";
pub const ARG_METHOD: &str = "method";
pub const ARG_DATA: &str = "data";

fn username_arg() -> Arg {
    Arg::new(ARG_USERNAME)
        .long("username")
        .help("Directory username")
        .env("AUTHKEEPER_USERNAME")
}

#[must_use]
pub fn with_subcommands(command: Command) -> Command {
    command
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new(CMD_LOGIN)
                .about("Log in and store the issued credentials")
                .arg(username_arg().required(true))
                .arg(
                    Arg::new(ARG_PASSWORD)
                        .long("password")
                        .help("Password, read from stdin when omitted")
                        .env("AUTHKEEPER_PASSWORD")
                        .hide_env_values(true),
                ),
        )
        .subcommand(Command::new(CMD_STATUS).about("Show credential and lockout status"))
        .subcommand(Command::new(CMD_RENEW).about("Renew the access credential now"))
        .subcommand(Command::new(CMD_LOGOUT).about("End this session"))
        .subcommand(Command::new(CMD_LOGOUT_ALL).about("End every session of this identity"))
        .subcommand(
            Command::new(CMD_VERIFY).about("Ask the server whether the credential is valid"),
        )
        .subcommand(
            Command::new(CMD_LOCKOUT)
                .about("Show the lockout countdown")
                .arg(
                    username_arg()
                        .help("Ask the server about this username when nothing is known locally"),
                )
                .arg(
                    Arg::new(ARG_WAIT)
                        .long("wait")
                        .help("Follow the countdown until the lock lifts")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new(CMD_REQUEST)
                .about("Send an authenticated request to the API")
                .arg(
                    Arg::new(ARG_PATH)
                        .help("API path, e.g. /users/me")
                        .required(true),
                )
                .arg(
                    Arg::new(ARG_METHOD)
                        .short('X')
                        .long("method")
                        .help("HTTP method")
                        .default_value("GET"),
                )
                .arg(
                    Arg::new(ARG_DATA)
                        .short('d')
                        .long("data")
                        .help("JSON request body"),
                ),
        )
}
