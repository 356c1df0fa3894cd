//! CareerNavigator command-line client
//!
//! Thin driver over `careernav-core`: signs in, shows identity and profile,
//! and signs out. Results are printed to stdout as JSON, logs go to stderr.

use anyhow::{bail, Context, Result};
use careernav_core::types::{LoginRequest, SignupRequest};
use careernav_core::{open_session, AuthSession, Database};
use serde_json::json;

const USAGE: &str = "\
Usage: careernav <command>

Commands:
  login <email> <password>           Sign in with email and password
  signup <email> <password> [name]   Create an account and sign in
  whoami                             Show the signed-in user
  profile                            Show the full profile
  logout                             Sign out and forget the session
  status                             Show the local session state";

#[derive(Debug, PartialEq)]
enum Command {
    Login {
        email: String,
        password: String,
    },
    Signup {
        email: String,
        password: String,
        full_name: Option<String>,
    },
    Whoami,
    Profile,
    Logout,
    Status,
}

impl Command {
    fn parse(args: &[String]) -> Result<Self> {
        let mut args = args.iter().cloned();
        let Some(name) = args.next() else {
            bail!("missing command\n\n{USAGE}");
        };

        let command = match name.as_str() {
            "login" => Self::Login {
                email: args.next().context("login: missing <email>")?,
                password: args.next().context("login: missing <password>")?,
            },
            "signup" => Self::Signup {
                email: args.next().context("signup: missing <email>")?,
                password: args.next().context("signup: missing <password>")?,
                full_name: args.next(),
            },
            "whoami" => Self::Whoami,
            "profile" => Self::Profile,
            "logout" => Self::Logout,
            "status" => Self::Status,
            other => bail!("unknown command `{other}`\n\n{USAGE}"),
        };

        if let Some(extra) = args.next() {
            bail!("unexpected argument `{extra}`\n\n{USAGE}");
        }
        Ok(command)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("careernav=debug".parse()?)
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.first().map(String::as_str), Some("-h" | "--help" | "help")) {
        println!("{USAGE}");
        return Ok(());
    }
    let command = Command::parse(&args)?;

    tracing::debug!("Starting CareerNavigator CLI v{}", careernav_core::VERSION);

    let db = Database::open().context("failed to open database")?;
    db.migrate().context("failed to migrate database")?;
    tracing::debug!(path = %db.path().display(), "Database ready");
    let session = open_session(db)?;

    run(&session, command).await
}

async fn run(session: &AuthSession, command: Command) -> Result<()> {
    match command {
        Command::Login { email, password } => {
            let user = session.login(&LoginRequest { email, password }).await?;
            print_json(&user)
        }
        Command::Signup {
            email,
            password,
            full_name,
        } => {
            let user = session
                .signup(&SignupRequest {
                    email,
                    password,
                    full_name,
                })
                .await?;
            print_json(&user)
        }
        Command::Whoami => {
            session.check_auth().await;
            match session.user() {
                Some(user) => print_json(&user),
                None => bail!("not signed in"),
            }
        }
        Command::Profile => {
            session.check_auth().await;
            if !session.is_authenticated() {
                bail!("not signed in");
            }
            match session.fetch_profile().await {
                Ok(profile) => print_json(&profile),
                Err(e) if e.requires_login() => bail!("session expired, sign in again: {e}"),
                Err(e) => Err(e.into()),
            }
        }
        Command::Logout => {
            session.logout().await;
            print_json(&json!({ "signed_out": true }))
        }
        Command::Status => {
            let state = session.state();
            print_json(&json!({
                "status": format!("{:?}", state.status()),
                "is_authenticated": state.is_authenticated,
                "user": state.user,
                "api": session.client().base_url(),
            }))
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
