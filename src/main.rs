use anyhow::{anyhow, bail, Result};
use std::path::PathBuf;
use std::sync::Arc;

use plantcare::auth::{Session, SessionManager, MAX_EXPIRES_IN_SECS};
use plantcare::capture::CapturedImage;
use plantcare::config::Config;
use plantcare::db::{Database, PlantStore};
use plantcare::drive::{DriveClient, RemoteStore};
use plantcare::gallery;
use plantcare::llm::LlmClient;
use plantcare::logging;
use plantcare::pipeline::{Coordinator, Submission};

#[derive(Debug, PartialEq)]
enum Command {
    Submit(PathBuf),
    Rediagnose { plant_id: String, image: PathBuf },
    List,
    Show(String),
    Remove(String),
    SessionSet {
        token: String,
        refresh_token: Option<String>,
        expires_in: Option<i64>,
    },
    SessionStatus,
    SessionClear,
}

struct Args {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match parse_from(&args) {
        Ok(Some(args)) => args,
        Ok(None) => {
            print_help();
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    }
}

/// `Ok(None)` when only help or version output was requested.
fn parse_from(args: &[String]) -> Result<Option<Args>> {
    let mut config_path = None;
    let mut positional: Vec<String> = Vec::new();
    let mut refresh_token = None;
    let mut expires_in = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => return Ok(None),
            "--version" | "-V" => {
                println!("plantcare {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                let path = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--config requires a path argument"))?;
                config_path = Some(PathBuf::from(path));
                i += 1;
            }
            "--refresh" => {
                let token = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--refresh requires a token argument"))?;
                refresh_token = Some(token.clone());
                i += 1;
            }
            "--expires-in" => {
                let secs = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--expires-in requires a number of seconds"))?;
                let parsed = secs
                    .parse::<i64>()
                    .map_err(|_| anyhow!("--expires-in expects seconds, got {}", secs))?;
                if !(1..=MAX_EXPIRES_IN_SECS).contains(&parsed) {
                    bail!(
                        "--expires-in must be between 1 and {} seconds, got {}",
                        MAX_EXPIRES_IN_SECS,
                        parsed
                    );
                }
                expires_in = Some(parsed);
                i += 1;
            }
            flag if flag.starts_with('-') => bail!("Unknown argument: {}", flag),
            value => positional.push(value.to_string()),
        }
        i += 1;
    }

    let words: Vec<&str> = positional.iter().map(String::as_str).collect();
    let command = match words.as_slice() {
        ["submit", image] => Command::Submit(PathBuf::from(image)),
        ["rediagnose", plant_id, image] => Command::Rediagnose {
            plant_id: plant_id.to_string(),
            image: PathBuf::from(image),
        },
        ["list"] => Command::List,
        ["show", plant_id] => Command::Show(plant_id.to_string()),
        ["remove", plant_id] => Command::Remove(plant_id.to_string()),
        ["session", "set", token] => Command::SessionSet {
            token: token.to_string(),
            refresh_token: refresh_token.take(),
            expires_in: expires_in.take(),
        },
        ["session", "status"] => Command::SessionStatus,
        ["session", "clear"] => Command::SessionClear,
        [] => bail!("No command given"),
        other => bail!("Unknown command: {}", other.join(" ")),
    };

    if refresh_token.is_some() || expires_in.is_some() {
        bail!("--refresh and --expires-in only apply to `session set`");
    }

    Ok(Some(Args {
        config_path,
        command,
    }))
}

fn print_help() {
    println!(
        r#"plantcare - photograph a plant, store the photo, get an AI diagnosis

USAGE:
    plantcare [OPTIONS] <COMMAND>

COMMANDS:
    submit IMAGE                  Register a new plant from a photo
    rediagnose PLANT_ID IMAGE     Add a new diagnosis to an existing plant
    list                          Show all plants, newest first
    show PLANT_ID                 Show a plant and its diagnosis history
    remove PLANT_ID               Delete a plant and its history
    session set TOKEN [--refresh TOKEN] [--expires-in SECS]
                                  Store the Google access token
    session status                Show whether the stored session is usable
    session clear                 Forget the stored session

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    PLANTCARE_CONFIG                Path to config file (overrides default location)
    PLANTCARE_LOG                   Log level (trace, debug, info, warn, error)
    PLANTCARE_LLM_API_KEY           Inference API key
    PLANTCARE_DRIVE_FOLDER_ID       Drive folder receiving uploads
    PLANTCARE_DB_URL                Hosted store URL (switches to the hosted backend)
    PLANTCARE_DB_API_KEY            Hosted store API key
    PLANTCARE_OAUTH_CLIENT_ID       OAuth client used to refresh sessions
    PLANTCARE_OAUTH_CLIENT_SECRET   OAuth client secret

Config file location: $XDG_CONFIG_HOME/plantcare/config.toml"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    let _ = logging::init(None);

    let mut config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_env();

    let sessions = SessionManager::from_config(&config.auth);

    match args.command {
        Command::SessionSet {
            token,
            refresh_token,
            expires_in,
        } => {
            let mut session = Session::new(token).with_refresh_token(refresh_token);
            if let Some(secs) = expires_in {
                session = session.expiring_in(secs);
            }
            sessions.store().save(&session)?;
            println!("Session saved to {}", sessions.store().path().display());
        }
        Command::SessionStatus => match sessions.active_session() {
            Ok(session) => match session.expires_at {
                Some(at) => println!("Signed in, token valid until {}", at.to_rfc3339()),
                None => println!("Signed in, token expiry unknown"),
            },
            Err(e) => println!("{}", e),
        },
        Command::SessionClear => {
            sessions.store().clear()?;
            println!("Session cleared");
        }
        Command::List => {
            let db = open_store(&config)?;
            let entries = gallery::load_gallery(&*db)?;
            print!("{}", gallery::render_gallery(&entries));
        }
        Command::Show(plant_id) => {
            let db = open_store(&config)?;
            let detail = gallery::load_detail(&*db, &plant_id)?
                .ok_or_else(|| anyhow!("Plant {} not found", plant_id))?;
            print!("{}", gallery::render_detail(&detail));
        }
        Command::Remove(plant_id) => {
            let db = open_store(&config)?;
            if !db.delete_plant(&plant_id)? {
                bail!("Plant {} not found", plant_id);
            }
            println!("Removed plant {}", plant_id);
        }
        Command::Submit(path) => {
            let session = sessions.active_session()?;
            let image = CapturedImage::from_path(&path)?;
            let coordinator = coordinator(&config, open_store(&config)?);
            let submission = coordinator.submit(&session, image).await?;
            print_submission(&submission);
        }
        Command::Rediagnose { plant_id, image } => {
            let session = sessions.active_session()?;
            let image = CapturedImage::from_path(&image)?;
            let coordinator = coordinator(&config, open_store(&config)?);
            let submission = coordinator.rediagnose(&session, &plant_id, image).await?;
            print_submission(&submission);
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<Database>> {
    let db = Database::open(&config.database)?;
    db.initialize()?;
    Ok(Arc::new(db))
}

fn coordinator(config: &Config, db: Arc<Database>) -> Coordinator {
    let llm = LlmClient::from_config(&config.llm);
    tracing::info!(
        provider = llm.provider_name(),
        endpoint = llm.endpoint().unwrap_or("-"),
        "Inference provider ready"
    );
    let drive: Arc<dyn RemoteStore> = Arc::new(DriveClient::from_config(&config.drive));
    Coordinator::new(drive, llm, db, config.capture.clone())
}

fn print_submission(submission: &Submission) {
    let plant = &submission.plant;
    if submission.diagnosis_failed() {
        println!(
            "Photo saved but the diagnosis failed; plant {} kept as \"{}\"",
            plant.id, plant.name
        );
    } else {
        println!("{}: {} ({})", plant.id, plant.name, plant.health_status);
        println!("{}", plant.diagnosis);
    }
    if submission.event.is_none() {
        println!("Warning: this diagnosis could not be added to the plant's history");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_submit_with_config() {
        let parsed = parse_from(&args(&["--config", "/tmp/p.toml", "submit", "leaf.jpg"]))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.config_path, Some(PathBuf::from("/tmp/p.toml")));
        assert_eq!(parsed.command, Command::Submit(PathBuf::from("leaf.jpg")));
    }

    #[test]
    fn test_parse_session_set() {
        let parsed = parse_from(&args(&["session", "set", "ya29", "--expires-in", "3599", "--refresh", "1//r"]))
            .unwrap()
            .unwrap();
        assert_eq!(
            parsed.command,
            Command::SessionSet {
                token: "ya29".to_string(),
                refresh_token: Some("1//r".to_string()),
                expires_in: Some(3599),
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_from(&args(&[])).is_err());
        assert!(parse_from(&args(&["submit"])).is_err());
        assert!(parse_from(&args(&["list", "--bogus"])).is_err());
        assert!(parse_from(&args(&["list", "--refresh", "x"])).is_err());
        assert!(parse_from(&args(&["--help"])).unwrap().is_none());
    }

    #[test]
    fn test_parse_rejects_out_of_range_expiry() {
        for secs in ["9223372036854775807", "0", "-60", "31708801"] {
            assert!(
                parse_from(&args(&["session", "set", "tok", "--expires-in", secs])).is_err(),
                "{} accepted",
                secs
            );
        }
        assert!(parse_from(&args(&["session", "set", "tok", "--expires-in", "31622400"])).is_ok());
    }
}
