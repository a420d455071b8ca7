use anyhow::{bail, Context, Result};
use chrono::{NaiveDateTime, NaiveTime};
use clap::{Parser, Subcommand};
use facelog_core::PeriodSchedule;
use std::path::{Path, PathBuf};
use zbus::proxy;

#[derive(Parser)]
#[command(name = "facelog", about = "facelog attendance recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll (or replace) an identity from an encoding file
    Enroll {
        /// Identity name
        #[arg(short, long)]
        name: String,
        /// JSON file holding the face encoding as an array of numbers
        #[arg(short, long)]
        encoding: PathBuf,
    },
    /// Match a probe encoding and log it if its window allows
    Recognize {
        /// JSON file holding the probe encoding
        #[arg(short, long)]
        encoding: PathBuf,
        /// Probe time as "YYYY-MM-DD HH:MM:SS" (default: now)
        #[arg(long)]
        at: Option<String>,
    },
    /// List enrolled identities
    List,
    /// Show daemon status
    Status,
    /// Clear the log-once state so every identity can be logged again
    Reset,
    /// Show which window a time of day falls in (no daemon needed)
    Classify {
        /// Time as "HH:MM[:SS]" or "YYYY-MM-DD HH:MM:SS"
        time: String,
        /// TOML file of [[window]] entries (default: reference schedule)
        #[arg(long)]
        windows: Option<PathBuf>,
    },
}

#[proxy(
    interface = "org.facelog.Attendance1",
    default_service = "org.facelog.Attendance1",
    default_path = "/org/facelog/Attendance1"
)]
trait Attendance {
    fn enroll(&self, name: &str, encoding: &[f64]) -> zbus::Result<()>;
    fn recognize(&self, encoding: &[f64]) -> zbus::Result<String>;
    fn recognize_at(&self, encoding: &[f64], timestamp: &str) -> zbus::Result<String>;
    fn list_identities(&self) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
    fn reset(&self) -> zbus::Result<bool>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Enroll { name, encoding } => {
            let values = read_encoding(&encoding)?;
            connect().await?.enroll(&name, &values).await?;
            println!("Enrolled {name} ({} dimensions)", values.len());
        }
        Commands::Recognize { encoding, at } => {
            let values = read_encoding(&encoding)?;
            let daemon = connect().await?;
            let outcome = match at {
                Some(ts) => daemon.recognize_at(&values, &ts).await?,
                None => daemon.recognize(&values).await?,
            };
            print_json(&outcome)?;
        }
        Commands::List => {
            let names: Vec<String> = serde_json::from_str(&connect().await?.list_identities().await?)?;
            if names.is_empty() {
                println!("No identities enrolled");
            }
            for name in names {
                println!("{name}");
            }
        }
        Commands::Status => print_json(&connect().await?.status().await?)?,
        Commands::Reset => {
            connect().await?.reset().await?;
            println!("Log-once state cleared");
        }
        Commands::Classify { time, windows } => {
            let schedule = load_schedule(windows.as_deref())?;
            let period = schedule.classify_time(parse_time_of_day(&time)?);
            println!("{period}");
        }
    }

    Ok(())
}

async fn connect() -> Result<AttendanceProxy<'static>> {
    tracing::debug!("connecting to facelogd on the session bus");
    let conn = zbus::Connection::session()
        .await
        .context("cannot reach the D-Bus session bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("facelogd is not reachable")
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Read a JSON array of numbers. An empty array is sent as-is and the
/// daemon treats it as "no face found".
fn read_encoding(path: &Path) -> Result<Vec<f64>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let values: Vec<f64> =
        serde_json::from_str(&raw).with_context(|| format!("{} is not a JSON number array", path.display()))?;
    if values.iter().any(|v| !v.is_finite()) {
        bail!("{} contains non-finite values", path.display());
    }
    tracing::debug!(path = %path.display(), dimension = values.len(), "encoding read");
    Ok(values)
}

fn load_schedule(path: Option<&Path>) -> Result<PeriodSchedule> {
    match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading window schedule");
            let src = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            Ok(PeriodSchedule::from_toml_str(&src)?)
        }
        None => Ok(PeriodSchedule::reference()),
    }
}

fn parse_time_of_day(raw: &str) -> Result<NaiveTime> {
    let raw = raw.trim();
    for fmt in ["%H:%M:%S", "%H:%M"] {
        if let Ok(t) = NaiveTime::parse_from_str(raw, fmt) {
            return Ok(t);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(ts.time());
        }
    }
    bail!("cannot parse time {raw:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelog_core::{Period, WindowName};

    #[test]
    fn test_parse_time_of_day() {
        let t = NaiveTime::from_hms_opt(8, 30, 0).unwrap();
        assert_eq!(parse_time_of_day("08:30").unwrap(), t);
        assert_eq!(parse_time_of_day("08:30:00").unwrap(), t);
        assert_eq!(parse_time_of_day("2024-05-20 08:30:00").unwrap(), t);
        assert!(parse_time_of_day("half past eight").is_err());
    }

    #[test]
    fn test_classify_reference_schedule() {
        let schedule = load_schedule(None).unwrap();
        let period = schedule.classify_time(parse_time_of_day("12:10").unwrap());
        assert_eq!(period, Period::Window(WindowName::Lunch));
    }

    #[test]
    fn test_read_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.json");
        let bad = dir.path().join("bad.json");
        std::fs::write(&good, "[0.1, -0.2, 0.3]").unwrap();
        std::fs::write(&bad, "{\"a\": 1}").unwrap();

        assert_eq!(read_encoding(&good).unwrap(), vec![0.1, -0.2, 0.3]);
        assert!(read_encoding(&bad).is_err());
        assert!(read_encoding(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::try_parse_from(["facelog", "enroll", "--name", "bob", "--encoding", "bob.json"]).unwrap();
        assert!(matches!(cli.command, Commands::Enroll { ref name, .. } if name == "bob"));

        let cli = Cli::try_parse_from(["facelog", "classify", "08:00"]).unwrap();
        assert!(matches!(cli.command, Commands::Classify { .. }));
    }
}
