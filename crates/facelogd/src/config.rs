use facelog_core::{CoreError, DedupKey, MatchPolicy, PeriodSchedule, DEFAULT_MATCH_THRESHOLD};
use std::path::PathBuf;
use std::str::FromStr;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database holding enrolled encodings and the recognition log.
    pub db_path: PathBuf,
    /// Append-only text log of recognitions.
    pub text_log_path: PathBuf,
    /// Optional TOML file of `[[window]]` entries; reference schedule when unset.
    pub windows_file: Option<PathBuf>,
    /// Maximum Euclidean distance for a positive match (inclusive).
    pub match_threshold: f32,
    /// First-match (default) or nearest-match selection.
    pub match_policy: MatchPolicy,
    /// Whether the log-once gate re-arms on a new calendar day.
    pub dedup_key: DedupKey,
    /// Depth of the engine request queue.
    pub request_queue: usize,
}

impl Config {
    /// Load configuration from `FACELOG_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facelog");

        let db_path = lookup("FACELOG_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("facelog.db"));

        let text_log_path = lookup("FACELOG_TEXT_LOG")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("recognition_log.txt"));

        Self {
            db_path,
            text_log_path,
            windows_file: lookup("FACELOG_WINDOWS_FILE").map(PathBuf::from),
            match_threshold: parse_valid_or(
                &lookup,
                "FACELOG_MATCH_THRESHOLD",
                DEFAULT_MATCH_THRESHOLD,
                |t: &f32| t.is_finite() && *t >= 0.0,
            ),
            match_policy: parse_or(&lookup, "FACELOG_MATCH_POLICY", MatchPolicy::FirstMatch),
            dedup_key: parse_or(&lookup, "FACELOG_DEDUP_KEY", DedupKey::Window),
            request_queue: parse_or(&lookup, "FACELOG_REQUEST_QUEUE", 16),
        }
    }

    /// The window schedule: the configured file, or the reference schedule.
    pub fn schedule(&self) -> Result<PeriodSchedule, CoreError> {
        match &self.windows_file {
            Some(path) => {
                let src = std::fs::read_to_string(path).map_err(|e| {
                    CoreError::InvalidInput(format!("cannot read {}: {e}", path.display()))
                })?;
                PeriodSchedule::from_toml_str(&src)
            }
            None => Ok(PeriodSchedule::reference()),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    parse_valid_or(lookup, key, default, |_| true)
}

/// Like `parse_or`, but a parsed value failing `valid` also falls back.
fn parse_valid_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        _ => {
            tracing::warn!(key, value = %raw, "invalid value, using default");
            default
        }
    }
}
