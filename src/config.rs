use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs::File, io::BufReader, path::Path, time::Duration};

use crate::{Error, PtcResult};

/// What the turn loop does when the token, time, turn or heap budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::EnumString, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BudgetPolicy {
    #[default]
    Fail,
    ReturnPartial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Overall wall-clock limit for the run.
    #[serde(default = "default_timeout", with = "duration_ms")]
    pub timeout: Duration,

    #[serde(default = "default_pmap_timeout", with = "duration_ms")]
    pub pmap_timeout: Duration,

    #[serde(default = "default_pmap_concurrency")]
    pub pmap_concurrency: usize,

    /// Input plus output tokens across all model requests.
    #[serde(default)]
    pub token_limit: Option<u64>,

    #[serde(default)]
    pub on_budget_exceeded: BudgetPolicy,

    /// Ceiling on the JSON-serialized size of the memory namespace, in bytes.
    #[serde(default)]
    pub max_heap: Option<usize>,

    #[serde(default = "default_eval_step_limit")]
    pub eval_step_limit: u64,

    #[serde(default = "default_history_limit")]
    pub tool_call_history_limit: usize,

    #[serde(default = "default_history_limit")]
    pub print_history_limit: usize,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub temperature: Option<f32>,

    /// Options this crate does not interpret; handed to the model client.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            timeout: default_timeout(),
            pmap_timeout: default_pmap_timeout(),
            pmap_concurrency: default_pmap_concurrency(),
            token_limit: None,
            on_budget_exceeded: BudgetPolicy::default(),
            max_heap: None,
            eval_step_limit: default_eval_step_limit(),
            tool_call_history_limit: default_history_limit(),
            print_history_limit: default_history_limit(),
            max_tokens: None,
            temperature: None,
            extra: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> PtcResult<Self> {
        from_file(path)
    }

    pub fn from_str(s: &str) -> PtcResult<Self> {
        from_str(s)
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> PtcResult<T> {
    let file = File::open(path)
        .map_err(|e| Error::Internal(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Internal(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> PtcResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::Internal(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_max_turns() -> usize {
    5
}
fn default_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_pmap_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_pmap_concurrency() -> usize {
    8
}
fn default_eval_step_limit() -> u64 {
    100_000
}
fn default_history_limit() -> usize {
    20
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_from_empty_object() {
        let config = RunConfig::from_str("{}").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.max_turns, 5);
        assert_eq!(config.pmap_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_recognized_and_passthrough_options() {
        let config = RunConfig::from_str(
            r#"{"max_turns": 2, "timeout": 1500, "on_budget_exceeded": "return_partial",
                "token_limit": 1000, "model": "small"}"#,
        )
        .unwrap();
        assert_eq!(config.max_turns, 2);
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.on_budget_exceeded, BudgetPolicy::ReturnPartial);
        assert_eq!(config.token_limit, Some(1000));
        assert_eq!(config.extra.get("model"), Some(&serde_json::json!("small")));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{"pmap_concurrency": 2}"#).unwrap();
        assert_eq!(RunConfig::from_file(&path).unwrap().pmap_concurrency, 2);
        assert!(RunConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
