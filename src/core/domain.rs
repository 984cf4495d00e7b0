use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::extractor::{self, EntryPoint};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: Vec<Value>,
    pub expected_output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_hidden: Option<bool>,
}

impl TestCase {
    pub fn new(input: Vec<Value>, expected_output: Value) -> Self {
        Self {
            input,
            expected_output,
            is_hidden: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub test_case: TestCase,
    /// `None` is the "no value" sentinel: the solution returned nothing
    /// representable, or the case failed before producing output.
    pub actual_output: Option<Value>,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "duration_ms::serialize"
    )]
    pub execution_time: Option<Duration>,
}

impl ExecutionResult {
    pub fn failed(test_case: &TestCase, error: CaseError, elapsed: Duration) -> Self {
        Self {
            test_case: test_case.clone(),
            actual_output: None,
            passed: false,
            error: Some(error.to_string()),
            execution_time: Some(elapsed),
        }
    }
}

/// Case-local failures. Rendered into `ExecutionResult::error`.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CaseError {
    #[error("input could not be isolated: {msg}")]
    Isolation { msg: String },
    #[error("{msg}")]
    Runtime { msg: String },
    #[error("output could not be serialized: {msg}")]
    Output { msg: String },
    #[error("execution exceeded the {time_ms}ms time limit")]
    Timeout { time_ms: u64 },
    #[error("sandbox worker crashed")]
    WorkerCrashed,
    #[error("internal sandbox error: {msg}")]
    Internal { msg: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CaseStage {
    Isolating,
    Invoking,
    Comparing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub passed: usize,
    pub total: usize,
}

impl Summary {
    pub fn of(results: &[ExecutionResult]) -> Self {
        Self {
            passed: results.iter().filter(|r| r.passed).count(),
            total: results.len(),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.total > 0 && self.passed == self.total
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub input: String,
    pub output: String,
    pub explanation: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub examples: Vec<Example>,
    #[serde(default)]
    pub constraints: Vec<String>,
    pub test_cases: Vec<TestCase>,
    pub function_signature: String,
    pub difficulty: Difficulty,
    pub topic: String,
}

impl Challenge {
    /// Entry point named by the challenge's function signature, falling back
    /// to the first declaration when the signature names nothing.
    pub fn entry_point(&self) -> EntryPoint {
        extractor::declared_name(&self.function_signature)
            .map(EntryPoint::Named)
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Basic problems suitable for beginners",
            Difficulty::Medium => "Intermediate problems requiring logical thinking",
            Difficulty::Hard => "Advanced problems with complex algorithms",
        }
    }

    pub fn expected_complexity(&self) -> &'static str {
        match self {
            Difficulty::Easy => "O(n) or better",
            Difficulty::Medium => "O(n log n) or better",
            Difficulty::Hard => "May require O(n²) or advanced techniques",
        }
    }

    pub fn time_estimate(&self) -> &'static str {
        match self {
            Difficulty::Easy => "5-10 minutes",
            Difficulty::Medium => "15-30 minutes",
            Difficulty::Hard => "30-60 minutes",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("unknown difficulty `{0}`, expected one of Easy, Medium, Hard")]
pub struct UnknownDifficulty(pub String);

impl FromStr for Difficulty {
    type Err = UnknownDifficulty;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Difficulty::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownDifficulty(s.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_correct: bool,
    /// 0-100. Fractional scores are rounded, out of range ones clamped.
    #[serde(deserialize_with = "score::deserialize")]
    pub score: u8,
    pub feedback: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_approaches: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Complexity {
    pub time: String,
    pub space: String,
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_f64(d.as_secs_f64() * 1000.0),
            None => serializer.serialize_none(),
        }
    }
}

mod score {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u8, D::Error>
    where
        D: Deserializer<'de>,
    {
        let score = f64::deserialize(deserializer)?;
        if !score.is_finite() {
            return Err(serde::de::Error::custom("score must be a finite number"));
        }
        Ok(score.round().clamp(0.0, 100.0) as u8)
    }
}
