//! Built-in advisers.

use pipewright_types::advise::AdviseAction;
use pipewright_types::execution::FailureKind;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{AdviseError, Adviser, AdvisingEvent};

/// Manual intervention timeout when the obtainment names none.
pub const DEFAULT_INTERVENTION_TIMEOUT_SECS: u64 = 86_400;

fn decode<T: DeserializeOwned + Default>(adviser: &str, parameters: &serde_json::Value) -> Result<T, AdviseError> {
    if parameters.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(parameters.clone()).map_err(|e| AdviseError::InvalidParameters {
        adviser: adviser.to_string(),
        message: e.to_string(),
    })
}

/// Empty filter matches every failure kind.
fn kind_matches(kinds: &[FailureKind], event: &AdvisingEvent<'_>) -> bool {
    if kinds.is_empty() {
        return true;
    }
    event.failure.is_some_and(|f| kinds.contains(&f.kind))
}

// ---------------------------------------------------------------------------
// next_step
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct NextStepParameters {
    #[serde(default)]
    next_node_ids: Vec<String>,
}

/// On success, continue with the named sibling nodes.
#[derive(Debug, Default)]
pub struct NextStepAdviser;

impl Adviser for NextStepAdviser {
    fn advise(
        &self,
        event: &AdvisingEvent<'_>,
        parameters: &serde_json::Value,
    ) -> Result<Option<AdviseAction>, AdviseError> {
        if !event.is_success() {
            return Ok(None);
        }
        let params: NextStepParameters = decode("next_step", parameters)?;
        Ok(Some(AdviseAction::Proceed {
            next_node_ids: params.next_node_ids,
        }))
    }

    fn validate(&self, parameters: &serde_json::Value) -> Result<(), AdviseError> {
        decode::<NextStepParameters>("next_step", parameters).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// retry
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RetryParameters {
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    /// Wait before each attempt; the last entry repeats.
    #[serde(default)]
    wait_intervals_ms: Vec<u64>,
    #[serde(default)]
    failure_kinds: Vec<FailureKind>,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryParameters {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            wait_intervals_ms: Vec::new(),
            failure_kinds: Vec::new(),
        }
    }
}

/// Retries retryable failures until `max_attempts` retries were made.
#[derive(Debug, Default)]
pub struct RetryAdviser;

impl Adviser for RetryAdviser {
    fn advise(
        &self,
        event: &AdvisingEvent<'_>,
        parameters: &serde_json::Value,
    ) -> Result<Option<AdviseAction>, AdviseError> {
        if !event.is_failure() || event.exhausted_retry {
            return Ok(None);
        }
        if event.failure.is_some_and(|f| !f.retryable) {
            return Ok(None);
        }
        let params: RetryParameters = decode("retry", parameters)?;
        if !kind_matches(&params.failure_kinds, event) || event.retry_count >= params.max_attempts {
            return Ok(None);
        }
        let wait_ms = params
            .wait_intervals_ms
            .get(event.retry_count as usize)
            .or(params.wait_intervals_ms.last())
            .copied()
            .unwrap_or(0);
        Ok(Some(AdviseAction::Retry {
            wait_ms,
            max_attempts: params.max_attempts,
        }))
    }

    fn validate(&self, parameters: &serde_json::Value) -> Result<(), AdviseError> {
        decode::<RetryParameters>("retry", parameters).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// on_fail
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum OnFailAction {
    #[default]
    Abort,
    Ignore,
    MarkSuccess,
    ManualIntervention,
}

#[derive(Debug, Default, Deserialize)]
struct OnFailParameters {
    #[serde(default)]
    action: OnFailAction,
    #[serde(default)]
    failure_kinds: Vec<FailureKind>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// Maps selected failure kinds to a fixed terminal action.
#[derive(Debug, Default)]
pub struct OnFailAdviser;

impl Adviser for OnFailAdviser {
    fn advise(
        &self,
        event: &AdvisingEvent<'_>,
        parameters: &serde_json::Value,
    ) -> Result<Option<AdviseAction>, AdviseError> {
        if !event.is_failure() {
            return Ok(None);
        }
        let params: OnFailParameters = decode("on_fail", parameters)?;
        if !kind_matches(&params.failure_kinds, event) {
            return Ok(None);
        }
        let action = match params.action {
            OnFailAction::Abort => AdviseAction::Abort,
            OnFailAction::Ignore => AdviseAction::Ignore,
            OnFailAction::MarkSuccess => AdviseAction::MarkSuccess,
            OnFailAction::ManualIntervention => AdviseAction::InterventionWait {
                timeout_secs: params.timeout_secs.unwrap_or(DEFAULT_INTERVENTION_TIMEOUT_SECS),
            },
        };
        Ok(Some(action))
    }

    fn validate(&self, parameters: &serde_json::Value) -> Result<(), AdviseError> {
        decode::<OnFailParameters>("on_fail", parameters).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// manual_intervention
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ManualInterventionParameters {
    #[serde(default = "default_intervention_timeout")]
    timeout_secs: u64,
}

fn default_intervention_timeout() -> u64 {
    DEFAULT_INTERVENTION_TIMEOUT_SECS
}

impl Default for ManualInterventionParameters {
    fn default() -> Self {
        Self {
            timeout_secs: default_intervention_timeout(),
        }
    }
}

/// Parks a failed node until an operator decides.
#[derive(Debug, Default)]
pub struct ManualInterventionAdviser;

impl Adviser for ManualInterventionAdviser {
    fn advise(
        &self,
        event: &AdvisingEvent<'_>,
        parameters: &serde_json::Value,
    ) -> Result<Option<AdviseAction>, AdviseError> {
        if !event.is_failure() {
            return Ok(None);
        }
        let params: ManualInterventionParameters = decode("manual_intervention", parameters)?;
        Ok(Some(AdviseAction::InterventionWait {
            timeout_secs: params.timeout_secs,
        }))
    }

    fn validate(&self, parameters: &serde_json::Value) -> Result<(), AdviseError> {
        decode::<ManualInterventionParameters>("manual_intervention", parameters).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// abort / ignore / mark_success
// ---------------------------------------------------------------------------

/// Answers every failure with the same action.
#[derive(Debug, Clone)]
pub struct FixedActionAdviser {
    action: AdviseAction,
}

impl FixedActionAdviser {
    pub fn new(action: AdviseAction) -> Self {
        Self { action }
    }
}

impl Adviser for FixedActionAdviser {
    fn advise(
        &self,
        event: &AdvisingEvent<'_>,
        _parameters: &serde_json::Value,
    ) -> Result<Option<AdviseAction>, AdviseError> {
        Ok(event.is_failure().then(|| self.action.clone()))
    }
}
