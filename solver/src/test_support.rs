//! Test-only helpers: ledger fixtures and scripted doubles for the gateway,
//! the text provider and the trace sink.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};

use anyhow::{Result, anyhow};

use crate::core::types::{GuessOutcome, Ledger, LedgerEntry, StageInfo};
use crate::io::gateway::{PromptReply, StageGateway, TransportError};
use crate::io::provider::{CompletionRequest, ProviderError, TextProvider};
use crate::io::trace::{TraceEvent, TraceSink};

/// Deterministic ledger entry whose secret is `SECRET<level>`.
pub fn entry(level: u32, stage: &str) -> LedgerEntry {
    LedgerEntry {
        level,
        stage: stage.to_string(),
        prompt: format!("prompt {level}"),
        response: format!("The password is SECRET{level}."),
        secret: format!("SECRET{level}"),
        next_stage: None,
    }
}

/// Ledger holding `entries` with a consistent `last_completed_level`.
pub fn ledger_with(entries: Vec<LedgerEntry>) -> Ledger {
    Ledger {
        last_completed_level: entries.len() as u32,
        entries,
    }
}

/// A gateway call as observed by [`ScriptedGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Fetch {
        stage: String,
    },
    Prompt {
        stage: String,
        prompt: String,
    },
    Guess {
        stage: String,
        secret: String,
        prompt: String,
        answer: String,
    },
}

#[derive(Debug, Clone)]
struct ScriptedStage {
    level: u32,
    description: String,
    secret: String,
    next: Option<String>,
}

/// In-memory game: stages with known secrets, defender replies from a queue.
///
/// A guess succeeds iff it matches the stage's secret. Unknown stages fail
/// with an API error, like the live service.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    stages: BTreeMap<String, ScriptedStage>,
    replies: RefCell<VecDeque<Result<String, TransportError>>>,
    calls: RefCell<Vec<GatewayCall>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, key: &str, level: u32, secret: &str, next: Option<&str>) -> Self {
        self.stages.insert(
            key.to_string(),
            ScriptedStage {
                level,
                description: format!("Level {level} defender"),
                secret: secret.to_string(),
                next: next.map(str::to_string),
            },
        );
        self
    }

    /// Queue the defender's next answer.
    pub fn reply(self, answer: &str) -> Self {
        self.replies.borrow_mut().push_back(Ok(answer.to_string()));
        self
    }

    /// Queue a transport failure for the next prompt submission.
    pub fn reply_error(self, error: TransportError) -> Self {
        self.replies.borrow_mut().push_back(Err(error));
        self
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.borrow().clone()
    }

    pub fn guesses(&self) -> Vec<GatewayCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| matches!(call, GatewayCall::Guess { .. }))
            .cloned()
            .collect()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                GatewayCall::Prompt { prompt, .. } => Some(prompt.clone()),
                _ => None,
            })
            .collect()
    }

    fn stage(&self, operation: &'static str, key: &str) -> Result<&ScriptedStage, TransportError> {
        self.stages.get(key).ok_or_else(|| TransportError::Api {
            operation,
            message: format!("unknown defender {key}"),
        })
    }
}

impl StageGateway for ScriptedGateway {
    fn fetch_stage(&self, stage: &str) -> Result<StageInfo, TransportError> {
        self.calls.borrow_mut().push(GatewayCall::Fetch {
            stage: stage.to_string(),
        });
        let scripted = self.stage("fetch stage", stage)?;
        Ok(StageInfo {
            key: stage.to_string(),
            level: scripted.level,
            description: scripted.description.clone(),
        })
    }

    fn submit_prompt(&self, stage: &str, prompt: &str) -> Result<PromptReply, TransportError> {
        self.calls.borrow_mut().push(GatewayCall::Prompt {
            stage: stage.to_string(),
            prompt: prompt.to_string(),
        });
        self.stage("send message", stage)?;
        let answer = self
            .replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok("I cannot help with that.".to_string()))?;
        Ok(PromptReply {
            answer,
            stage: stage.to_string(),
            prompt: prompt.to_string(),
        })
    }

    fn submit_guess(
        &self,
        stage: &str,
        secret: &str,
        prompt: &str,
        answer: &str,
    ) -> Result<GuessOutcome, TransportError> {
        self.calls.borrow_mut().push(GatewayCall::Guess {
            stage: stage.to_string(),
            secret: secret.to_string(),
            prompt: prompt.to_string(),
            answer: answer.to_string(),
        });
        let scripted = self.stage("guess password", stage)?;
        if scripted.secret == secret {
            Ok(GuessOutcome {
                success: true,
                next_stage: scripted.next.clone(),
                message: "You guessed the password!".to_string(),
            })
        } else {
            Ok(GuessOutcome {
                success: false,
                next_stage: None,
                message: "Wrong password.".to_string(),
            })
        }
    }
}

/// Provider returning queued outputs and recording every request.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    outputs: RefCell<VecDeque<Result<String, ProviderError>>>,
    requests: RefCell<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(outputs: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            outputs: RefCell::new(outputs.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Provider that always answers with the same prompt.
    pub fn repeating(prompt: &str, times: usize) -> Self {
        Self::new((0..times).map(|_| Ok(prompt.to_string())).collect())
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.borrow().clone()
    }
}

impl TextProvider for ScriptedProvider {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        self.requests.borrow_mut().push(request.clone());
        self.outputs
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::InvalidResponse("script exhausted".to_string())))
    }
}

/// Trace sink that keeps events in memory.
#[derive(Debug, Default)]
pub struct RecordingTraceSink {
    events: RefCell<Vec<TraceEvent>>,
}

impl RecordingTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.borrow().clone()
    }

    /// Event tags in emission order (e.g. `run_started`).
    pub fn names(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| {
                serde_json::to_value(event)
                    .ok()?
                    .get("event")?
                    .as_str()
                    .map(str::to_string)
            })
            .collect()
    }
}

impl TraceSink for RecordingTraceSink {
    fn emit(&self, event: &TraceEvent) -> Result<()> {
        self.events.borrow_mut().push(event.clone());
        Ok(())
    }
}

/// Trace sink that fails every emit.
#[derive(Debug, Default)]
pub struct FailingTraceSink;

impl TraceSink for FailingTraceSink {
    fn emit(&self, _event: &TraceEvent) -> Result<()> {
        Err(anyhow!("trace sink unavailable"))
    }
}
