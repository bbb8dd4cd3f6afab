//! Autonomous command loop behind `llmgate yolo`.
//!
//! Each step sends the whole conversation to the gateway, decodes the reply
//! as an [`Action`], runs the command through a [`ShellRunner`] and feeds the
//! result back as a user message. The loop ends on `finish`, when the step
//! budget runs out, or on the first fatal error.

pub mod action;
pub mod prompt;

pub use action::{parse_action, Action, ActionError, DEFAULT_SUMMARY};

use crate::gateway::{
    ChatMessage, ChatRequest, Gateway, GatewayError, ResponseFormat, SamplingParams,
    WebSearchConfig,
};
use crate::shell::{ShellResult, ShellRunner};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Placeholder written into history for an empty output stream.
pub const EMPTY_STREAM: &str = "(empty)";

/// Inputs of one agent run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub system_prompt: String,
    pub max_steps: u32,
    pub sampling: SamplingParams,
    pub web: Option<WebSearchConfig>,
}

/// Fatal step errors. Each aborts the run.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("gateway request failed at step {step}")]
    Gateway {
        step: u32,
        #[source]
        source: GatewayError,
    },

    #[error("no content returned at step {step}")]
    EmptyContent { step: u32 },

    #[error("invalid action at step {step}")]
    InvalidAction {
        step: u32,
        #[source]
        source: ActionError,
    },

    #[error("missing command at step {step}: {raw}")]
    MissingCommand { step: u32, raw: String },
}

/// Non-fatal ways a run can end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The model produced `finish`.
    Finished { summary: String, steps: u32 },
    /// `max_steps` commands ran without a `finish`.
    BudgetExhausted { steps: u32 },
}

/// Loop states. `Running` carries the 1-based step about to execute.
#[derive(Debug)]
pub enum LoopState {
    Running(u32),
    Finished(String),
    BudgetExhausted,
    Failed(AgentError),
}

/// Progress notifications for the presentation layer.
#[derive(Debug)]
pub enum AgentEvent<'a> {
    StepStarted {
        step: u32,
        max_steps: u32,
    },
    CommandProposed {
        command: &'a str,
        comment: Option<&'a str>,
    },
    CommandCompleted {
        command: &'a str,
        result: &'a ShellResult,
    },
}

/// One run of the loop. Owns the conversation history.
pub struct Agent<'a> {
    config: &'a AgentConfig,
    gateway: &'a dyn Gateway,
    shell: &'a dyn ShellRunner,
    history: Vec<ChatMessage>,
}

impl<'a> Agent<'a> {
    /// Start a conversation for `goal`.
    pub fn new(
        goal: &str,
        config: &'a AgentConfig,
        gateway: &'a dyn Gateway,
        shell: &'a dyn ShellRunner,
    ) -> Self {
        let history = vec![
            ChatMessage::system(config.system_prompt.clone()),
            ChatMessage::user(goal),
        ];
        Self {
            config,
            gateway,
            shell,
            history,
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Drive the loop to a terminal state.
    pub async fn run(
        &mut self,
        on_event: &mut (dyn FnMut(AgentEvent<'_>) + Send),
    ) -> Result<Outcome, AgentError> {
        let mut state = if self.config.max_steps == 0 {
            LoopState::BudgetExhausted
        } else {
            LoopState::Running(1)
        };
        let mut steps_taken = 0;

        while let LoopState::Running(step) = state {
            steps_taken = step;
            state = self.step(step, on_event).await;
        }

        match state {
            LoopState::Finished(summary) => {
                info!("agent finished after {} step(s)", steps_taken);
                Ok(Outcome::Finished {
                    summary,
                    steps: steps_taken,
                })
            }
            LoopState::BudgetExhausted => {
                info!("agent exhausted its budget of {} step(s)", self.config.max_steps);
                Ok(Outcome::BudgetExhausted { steps: steps_taken })
            }
            LoopState::Failed(err) => {
                warn!("agent failed: {}", err);
                Err(err)
            }
            LoopState::Running(_) => unreachable!("loop exits only on terminal states"),
        }
    }

    /// Execute step `step` and return the next state.
    pub async fn step(
        &mut self,
        step: u32,
        on_event: &mut (dyn FnMut(AgentEvent<'_>) + Send),
    ) -> LoopState {
        if step == 0 || step > self.config.max_steps {
            return LoopState::BudgetExhausted;
        }
        on_event(AgentEvent::StepStarted {
            step,
            max_steps: self.config.max_steps,
        });

        let request = ChatRequest::new(self.config.model.clone(), self.history.clone())
            .with_sampling(&self.config.sampling)
            .with_web(self.config.web.as_ref())
            .with_response_format(Some(ResponseFormat::JsonObject));

        let completion = match self.gateway.complete_chat(&request).await {
            Ok(completion) => completion,
            Err(source) => return LoopState::Failed(AgentError::Gateway { step, source }),
        };

        let Some(reply) = completion.content() else {
            return LoopState::Failed(AgentError::EmptyContent { step });
        };
        let reply = reply.to_string();
        debug!("step {} reply: {}", step, reply);

        let (command, comment) = match parse_action(&reply) {
            Ok(Action::Finish { summary }) => {
                let summary = Action::summary_or_default(summary.as_deref()).to_string();
                return LoopState::Finished(summary);
            }
            Ok(Action::Command { command, comment }) => (command, comment),
            Err(ActionError::MissingCommand { raw }) => {
                return LoopState::Failed(AgentError::MissingCommand { step, raw });
            }
            Err(source) => {
                return LoopState::Failed(AgentError::InvalidAction { step, source });
            }
        };

        on_event(AgentEvent::CommandProposed {
            command: &command,
            comment: comment.as_deref(),
        });
        self.history.push(ChatMessage::assistant(reply));

        let result = self.shell.run(&command).await;
        if !result.success() {
            debug!("step {} command exited with {}", step, result.exit_code);
        }
        on_event(AgentEvent::CommandCompleted {
            command: &command,
            result: &result,
        });
        self.history
            .push(ChatMessage::user(format_feedback(&command, &result)));

        if step < self.config.max_steps {
            LoopState::Running(step + 1)
        } else {
            LoopState::BudgetExhausted
        }
    }
}

/// The user message that reports a command's result back to the model.
pub fn format_feedback(command: &str, result: &ShellResult) -> String {
    format!(
        "Command: {}\nExit code: {}\nSTDOUT:\n{}\nSTDERR:\n{}",
        command,
        result.exit_code,
        or_placeholder(&result.stdout),
        or_placeholder(&result.stderr),
    )
}

fn or_placeholder(stream: &str) -> &str {
    if stream.is_empty() {
        EMPTY_STREAM
    } else {
        stream
    }
}
