#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use relay_types::HostError;

use crate::llm::{ChatMessage, LlmExecutor, LlmTurn};

/// Scripted host LLM: each call pops the next turn; once the script is
/// exhausted it keeps answering with a plain final response.
#[derive(Debug)]
pub struct MockLlm {
    calls: Mutex<usize>,
    script: Vec<LlmTurn>,
    delay: Option<Duration>,
}

impl MockLlm {
    pub fn scripted(script: Vec<LlmTurn>) -> Self {
        MockLlm {
            calls: Mutex::new(0),
            script,
            delay: None,
        }
    }

    pub fn finishing_with(text: &str) -> Self {
        Self::scripted(vec![LlmTurn {
            content: text.to_string(),
            dispatches: vec![],
            token_usage: None,
        }])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl LlmExecutor for MockLlm {
    async fn execute(&self, _messages: &[ChatMessage]) -> Result<LlmTurn, HostError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let call = *calls;
            *calls += 1;
            call
        };
        Ok(self.script.get(call).cloned().unwrap_or(LlmTurn {
            content: "All scripted turns are exhausted.".to_string(),
            dispatches: vec![],
            token_usage: None,
        }))
    }
}
