//! Shared test helpers for engine tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use stepwise_core::error::ProviderError;
use stepwise_core::provider::{
    ChunkReceiver, CompletionRequest, CompletionResponse, Provider, StreamChunk, Usage,
};
use tokio::sync::mpsc;

enum Reply {
    Fragments(Vec<String>),
    Fail(ProviderError),
}

/// A mock provider that returns a sequence of scripted replies.
///
/// Each call to `complete` or `stream` consumes the next reply. Panics when
/// the script runs out, unless a repeating reply was configured.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    repeat: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| Reply::Fragments(vec![r.into()]))
                    .collect(),
            ),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Each reply is streamed as the given fragments.
    pub fn fragmented(replies: Vec<Vec<&str>>) -> Self {
        let provider = Self::new(Vec::<String>::new());
        *provider.replies.lock().unwrap() = replies
            .into_iter()
            .map(|frags| Reply::Fragments(frags.into_iter().map(String::from).collect()))
            .collect();
        provider
    }

    /// Returns the same reply forever.
    pub fn repeating(reply: impl Into<String>) -> Self {
        Self {
            repeat: Some(reply.into()),
            ..Self::new(Vec::<String>::new())
        }
    }

    /// The first call fails with `error`.
    pub fn failing(error: ProviderError) -> Self {
        Self::new(Vec::<String>::new()).then_fail(error)
    }

    pub fn then_fail(self, error: ProviderError) -> Self {
        self.replies.lock().unwrap().push_back(Reply::Fail(error));
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next(&self, request: CompletionRequest) -> Result<Vec<String>, ProviderError> {
        let count = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        match self.replies.lock().unwrap().pop_front() {
            Some(Reply::Fragments(frags)) => Ok(frags),
            Some(Reply::Fail(e)) => Err(e),
            None => match &self.repeat {
                Some(reply) => Ok(vec![reply.clone()]),
                None => panic!("ScriptedProvider: no more replies (call #{count})"),
            },
        }
    }
}

pub fn mock_usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let model = request.model.clone();
        let fragments = self.next(request)?;
        Ok(CompletionResponse {
            content: fragments.concat(),
            model,
            usage: Some(mock_usage()),
        })
    }

    async fn stream(&self, request: CompletionRequest) -> Result<ChunkReceiver, ProviderError> {
        let fragments = self.next(request)?;
        let (tx, rx) = mpsc::channel(fragments.len() + 1);
        for fragment in fragments {
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some(fragment),
                    done: false,
                    usage: None,
                }))
                .await;
        }
        let _ = tx
            .send(Ok(StreamChunk {
                content: None,
                done: true,
                usage: Some(mock_usage()),
            }))
            .await;
        Ok(rx)
    }
}
