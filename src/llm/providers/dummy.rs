//! Dummy LLM provider: plays back scripted fragments.
//!
//! With no script it echoes the last user turn prefixed with `[echo] `, so
//! the full pipeline runs end to end without an API key. Tests script the
//! fragments, inject failures and count calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::stream::{self, StreamExt};

use crate::llm::{FragmentStream, ProviderError, Role, Turn};

#[derive(Debug, Clone, Default)]
pub struct DummyProvider {
    script: Option<Vec<String>>,
    /// Fail the open itself with this reason.
    open_failure: Option<String>,
    /// After the script, yield this error instead of ending.
    stream_failure: Option<String>,
    /// After the script, never end.
    hold_open: bool,
    calls: Arc<AtomicUsize>,
    last_messages: Arc<std::sync::Mutex<Vec<Turn>>>,
}

impl DummyProvider {
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn scripted<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { script: Some(fragments.into_iter().map(Into::into).collect()), ..Self::default() }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self { open_failure: Some(reason.into()), ..Self::default() }
    }

    /// Break the stream with `reason` after the scripted fragments.
    pub fn failing_after_script(mut self, reason: impl Into<String>) -> Self {
        self.stream_failure = Some(reason.into());
        self
    }

    /// Keep the stream pending forever after the scripted fragments.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Number of `stream_chat` calls so far, shared across clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages passed to the most recent `stream_chat` call.
    pub fn last_messages(&self) -> Vec<Turn> {
        self.last_messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub async fn stream_chat(&self, messages: &[Turn]) -> Result<FragmentStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_messages.lock() {
            *last = messages.to_vec();
        }
        if let Some(reason) = &self.open_failure {
            return Err(ProviderError::Request(reason.clone()));
        }

        let fragments = match &self.script {
            Some(script) => script.clone(),
            None => {
                let question = messages
                    .iter()
                    .rev()
                    .find(|t| t.role == Role::User)
                    .map(|t| t.content.clone())
                    .unwrap_or_default();
                vec!["[echo] ".to_string(), question]
            }
        };

        let body = stream::iter(fragments.into_iter().map(Ok));
        let stream: FragmentStream = match (&self.stream_failure, self.hold_open) {
            (Some(reason), _) => {
                let err = ProviderError::Stream(reason.clone());
                body.chain(stream::once(async move { Err(err) })).boxed()
            }
            (None, true) => body.chain(stream::pending()).boxed(),
            (None, false) => body.boxed(),
        };
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(p: &DummyProvider, messages: &[Turn]) -> Vec<Result<String, ProviderError>> {
        p.stream_chat(messages).await.unwrap().collect().await
    }

    #[tokio::test]
    async fn echo_replays_last_user_turn() {
        let p = DummyProvider::echo();
        let out = collect(&p, &[Turn::system("ctx"), Turn::user("hello")]).await;
        let text: String = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(text, "[echo] hello");
        assert_eq!(p.calls(), 1);
    }

    #[tokio::test]
    async fn scripted_fragments_in_order() {
        let p = DummyProvider::scripted(["a", "b", "c"]);
        let out: Vec<String> = collect(&p, &[]).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(out, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn failure_is_last_item() {
        let p = DummyProvider::scripted(["a"]).failing_after_script("boom");
        let out = collect(&p, &[]).await;
        assert_eq!(out.len(), 2);
        assert!(matches!(out[1], Err(ProviderError::Stream(_))));
    }

    #[tokio::test]
    async fn unavailable_fails_open_and_records_messages() {
        let p = DummyProvider::unavailable("down");
        assert!(p.stream_chat(&[Turn::user("q")]).await.is_err());
        assert_eq!(p.last_messages(), vec![Turn::user("q")]);
    }
}
