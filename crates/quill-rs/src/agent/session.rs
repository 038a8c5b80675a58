//! The session orchestrator: one user query in, one answer out.
//!
//! [`Session`] owns the [`ContextManager`] and the active [`Driver`]. On
//! every [`run`](Session::run) it assembles the full message list from the
//! context manager, hands it to the driver, and records the finished
//! interaction back into the context manager. The driver never keeps state
//! the session relies on, so the context manager is the only record of what
//! was said.
//!
//! A driver failure is retried once with the same message list. If the retry
//! succeeds its answer is recorded like any other; if it fails too, the error
//! is returned and nothing is recorded.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::config::ModelPair;
use super::driver::{Driver, DriverFactory};
use crate::Message;
use crate::context::{ContextInfo, ContextManager};
use crate::telemetry::DebugSink;

/// Builds the system prompt for a working directory.
pub trait SystemPromptSource: Send + Sync {
    fn build(&self, working_dir: &Path) -> String;
}

pub struct Session {
    context: ContextManager,
    driver: Box<dyn Driver>,
    models: ModelPair,
    call_counter: u32,
    debug: Arc<DebugSink>,
    factory: Option<Arc<dyn DriverFactory>>,
    prompt_source: Option<Arc<dyn SystemPromptSource>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("model", &self.driver.model())
            .field("context", &self.context)
            .field("call_counter", &self.call_counter)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(context: ContextManager, driver: Box<dyn Driver>) -> Self {
        Self {
            context,
            driver,
            models: ModelPair::default(),
            call_counter: 0,
            debug: Arc::new(DebugSink::disabled()),
            factory: None,
            prompt_source: None,
        }
    }

    /// Attach a debug sink. The current system prompt is recorded right away.
    pub fn with_debug_sink(mut self, sink: Arc<DebugSink>) -> Self {
        if !self.context.system_prompt().is_empty() {
            sink.log_system_prompt(self.context.system_prompt());
        }
        self.debug = sink;
        self
    }

    /// Factory used by [`switch_model`](Self::switch_model).
    pub fn with_driver_factory(mut self, factory: Arc<dyn DriverFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Prompt builder used by [`refresh_context`](Self::refresh_context).
    pub fn with_prompt_source(mut self, source: Arc<dyn SystemPromptSource>) -> Self {
        self.prompt_source = Some(source);
        self
    }

    pub fn with_models(mut self, models: ModelPair) -> Self {
        self.models = models;
        self
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn model(&self) -> &str {
        self.driver.model()
    }

    pub fn is_pro(&self) -> bool {
        self.models.is_pro(self.driver.model())
    }

    /// Number of `run` calls made so far, failed ones included.
    pub fn call_count(&self) -> u32 {
        self.call_counter
    }

    pub fn debug_sink(&self) -> &Arc<DebugSink> {
        &self.debug
    }

    // ── Turns ─────────────────────────────────────────────────────

    /// Answer one query.
    pub async fn run(&mut self, query: &str) -> Result<String, String> {
        self.call_counter += 1;
        let call_number = self.call_counter;
        self.debug.begin_call(call_number);

        if !self.context.conversation().is_empty() {
            info!("[CONTEXT] {}", self.context.conversation().context_summary());
        }

        let mut messages = self.context.get_full_context_for_llm(true);
        messages.push(Message::user(query));
        self.debug.log_full_context(&messages, call_number);
        debug!(
            "Call #{call_number}: {} messages to {}",
            messages.len(),
            self.driver.model()
        );

        match self.driver.run(messages.clone()).await {
            Ok(output) => {
                self.debug.log_api_call(query, &output.text, call_number);
                self.debug.log_tool_calls(&output.tool_calls, call_number);
                self.context.add_interaction(query, output.text.as_str());
                Ok(output.text)
            }
            Err(e) => {
                warn!("Driver error on call #{call_number}: {e}");
                info!("Retrying call #{call_number} with a direct driver call");
                let output = self
                    .driver
                    .run(messages)
                    .await
                    .map_err(|e| format!("fallback run failed: {e}"))?;
                self.context.add_interaction(query, output.text.as_str());
                self.debug.log_api_call(query, &output.text, call_number);
                Ok(output.text)
            }
        }
    }

    // ── Context control ───────────────────────────────────────────

    /// Forget the conversation, in the context manager and in the driver.
    pub fn clear_conversation(&mut self) {
        self.context.clear_conversation();
        if let Some(reset) = self.driver.history_reset() {
            reset.reset_history();
        }
        info!("[CONTEXT] Conversation history cleared");
    }

    pub fn get_context_info(&self) -> ContextInfo {
        let info = self.context.get_context_info();
        self.debug.log_context_info(&info);
        info
    }

    /// Rebind to the standard or pro model. History is kept. On error the
    /// session keeps its current driver.
    pub fn switch_model(&mut self, use_pro: bool) -> Result<(), String> {
        let factory = self
            .factory
            .as_ref()
            .ok_or_else(|| "model switching is not configured for this session".to_string())?;
        let model = self.models.select(use_pro).to_string();
        let driver = factory
            .build(&model)
            .map_err(|e| format!("failed to build driver for {model}: {e}"))?;
        self.driver = driver;
        if !self.context.system_prompt().is_empty() {
            self.debug.log_system_prompt(self.context.system_prompt());
        }
        info!("Switched to model {model}");
        Ok(())
    }

    /// Regenerate the system prompt for `new_cwd`, trimming history if the
    /// new prompt no longer fits alongside it.
    pub fn refresh_context(&mut self, new_cwd: &Path) -> Result<(), String> {
        let source = self
            .prompt_source
            .as_ref()
            .ok_or_else(|| "no system prompt source configured".to_string())?;
        let prompt = source.build(new_cwd);
        self.context.refresh_with_system_prompt(prompt);
        self.debug.log_system_prompt(self.context.system_prompt());
        debug!(
            "Context refreshed for {} ({} prompt tokens)",
            new_cwd.display(),
            self.context.system_prompt_tokens()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::driver::{DriverFuture, DriverOutput, HistoryReset, ToolCallRecord};
    use crate::context::TokenCounter;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count_tokens(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    /// Driver replaying scripted results and recording what it was sent.
    #[derive(Default)]
    struct MockDriver {
        model: String,
        results: Mutex<VecDeque<Result<DriverOutput, String>>>,
        received: Arc<Mutex<Vec<Vec<Message>>>>,
        resets: Arc<AtomicUsize>,
    }

    impl MockDriver {
        fn scripted(results: Vec<Result<DriverOutput, String>>) -> Self {
            Self {
                model: "standard".into(),
                results: Mutex::new(results.into()),
                ..Default::default()
            }
        }
    }

    impl Driver for MockDriver {
        fn model(&self) -> &str {
            &self.model
        }

        fn run(&self, messages: Vec<Message>) -> DriverFuture<'_> {
            self.received.lock().unwrap().push(messages);
            let next = self
                .results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(DriverOutput::text("default answer")));
            Box::pin(async move { next })
        }

        fn history_reset(&self) -> Option<&dyn HistoryReset> {
            Some(self)
        }
    }

    impl HistoryReset for MockDriver {
        fn reset_history(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct MockFactory;

    impl DriverFactory for MockFactory {
        fn build(&self, model: &str) -> Result<Box<dyn Driver>, String> {
            if model == "broken" {
                return Err("no such model".into());
            }
            Ok(Box::new(MockDriver {
                model: model.to_string(),
                ..Default::default()
            }))
        }
    }

    struct DirPrompt;

    impl SystemPromptSource for DirPrompt {
        fn build(&self, working_dir: &Path) -> String {
            let words = if working_dir.ends_with("big") { 950 } else { 10 };
            vec![working_dir.display().to_string(); words].join(" ")
        }
    }

    fn context() -> ContextManager {
        let mut cm = ContextManager::with_counter(10, 1000, Arc::new(WordCounter));
        cm.set_system_prompt("you are a test");
        cm
    }

    #[tokio::test]
    async fn run_records_interaction_and_sends_history() {
        let driver = MockDriver::scripted(vec![
            Ok(DriverOutput::text("first answer")),
            Ok(DriverOutput::text("second answer")),
        ]);
        let received = driver.received.clone();
        let mut session = Session::new(context(), Box::new(driver));

        assert_eq!(session.run("one").await.unwrap(), "first answer");
        assert_eq!(session.run("two").await.unwrap(), "second answer");
        assert_eq!(session.call_count(), 2);
        assert_eq!(session.context().conversation().len(), 2);

        let sent = received.lock().unwrap();
        assert_eq!(sent[0], vec![Message::system("you are a test"), Message::user("one")]);
        assert_eq!(
            sent[1],
            vec![
                Message::system("you are a test"),
                Message::user("one"),
                Message::assistant_text("first answer"),
                Message::user("two"),
            ]
        );
    }

    #[tokio::test]
    async fn failure_retries_once_with_same_messages() {
        let driver = MockDriver::scripted(vec![
            Err("connection reset".into()),
            Ok(DriverOutput::text("recovered")),
        ]);
        let received = driver.received.clone();
        let mut session = Session::new(context(), Box::new(driver));

        assert_eq!(session.run("q").await.unwrap(), "recovered");
        let sent = received.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
        assert_eq!(session.context().conversation().len(), 1);
    }

    #[tokio::test]
    async fn double_failure_propagates_and_records_nothing() {
        let driver = MockDriver::scripted(vec![Err("down".into()), Err("still down".into())]);
        let mut session = Session::new(context(), Box::new(driver));

        let err = session.run("q").await.unwrap_err();
        assert!(err.contains("still down"));
        assert!(session.context().conversation().is_empty());
        assert_eq!(session.call_count(), 1);
    }

    #[tokio::test]
    async fn clear_resets_context_and_driver() {
        let driver = MockDriver::scripted(vec![]);
        let resets = driver.resets.clone();
        let mut session = Session::new(context(), Box::new(driver));
        session.run("q").await.unwrap();

        session.clear_conversation();
        session.clear_conversation();
        assert!(session.context().conversation().is_empty());
        assert_eq!(session.context().system_prompt(), "you are a test");
        assert_eq!(resets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn switch_model_keeps_history() {
        let mut session = Session::new(context(), Box::new(MockDriver::scripted(vec![])))
            .with_models(ModelPair::new("standard", "pro"))
            .with_driver_factory(Arc::new(MockFactory));
        session.run("remember me").await.unwrap();

        session.switch_model(true).unwrap();
        assert_eq!(session.model(), "pro");
        assert!(session.is_pro());
        assert_eq!(session.context().conversation().len(), 1);

        session.switch_model(false).unwrap();
        assert_eq!(session.model(), "standard");
        assert!(!session.is_pro());
    }

    #[test]
    fn failed_switch_leaves_session_unchanged() {
        let mut session = Session::new(context(), Box::new(MockDriver::scripted(vec![])))
            .with_models(ModelPair::new("standard", "broken"))
            .with_driver_factory(Arc::new(MockFactory));
        assert!(session.switch_model(true).is_err());
        assert_eq!(session.model(), "standard");

        let mut bare = Session::new(context(), Box::new(MockDriver::scripted(vec![])));
        assert!(bare.switch_model(true).is_err());
    }

    #[tokio::test]
    async fn refresh_context_trims_for_larger_prompt() {
        let driver = MockDriver::scripted(vec![
            Ok(DriverOutput::text(vec!["a"; 20].join(" "))),
            Ok(DriverOutput::text(vec!["a"; 20].join(" "))),
            Ok(DriverOutput::text(vec!["a"; 20].join(" "))),
        ]);
        let mut session =
            Session::new(context(), Box::new(driver)).with_prompt_source(Arc::new(DirPrompt));
        for q in ["q1", "q2", "q3"] {
            session.run(q).await.unwrap();
        }
        assert_eq!(session.context().conversation().len(), 3);

        session.refresh_context(Path::new("/work/small")).unwrap();
        assert_eq!(session.context().conversation().len(), 3);
        assert!(session.context().system_prompt().starts_with("/work/small"));

        session.refresh_context(Path::new("/work/big")).unwrap();
        let cm = session.context();
        assert!(cm.system_prompt_tokens() + cm.conversation().total_tokens() <= 1000);
        assert!(cm.conversation().len() < 3);
    }

    #[test]
    fn refresh_without_source_is_an_error() {
        let mut session = Session::new(context(), Box::new(MockDriver::scripted(vec![])));
        assert!(session.refresh_context(Path::new("/tmp")).is_err());
    }

    #[tokio::test]
    async fn debug_sink_receives_call_records() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(DebugSink::new(true, dir.path()));
        let output = DriverOutput {
            text: "listed".into(),
            tool_calls: vec![ToolCallRecord {
                round: 1,
                call_id: "c1".into(),
                name: "ls".into(),
                arguments: "{}".into(),
                result: "- src/".into(),
            }],
            rounds_used: 2,
            ..Default::default()
        };
        let mut session = Session::new(context(), Box::new(MockDriver::scripted(vec![Ok(output)])))
            .with_debug_sink(sink.clone());

        session.run("list files").await.unwrap();
        let info = session.get_context_info();
        assert_eq!(info.conversation_interactions, 1);

        let sid = sink.session_id();
        for name in [
            format!("system_prompt_{sid}.txt"),
            format!("full_context_{sid}_001.json"),
            format!("api_call_{sid}_001.txt"),
            format!("tool_calls_{sid}_001.json"),
            format!("context_info_{sid}.json"),
        ] {
            assert!(dir.path().join(&name).exists(), "missing {name}");
        }
    }
}
