//! Interactive loop: reads lines, runs local commands, sends everything else
//! to the session as a query.
//!
//! Input and output are generic so the loop can be driven from tests.

use std::io::Write;
use std::ops::ControlFlow;

use quill_rs::agent::Session;
use quill_rs::context::group_thousands;
use quill_rs::tools::search::ListDir;
use quill_rs::tools::{Tool, WorkingDir};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Exit,
    Help,
    Clear,
    Context,
    TogglePro,
    /// `cd` with its argument, `None` for a bare `cd`.
    Cd(Option<String>),
    Ls,
    Query(String),
    Empty,
}

pub fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    match line.to_lowercase().as_str() {
        "" => return ReplCommand::Empty,
        "exit" | "quit" => return ReplCommand::Exit,
        "help" => return ReplCommand::Help,
        "clear" => return ReplCommand::Clear,
        "context" => return ReplCommand::Context,
        "pro" => return ReplCommand::TogglePro,
        "ls" | "dir" => return ReplCommand::Ls,
        "cd" => return ReplCommand::Cd(None),
        _ => {}
    }
    let is_cd = line.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("cd "));
    match line.get(3..).map(str::trim) {
        Some(path) if is_cd && !path.is_empty() => ReplCommand::Cd(Some(path.to_string())),
        _ => ReplCommand::Query(line.to_string()),
    }
}

pub const HELP_TEXT: &str = "\
Commands:
  exit, quit     Leave the session
  help           Show this help
  clear          Forget the conversation history
  context        Show context usage
  pro            Switch between the standard and pro model (history is kept)
  cd <path>      Change the working directory and refresh the context
  ls, dir        List the working directory
Anything else is sent to the assistant.";

/// Printed when `quill` starts without a query and without `-i`.
pub fn welcome_text() -> String {
    format!(
        "\
quill {} - a terminal coding assistant

Usage:
  quill <query...>          Ask one question and exit
  quill -i [query...]       Start an interactive session
  quill --pro -i            Start on the pro model
  quill -d <query...>       Write debug records to ./debug-logs

Set OPENROUTER_KEY to your OpenRouter API key. Run `quill --help` for all options.",
        env!("CARGO_PKG_VERSION")
    )
}

pub struct Repl {
    session: Session,
    workdir: WorkingDir,
}

impl Repl {
    pub fn new(session: Session, workdir: WorkingDir) -> Self {
        Self { session, workdir }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn workdir(&self) -> &WorkingDir {
        &self.workdir
    }

    fn prompt(&self) -> &'static str {
        if self.session.is_pro() { "quill[pro]> " } else { "quill> " }
    }

    /// Read lines until `exit` or end of input.
    pub async fn run<R>(&mut self, input: R, out: &mut dyn Write) -> Result<(), String>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            write!(out, "{}", self.prompt()).map_err(|e| format!("write failed: {e}"))?;
            out.flush().map_err(|e| format!("write failed: {e}"))?;
            let line = lines
                .next_line()
                .await
                .map_err(|e| format!("failed to read input: {e}"))?;
            let Some(line) = line else {
                writeln!(out).map_err(|e| format!("write failed: {e}"))?;
                return Ok(());
            };
            let flow = self
                .handle(parse_command(&line), out)
                .await
                .map_err(|e| format!("write failed: {e}"))?;
            if flow.is_break() {
                return Ok(());
            }
        }
    }

    /// Execute one command. Failures are printed and the loop continues.
    pub async fn handle(
        &mut self,
        command: ReplCommand,
        out: &mut dyn Write,
    ) -> std::io::Result<ControlFlow<()>> {
        match command {
            ReplCommand::Empty => {}
            ReplCommand::Exit => {
                writeln!(out, "Goodbye!")?;
                return Ok(ControlFlow::Break(()));
            }
            ReplCommand::Help => writeln!(out, "{HELP_TEXT}")?,
            ReplCommand::Clear => {
                self.session.clear_conversation();
                writeln!(out, "Conversation history cleared.")?;
            }
            ReplCommand::Context => {
                let info = self.session.get_context_info();
                writeln!(out, "Context information:")?;
                writeln!(out, "  Total messages: {}", group_thousands(info.total_messages))?;
                writeln!(
                    out,
                    "  Conversation interactions: {}",
                    group_thousands(info.conversation_interactions)
                )?;
                writeln!(out, "  Total tokens: {}", group_thousands(info.total_tokens))?;
                writeln!(
                    out,
                    "  System prompt tokens: {}",
                    group_thousands(info.system_prompt_tokens)
                )?;
                writeln!(
                    out,
                    "  Conversation tokens: {}",
                    group_thousands(info.conversation_tokens)
                )?;
                writeln!(
                    out,
                    "  Under limit: {}",
                    if info.under_limit { "yes" } else { "no" }
                )?;
            }
            ReplCommand::TogglePro => {
                let use_pro = !self.session.is_pro();
                match self.session.switch_model(use_pro) {
                    Ok(()) => writeln!(
                        out,
                        "Switched to {} model: {} (conversation history preserved)",
                        if use_pro { "pro" } else { "standard" },
                        self.session.model()
                    )?,
                    Err(e) => writeln!(out, "Error: {e}")?,
                }
            }
            ReplCommand::Cd(None) => writeln!(out, "Usage: cd <directory_path>")?,
            ReplCommand::Cd(Some(path)) => {
                let target = self.workdir.resolve(&path);
                if !target.is_dir() {
                    writeln!(out, "Error: '{}' is not a directory", target.display())?;
                } else {
                    self.workdir.set(&target);
                    match self.session.refresh_context(&target) {
                        Ok(()) => writeln!(out, "Changed directory to {}", target.display())?,
                        Err(e) => writeln!(out, "Error: {e}")?,
                    }
                }
            }
            ReplCommand::Ls => {
                let listing = ListDir::new(self.workdir.clone()).execute("{}").await;
                write!(out, "{listing}")?;
            }
            ReplCommand::Query(query) => self.query(&query, out).await?,
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Send a query. If a tool moved the working directory, the system
    /// prompt is rebuilt for the new one.
    pub async fn query(&mut self, query: &str, out: &mut dyn Write) -> std::io::Result<()> {
        let before = self.workdir.get();
        match self.session.run(query).await {
            Ok(answer) => writeln!(out, "\n{answer}\n")?,
            Err(e) => writeln!(out, "Error: {e}")?,
        }
        let after = self.workdir.get();
        if after != before {
            info!("Working directory changed to {}", after.display());
            if let Err(e) = self.session.refresh_context(&after) {
                warn!("Could not refresh context: {e}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_rs::Message;
    use quill_rs::agent::driver::{DriverFuture, DriverOutput};
    use quill_rs::agent::{Driver, DriverFactory, ModelPair, SystemPromptSource};
    use quill_rs::context::{CharEstimateCounter, ContextManager};
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    /// Answers with the last user message; `cd:<path>` moves the workdir.
    struct EchoDriver {
        model: String,
        workdir: WorkingDir,
    }

    impl Driver for EchoDriver {
        fn model(&self) -> &str {
            &self.model
        }

        fn run(&self, messages: Vec<Message>) -> DriverFuture<'_> {
            Box::pin(async move {
                let query = messages.last().map(|m| m.text().to_string()).unwrap_or_default();
                if query == "fail" {
                    return Err("backend down".to_string());
                }
                if let Some(path) = query.strip_prefix("cd:") {
                    self.workdir.set(path);
                }
                Ok(DriverOutput::text(format!("echo: {query}")))
            })
        }
    }

    struct EchoFactory {
        workdir: WorkingDir,
    }

    impl DriverFactory for EchoFactory {
        fn build(&self, model: &str) -> Result<Box<dyn Driver>, String> {
            Ok(Box::new(EchoDriver {
                model: model.to_string(),
                workdir: self.workdir.clone(),
            }))
        }
    }

    struct PathPrompt;

    impl SystemPromptSource for PathPrompt {
        fn build(&self, working_dir: &Path) -> String {
            format!("You are in {}", working_dir.display())
        }
    }

    fn repl(dir: &Path) -> Repl {
        let workdir = WorkingDir::new(dir);
        let factory = EchoFactory {
            workdir: workdir.clone(),
        };
        let driver = factory.build("std/model").unwrap();
        let mut context =
            ContextManager::with_counter(10, 100_000, Arc::new(CharEstimateCounter));
        context.set_system_prompt(PathPrompt.build(dir));
        let session = Session::new(context, driver)
            .with_models(ModelPair::new("std/model", "pro/model"))
            .with_driver_factory(Arc::new(factory))
            .with_prompt_source(Arc::new(PathPrompt));
        Repl::new(session, workdir)
    }

    async fn run_lines(repl: &mut Repl, input: &str) -> String {
        let mut out = Vec::new();
        repl.run(input.as_bytes(), &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("  "), ReplCommand::Empty);
        assert_eq!(parse_command("EXIT"), ReplCommand::Exit);
        assert_eq!(parse_command("quit"), ReplCommand::Exit);
        assert_eq!(parse_command("dir"), ReplCommand::Ls);
        assert_eq!(parse_command("pro"), ReplCommand::TogglePro);
        assert_eq!(parse_command("cd"), ReplCommand::Cd(None));
        assert_eq!(
            parse_command("cd ~/src "),
            ReplCommand::Cd(Some("~/src".to_string()))
        );
        assert_eq!(
            parse_command("context window size?"),
            ReplCommand::Query("context window size?".to_string())
        );
        assert_eq!(
            parse_command("CD My Projects"),
            ReplCommand::Cd(Some("My Projects".to_string()))
        );
        assert_eq!(
            parse_command("cdrom status"),
            ReplCommand::Query("cdrom status".to_string())
        );
    }

    #[tokio::test]
    async fn queries_are_recorded_and_errors_keep_the_loop_alive() {
        let dir = tempfile::tempdir().unwrap();
        let mut repl = repl(dir.path());
        let out = run_lines(&mut repl, "hello\nfail\ncontext\nexit\nignored\n").await;

        assert!(out.contains("\necho: hello\n"));
        assert!(out.contains("Error: fallback run failed: backend down"));
        assert!(out.contains("  Conversation interactions: 1"));
        assert!(out.contains("Goodbye!"));
        assert!(!out.contains("ignored"));
        assert_eq!(repl.session().context().conversation().len(), 1);
    }

    #[tokio::test]
    async fn eof_ends_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut repl = repl(dir.path());
        let out = run_lines(&mut repl, "help").await;
        assert!(out.starts_with("quill> Commands:"));
        assert!(out.ends_with("quill> \n"));
    }

    #[tokio::test]
    async fn clear_and_pro_keep_or_drop_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut repl = repl(dir.path());
        let out = run_lines(&mut repl, "one\npro\ntwo\n").await;
        assert!(out.contains("Switched to pro model: pro/model (conversation history preserved)"));
        assert!(out.contains("quill[pro]> "));
        assert!(repl.session().is_pro());
        assert_eq!(repl.session().context().conversation().len(), 2);

        let out = run_lines(&mut repl, "clear\npro\n").await;
        assert!(out.contains("Conversation history cleared."));
        assert!(out.contains("Switched to standard model: std/model"));
        assert!(repl.session().context().conversation().is_empty());
    }

    #[tokio::test]
    async fn cd_updates_workdir_and_prompt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/a.txt"), "").unwrap();
        let mut repl = repl(dir.path());

        let out = run_lines(&mut repl, "cd\ncd nowhere\ncd sub\nls\n").await;
        assert!(out.contains("Usage: cd <directory_path>"));
        assert!(out.contains("is not a directory"));
        let sub = dir.path().join("sub");
        assert!(out.contains(&format!("Changed directory to {}", sub.display())));
        assert!(out.contains("Files (1):\n  a.txt"));
        assert_eq!(repl.workdir().get(), sub);
        assert_eq!(
            repl.session().context().system_prompt(),
            format!("You are in {}", sub.display())
        );
    }

    #[tokio::test]
    async fn tool_driven_directory_change_refreshes_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let mut repl = repl(dir.path());
        let target = PathBuf::from("/");
        run_lines(&mut repl, "cd:/\n").await;
        assert_eq!(repl.workdir().get(), target);
        assert_eq!(repl.session().context().system_prompt(), "You are in /");
        // The interaction survives the refresh.
        assert_eq!(repl.session().context().conversation().len(), 1);
    }

    #[test]
    fn welcome_mentions_usage() {
        let text = welcome_text();
        assert!(text.contains("quill -i"));
        assert!(text.contains("OPENROUTER_KEY"));
    }
}
