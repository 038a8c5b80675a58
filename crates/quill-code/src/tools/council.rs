//! The `council` tool: ask several specialist models the same question in
//! parallel and return their answers as one report.
//!
//! Every specialist is reached through the same [`ChatBackend`] the driver
//! uses, so one OpenRouter key covers the whole council.

use std::sync::Arc;

use chrono::Local;
use futures::future::join_all;
use quill_rs::agent::ChatBackend;
use quill_rs::context::tokenizer::{TiktokenCounter, count_messages};
use quill_rs::context::{TokenCounter, group_thousands};
use quill_rs::tools::{Tool, ToolFuture, ToolSpec, WorkingDir, parse_tool_args};
use quill_rs::{ChatRequest, Message, ToolDef};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

/// Content above this many tokens is refused before any model is called.
pub const MAX_COUNCIL_TOKENS: usize = 60_000;

const COUNCIL_PREAMBLE: &str = "Act as a senior software engineer and technical architect.

You are part of an elite council of AI specialists providing superior advice to a code agent.
Your role is to provide expert technical guidance, architectural insights, and best practices.
Be thorough, precise, and actionable in your recommendations.";

/// One council member.
#[derive(Debug, Clone, PartialEq)]
pub struct Specialist {
    pub label: String,
    pub model: String,
    /// One-line summary of what this member is good at, shown in the report.
    pub strength: String,
    pub system_prompt: String,
    pub temperature: f32,
}

impl Specialist {
    pub fn new(
        label: impl Into<String>,
        model: impl Into<String>,
        strength: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            model: model.into(),
            strength: strength.into(),
            system_prompt: COUNCIL_PREAMBLE.to_string(),
            temperature: 0.0,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// The default three-member council.
pub fn default_specialists() -> Vec<Specialist> {
    vec![
        Specialist::new(
            "OpenAI o4-mini",
            "openai/o4-mini",
            "General software engineering expertise",
        ),
        Specialist::new(
            "Gemini 2.5 Pro",
            "google/gemini-2.5-pro",
            "Advanced reasoning across large contexts",
        )
        .with_system_prompt(
            "You are a senior software engineer and system architect.

You are part of an elite council of AI specialists providing superior advice to a code agent.
Your expertise spans multiple programming languages, system design, performance optimization,
and software engineering best practices. Provide detailed, actionable advice with code examples
when appropriate.",
        )
        .with_temperature(0.65),
        Specialist::new(
            "DeepSeek Reasoner",
            "deepseek/deepseek-r1",
            "Deep analytical reasoning and problem solving",
        )
        .with_system_prompt(
            "You are a senior software engineer and system architect with deep reasoning capabilities.

You are part of an elite council of AI specialists providing superior advice to a code agent.
Your expertise spans algorithm design, system optimization, mathematical modeling, and complex problem-solving.
Use your reasoning capabilities to provide thorough analysis, consider edge cases, and offer innovative solutions.
Be methodical, analytical, and provide step-by-step reasoning when appropriate.",
        ),
    ]
}

#[derive(Deserialize, JsonSchema)]
pub struct CouncilArgs {
    /// The main question or request for the council.
    pub prompt: String,
    /// Additional context to help the specialists understand the problem.
    #[serde(default)]
    pub context: Option<String>,
    /// Path to a file (markdown, text, code) whose content is sent as context.
    #[serde(default)]
    pub context_file: Option<String>,
}

pub struct CouncilTool {
    backend: Arc<dyn ChatBackend>,
    workdir: WorkingDir,
    counter: Arc<dyn TokenCounter>,
    specialists: Vec<Specialist>,
    max_tokens: usize,
}

impl CouncilTool {
    pub fn new(backend: Arc<dyn ChatBackend>, workdir: WorkingDir) -> Self {
        Self {
            backend,
            workdir,
            counter: Arc::new(TiktokenCounter),
            specialists: default_specialists(),
            max_tokens: MAX_COUNCIL_TOKENS,
        }
    }

    pub fn with_specialists(mut self, specialists: Vec<Specialist>) -> Self {
        self.specialists = specialists;
        self
    }

    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Assemble the consultation text and enforce the token ceiling.
    pub async fn prepare_content(
        &self,
        prompt: &str,
        context: Option<&str>,
        context_file: Option<&str>,
    ) -> Result<String, String> {
        let mut parts = Vec::new();
        if let Some(file) = context_file.filter(|f| !f.trim().is_empty()) {
            let path = self.workdir.resolve(file);
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| format!("cannot read context file {}: {e}", path.display()))?;
            info!(
                "[COUNCIL] Loaded context file {} ({} characters)",
                path.display(),
                content.chars().count()
            );
            parts.push(format!("Context from file ({file}):\n{content}"));
        }
        if let Some(extra) = context.filter(|c| !c.trim().is_empty()) {
            parts.push(format!("Additional context:\n{extra}"));
        }
        parts.push(format!("Question/Request:\n{prompt}"));
        let content = format!("\n\n{}{}", "=".repeat(50), parts.join("\n\n"));

        let probe = [Message::system(format!("{COUNCIL_PREAMBLE}\n\n{content}"))];
        let tokens = count_messages(self.counter.as_ref(), &probe);
        info!("[COUNCIL] Consultation size: {} tokens", group_thousands(tokens));
        if tokens > self.max_tokens {
            return Err(format!(
                "content exceeds the council limit of {} tokens (has {})",
                group_thousands(self.max_tokens),
                group_thousands(tokens)
            ));
        }
        Ok(content)
    }

    async fn ask(&self, specialist: &Specialist, content: &str) -> String {
        info!("[COUNCIL] Consulting {}", specialist.label);
        let request = ChatRequest {
            model: Some(specialist.model.clone()),
            messages: vec![
                Message::system(specialist.system_prompt.clone()),
                Message::user(content),
            ],
            temperature: specialist.temperature,
            ..Default::default()
        };
        match self.backend.chat(&request).await {
            Ok(completion) => match completion.content {
                Some(text) if !text.trim().is_empty() => text,
                _ => format!("No response received from {}", specialist.label),
            },
            Err(e) => {
                warn!("[COUNCIL] {} failed: {e}", specialist.label);
                format!("Error calling {}: {e}", specialist.label)
            }
        }
    }

    /// Ask every specialist concurrently. Answers keep the council's order.
    pub async fn consult(&self, content: &str) -> Vec<String> {
        info!(
            "[COUNCIL] Convening {} specialists",
            self.specialists.len()
        );
        join_all(self.specialists.iter().map(|s| self.ask(s, content))).await
    }

    pub fn format_report(&self, answers: &[String]) -> String {
        let rule = "=".repeat(80);
        let mut out = format!(
            "\n{rule}\n[COUNCIL] AI SPECIALISTS - CONSULTATION REPORT\n{rule}\nTimestamp: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        for (i, (specialist, answer)) in self.specialists.iter().zip(answers).enumerate() {
            out.push_str(&format!(
                "\n{} SPECIALIST {}: {} {}\n{answer}\n",
                "=".repeat(35),
                i + 1,
                specialist.label,
                "=".repeat(30)
            ));
        }
        out.push_str(&format!(
            "\n{rule}\n[SUMMARY] COUNCIL SUMMARY:\n{} specialists have provided their analysis above. \
             Weigh their recommendations together before deciding.\n",
            self.specialists.len()
        ));
        for specialist in &self.specialists {
            out.push_str(&format!("- {}: {}\n", specialist.label, specialist.strength));
        }
        out.push_str(&rule);
        out.push('\n');
        out
    }
}

impl Tool for CouncilTool {
    fn definition(&self) -> ToolDef {
        let members = self
            .specialists
            .iter()
            .map(|s| s.label.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        ToolSpec::builder(super::COUNCIL)
            .purpose(format!(
                "Consult a council of specialist models ({members}) in parallel for expert technical advice"
            ))
            .when_to_use(
                "For hard design decisions, architecture reviews, tricky algorithms, or when \
                 a second opinion from several models is worth the extra cost",
            )
            .when_not_to_use(
                "For routine edits, lookups, or anything you can answer by reading the code. \
                 Each call queries every specialist",
            )
            .parameters_for::<CouncilArgs>()
            .example(
                "council(prompt='How should I shard this cache?', context_file='docs/design.md')",
                "A report with one section per specialist and a summary",
            )
            .output_format("Consultation report with one section per specialist")
            .build()
            .to_tool_def()
    }

    fn execute(&self, arguments: &str) -> ToolFuture<'_> {
        let arguments = arguments.to_string();
        Box::pin(async move {
            let args: CouncilArgs = match parse_tool_args(&arguments) {
                Ok(a) => a,
                Err(_) => return "Error: 'prompt' argument is required".to_string(),
            };
            if args.prompt.trim().is_empty() {
                return "Error: 'prompt' argument must not be empty".to_string();
            }
            let content = match self
                .prepare_content(
                    &args.prompt,
                    args.context.as_deref(),
                    args.context_file.as_deref(),
                )
                .await
            {
                Ok(c) => c,
                Err(e) => return format!("Error: {e}"),
            };
            let answers = self.consult(&content).await;
            self.format_report(&answers)
        })
    }
}
