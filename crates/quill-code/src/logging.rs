//! Console tracing layer: one `HH:MM:SS LEVEL message` line per event on
//! stderr, so logs never interleave with answers printed on stdout.

use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::Local;
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Events from these crate targets honor the verbosity flag; everything
/// else (HTTP stack, tokenizer) is shown from WARN up.
const OWN_TARGETS: &[&str] = &["quill_rs", "quill_code", "quill"];

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

pub struct ConsoleLayer {
    max_level: Level,
    writer: SharedWriter,
}

impl ConsoleLayer {
    /// INFO by default, DEBUG when `verbose`.
    pub fn new(verbose: bool) -> Self {
        let max_level = if verbose { Level::DEBUG } else { Level::INFO };
        Self::with_writer(max_level, Box::new(std::io::stderr()))
    }

    pub fn with_writer(max_level: Level, writer: Box<dyn Write + Send>) -> Self {
        Self {
            max_level,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    fn limit_for(&self, target: &str) -> Level {
        let own = OWN_TARGETS
            .iter()
            .any(|t| target == *t || target.starts_with(&format!("{t}::")));
        if own { self.max_level } else { Level::WARN }
    }
}

impl<S: Subscriber + for<'a> LookupSpan<'a>> Layer<S> for ConsoleLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // More verbose levels compare greater.
        if *meta.level() > self.limit_for(meta.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let line = format_line(
            &Local::now().format("%H:%M:%S").to_string(),
            meta.level(),
            &visitor.message,
            &visitor.fields,
        );

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(writer, "{line}");
    }
}

fn format_line(time: &str, level: &Level, message: &str, fields: &[(String, String)]) -> String {
    let mut message = message.to_string();
    if !fields.is_empty() {
        let extras: Vec<String> = fields.iter().map(|(k, v)| format!("{k}={v}")).collect();
        if message.is_empty() {
            message = extras.join(" ");
        } else {
            message = format!("{message} {{{}}}", extras.join(", "));
        }
    }
    format!("{time} {:<5} {message}", level.as_str())
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let raw = format!("{value:?}");
        if field.name() == "message" {
            self.message = raw
                .strip_prefix('"')
                .and_then(|r| r.strip_suffix('"'))
                .map_or_else(|| raw.clone(), str::to_string);
        } else {
            self.fields.push((field.name().to_string(), raw));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .push((field.name().to_string(), value.to_string()));
        }
    }
}
