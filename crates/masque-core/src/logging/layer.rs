//! Tracing layer feeding the audit log.

use std::fmt::Write as FmtWrite;
use std::sync::Arc;

use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::entry::{is_redacted, AuditEntry, REDACTED};
use super::writer::AuditLogWriter;

/// Writes every event to the audit log with sensitive fields redacted.
pub struct AuditLayer {
    writer: Arc<AuditLogWriter>,
}

impl AuditLayer {
    pub fn new(
        logs_dir: impl AsRef<std::path::Path>,
        instance: impl Into<String>,
    ) -> std::io::Result<Self> {
        Ok(Self {
            writer: Arc::new(AuditLogWriter::new(logs_dir, instance)?),
        })
    }

    pub fn log_path(&self) -> &std::path::Path {
        self.writer.path()
    }
}

impl<S> Layer<S> for AuditLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = metadata.level().as_str().to_lowercase();

        let mut visitor = RedactingVisitor::default();
        event.record(&mut visitor);

        let mut entry = AuditEntry::new(
            level,
            self.writer.instance(),
            metadata.target(),
            visitor.message.unwrap_or_default(),
        );
        if !visitor.fields.is_empty() {
            entry = entry.with_fields(Value::Object(visitor.fields));
        }
        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !spans.is_empty() {
                entry = entry.with_span(spans.join(" > "));
            }
        }

        // Logging must never take the process down
        let _ = self.writer.write(&entry);
    }
}

#[derive(Default)]
struct RedactingVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, Value>,
}

impl RedactingVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        let name = field.name();
        let value = if is_redacted(name) {
            Value::String(REDACTED.to_string())
        } else {
            value
        };
        self.fields.insert(name.to_string(), value);
    }
}

impl Visit for RedactingVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(&mut buf, "{:?}", value);
        if field.name() == "message" {
            self.message = Some(buf);
        } else {
            self.insert(field, Value::String(buf));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.insert(field, Value::Number(n));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::String(value.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing_subscriber::prelude::*;

    #[test]
    fn test_layer_writes_events() {
        let temp = TempDir::new().unwrap();
        let layer = AuditLayer::new(temp.path().join("logs"), "test").unwrap();
        let log_path = layer.log_path().to_path_buf();

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("Plain message");
            let span = tracing::info_span!("request");
            let _guard = span.enter();
            tracing::warn!(count = 3, "Inside span");
        });

        let content = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Plain message"));
        assert!(lines[1].contains("\"count\":3"));
        assert!(lines[1].contains("\"span\":\"request\""));
    }

    #[test]
    fn test_sensitive_fields_redacted() {
        let temp = TempDir::new().unwrap();
        let layer = AuditLayer::new(temp.path().join("logs"), "test").unwrap();
        let log_path = layer.log_path().to_path_buf();

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(
                owner_user_id = "alice@example.com",
                token = "eyJhbGciOi.secret.mac",
                user_agent = "Mozilla/5.0",
                persona_id = "7HqAbc",
                "Event with secrets"
            );
        });

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert!(!content.contains("alice@example.com"));
        assert!(!content.contains("eyJhbGciOi"));
        assert!(!content.contains("Mozilla"));
        assert!(content.contains("7HqAbc"));
        assert!(content.contains(REDACTED));
    }
}
