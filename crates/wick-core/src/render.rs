//! Rendering of call results and events.
//!
//! Two layouts, both indented with four spaces:
//!
//! - plain: the args array alone, a `kwargs:` block alone, or `args:` then
//!   `kwargs:` when both are present. Nothing at all when both are empty.
//! - JSON envelope: always `{"args": [...], "kwargs": {...}}`.
//!
//! Keyword mappings are written in lexical key order.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::{Map, Value};

use crate::session::{CallResult, Event};
use crate::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Plain,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Plain
        }
    }
}

fn sorted(map: &Map<String, Value>) -> BTreeMap<&str, &Value> {
    map.iter().map(|(k, v)| (k.as_str(), v)).collect()
}

/// Serialize `value` as JSON indented with four spaces.
pub fn to_pretty<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    value.serialize(&mut ser)?;
    // serde_json only ever emits UTF-8
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[derive(Serialize)]
struct Envelope<'a> {
    args: &'a [Value],
    kwargs: BTreeMap<&'a str, &'a Value>,
}

#[derive(Serialize)]
struct EventEnvelope<'a> {
    args: &'a [Value],
    kwargs: BTreeMap<&'a str, &'a Value>,
    details: BTreeMap<&'a str, &'a Value>,
}

/// Render positional and keyword values in the given layout.
pub fn render(args: &[Value], kwargs: &Map<String, Value>, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            let envelope = Envelope {
                args,
                kwargs: sorted(kwargs),
            };
            Ok(format!("{}\n", to_pretty(&envelope)?))
        }
        OutputFormat::Plain => {
            let mut out = String::new();
            match (args.is_empty(), kwargs.is_empty()) {
                (true, true) => {}
                (false, true) => {
                    out.push_str(&to_pretty(args)?);
                    out.push('\n');
                }
                (true, false) => {
                    out.push_str("kwargs:\n");
                    out.push_str(&to_pretty(&sorted(kwargs))?);
                    out.push('\n');
                }
                (false, false) => {
                    out.push_str("args:\n");
                    out.push_str(&to_pretty(args)?);
                    out.push_str("\nkwargs:\n");
                    out.push_str(&to_pretty(&sorted(kwargs))?);
                    out.push('\n');
                }
            }
            Ok(out)
        }
    }
}

/// Render an event, optionally including its details.
pub fn render_event(event: &Event, details: bool, format: OutputFormat) -> Result<String> {
    if !details {
        return render(&event.args, &event.kwargs, format);
    }
    match format {
        OutputFormat::Json => {
            let envelope = EventEnvelope {
                args: &event.args,
                kwargs: sorted(&event.kwargs),
                details: sorted(&event.details),
            };
            Ok(format!("{}\n", to_pretty(&envelope)?))
        }
        OutputFormat::Plain => {
            let mut out = format!("details:\n{}\n", to_pretty(&sorted(&event.details))?);
            out.push_str(&render(&event.args, &event.kwargs, format)?);
            Ok(out)
        }
    }
}

// ---------------------------------------------------------------------------
// Printer
// ---------------------------------------------------------------------------

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Writes rendered output to a shared sink. Cloning shares the sink, so
/// concurrent iterations never interleave within one rendering.
#[derive(Clone)]
pub struct Printer {
    format: OutputFormat,
    sink: Sink,
}

impl Printer {
    pub fn new(format: OutputFormat, writer: Box<dyn Write + Send>) -> Self {
        Self {
            format,
            sink: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(format, Box::new(std::io::stdout()))
    }

    /// A printer that writes into memory, plus a handle to read it back.
    pub fn capture(format: OutputFormat) -> (Self, Captured) {
        let captured = Captured::default();
        (Self::new(format, Box::new(captured.clone())), captured)
    }

    pub fn print_result(&self, result: &CallResult) -> Result<()> {
        let text = render(&result.args, &result.kwargs, self.format)?;
        self.write(&text)
    }

    pub fn print_event(&self, event: &Event, details: bool) -> Result<()> {
        let text = render_event(event, details, self.format)?;
        self.write(&text)
    }

    fn write(&self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        sink.write_all(text.as_bytes())?;
        sink.flush()?;
        Ok(())
    }
}

/// In-memory sink used by [`Printer::capture`].
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Write for Captured {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
