use std::{fs, io, path::Path};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter::Targets, fmt, layer::SubscriberExt,
    util::SubscriberInitExt,
};

use flowbench::paths;

#[derive(Clone, Copy, Debug)]
pub enum JsonLogFormat {
    Pretty,
    Compact,
}

/// Console and per-run file logging settings derived from the global CLI flags.
#[derive(Clone, Copy, Debug)]
pub struct LogOptions<'a> {
    pub verbose: bool,
    /// `None` keeps human-readable console output.
    pub json: Option<JsonLogFormat>,
    /// Adds `~/.flowbench/logs/run-<id>.log` with every debug record as JSON.
    pub run_id: Option<&'a str>,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installs the global subscriber. Console logs go to stderr so stdout stays
/// reserved for command output (`--json`, event lines, tables).
///
/// Hold the returned guard until exit or buffered file records are lost.
pub fn init(options: LogOptions<'_>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_env_filter(options.verbose));
    let mut layers = vec![console_layer(&options, filter)];

    let mut guard = None;
    if let Some(id) = options.run_id {
        match run_file_layer(&paths::logs_dir(), id) {
            Ok((layer, file_guard)) => {
                layers.push(layer);
                guard = Some(file_guard);
            }
            Err(err) => eprintln!("Warning: run log disabled: {err}"),
        }
    }

    tracing_subscriber::registry().with(layers).init();
    guard
}

fn console_layer(options: &LogOptions<'_>, filter: EnvFilter) -> BoxedLayer {
    match options.json {
        Some(JsonLogFormat::Pretty) => fmt::layer()
            .json()
            .with_writer(|| PrettyJsonWriter(io::stderr()))
            .with_filter(filter)
            .boxed(),
        Some(JsonLogFormat::Compact) => fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
        None if options.verbose => fmt::layer()
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
        None => fmt::layer()
            .with_writer(io::stderr)
            .without_time()
            .with_target(false)
            .with_filter(filter)
            .boxed(),
    }
}

fn run_file_layer(dir: &Path, run_id: &str) -> io::Result<(BoxedLayer, WorkerGuard)> {
    fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::never(dir, format!("run-{run_id}.log"));
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_writer(writer)
        .with_filter(Targets::new().with_default(tracing::Level::DEBUG))
        .boxed();
    Ok((layer, guard))
}

/// Re-indents each JSON record; anything else passes through untouched.
struct PrettyJsonWriter<W: io::Write>(W);

impl<W: io::Write> io::Write for PrettyJsonWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let record = std::str::from_utf8(buf)
            .ok()
            .and_then(|text| serde_json::from_str::<serde_json::Value>(text.trim()).ok())
            .filter(serde_json::Value::is_object);
        match record {
            Some(value) => {
                serde_json::to_writer_pretty(&mut self.0, &value).map_err(io::Error::other)?;
                self.0.write_all(b"\n")?;
                Ok(buf.len())
            }
            None => self.0.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

fn default_env_filter(verbose: bool) -> EnvFilter {
    let directives = if verbose {
        "flowbench=debug,rig_core=warn,info"
    } else {
        "flowbench=info,rig_core=warn,warn"
    };
    EnvFilter::new(directives)
}
