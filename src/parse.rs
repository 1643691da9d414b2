use std::collections::VecDeque;

use anyhow::{bail, Result};
use tracing::{debug, warn};

use crate::store::TimeSeriesStore;

const DIVIDER_PREFIX: &str = "#---------";
const HEADER_BASE_PREFIX: &str = "#  Grid";
const HEADER_SUB_PREFIX: &str = "#  level";
const DATA_INDENT: &str = "     ";
const RUN_NAME_PREFIX: &str = "|  Switching to Aero Problem:";
const CALL_TIME_PREFIX: &str = "| Total Call Time";
const FUNC_TIME_PREFIX: &str = "| Total Function Evaluation Time";

pub const TOTAL_RES: &str = "totalRes";
pub const REL_RES: &str = "relRes";

const CONSOLE_CAP: usize = 10_000;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Plottable representation; text observations collapse to the 0.0 sentinel.
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Int(v) => *v as f64,
            Value::Float(v) => *v,
            Value::Text(_) => 0.0,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
        }
    }
}

/// Integer if the token is optionally-signed digits, else float, else the
/// original text. "1e3" is a float; a bare word stays text.
pub fn parse_value(token: &str) -> Value {
    let unsigned = token.strip_prefix(['+', '-']).unwrap_or(token);
    if !unsigned.is_empty() && unsigned.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(v) = token.parse::<i64>() {
            return Value::Int(v);
        }
    }
    if let Ok(v) = token.parse::<f64>() {
        return Value::Float(v);
    }
    Value::Text(token.to_string())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    AwaitingSchema,
    Active,
    Finished,
}

#[derive(Debug, PartialEq)]
enum LineEvent {
    Header { base: String, sub: String },
    Data(Vec<String>),
    Terminator,
    CallTime(f64),
    FunctionEvalTime(f64),
    RunName(String),
    Unrelated,
}

/// Classify the newest line given a trailing window of at most 4 raw lines
/// (newest last). Header detection needs the full window; everything else
/// only looks at the newest line and the lifecycle state.
fn classify(window: &[&str], state: RunState) -> LineEvent {
    let Some(&newest) = window.last() else {
        return LineEvent::Unrelated;
    };

    if state != RunState::Active
        && window.len() >= 4
        && newest.starts_with(DIVIDER_PREFIX)
        && window[window.len() - 4].starts_with(DIVIDER_PREFIX)
    {
        let base = window[window.len() - 3];
        let sub = window[window.len() - 2];
        if base.starts_with(HEADER_BASE_PREFIX) && sub.starts_with(HEADER_SUB_PREFIX) {
            return LineEvent::Header {
                base: base.to_string(),
                sub: sub.to_string(),
            };
        }
    }

    if state == RunState::Active {
        if newest == "#" {
            return LineEvent::Terminator;
        }
        if newest.starts_with(DATA_INDENT) {
            return LineEvent::Data(newest.split_whitespace().map(str::to_string).collect());
        }
    }

    if state == RunState::Finished {
        if let Some(value) = stat_value(newest, CALL_TIME_PREFIX) {
            return LineEvent::CallTime(value);
        }
        if let Some(value) = stat_value(newest, FUNC_TIME_PREFIX) {
            return LineEvent::FunctionEvalTime(value);
        }
    }

    if let Some(rest) = newest.strip_prefix(RUN_NAME_PREFIX) {
        let name = rest.trim().trim_end_matches('|').trim();
        if !name.is_empty() {
            return LineEvent::RunName(name.to_string());
        }
    }

    LineEvent::Unrelated
}

fn stat_value(line: &str, prefix: &str) -> Option<f64> {
    let rest = line.strip_prefix(prefix)?;
    let (_, after) = rest.split_once(':')?;
    after.split_whitespace().next()?.parse::<f64>().ok()
}

/// Merge a two-row column header into flat variable names. Row one supplies
/// base tokens, row two's non-empty cells are appended with an underscore.
pub fn build_schema(base: &str, sub: &str) -> Result<Vec<String>> {
    let mut names = split_header_cells(base);
    for (pos, cell) in split_header_cells(sub).into_iter().enumerate() {
        if cell.is_empty() {
            continue;
        }
        match names.get_mut(pos) {
            Some(name) => {
                name.push('_');
                name.push_str(&cell);
            }
            None => bail!("sub-label \"{cell}\" has no matching header column"),
        }
    }
    for (pos, name) in names.iter().enumerate() {
        if name.is_empty() {
            bail!("header column {pos} is empty");
        }
        if names[..pos].contains(name) {
            bail!("duplicate variable name \"{name}\" in header");
        }
    }
    Ok(names)
}

fn split_header_cells(line: &str) -> Vec<String> {
    let inner = line
        .strip_prefix('#')
        .unwrap_or(line)
        .trim_end()
        .trim_end_matches('|');
    inner
        .split('|')
        .map(|cell| cell.trim().replace(' ', "_"))
        .collect()
}

#[derive(Debug, PartialEq)]
pub enum LineOutcome {
    None,
    SchemaStarted,
    RowAppended,
    RunFinished,
    Warning(String),
}

/// Incremental parser for the solver's stdout stream. Owns the console
/// history, the lifecycle state and the time-series store of the current run.
pub struct SolverMonitor {
    console: VecDeque<String>,
    lines_seen: usize,
    state: RunState,
    schema: Vec<String>,
    store: TimeSeriesStore,
    run_name: String,
    call_time: Option<f64>,
    function_eval_time: Option<f64>,
}

impl SolverMonitor {
    pub fn new() -> Self {
        Self {
            console: VecDeque::new(),
            lines_seen: 0,
            state: RunState::AwaitingSchema,
            schema: Vec::new(),
            store: TimeSeriesStore::empty(),
            run_name: String::new(),
            call_time: None,
            function_eval_time: None,
        }
    }

    pub fn console(&self) -> &VecDeque<String> {
        &self.console
    }

    pub fn lines_seen(&self) -> usize {
        self.lines_seen
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn store(&self) -> &TimeSeriesStore {
        &self.store
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn call_time(&self) -> Option<f64> {
        self.call_time
    }

    pub fn function_eval_time(&self) -> Option<f64> {
        self.function_eval_time
    }

    /// Append one raw line and apply whatever event it classifies to. The
    /// line is pushed to the console history first so classification sees a
    /// fully appended window.
    pub fn feed_line(&mut self, line: String) -> LineOutcome {
        self.console.push_back(line);
        if self.console.len() > CONSOLE_CAP {
            self.console.pop_front();
        }
        self.lines_seen += 1;

        let event = {
            let start = self.console.len().saturating_sub(4);
            let window: Vec<&str> = self
                .console
                .iter()
                .skip(start)
                .map(String::as_str)
                .collect();
            classify(&window, self.state)
        };

        match event {
            LineEvent::Header { base, sub } => self.start_run(&base, &sub),
            LineEvent::Data(fields) => self.append_row(fields),
            LineEvent::Terminator => {
                self.state = RunState::Finished;
                debug!(rows = self.store.len(), run = %self.run_name, "run finished");
                LineOutcome::RunFinished
            }
            LineEvent::CallTime(value) => {
                self.call_time = Some(value);
                LineOutcome::None
            }
            LineEvent::FunctionEvalTime(value) => {
                self.function_eval_time = Some(value);
                LineOutcome::None
            }
            LineEvent::RunName(name) => {
                // One-shot per run: announcements during an active run are
                // ignored, anything seen between runs names the next one.
                if self.state != RunState::Active {
                    self.run_name = name;
                }
                LineOutcome::None
            }
            LineEvent::Unrelated => LineOutcome::None,
        }
    }

    fn start_run(&mut self, base: &str, sub: &str) -> LineOutcome {
        let mut schema = match build_schema(base, sub) {
            Ok(schema) => schema,
            Err(err) => {
                warn!("rejecting header block: {err}");
                return LineOutcome::Warning(format!("Bad header block: {err}."));
            }
        };
        let input_columns = schema.len();
        if schema.iter().any(|name| name == TOTAL_RES) {
            schema.push(REL_RES.to_string());
        }

        if schema == self.schema && self.store.input_columns() == input_columns {
            self.store.reset();
        } else {
            self.store = TimeSeriesStore::new(&schema, input_columns);
            self.schema = schema;
        }
        self.state = RunState::Active;
        self.call_time = None;
        self.function_eval_time = None;
        debug!(vars = self.schema.len(), run = %self.run_name, "schema detected");
        LineOutcome::SchemaStarted
    }

    fn append_row(&mut self, fields: Vec<String>) -> LineOutcome {
        let expected = self.store.input_columns();
        if fields.len() != expected {
            warn!(got = fields.len(), expected, "data row column mismatch");
            return LineOutcome::Warning(format!(
                "Data row has {} fields, expected {}.",
                fields.len(),
                expected
            ));
        }
        let values = fields.iter().map(|field| parse_value(field)).collect();
        self.store.append(values);
        LineOutcome::RowAppended
    }
}
