use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{execute, ExecutableCommand};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::prelude::{Color, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Terminal;
use tracing_subscriber::EnvFilter;

mod history;
mod parse;
mod plot;
mod store;
mod ui;

use history::HistoryWriter;
use parse::{LineOutcome, RunState, SolverMonitor};
use plot::{PlotRequest, PlotSeries, SeriesStyle, COLORS, MARKERS};
use ui::{FrameSnapshot, Message, RedrawDetector, Severity};

const FRAME_BUDGET: Duration = Duration::from_millis(16);
const NOT_PLOTTABLE: [&str; 1] = ["Iter_Type"];

const HELP_TEXT: &str = "Commands:
  add VAR [MARKER] [COLOR]   plot a variable
  remove VAR                 stop plotting a variable
  list                       show plottable variables
  iterations [N]             visible window: +N last, -N skip first N-1, 0 all
  ymin [V] / ymax [V]        fix or clear a y-axis bound
  log                        toggle log10 scale
  hlog N                     console pane height
  clear                      clear this message
  quit                       exit (asks twice)";

fn usize_to_u16_saturating(value: usize) -> u16 {
    match u16::try_from(value) {
        Ok(v) => v,
        Err(_) => u16::MAX,
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "flowmon",
    version,
    about = "Live terminal plot for a CFD solver's iteration log"
)]
struct Cli {
    /// Solver run script, executed with the python interpreter.
    script: PathBuf,

    /// Interpreter used to run the script.
    #[arg(long, default_value = "python")]
    python: String,

    /// MPI launcher used when --np is given.
    #[arg(long, default_value = "mpirun")]
    mpi_command: String,

    /// Number of MPI ranks; when set, the script runs under the MPI launcher.
    #[arg(long)]
    np: Option<u32>,

    /// Write every observed data row to this CSV file.
    #[arg(long)]
    history: Option<PathBuf>,

    /// Append structured debug logs to this file.
    #[arg(long)]
    debug_log: Option<PathBuf>,
}

#[derive(Clone, Debug)]
struct DisplaySeries {
    name: String,
    style: SeriesStyle,
}

struct SolverProcess {
    child: Child,
}

impl SolverProcess {
    fn spawn(cli: &Cli) -> Result<(Self, ChildStdout)> {
        let mut command = match cli.np {
            Some(np) => {
                let mut command = Command::new(&cli.mpi_command);
                command.arg("-np").arg(np.to_string()).arg(&cli.python);
                command
            }
            None => Command::new(&cli.python),
        };
        command
            .arg(&cli.script)
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to start {}", cli.script.display()))?;
        let stdout = child
            .stdout
            .take()
            .context("Solver stdout was not captured")?;
        Ok((Self { child }, stdout))
    }
}

impl Drop for SolverProcess {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn spawn_reader(stdout: ChildStdout) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let reader = BufReader::new(stdout);
        for line in reader.lines() {
            let Ok(mut line) = line else { break };
            line.truncate(line.trim_end().len());
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

struct App {
    monitor: SolverMonitor,
    history: Option<HistoryWriter>,
    display: Vec<DisplaySeries>,
    command: String,
    message: Message,
    redraw: RedrawDetector,
    window: i64,
    y_min: Option<f64>,
    y_max: Option<f64>,
    log_scale: bool,
    log_height: u16,
    pending_quit: bool,
    exit: bool,
    reader_done: bool,
    term_rows: u16,
    term_cols: u16,
}

impl App {
    fn new(history: Option<HistoryWriter>) -> Self {
        Self {
            monitor: SolverMonitor::new(),
            history,
            display: vec![DisplaySeries {
                name: "C_lift".to_string(),
                style: SeriesStyle {
                    marker: MARKERS[0],
                    color: COLORS[0],
                },
            }],
            command: String::new(),
            message: Message::default(),
            redraw: RedrawDetector::default(),
            window: 50,
            y_min: None,
            y_max: None,
            log_scale: false,
            log_height: 15,
            pending_quit: false,
            exit: false,
            reader_done: false,
            term_rows: 0,
            term_cols: 0,
        }
    }

    fn drain_solver(&mut self, rx: &Receiver<String>) {
        if self.reader_done {
            thread::sleep(FRAME_BUDGET);
            return;
        }
        match rx.recv_timeout(FRAME_BUDGET) {
            Ok(line) => {
                self.ingest_line(line);
                while let Ok(line) = rx.try_recv() {
                    self.ingest_line(line);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // The display keeps showing the last known state.
                tracing::debug!("solver output stream closed");
                self.reader_done = true;
            }
        }
    }

    fn ingest_line(&mut self, line: String) {
        match self.monitor.feed_line(line) {
            LineOutcome::SchemaStarted => {
                if let Err(err) = self.finish_history() {
                    self.message.set(format!("{err:#}"), Severity::Error);
                }
            }
            LineOutcome::RowAppended => {
                if let Some(history) = self.history.as_mut() {
                    let store = self.monitor.store();
                    let row = store.raw_row(store.len() - 1);
                    if let Err(err) = history.record(store.names(), &row) {
                        self.message.set(format!("{err:#}"), Severity::Error);
                    }
                }
            }
            LineOutcome::RunFinished => {
                if let Err(err) = self.finish_history() {
                    self.message.set(format!("{err:#}"), Severity::Error);
                }
            }
            LineOutcome::Warning(text) => self.message.set(text, Severity::Error),
            LineOutcome::None => {}
        }
    }

    fn finish_history(&mut self) -> Result<()> {
        match self.history.as_mut() {
            Some(history) => history.finish_run(),
            None => Ok(()),
        }
    }

    fn handle_events(&mut self) -> Result<()> {
        while event::poll(Duration::ZERO)? {
            match event::read()? {
                CEvent::Key(key) if key.kind == KeyEventKind::Press => self.handle_key(key),
                _ => {}
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.exit = true;
            }
            KeyCode::Backspace => {
                self.command.pop();
            }
            KeyCode::Enter => {
                let input = std::mem::take(&mut self.command);
                self.run_command(&input);
            }
            KeyCode::Char(c)
                if !key
                    .modifiers
                    .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
            {
                self.command.push(c);
            }
            _ => {}
        }
    }

    fn run_command(&mut self, input: &str) {
        let mut parts = input.split_whitespace();
        let Some(command) = parts.next() else {
            return;
        };
        let args: Vec<&str> = parts.collect();

        if !matches!(command, "quit" | "q") {
            self.pending_quit = false;
        }

        match command {
            "quit" | "q" => self.cmd_quit(),
            "add" | "a" => self.cmd_add(&args),
            "remove" | "r" => self.cmd_remove(&args),
            "list" | "l" => self.cmd_list(),
            "iterations" | "i" => self.cmd_iterations(&args),
            "ymin" => self.cmd_ymin(&args),
            "ymax" => self.cmd_ymax(&args),
            "log" => self.cmd_log(),
            "hlog" => self.cmd_hlog(&args),
            "clear" | "c" => self.message.clear(),
            "help" | "h" => self.message.set(HELP_TEXT, Severity::Info),
            _ => {}
        }
    }

    fn cmd_quit(&mut self) {
        if self.pending_quit {
            self.exit = true;
        } else {
            self.pending_quit = true;
            self.message
                .set("Type \"quit\" again to exit.", Severity::Info);
        }
    }

    fn cmd_add(&mut self, args: &[&str]) {
        let Some(&name) = args.first() else {
            self.message.set("No variable defined.", Severity::Error);
            return;
        };
        if !self.monitor.store().names().iter().any(|n| n == name) {
            self.message
                .set(format!("\"{name}\" is not a variable."), Severity::Error);
            return;
        }
        if self.display.iter().any(|series| series.name == name) {
            self.message
                .set(format!("\"{name}\" is already plotting."), Severity::Error);
            return;
        }
        if NOT_PLOTTABLE.contains(&name) {
            self.message
                .set(format!("\"{name}\" can not be plotted."), Severity::Error);
            return;
        }

        let marker = match args.get(1) {
            Some(token) => {
                let mut chars = token.chars();
                match (chars.next(), chars.next()) {
                    (Some(marker), None) => marker,
                    _ => {
                        self.message
                            .set("Marker must be a single character.", Severity::Error);
                        return;
                    }
                }
            }
            None => MARKERS[self.display.len() % MARKERS.len()],
        };
        let color = match args.get(2) {
            Some(token) => match parse_color(token) {
                Some(color) => color,
                None => {
                    self.message
                        .set(format!("\"{token}\" is not a color."), Severity::Error);
                    return;
                }
            },
            None => COLORS[self.display.len() % COLORS.len()],
        };

        self.display.push(DisplaySeries {
            name: name.to_string(),
            style: SeriesStyle { marker, color },
        });
        self.message.set(
            format!("\"{name}\" now plotting as \"{marker}\"."),
            Severity::Success,
        );
    }

    fn cmd_remove(&mut self, args: &[&str]) {
        let Some(&name) = args.first() else {
            self.message.set("No variable named.", Severity::Error);
            return;
        };
        let Some(position) = self.display.iter().position(|series| series.name == name) else {
            self.message
                .set(format!("\"{name}\" is not active."), Severity::Error);
            return;
        };
        self.display.remove(position);
        self.message
            .set(format!("\"{name}\" has been removed."), Severity::Success);
    }

    fn cmd_list(&mut self) {
        let names = self.monitor.store().names();
        if names.is_empty() {
            self.message.set("No variables yet.", Severity::Info);
        } else {
            self.message
                .set(format!("Variables: {}", names.join(", ")), Severity::Info);
        }
    }

    fn cmd_iterations(&mut self, args: &[&str]) {
        let arg = args.first().copied().unwrap_or("0");
        let Ok(value) = arg.parse::<i64>() else {
            self.message
                .set("Iterations count must be an integer.", Severity::Error);
            return;
        };
        self.window = value;
        if value > 0 {
            self.message
                .set(format!("Showing last {value} iterations."), Severity::Success);
        } else if value < 0 {
            let skip = value.unsigned_abs() - 1;
            self.message.set(
                format!("Skipping the first {skip} iterations."),
                Severity::Success,
            );
        } else {
            self.message
                .set("Showing all iterations.", Severity::Success);
        }
    }

    fn cmd_ymin(&mut self, args: &[&str]) {
        let Some(&arg) = args.first() else {
            self.y_min = None;
            self.message.set("Ymin is automatic.", Severity::Success);
            return;
        };
        let value = match arg.parse::<f64>() {
            Ok(value) if value.is_finite() => value,
            _ => {
                self.message
                    .set(format!("\"{arg}\" is not a number."), Severity::Error);
                return;
            }
        };
        if let Some(max) = self.y_max {
            if value >= max {
                self.message
                    .set("Ymin must be smaller than Ymax.", Severity::Error);
                return;
            }
        }
        self.y_min = Some(value);
        self.message
            .set(format!("Ymin was set to \"{value}\"."), Severity::Success);
    }

    fn cmd_ymax(&mut self, args: &[&str]) {
        let Some(&arg) = args.first() else {
            self.y_max = None;
            self.message.set("Ymax is automatic.", Severity::Success);
            return;
        };
        let value = match arg.parse::<f64>() {
            Ok(value) if value.is_finite() => value,
            _ => {
                self.message
                    .set(format!("\"{arg}\" is not a number."), Severity::Error);
                return;
            }
        };
        if let Some(min) = self.y_min {
            if value <= min {
                self.message
                    .set("Ymax must be greater than Ymin.", Severity::Error);
                return;
            }
        }
        self.y_max = Some(value);
        self.message
            .set(format!("Ymax was set to \"{value}\"."), Severity::Success);
    }

    fn cmd_log(&mut self) {
        self.log_scale = !self.log_scale;
        let text = if self.log_scale {
            "Log scale enabled."
        } else {
            "Log scale disabled."
        };
        self.message.set(text, Severity::Success);
    }

    fn cmd_hlog(&mut self, args: &[&str]) {
        let Some(&arg) = args.first() else {
            self.message
                .set("Log height needs an argument.", Severity::Error);
            return;
        };
        let Ok(value) = arg.parse::<u16>() else {
            self.message
                .set("Log height must be a positive integer.", Severity::Error);
            return;
        };
        let limit = self.term_rows.saturating_mul(2) / 3;
        if value > limit {
            self.message.set(
                format!("Log height can not be more than 2/3 ({limit}) of screen."),
                Severity::Error,
            );
            return;
        }
        self.log_height = value;
        self.message
            .set(format!("Log height was set to \"{value}\"."), Severity::Success);
    }

    fn observations(&self) -> FrameSnapshot {
        FrameSnapshot {
            term_rows: self.term_rows,
            term_cols: self.term_cols,
            message_text: self.message.text().to_string(),
            message_severity: self.message.severity(),
            command: self.command.clone(),
            console_lines: self.monitor.lines_seen(),
            series_lengths: self
                .display
                .iter()
                .map(|series| {
                    let len = self
                        .monitor
                        .store()
                        .series(&series.name)
                        .map_or(0, <[f64]>::len);
                    (series.name.clone(), len)
                })
                .collect(),
            run_state: self.monitor.state(),
        }
    }

    fn draw(&mut self, frame: &mut ratatui::Frame<'_>) {
        let area = frame.size();
        let message_text = self.message.display();
        let message_height = usize_to_u16_saturating(message_text.lines().count()).max(1);
        let log_height = self
            .log_height
            .min(area.height.saturating_sub(message_height + 2));
        let chunks = Layout::vertical([
            Constraint::Length(log_height),
            Constraint::Min(1),
            Constraint::Length(message_height),
            Constraint::Length(1),
        ])
        .split(area);

        self.draw_console(frame, chunks[0]);
        self.draw_plot(frame, chunks[1]);

        frame.render_widget(
            Paragraph::new(message_text).style(Style::default().fg(self.message.color())),
            chunks[2],
        );
        frame.render_widget(
            Paragraph::new(format!("Command: {}", self.command)),
            chunks[3],
        );
    }

    fn draw_console(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let take = usize::from(area.height);
        let console = self.monitor.console();
        let start = console.len().saturating_sub(take);
        let lines: Vec<Line> = console
            .iter()
            .skip(start)
            .map(|line| Line::raw(line.clone()))
            .collect();
        frame.render_widget(
            Paragraph::new(Text::from(lines)).style(Style::default().fg(Color::Gray)),
            area,
        );
    }

    fn draw_plot(&mut self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let store = self.monitor.store();
        let fallback: Vec<f64>;
        let x: &[f64] = match store.series("Iter") {
            Some(series) => series,
            None => {
                fallback = (0..store.len()).map(|i| i as f64).collect();
                &fallback
            }
        };
        let series: Vec<PlotSeries<'_>> = self
            .display
            .iter()
            .filter_map(|display| {
                store.series(&display.name).map(|values| PlotSeries {
                    name: &display.name,
                    values,
                    style: display.style,
                })
            })
            .collect();

        let rendered = plot::render(&PlotRequest {
            x,
            series: &series,
            window: self.window,
            y_min: self.y_min,
            y_max: self.y_max,
            log_scale: self.log_scale,
            width: area.width,
            height: area.height.saturating_sub(1),
        });

        let paragraph = Paragraph::new(Text::from(rendered.rows)).block(
            Block::default()
                .title(self.plot_title())
                .borders(Borders::TOP)
                .border_style(Style::default().fg(Color::DarkGray)),
        );
        frame.render_widget(paragraph, area);

        if let Some(warning) = rendered.warning {
            self.message.set(warning, Severity::Error);
        }
    }

    fn plot_title(&self) -> String {
        let state = match self.monitor.state() {
            RunState::AwaitingSchema => "waiting",
            RunState::Active => "running",
            RunState::Finished => "finished",
        };
        let mut title = if self.monitor.run_name().is_empty() {
            format!(" {state} ")
        } else {
            format!(" {} [{state}] ", self.monitor.run_name())
        };
        if let Some(seconds) = self.monitor.call_time() {
            title.push_str(&format!("call {seconds:.1}s "));
        }
        if let Some(seconds) = self.monitor.function_eval_time() {
            title.push_str(&format!("eval {seconds:.1}s "));
        }
        title
    }
}

fn parse_color(token: &str) -> Option<Color> {
    match token.to_ascii_lowercase().as_str() {
        "red" => Some(Color::Red),
        "green" => Some(Color::Green),
        "blue" => Some(Color::Blue),
        "yellow" => Some(Color::Yellow),
        "magenta" => Some(Color::Magenta),
        "cyan" => Some(Color::Cyan),
        "white" => Some(Color::White),
        "gray" | "grey" => Some(Color::Gray),
        _ => None,
    }
}

struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode()?;
        io::stdout().execute(EnterAlternateScreen)?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

fn run_interactive(mut app: App, rx: Receiver<String>, process: SolverProcess) -> Result<()> {
    let _guard = TerminalGuard::enter()?;
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)?;

    loop {
        let size = terminal.size()?;
        app.term_rows = size.height;
        app.term_cols = size.width;

        app.drain_solver(&rx);
        app.handle_events()?;
        if app.exit {
            break;
        }

        let observations = app.observations();
        if app.redraw.should_redraw(observations) {
            terminal.draw(|frame| app.draw(frame))?;
        }
    }

    app.finish_history()?;
    drop(process);
    Ok(())
}

fn init_tracing(path: &Path) -> Result<()> {
    let file =
        fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowmon=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = cli.debug_log.as_deref() {
        init_tracing(path)?;
    }

    let history = cli.history.clone().map(HistoryWriter::new);
    let (process, stdout) = SolverProcess::spawn(&cli)?;
    let rx = spawn_reader(stdout);

    let app = App::new(history);
    run_interactive(app, rx, process)
}
