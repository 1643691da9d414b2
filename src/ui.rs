use ratatui::prelude::Color;

use crate::parse::RunState;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Severity {
    #[default]
    None,
    Error,
    Success,
    Info,
}

/// The single-slot feedback region under the plot. Setting a new message
/// replaces the previous one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    text: String,
    severity: Severity,
}

impl Message {
    pub fn set(&mut self, text: impl Into<String>, severity: Severity) {
        self.text = text.into();
        self.severity = severity;
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.severity = Severity::None;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn display(&self) -> String {
        match self.severity {
            Severity::None => String::new(),
            Severity::Error => format!("Error: {}", self.text),
            Severity::Success => format!("Success: {}", self.text),
            Severity::Info => format!("Info: {}", self.text),
        }
    }

    pub fn color(&self) -> Color {
        match self.severity {
            Severity::None => Color::Reset,
            Severity::Error => Color::Red,
            Severity::Success => Color::Green,
            Severity::Info => Color::Cyan,
        }
    }
}

/// Everything that affects the rendered frame, compared by value each poll
/// tick. Series are tracked by length only; the store is append-only, so a
/// changed length is a sufficient proxy for changed content.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameSnapshot {
    pub term_rows: u16,
    pub term_cols: u16,
    pub message_text: String,
    pub message_severity: Severity,
    pub command: String,
    pub console_lines: usize,
    pub series_lengths: Vec<(String, usize)>,
    pub run_state: RunState,
}

#[derive(Default)]
pub struct RedrawDetector {
    last: Option<FrameSnapshot>,
}

impl RedrawDetector {
    /// True when any tracked field differs from the previous poll; the
    /// stored snapshot is replaced wholesale in that case.
    pub fn should_redraw(&mut self, next: FrameSnapshot) -> bool {
        if self.last.as_ref() == Some(&next) {
            return false;
        }
        self.last = Some(next);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> FrameSnapshot {
        FrameSnapshot {
            term_rows: 40,
            term_cols: 120,
            message_text: String::new(),
            message_severity: Severity::None,
            command: String::new(),
            console_lines: 0,
            series_lengths: vec![("C_lift".to_string(), 3)],
            run_state: RunState::Active,
        }
    }

    #[test]
    fn first_poll_always_redraws() {
        let mut detector = RedrawDetector::default();
        assert!(detector.should_redraw(snapshot()));
    }

    #[test]
    fn identical_polls_do_not_redraw() {
        let mut detector = RedrawDetector::default();
        assert!(detector.should_redraw(snapshot()));
        assert!(!detector.should_redraw(snapshot()));
        assert!(!detector.should_redraw(snapshot()));
    }

    #[test]
    fn any_changed_field_redraws_exactly_once() {
        let mut detector = RedrawDetector::default();
        detector.should_redraw(snapshot());

        let mut grown = snapshot();
        grown.series_lengths[0].1 = 4;
        assert!(detector.should_redraw(grown.clone()));
        assert!(!detector.should_redraw(grown.clone()));

        let mut resized = grown.clone();
        resized.term_cols = 80;
        assert!(detector.should_redraw(resized.clone()));
        assert!(!detector.should_redraw(resized));
    }

    #[test]
    fn message_formatting_and_reset() {
        let mut message = Message::default();
        assert_eq!(message.display(), "");

        message.set("\"C_lift\" now plotting as \"*\".", Severity::Success);
        assert_eq!(
            message.display(),
            "Success: \"C_lift\" now plotting as \"*\"."
        );

        message.set("boom", Severity::Error);
        assert_eq!(message.display(), "Error: boom");
        assert_eq!(message.color(), Color::Red);

        message.clear();
        assert_eq!(message.display(), "");
        assert_eq!(message.severity(), Severity::None);
    }
}
