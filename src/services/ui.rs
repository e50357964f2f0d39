use std::io::Write;

/// Operator-facing progress output, separate from the diagnostic log.
pub trait Ui: Send + Sync {
    fn say(&self, message: &str);
    fn error(&self, message: &str);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleUi;

impl Ui for ConsoleUi {
    fn say(&self, message: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", message);
    }

    fn error(&self, message: &str) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", message);
    }
}
