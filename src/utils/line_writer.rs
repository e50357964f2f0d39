/// Splits a byte stream into lines and hands each complete line to `emit`.
/// A trailing `\r` is dropped; whatever is left without a newline is flushed by `finish`.
pub struct LineWriter<F: FnMut(&str)> {
    pending: Vec<u8>,
    emit: F,
}

impl<F: FnMut(&str)> LineWriter<F> {
    pub fn new(emit: F) -> Self {
        Self {
            pending: Vec::new(),
            emit,
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit_line(&line[..line.len() - 1]);
        }
    }

    pub fn finish(mut self) {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.emit_line(&rest);
        }
    }

    fn emit_line(&mut self, line: &[u8]) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        (self.emit)(&String::from_utf8_lossy(line));
    }
}
