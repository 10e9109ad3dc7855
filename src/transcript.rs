//! Command transcripts
//!
//! A dispatched command's transcript is the serial text between the buffer
//! clear and the completion marker: the terminal's echo of the command, the
//! program's output and the next prompt. These helpers peel off the echo and
//! the prompt.

/// Captured serial text of one command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transcript {
    raw: String,
}

impl Transcript {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn into_inner(self) -> String {
        self.raw
    }

    /// Text after the echoed command line
    ///
    /// Returns the whole transcript when the first line is not the echo.
    pub fn without_echo(&self, command: &str) -> &str {
        let command = command.trim();
        match self.raw.split_once('\n') {
            Some((first, rest)) if !command.is_empty() && first.trim_end().ends_with(command) => rest,
            _ => &self.raw,
        }
    }

    /// Program output with the echo and the trailing prompt removed
    ///
    /// An exact `prompt` suffix is stripped in place, so output without a
    /// final newline survives. Otherwise the last line is cut at the last
    /// marker it carries; text before the marker on that line is kept since
    /// an unknown prompt can sit right after unterminated output.
    pub fn program_output(&self, command: &str, prompt: Option<&str>, markers: &[String]) -> String {
        let body = self.without_echo(command);

        if let Some(stripped) = prompt.filter(|p| !p.is_empty()).and_then(|p| body.strip_suffix(p)) {
            return stripped.to_string();
        }

        let (head, tail) = match body.rfind('\n') {
            Some(idx) => body.split_at(idx + 1),
            None => ("", body),
        };
        let cut = markers
            .iter()
            .filter(|m| !m.is_empty())
            .filter_map(|m| tail.rfind(m.as_str()))
            .max();
        match cut {
            Some(idx) => format!("{}{}", head, tail[..idx].trim_end_matches([' ', '\t'])),
            None => body.to_string(),
        }
    }
}

impl From<String> for Transcript {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}
