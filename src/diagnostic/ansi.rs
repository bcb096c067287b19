use crate::ast::SourceMap;
use super::Diagnostic;

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn bold(&self, s: &str) -> String {
        if self.use_color {
            format!("\x1b[1m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    fn bold_red(&self, s: &str) -> String {
        if self.use_color {
            format!("\x1b[1;31m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    fn cyan(&self, s: &str) -> String {
        if self.use_color {
            format!("\x1b[36m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    fn dim(&self, s: &str) -> String {
        if self.use_color {
            format!("\x1b[2m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        // "error[C001]: message"
        let header = match d.code {
            Some(code) => self.bold_red(&format!("error[{code}]")),
            None => self.bold_red("error"),
        };
        out.push_str(&format!("{}: {}\n", header, self.bold(&d.message)));

        // Snippet for the label, when the source is known
        if let (Some(label), Some(source)) = (d.labels.first(), &d.source) {
            let map = SourceMap::new(source);
            let (line, col) = map.lookup(label.span.start);
            let line_text = map.line_text(source, line);

            // "  --> line:col"
            out.push_str(&format!("  {} {}:{}\n", self.cyan("-->"), line, col));

            // Gutter width based on line number digits
            let gutter = line.to_string().len();
            let pipe = self.cyan("|");
            let pad = " ".repeat(gutter);

            // Empty gutter line
            out.push_str(&format!("{pad} {pipe}\n"));

            // Source line
            let line_num = self.cyan(&format!("{line:>gutter$}"));
            out.push_str(&format!("{line_num} {pipe} {line_text}\n"));

            // Caret line
            let span_start_in_line = col.saturating_sub(1);
            let span_len = (label.span.end.saturating_sub(label.span.start)).max(1);
            let carets = self.bold_red(&"^".repeat(span_len));
            let indent = " ".repeat(span_start_in_line);
            if label.message.is_empty() {
                out.push_str(&format!("{pad} {pipe} {indent}{carets}\n"));
            } else {
                let message = self.bold_red(&label.message);
                out.push_str(&format!("{pad} {pipe} {indent}{carets} {message}\n"));
            }

            // Empty gutter line after
            out.push_str(&format!("{pad} {pipe}\n"));
        }

        // Notes
        for note in &d.notes {
            out.push_str(&format!("  {} note: {}\n", self.dim("="), note));
        }

        // Suggestion
        if let Some(suggestion) = &d.suggestion {
            out.push_str(&format!("  {} suggestion: {}\n", self.dim("="), suggestion));
        }

        out
    }
}
