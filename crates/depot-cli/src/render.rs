use anstyle::{AnsiColor, Style};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

pub fn current_output_style() -> OutputStyle {
    if std::env::var_os("NO_COLOR").is_some() {
        return OutputStyle::Plain;
    }
    if std::env::var("TERM").map(|term| term == "dumb").unwrap_or(false) {
        return OutputStyle::Plain;
    }
    if std::io::stdout().is_terminal() {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

fn status_style(status: &str) -> Style {
    match status {
        "ok" | "done" => Style::new().fg_color(Some(AnsiColor::Green.into())).bold(),
        "warn" => Style::new().fg_color(Some(AnsiColor::Yellow.into())),
        "fail" => Style::new().fg_color(Some(AnsiColor::Red.into())).bold(),
        _ => Style::new().fg_color(Some(AnsiColor::Cyan.into())),
    }
}

pub fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => format!("[{status}] {message}"),
        OutputStyle::Rich => {
            let painted = status_style(status);
            format!(
                "{}[{status}]{} {message}",
                painted.render(),
                painted.render_reset()
            )
        }
    }
}

pub fn download_progress(style: OutputStyle, label: &str) -> Option<ProgressBar> {
    if style != OutputStyle::Rich {
        return None;
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::with_template(
        "{spinner:.cyan.bold} {msg:<24} {bytes:>10} {elapsed_precise}",
    ) {
        bar.set_style(template);
    }
    bar.set_message(label.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    Some(bar)
}
