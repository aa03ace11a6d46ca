use crate::error::Result;
use console::{style, StyledObject};
use dialoguer::{theme::ColorfulTheme, Select};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LabelKind {
    Info,
    Success,
    Error,
}

/// Renders ` SOURCE ` on a colored background.
pub fn make_label(input: &str, kind: LabelKind) -> StyledObject<String> {
    let label = style(format!(" {} ", input.to_uppercase())).black();
    match kind {
        LabelKind::Info => label.on_blue(),
        LabelKind::Success => label.on_green(),
        LabelKind::Error => label.on_red(),
    }
}

/// User-facing progress output.
pub trait Logger {
    fn log(&self, kind: LabelKind, source: &str, message: &str);

    fn info(&self, source: &str, message: &str) {
        self.log(LabelKind::Info, source, message)
    }

    fn success(&self, source: &str, message: &str) {
        self.log(LabelKind::Success, source, message)
    }

    fn error(&self, source: &str, message: &str) {
        self.log(LabelKind::Error, source, message)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn log(&self, kind: LabelKind, source: &str, message: &str) {
        match kind {
            LabelKind::Error => {
                tracing::error!(source, "{message}");
                eprintln!("{} {message}", make_label(source, kind));
            }
            _ => {
                tracing::info!(source, "{message}");
                println!("{} {message}", make_label(source, kind));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _kind: LabelKind, _source: &str, _message: &str) {}
}

pub trait ProfilePrompter {
    fn choose(&self, profiles: &[String]) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DialoguerPrompter;

impl ProfilePrompter for DialoguerPrompter {
    fn choose(&self, profiles: &[String]) -> Result<String> {
        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Choose the profile")
            .items(profiles)
            .default(0)
            .interact()?;
        Ok(profiles[selection].clone())
    }
}
