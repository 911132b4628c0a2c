use std::fs;
use std::io::{self, Read};
use std::path::Path;

use anyhow::Context;
use launchpad_core::domain::agent::AgentKind;
use launchpad_core::parsing::OutputParser;

use crate::commands::CommandResult;

/// Parses a raw model response read from `file`, or stdin when absent.
pub fn run(kind: &str, file: Option<&Path>) -> CommandResult {
    let Some(kind) = AgentKind::parse(kind) else {
        return CommandResult::failure(
            "parse",
            "invalid_argument",
            format!("unknown agent kind `{kind}` (expected execution_planner or grant_scout)"),
            2,
        );
    };

    let raw = match read_input(file) {
        Ok(raw) => raw,
        Err(error) => return CommandResult::failure("parse", "input", format!("{error:#}"), 2),
    };

    run_with_input(kind, &raw)
}

pub fn run_with_input(kind: AgentKind, raw: &str) -> CommandResult {
    let result = OutputParser::now().parse(kind, raw);
    if result.success {
        let message = format!("{} output is valid ({} warning(s))", kind.as_str(), result.warnings.len());
        CommandResult::report("parse", "ok", message, &result, 0)
    } else {
        let stage = result.failure().map_or("unknown", |failure| failure.stage());
        let message =
            format!("{} output rejected at {stage} stage: {}", kind.as_str(), result.errors.join("; "));
        CommandResult::report("parse", "invalid", message, &result, 1)
    }
}

fn read_input(file: Option<&Path>) -> anyhow::Result<String> {
    match file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read response from {}", path.display())),
        None => {
            let mut raw = String::new();
            io::stdin().read_to_string(&mut raw).context("failed to read response from stdin")?;
            Ok(raw)
        }
    }
}
