use launchpad_core::domain::usage::SubjectId;

use crate::commands::{load_config, open_governance, runtime, CommandResult, StepFailure};

/// Reports every quota for `subject` without consuming anything.
pub fn run(subject: &str) -> CommandResult {
    let config = match load_config("usage") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("usage") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let subject = SubjectId::from(subject);
    let result = runtime.block_on(async {
        let governance = open_governance(&config).await?;
        Ok::<_, StepFailure>(governance.usage_summary(&subject).await)
    });

    match result {
        Ok(summary) => {
            let lines: Vec<String> = summary
                .iter()
                .map(|decision| {
                    format!(
                        "{}: {} of {} {} used",
                        decision.quota.label(),
                        decision.current_usage,
                        decision.limit,
                        decision.quota.unit()
                    )
                })
                .collect();
            CommandResult::report("usage", "ok", lines.join("; "), &summary, 0)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("usage", error_class, message, exit_code)
        }
    }
}
