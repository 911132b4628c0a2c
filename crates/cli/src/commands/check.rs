use launchpad_core::domain::usage::SubjectId;

use crate::commands::{load_config, open_governance, runtime, CommandResult, StepFailure};

/// Runs the free tier gate for `subject`, consuming one request. Exits 1 on denial.
pub fn run(subject: &str) -> CommandResult {
    let config = match load_config("check") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("check") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let subject = SubjectId::from(subject);
    let result = runtime.block_on(async {
        let governance = open_governance(&config).await?;
        Ok::<_, StepFailure>(governance.check_free_tier_limits(&subject).await)
    });

    match result {
        Ok(decision) if decision.allowed => {
            let status = if decision.degraded() { "degraded" } else { "ok" };
            CommandResult::report("check", status, decision.message.clone(), &decision, 0)
        }
        Ok(decision) => CommandResult::report("check", "denied", decision.message.clone(), &decision, 1),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("check", error_class, message, exit_code)
        }
    }
}
