use crate::commands::{load_config, open_governance, runtime, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("sweep") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("sweep") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let governance = open_governance(&config).await?;
        governance
            .sweep_expired(governance.now())
            .await
            .map_err(|error| ("store", error.to_string(), 6u8))
    });

    match result {
        Ok(reports) => {
            let deleted: usize = reports.iter().map(|report| report.deleted).sum();
            let message = format!(
                "removed {deleted} expired counter(s) older than {}h",
                config.governance.sweep.retention_hours
            );
            CommandResult::report("sweep", "ok", message, &reports, 0)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sweep", error_class, message, exit_code)
        }
    }
}
