use std::process::ExitCode;

fn main() -> ExitCode {
    launchpad_cli::run()
}
