use std::process::ExitCode;

fn main() -> ExitCode {
    shiftbot_cli::run()
}
