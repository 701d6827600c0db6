use std::process::ExitCode;

fn main() -> ExitCode {
    staffdesk_cli::run()
}
