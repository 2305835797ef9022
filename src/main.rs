use std::process::ExitCode;

fn main() -> ExitCode {
    proxy_bridge::run_cli()
}
