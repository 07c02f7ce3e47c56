use std::process::ExitCode;

use keyroll::env::RealEnv;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    ExitCode::from(keyroll::run(RealEnv))
}
