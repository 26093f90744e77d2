//! jstar-cli/src/main.rs
//!
//! Entry point for the `jstar` binary. Sets up error reporting and logging,
//! then delegates all real logic to `jstar_cli::run()`.
//!
//! Keeping this minimal means `lib.rs` stays unit-testable
//! (`cargo test -p jstar-cli`) while `main.rs` is just process bootstrap.

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = jstar_cli::run() {
        eprintln!("error: {err:#}");

        if std::env::var("RUST_BACKTRACE").as_deref() == Ok("1") {
            eprintln!("\nbacktrace:\n{}", err.backtrace());
        }

        std::process::exit(1);
    }
}
