use tracing::{error, Level};

mod logging;

fn main() {
    logging::configure_logging();

    let mut target = watchdog::default_target();
    target.verbose(tracing::enabled!(Level::DEBUG));

    let code = match watchdog::supervise(target) {
        Ok(outcome) => {
            println!("{outcome}");
            outcome.exit_code()
        }
        Err(err) => {
            error!(%err, "supervisor failed");
            1
        }
    };

    std::process::exit(code);
}
