//! Binary entrypoint delegating to [`dbvault_app::run`].

use std::process;

#[tokio::main]
async fn main() {
    let code = dbvault_app::run().await;
    if code != 0 {
        process::exit(code);
    }
}
