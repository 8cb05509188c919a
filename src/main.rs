use tracing::Level;

use tokengate::{init_runtime, init_settings, init_tracing, run_proxy};

fn main() {
    init_tracing(Level::INFO);

    let conf = init_settings().expect("could not load config");
    let tokio = init_runtime(conf).expect("could not create tokio runtime");

    run_proxy(conf, &tokio);
}
