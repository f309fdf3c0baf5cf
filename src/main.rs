use std::process;

fn main() {
    if let Err(err) = hazflow::app::run() {
        eprintln!("fatal: {err:#}");
        process::exit(1);
    }
}
