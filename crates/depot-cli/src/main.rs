//! Thin entrypoint for the depot command-line client.

fn main() {
    std::process::exit(depot_cli::run());
}
