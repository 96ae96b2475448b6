fn main() {
    if let Err(err) = apptest::run() {
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}
