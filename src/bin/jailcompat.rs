use jailcompat::PersonalityError;

fn main() {
    if let Err(e) = jailcompat::cli::run() {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<PersonalityError>()
            .map(i32::from)
            .unwrap_or(1);
        std::process::exit(code);
    }
}
