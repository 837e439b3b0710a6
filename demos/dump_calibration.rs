//! Read the factory calibration blob and print its JSON to stdout.
//!
//! Usage: cargo run --example dump_calibration

fn main() {
    env_logger::init();

    let headset = match wmr::open_headset(&wmr::HP_REVERB_G2) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Failed to open headset: {e}");
            std::process::exit(1);
        }
    };

    match headset.oasis_hid().read_calibration() {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to read calibration: {e}");
            std::process::exit(1);
        }
    }
}
