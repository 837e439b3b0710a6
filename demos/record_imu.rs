//! Stream IMU frames and print accelerometer samples as CSV on stdout.
//!
//! Usage: cargo run --example record_imu [seconds]

use std::time::Duration;

fn main() {
    env_logger::init();

    let seconds: u64 = std::env::args()
        .nth(1)
        .and_then(|n| n.parse().ok())
        .unwrap_or(5);

    let mut headset = match wmr::open_headset(&wmr::HP_REVERB_G2) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Failed to open headset: {e}");
            std::process::exit(1);
        }
    };

    println!("timestamp,temperature,ax,ay,az");
    headset.oasis_hid().register_imu_frame_callback(|frame| {
        for sample in &frame.accel_samples {
            println!(
                "{},{:.2},{:.4},{:.4},{:.4}",
                sample.timestamp.ticks(),
                sample.temperature,
                sample.axes[0],
                sample.axes[1],
                sample.axes[2]
            );
        }
        true
    });

    if let Err(e) = headset.open() {
        eprintln!("Failed to start streams: {e}");
        std::process::exit(1);
    }
    std::thread::sleep(Duration::from_secs(seconds));
    if let Err(e) = headset.close() {
        eprintln!("Shutdown error: {e}");
    }
}
