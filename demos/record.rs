//! Stream camera composites and write each camera's images to disk as raw
//! 8-bit grayscale files.
//!
//! Usage: cargo run --example record <output-dir> [frame-count]

use std::io::Write;
use std::sync::mpsc;

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let out_dir = match args.next() {
        Some(dir) => std::path::PathBuf::from(dir),
        None => {
            eprintln!("Usage: record <output-dir> [frame-count]");
            std::process::exit(2);
        }
    };
    let frame_count: usize = args
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(30);
    std::fs::create_dir_all(&out_dir).expect("failed to create output directory");

    let mut headset = match wmr::open_headset(&wmr::HP_REVERB_G2) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Failed to open headset: {e}");
            std::process::exit(1);
        }
    };

    let (tx, rx) = mpsc::sync_channel::<wmr::CameraFrameHandle>(4);
    let mut sent = 0usize;
    headset.camera().register_frame_callback(move |frame| {
        if tx.try_send(frame.clone()).is_ok() {
            sent += 1;
        }
        sent < frame_count
    });

    if let Err(e) = headset.open() {
        eprintln!("Failed to start streams: {e}");
        std::process::exit(1);
    }

    for n in 0..frame_count {
        let frame = match rx.recv() {
            Ok(frame) => frame,
            Err(_) => break,
        };
        for cam in 0..frame.image_count() {
            let path = out_dir.join(format!(
                "frame{:04}_cam{}_{}x{}.gray",
                n,
                cam,
                frame.image_width(),
                frame.image_height()
            ));
            let mut file = std::fs::File::create(&path).expect("failed to create image file");
            file.write_all(frame.image(cam)).expect("failed to write image");
        }
        println!(
            "frame {:04}: type={:?} t={}",
            n,
            frame.frame_type,
            frame.timestamp.ticks()
        );
    }

    if let Err(e) = headset.close() {
        eprintln!("Shutdown error: {e}");
    }
}
