//! Build script for hwserial-hal-avrdx
//!
//! - Validates the board file at compile time
//! - Emits clock and buffer-size constants into `OUT_DIR/board.rs`

use std::env;
use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

#[path = "build_report.rs"]
mod report;

#[derive(Deserialize)]
struct Board {
    clock: Clock,
    serial: Serial,
}

#[derive(Deserialize)]
struct Clock {
    f_cpu_hz: u32,
}

#[derive(Deserialize)]
struct Serial {
    rx_buffer_size: usize,
    tx_buffer_size: usize,
    default_baud: u32,
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=build_report.rs");
    println!("cargo:rerun-if-env-changed=HWSERIAL_BOARD");

    let board_path = board_path();
    println!("cargo:rerun-if-changed={}", board_path.display());

    let content = match fs::read_to_string(&board_path) {
        Ok(content) => content,
        Err(e) => fail("Failed to read board file", &[e.to_string()]),
    };

    let board: Board = match toml::from_str(&content) {
        Ok(board) => board,
        Err(e) => fail(
            "Invalid board file",
            &e.to_string().lines().map(str::to_string).collect::<Vec<_>>(),
        ),
    };

    validate(&board);
    write_constants(&board);
}

/// Board file location, `HWSERIAL_BOARD` or the crate's own board.toml
fn board_path() -> PathBuf {
    match env::var("HWSERIAL_BOARD") {
        Ok(path) => PathBuf::from(path),
        Err(_) => {
            let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
            PathBuf::from(manifest_dir).join("board.toml")
        }
    }
}

/// Validate numeric ranges
fn validate(board: &Board) {
    let mut errors = Vec::new();

    if !(1_000_000..=48_000_000).contains(&board.clock.f_cpu_hz) {
        errors.push("[clock] f_cpu_hz must be 1000000-48000000".to_string());
    }

    for (name, size) in [
        ("rx_buffer_size", board.serial.rx_buffer_size),
        ("tx_buffer_size", board.serial.tx_buffer_size),
    ] {
        if !size.is_power_of_two() || !(16..=128).contains(&size) {
            errors.push(format!("[serial] {} must be a power of two in 16-128", name));
        }
    }

    if board.serial.default_baud == 0 {
        errors.push("[serial] default_baud must be non-zero".to_string());
    }

    if !errors.is_empty() {
        fail("Invalid values in board file", &errors);
    }
}

/// Write the generated constants module
fn write_constants(board: &Board) {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let generated = format!(
        "/// Main clock feeding the USART peripherals\n\
         pub const F_CPU: u32 = {};\n\
         /// Receive ring buffer size per channel\n\
         pub const RX_BUFFER_SIZE: usize = {};\n\
         /// Transmit ring buffer size per channel\n\
         pub const TX_BUFFER_SIZE: usize = {};\n\
         /// Baud rate used by `default_config()`\n\
         pub const DEFAULT_BAUD: u32 = {};\n",
        board.clock.f_cpu_hz,
        board.serial.rx_buffer_size,
        board.serial.tx_buffer_size,
        board.serial.default_baud,
    );
    fs::write(out_dir.join("board.rs"), generated).unwrap();
}

/// Abort the build with a boxed error message
fn fail(title: &str, lines: &[String]) -> ! {
    panic!("{}", report::render(title, lines));
}
