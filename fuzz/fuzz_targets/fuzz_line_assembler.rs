//! Fuzz target: `LineAssembler::push`
//!
//! Drives arbitrary byte streams into the UART line assembler and checks
//! that every line it yields is non-empty, within capacity and free of
//! terminators, and that `clear` leaves it empty.
//!
//! cargo fuzz run fuzz_line_assembler

#![no_main]

use gasmux::sensors::gascard::protocol::{LineAssembler, MAX_LINE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut asm: LineAssembler<MAX_LINE> = LineAssembler::new();

    for &byte in data {
        if let Some(line) = asm.push(byte) {
            assert!(!line.is_empty(), "assembler yielded an empty line");
            assert!(line.len() <= MAX_LINE);
            assert!(!line.contains(&b'\r') && !line.contains(&b'\n'));
        }
        assert!(asm.partial_len() <= MAX_LINE);
    }

    asm.clear();
    assert_eq!(asm.partial_len(), 0);
});
