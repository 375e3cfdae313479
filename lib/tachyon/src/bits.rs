//! MSB-first bit packing over byte streams. All wire formats go through
//! these two types; byte alignment exists only at the start of a logical
//! message.

use std::io;
use std::io::{Read, Write};

#[inline]
fn mask(count: u32) -> u64 {
    match count {
        64 => u64::max_value(),
        _ => (1u64 << count) - 1,
    }
}

/// Reinterprets the low `bits` of `value` as a two's-complement signed
/// integer of that width.
#[inline]
pub fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits == 0 || bits > 64 {
        panic!("Bit count must be in 1..=64, got {}", bits);
    }

    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

/// Accumulates bits MSB-first into an 8-bit scratch buffer, flushing each
/// full byte to the underlying writer. Closing pads the final partial byte
/// with zeros.
pub struct BitWriter<W: Write> {
    sink: W,
    scratch: u8,
    fill: u32,
    written: u64,
}

impl<W: Write> BitWriter<W> {
    #[inline]
    pub fn new(sink: W) -> BitWriter<W> {
        BitWriter {
            sink,
            scratch: 0,
            fill: 0,
            written: 0,
        }
    }

    /// Total bits written so far, excluding closing pad bits.
    #[inline]
    pub fn written_bits(&self) -> u64 {
        self.written
    }

    /// Write the low `count` bits of `value`, 1..=32.
    #[inline]
    pub fn write_bits(&mut self, value: u32, count: u32) -> io::Result<()> {
        if count == 0 || count > 32 {
            panic!("Bit count must be in 1..=32, got {}", count);
        }

        self.push(u64::from(value), count)
    }

    /// Write the low `count` bits of `value`, 1..=64.
    #[inline]
    pub fn write_long_bits(&mut self, value: u64, count: u32) -> io::Result<()> {
        if count == 0 || count > 64 {
            panic!("Bit count must be in 1..=64, got {}", count);
        }

        self.push(value, count)
    }

    /// Write a single marker bit.
    #[inline]
    pub fn write_bit(&mut self, value: bool) -> io::Result<()> {
        self.push(value as u64, 1)
    }

    fn push(&mut self, value: u64, mut count: u32) -> io::Result<()> {
        let value = value & mask(count);
        self.written += u64::from(count);

        while count > 0 {
            let take = (8 - self.fill).min(count);
            let chunk = (value >> (count - take)) & mask(take);

            self.scratch = ((u32::from(self.scratch) << take) | chunk as u32) as u8;
            self.fill += take;
            count -= take;

            if self.fill == 8 {
                self.sink.write_all(&[self.scratch])?;
                self.scratch = 0;
                self.fill = 0;
            }
        }

        Ok(())
    }

    /// Pads the trailing partial byte with zeros, flushes it, and returns
    /// the underlying writer.
    pub fn close(mut self) -> io::Result<W> {
        if self.fill > 0 {
            let pad = 8 - self.fill;
            self.scratch <<= pad;
            self.sink.write_all(&[self.scratch])?;
            self.scratch = 0;
            self.fill = 0;
        }

        Ok(self.sink)
    }
}

/// Mirror of `BitWriter`: consumes bits MSB-first, tracking the partially
/// consumed scratch byte.
pub struct BitReader<R: Read> {
    src: R,
    scratch: u8,
    avail: u32,
    consumed: u64,
}

impl<R: Read> BitReader<R> {
    #[inline]
    pub fn new(src: R) -> BitReader<R> {
        BitReader {
            src,
            scratch: 0,
            avail: 0,
            consumed: 0,
        }
    }

    /// Total bits consumed so far.
    #[inline]
    pub fn consumed_bits(&self) -> u64 {
        self.consumed
    }

    /// Read `count` bits, 1..=32.
    #[inline]
    pub fn read_bits(&mut self, count: u32) -> io::Result<u32> {
        if count == 0 || count > 32 {
            panic!("Bit count must be in 1..=32, got {}", count);
        }

        self.pull(count).map(|v| v as u32)
    }

    /// Read `count` bits, 1..=64.
    #[inline]
    pub fn read_long_bits(&mut self, count: u32) -> io::Result<u64> {
        if count == 0 || count > 64 {
            panic!("Bit count must be in 1..=64, got {}", count);
        }

        self.pull(count)
    }

    /// Read a single marker bit.
    #[inline]
    pub fn read_bit(&mut self) -> io::Result<bool> {
        Ok(self.pull(1)? == 1)
    }

    fn pull(&mut self, mut count: u32) -> io::Result<u64> {
        let mut value = 0u64;
        self.consumed += u64::from(count);

        while count > 0 {
            if self.avail == 0 {
                let mut byte = [0u8; 1];
                self.src.read_exact(&mut byte)?;
                self.scratch = byte[0];
                self.avail = 8;
            }

            let take = self.avail.min(count);
            let chunk = u64::from(self.scratch >> (self.avail - take)) & mask(take);

            value = (value << take) | chunk;
            self.avail -= take;
            self.scratch &= mask(self.avail) as u8;
            count -= take;
        }

        Ok(value)
    }
}
