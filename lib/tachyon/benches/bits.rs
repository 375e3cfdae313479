#[macro_use]
extern crate criterion;

extern crate tachyon;
use criterion::black_box;
use criterion::Criterion;
use std::io::Cursor;
use tachyon::bits::{BitReader, BitWriter};
use tachyon::protocol::ObjectProtocol;
use tachyon::protocol::{PositionLayout, RotationLayout};
use tachyon::wire::object::ObjectState;

fn write_mixed(c: &mut Criterion) {
    c.bench_function("Write Mixed Widths", move |b| {
        b.iter(|| {
            let mut writer = BitWriter::new(Vec::with_capacity(4096));

            for i in 0..512u64 {
                writer.write_bits(black_box(i as u32), 16).unwrap();
                writer.write_bit(i & 1 == 0).unwrap();
                writer.write_long_bits(black_box(i * 7919), 48).unwrap();
            }

            writer.close().unwrap()
        })
    });
}

fn read_mixed(c: &mut Criterion) {
    let mut writer = BitWriter::new(Vec::with_capacity(4096));
    for i in 0..512u64 {
        writer.write_bits(i as u32, 16).unwrap();
        writer.write_bit(i & 1 == 0).unwrap();
        writer.write_long_bits(i * 7919, 48).unwrap();
    }
    let bytes = writer.close().unwrap();

    c.bench_function("Read Mixed Widths", move |b| {
        b.iter(|| {
            let mut reader = BitReader::new(Cursor::new(&bytes[..]));
            let mut acc = 0u64;

            for _ in 0..512 {
                acc = acc.wrapping_add(u64::from(reader.read_bits(16).unwrap()));
                reader.read_bit().unwrap();
                acc = acc.wrapping_add(reader.read_long_bits(48).unwrap());
            }

            acc
        })
    });
}

fn encode_object_states(c: &mut Criterion) {
    let protocol = ObjectProtocol::new(
        8,
        64,
        PositionLayout::new(24, 4.0),
        RotationLayout::new(12),
    );

    let states: Vec<ObjectState> = (1..=256u16)
        .map(|id| {
            let mut state = ObjectState::new(id);
            state.zone_id = Some(u32::from(id) % 27 + 1);
            state.real_id = Some(u64::from(id) * 13);
            state.position = Some(u64::from(id) * 7);
            state.rotation = Some(u64::from(id));
            state
        })
        .collect();

    c.bench_function("Encode Object States", move |b| {
        b.iter(|| {
            let mut writer = BitWriter::new(Vec::with_capacity(4096));

            for state in &states {
                state.write(&mut writer, &protocol).unwrap();
            }

            writer.close().unwrap()
        })
    });
}

criterion_group!(benches, write_mixed, read_mixed, encode_object_states);
criterion_main!(benches);
