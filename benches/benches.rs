use criterion::{criterion_group, criterion_main};

mod verify;

criterion_group!(benches, verify::blocks, verify::certificates);
criterion_main!(benches);
