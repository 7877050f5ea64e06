//! Benchmarks the two-pass syscall scan against a synthetic `.text`
//! section, since the scan's cost is dominated by instruction count, not
//! by any particular binary.

use cmdguard::risk::analyzer::{analyze, AnalysisConfig};
use cmdguard::risk::{analyzer, elf::Architecture, LoadedElf};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;

fn synthetic_text(instructions: usize) -> Vec<u8> {
    let mut text = Vec::with_capacity(instructions * 5);
    for i in 0..instructions {
        if i % 50 == 0 {
            text.extend_from_slice(&[0xB8, 0x01, 0x00, 0x00, 0x00]); // mov eax, 1
            text.extend_from_slice(&[0x0F, 0x05]); // syscall
        } else {
            text.push(0x90); // nop
        }
    }
    text
}

fn bench_two_pass_scan(c: &mut Criterion) {
    let elf = LoadedElf {
        architecture: Architecture::X86_64,
        text: synthetic_text(50_000),
        text_vaddr: 0x1000,
        gopclntab: None,
        symbols: HashMap::new(),
    };

    c.bench_function("risk_analyzer_two_pass_scan_50k_instructions", |b| {
        b.iter(|| analyze(black_box(&elf)))
    });

    let _ = analyzer::SCHEMA_VERSION;
    let _ = AnalysisConfig::default();
}

criterion_group!(benches, bench_two_pass_scan);
criterion_main!(benches);
