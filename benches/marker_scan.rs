// Benchmarks for recovery marker lookup over large job files
// Run with: cargo bench

use criterion::{Criterion, criterion_group, criterion_main};
use printwatch::gcode_store::analyze_bounds;
use printwatch::recovery::{SerialLogHistory, commands_after, next_command_after};
use printwatch_shared::CommandHistory;

fn job_file(lines: usize) -> Vec<String> {
    let mut file = vec!["G28".to_string(), "G92 E0".to_string()];
    for i in 0..lines {
        if i % 100 == 0 {
            file.push(format!("; LAYER:{}", i / 100));
            file.push(format!("G1 Z{:.1} F300", 0.2 * (i / 100 + 1) as f64));
        }
        file.push(format!("G1 X{} Y{} E{:.3} F1500", 10 + i % 150, 10 + (i * 7) % 150, i as f64 * 0.05));
    }
    file
}

fn bench_marker_lookup(c: &mut Criterion) {
    let file = job_file(100_000);
    let marker = file[file.len() - 10].clone();
    c.bench_function("next command after marker near end (100k lines)", |b| {
        b.iter(|| {
            let next = next_command_after(&file, &marker);
            assert!(next.is_some());
        });
    });
    let early = file[50].clone();
    c.bench_function("commands after early marker (100k lines)", |b| {
        b.iter(|| {
            let commands = commands_after(&file, &early).unwrap();
            assert!(commands.len() > 90_000);
        });
    });
}

fn bench_bounds_analysis(c: &mut Criterion) {
    let file = job_file(100_000);
    c.bench_function("analyze bounds (100k lines)", |b| {
        b.iter(|| {
            assert!(analyze_bounds(&file).is_some());
        });
    });
}

fn bench_serial_log_scan(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("serial.log");
    let file = job_file(2_000);
    let mut transcript = String::new();
    for (n, line) in file.iter().enumerate() {
        transcript.push_str(&format!("Send: N{} {}*{}\nRecv: ok\n", n, line, n % 256));
    }
    std::fs::write(&log, transcript).unwrap();
    let history = SerialLogHistory::new(&log, 500);
    let rt = tokio::runtime::Runtime::new().unwrap();
    c.bench_function("last acknowledged command (500 line tail)", |b| {
        b.iter(|| {
            rt.block_on(async {
                assert!(history.most_recent_acknowledged_command(&file).await.is_some());
            });
        });
    });
}

criterion_group!(benches, bench_marker_lookup, bench_bounds_analysis, bench_serial_log_scan);
criterion_main!(benches);
