use criterion::{Criterion, black_box, criterion_group, criterion_main};
use importkit::script::{find_result_json, parse_progress};

fn extraction_output(lines: usize) -> Vec<String> {
    let mut output: Vec<String> = (0..lines)
        .map(|i| match i % 3 {
            0 => format!("Progress: {}%", i % 100),
            1 => format!("[download] segment {} of {}", i, lines),
            _ => format!("{{\"debug\":{}}}", i),
        })
        .collect();
    output.push(r#"{"audio_path":"bilibili_extracts/a.wav","subtitle_path":"bilibili_extracts/a.srt"}"#.to_string());
    output.push("done".to_string());
    output
}

fn script_benchmark(c: &mut Criterion) {
    let output = extraction_output(2_000);
    let with_sentinel = {
        let mut lines = output.clone();
        lines.insert(10, r#"RESULT: {"audio_path":"a.wav"}"#.to_string());
        lines
    };

    c.bench_function("parse_progress", |b| {
        b.iter(|| {
            output
                .iter()
                .filter_map(|line| parse_progress(black_box(line)))
                .count()
        })
    });
    c.bench_function("find_result_json/trailing", |b| {
        b.iter(|| find_result_json(black_box(&output)))
    });
    c.bench_function("find_result_json/sentinel", |b| {
        b.iter(|| find_result_json(black_box(&with_sentinel)))
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .significance_level(0.1)
        .noise_threshold(0.05)
        .configure_from_args();
    targets = script_benchmark
}
criterion_main!(benches);
