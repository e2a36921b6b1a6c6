use au3::host::HeadlessHost;
use au3::script::builtins::catalogue;
use au3::script::functions::FunctionTable;
use au3::script::lexer::{tokenize, LineCache};
use au3::script::Interpreter;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const LINES: [&str; 4] = [
    "$total = $total + StringLen($parts[$i]) * 2",
    "If StringInStr($line, \"needle\", 0) > 0 And $count < 10 Then $count = $count + 1",
    "ConsoleWrite(StringUpper($name) & \": \" & $i & @CRLF)",
    "$hex = 0xFF + 1.5e3 - \"it\"\"s\"",
];

fn bench_lexer(c: &mut Criterion) {
    let fns = FunctionTable::new(catalogue());
    let mut g = c.benchmark_group("lexer");

    g.bench_function("tokenize", |b| {
        b.iter(|| {
            for line in LINES {
                let _ = black_box(tokenize(black_box(line), &fns));
            }
        })
    });

    // Every line keeps its own slot.
    let mut warm = LineCache::new(64);
    g.bench_function("cache_hit", |b| {
        b.iter(|| {
            for (n, line) in LINES.iter().enumerate() {
                let _ = black_box(warm.lex(n, line, &fns));
            }
        })
    });

    // All lines collide in a single slot.
    let mut thrashed = LineCache::new(1);
    g.bench_function("cache_miss", |b| {
        b.iter(|| {
            for (n, line) in LINES.iter().enumerate() {
                let _ = black_box(thrashed.lex(n, line, &fns));
            }
        })
    });

    g.finish();
}

fn bench_loop(c: &mut Criterion) {
    let src = "$s = 0\nFor $i = 1 To 1000\n  $s = $s + Mod($i, 7)\nNext\n";
    c.bench_function("for_loop_1000", |b| {
        b.iter(|| {
            let mut interp = Interpreter::from_source(src, Box::new(HeadlessHost::new())).unwrap();
            black_box(interp.run().unwrap())
        })
    });
}

criterion_group!(benches, bench_lexer, bench_loop);
criterion_main!(benches);
