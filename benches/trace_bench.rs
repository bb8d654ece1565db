/// Benchmarks for recording and rendering traces.
///
/// Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use recurviz::application::TraceUsecase;
use recurviz::domain::guard::GuardError;
use recurviz::domain::session::TraceSession;
use recurviz::domain::value::Value;
use recurviz::infrastructure::config::TraceConfig;
use recurviz::infrastructure::IndentParser;
use recurviz::ports::dot_exporter::DotExporter;
use recurviz::ports::DiagramExporter;

const FIB: &str = "
def fib(n):
    if n < 2:
        return n
    return fib(n - 1) + fib(n - 2)
";

fn native_fib(session: &mut TraceSession, n: i64) -> Result<i64, GuardError> {
    session.invoke("fib", &[Value::Int(n)], &[], |s| {
        if n < 2 {
            return Ok(n);
        }
        Ok(native_fib(s, n - 1)? + native_fib(s, n - 2)?)
    })
}

fn calls(n: u64) -> u64 {
    if n < 2 { 1 } else { calls(n - 1) + calls(n - 2) + 1 }
}

fn bench_interpreted(c: &mut Criterion) {
    let mut group = c.benchmark_group("interpreted_fib");
    let exporter = DotExporter::default();
    let usecase = TraceUsecase {
        parser: &IndentParser,
        exporter: &exporter,
        config: TraceConfig { max_invocations: 100_000, ..TraceConfig::default() },
    };

    for n in [5u64, 10, 15] {
        group.throughput(Throughput::Elements(calls(n)));
        let entry = format!("fib({})", n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &entry, |b, entry| {
            b.iter(|| usecase.run(black_box(FIB), black_box(entry)).unwrap())
        });
    }
    group.finish();
}

fn bench_native_hook(c: &mut Criterion) {
    let mut group = c.benchmark_group("native_hook");
    for n in [10i64, 15, 20] {
        group.throughput(Throughput::Elements(calls(n as u64)));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let mut session = TraceSession::new(usize::MAX, Duration::from_secs(60));
            b.iter(|| {
                session.reset();
                native_fib(&mut session, black_box(n)).unwrap()
            })
        });
    }
    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let mut session = TraceSession::new(usize::MAX, Duration::from_secs(60));
    native_fib(&mut session, 18).unwrap();
    let store = session.into_store();
    let exporter = DotExporter::default();

    c.bench_function("dot_render_fib18", |b| {
        b.iter(|| exporter.export(black_box(&store)))
    });
}

criterion_group!(benches, bench_interpreted, bench_native_hook, bench_render);
criterion_main!(benches);
