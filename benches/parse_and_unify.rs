use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use huntflow::schema::{unify, Schema};
use huntflow::syntax::parse;
use huntflow::types::{Entity, Value};

const SCRIPT: &str = "a = GET process FROM edr WHERE [process:name = 'cmd.exe' AND pid > 4] LAST 2 HOURS LIMIT 500
b = GET file FROM file:///tmp/bundle.json WHERE path LIKE '%.exe' OR name MATCHES '^svc'
c = FIND accessed BETWEEN a AND b
d = JOIN a, c BY pid
e = GROUP d BY name WITH COUNT(*), MAX(pid) AS top
f = a WHERE name IN ('cmd.exe', 'powershell.exe') ATTR name, pid SORT BY pid DESC LIMIT 10
DISP f";

fn gen_rows(n: usize, float_pid: bool) -> Vec<Entity> {
    (0..n)
        .map(|i| {
            let mut attrs = BTreeMap::new();
            attrs.insert("name".to_string(), Value::Str(format!("proc{}.exe", i % 97)));
            let pid = if float_pid { Value::Float(i as f64) } else { Value::Int(i as i64) };
            attrs.insert("pid".to_string(), pid);
            if i % 3 == 0 {
                attrs.insert("command_line".to_string(), Value::Str(format!("run --n {}", i)));
            }
            Entity::new(format!("p{}", i), attrs)
        })
        .collect()
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Bytes(SCRIPT.len() as u64));
    group.bench_function("script_7_statements", |b| b.iter(|| parse(black_box(SCRIPT)).map(|v| v.len()).unwrap_or(0)));
    group.finish();
}

fn bench_unify(c: &mut Criterion) {
    let mut group = c.benchmark_group("unify");
    for &n in &[1_000usize, 50_000usize] {
        let a = gen_rows(n, false);
        let b = gen_rows(n, true);
        group.throughput(Throughput::Elements((2 * n) as u64));
        group.bench_with_input(BenchmarkId::new("infer_and_unify", n), &n, |bch, _| {
            bch.iter(|| {
                let schemas = [Schema::infer("process", &a), Schema::infer("process", &b)];
                unify(black_box(&schemas)).schema.attributes.len()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_unify);
criterion_main!(benches);
