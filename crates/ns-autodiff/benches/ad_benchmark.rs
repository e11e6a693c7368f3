use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ns_autodiff::functional::{self, ScalarFn};
use ns_autodiff::{Dual, Scalar, Tape};
use std::hint::black_box;

/// f(x) = sum_i ln(x_i^2 + 1)
struct LogSquares;

impl ScalarFn for LogSquares {
    fn eval<S: Scalar>(&self, x: &[S]) -> S {
        let mut acc = (x[0] * x[0] + 1.0).ln();
        for &xi in &x[1..] {
            acc = acc + (xi * xi + 1.0).ln();
        }
        acc
    }
}

fn inputs(n: usize) -> Vec<f64> {
    (0..n).map(|i| 1.0 + (i as f64) * 1e-3).collect()
}

fn bench_tape_build_and_backward(c: &mut Criterion) {
    let mut group = c.benchmark_group("ad_tape");

    for n_vars in [4usize, 16, 64, 256, 1024] {
        group.bench_with_input(BenchmarkId::new("build_and_backward", n_vars), &n_vars, |b, &n| {
            let x0 = inputs(n);
            b.iter(|| {
                let t = Tape::with_capacity(n * 4);
                let vars = t.vars(&x0);
                let f = LogSquares.eval(&vars);
                t.backward(f).unwrap();
                // Read a couple of adjoints to keep it "used".
                black_box((vars[0].adjoint(), vars[n / 2].adjoint()));
            })
        });

        group.bench_with_input(BenchmarkId::new("reuse_tape", n_vars), &n_vars, |b, &n| {
            let x0 = inputs(n);
            let t = Tape::with_capacity(n * 4);
            b.iter(|| {
                t.recover_memory().unwrap();
                let vars = t.vars(&x0);
                let f = LogSquares.eval(&vars);
                t.backward(f).unwrap();
                black_box(vars[0].adjoint());
            })
        });

        group.bench_with_input(BenchmarkId::new("nested_sum", n_vars), &n_vars, |b, &n| {
            let x0 = inputs(n);
            let t = Tape::new();
            let outer = t.vars(&x0);
            b.iter(|| {
                t.with_nested(|t| {
                    let s = t.sum(&outer);
                    let f = s.square();
                    t.backward(f).unwrap();
                    black_box(outer[0].adjoint());
                })
            })
        });
    }

    group.finish();
}

fn bench_dual_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("ad_dual");

    for n_vars in [4usize, 16, 64, 256] {
        group.bench_with_input(
            BenchmarkId::new("forward_grad_n_evals", n_vars),
            &n_vars,
            |b, &n| {
                // Forward-mode gradient: N evaluations, each with one seeded variable.
                let x0 = inputs(n);

                b.iter(|| {
                    let mut grad = vec![0.0; n];
                    for (seed, g) in grad.iter_mut().enumerate() {
                        let mut xs: Vec<Dual<f64>> = x0.iter().copied().map(Dual::constant).collect();
                        xs[seed].dot = 1.0;
                        *g = LogSquares.eval(&xs).dot;
                    }

                    black_box(grad[0]);
                })
            },
        );
    }

    group.finish();
}

fn bench_hessian(c: &mut Criterion) {
    let mut group = c.benchmark_group("ad_hessian");

    for n_vars in [4usize, 16, 64] {
        group.bench_with_input(BenchmarkId::new("forward_over_reverse", n_vars), &n_vars, |b, &n| {
            let x0 = inputs(n);
            let t = Tape::new();
            b.iter(|| {
                let (_, _, h) = functional::hessian(&t, &LogSquares, &x0).unwrap();
                black_box(h[(0, 0)]);
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tape_build_and_backward, bench_dual_ops, bench_hessian);
criterion_main!(benches);
