use float_eq::*;
use scalargrad::engine::*;

fn sanity_graph(x: &Value) -> Value {
    let z = 2. * x.clone() + 2. + x.clone();
    let q = z.relu() + z.clone() * x.clone();
    let h = (z.clone() * z).relu();
    h + q.clone() + q * x.clone()
}

fn more_ops_graph(a: &Value, b: &Value) -> Value {
    let mut c = a.clone() + b.clone();
    let mut d = a.clone() * b.clone() + b.pow(3.);
    c = c.clone() + c.clone() + 1.;
    c = c.clone() + 1. + c + -a.clone();
    d = d.clone() + d.clone() * 2. + (b.clone() + a.clone()).relu();
    d = d.clone() + 3. * d + (b.clone() - a.clone()).relu();
    let e = c - d;
    let f = e.pow(2.);
    let g = f.clone() / 2.0;
    g + 10.0 / f
}

#[test]
fn sanity_check() {
    let x = Value::new(-4.0);
    let y = sanity_graph(&x);
    y.backward();

    assert_float_eq!(y.data(), -20.0, abs <= 1e-10);
    assert_float_eq!(x.grad(), 46.0, abs <= 1e-10);
}

#[test]
fn more_ops() {
    let a = Value::new(-4.0);
    let b = Value::new(2.0);
    let g = more_ops_graph(&a, &b);
    g.backward();

    let tol = 1e-6;
    assert_float_eq!(g.data(), 24.70408163265306, abs <= tol);
    assert_float_eq!(a.grad(), 138.83381924198252, abs <= tol);
    assert_float_eq!(b.grad(), 645.5772594752186, abs <= tol);
}

#[test]
fn forward_matches_fresh_graph() {
    let a = Value::new(-4.0);
    let b = Value::new(2.0);
    let g = more_ops_graph(&a, &b);

    for (da, db) in [(1.5, -0.5), (3.0, 2.5), (-2.0, -7.0)] {
        a.set_data(da).unwrap();
        b.set_data(db).unwrap();
        g.forward();
        g.zero_grad();
        g.backward();

        let fa = Value::new(da);
        let fb = Value::new(db);
        let fresh = more_ops_graph(&fa, &fb);
        fresh.backward();

        assert_float_eq!(g.data(), fresh.data(), r2nd <= 1e-12);
        assert_float_eq!(a.grad(), fa.grad(), r2nd <= 1e-12);
        assert_float_eq!(b.grad(), fb.grad(), r2nd <= 1e-12);
    }
}

#[test]
fn forward_then_backward_sanity_graph() {
    let x = Value::new(-4.0);
    let y = sanity_graph(&x);

    x.set_data(1.0).unwrap();
    y.forward();
    y.zero_grad();
    y.backward();

    // z = 3x + 2 = 5, q = z + z*x = 10, h = z^2 = 25, y = h + q + q*x = 45
    assert_float_eq!(y.data(), 45.0, abs <= 1e-10);
    // dy/dx = 2z*3 + (3 + 3x + z)(1 + x) + q = 30 + 11*2 + 10
    assert_float_eq!(x.grad(), 62.0, abs <= 1e-10);
}
