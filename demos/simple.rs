use color_eyre::Result;
use scalargrad::engine::*;

fn main() -> Result<()> {
    color_eyre::install()?;

    let a = Value::new(3.);
    let b = Value::new(4.);
    let c = Value::new(5.);
    let d = Value::new(6.);
    let res = a.clone() * b.clone() + c.clone() - d.clone();
    res.backward();
    println!("{res} = {:.2}", res.data());

    a.set_data(2.3)?;
    b.set_data(0.5)?;
    c.set_data(3.2)?;
    d.set_data(6.4)?;
    res.forward();
    res.zero_grad();
    res.backward();

    for (name, v) in [("a", &a), ("b", &b), ("c", &c), ("d", &d)] {
        println!("{name}: {v}");
    }
    println!("{}", viz::render_dot(&res));

    Ok(())
}
